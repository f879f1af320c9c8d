//! Local program as a transformation service
//!
//! `{input}` and `{output}` inside arguments are replaced with the stage's
//! paths. The default convert stage runs ffmpeg to copy the audio track of
//! a video into an `.m4a` container.

use super::{StageError, StageResult, Transformer};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
    fatal_markers: Vec<String>,
}

impl CommandTransformer {
    pub fn new(program: impl Into<String>, args: Vec<String>, fatal_markers: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            fatal_markers,
        }
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }

    fn classify_failure(&self, code: Option<i32>, stderr: &str) -> StageError {
        let detail = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no diagnostic output")
            .trim();
        let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());

        if self.fatal_markers.iter().any(|m| stderr.contains(m.as_str())) {
            StageError::fatal(format!("{} rejected input (exit {}): {}", self.program, code, detail))
        } else {
            StageError::retriable(format!("{} failed (exit {}): {}", self.program, code, detail))
        }
    }
}

#[async_trait]
impl Transformer for CommandTransformer {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn transform(&self, input: &Path, output: &Path) -> StageResult {
        let args = self.render_args(input, output);
        debug!(?args, "Running transformation command");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StageError::fatal(format!(
                    "program '{}' not found; install it or change the transform config",
                    self.program
                )));
            },
            Err(e) => {
                return Err(StageError::retriable(format!(
                    "failed to start '{}': {}",
                    self.program, e
                )))
            },
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(self.classify_failure(out.status.code(), &stderr));
        }

        if !output.exists() {
            return Err(StageError::fatal(format!(
                "{} exited successfully but wrote no output",
                self.program
            )));
        }

        Ok(())
    }
}
