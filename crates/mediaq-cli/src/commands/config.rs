//! `mediaq config` command implementation

use crate::config::{Config, RemoteConfig};
use crate::error::{CliError, Result};
use std::path::Path;

/// Print the effective configuration as TOML, secrets masked
pub async fn show(config_path: Option<&Path>) -> Result<()> {
    let config = redacted(Config::load(config_path)?);
    let rendered = toml::to_string_pretty(&config)
        .map_err(|e| CliError::config(format!("cannot render configuration: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

/// Print where the config file is read from
pub async fn path(config_path: Option<&Path>) -> Result<()> {
    match config_path.map(Path::to_path_buf).or_else(Config::default_path) {
        Some(path) => {
            let marker = if path.exists() { "" } else { " (not created)" };
            println!("{}{}", path.display(), marker);
            Ok(())
        },
        None => Err(CliError::config("no configuration directory on this platform")),
    }
}

fn redacted(mut config: Config) -> Config {
    if let RemoteConfig::S3 {
        access_key,
        secret_key,
        ..
    } = &mut config.remote
    {
        for key in [access_key, secret_key] {
            if key.is_some() {
                *key = Some("********".to_string());
            }
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_masked() {
        let mut config = Config::default();
        config.remote = RemoteConfig::S3 {
            bucket: "media".to_string(),
            region: "eu-west-1".to_string(),
            endpoint: None,
            access_key: Some("AKIA123".to_string()),
            secret_key: Some("very-secret".to_string()),
            path_style: false,
        };
        let shown = toml::to_string_pretty(&redacted(config)).unwrap_or_default();
        assert!(!shown.contains("very-secret"));
        assert!(shown.contains("media"));
    }
}
