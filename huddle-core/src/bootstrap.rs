//! Configuration loading

use std::path::Path;

use anyhow::Result;

use crate::Config;

const CONFIG_PATH_ENV: &str = "HUDDLE_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Load configuration from a config file or environment variables
///
/// Config file search order:
/// 1. `cli_path` (from `--config`)
/// 2. `HUDDLE_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. Fall back to environment variables only
///
/// Runs before logging is initialised, so progress goes to stderr.
pub fn load_config(cli_path: Option<&str>) -> Result<Config> {
    let config_path = resolve_config_path(cli_path);

    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path).map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env()?
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

fn resolve_config_path(cli_path: Option<&str>) -> Option<String> {
    if let Some(path) = cli_path {
        return Some(path.to_string());
    }

    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            Path::new(DEFAULT_CONFIG_FILE)
                .exists()
                .then(|| DEFAULT_CONFIG_FILE.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_path_wins() {
        assert_eq!(
            resolve_config_path(Some("/etc/huddle.yaml")).as_deref(),
            Some("/etc/huddle.yaml")
        );
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "logging:\n  format: xml").unwrap();

        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("logging.format"));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  port: 9200").unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.server.port, 9200);
    }
}
