//! Shared helpers for the CLI subcommands: tracing setup and config loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use oracle_agent::OracleConfig;
use oracle_web::WebConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Config file picked up from the working directory when `--config` is not
/// given.
pub const DEFAULT_CONFIG_FILE: &str = "oracle.toml";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber.  `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init();
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Everything read from one config file.
#[derive(Debug)]
pub struct LoadedConfig {
    pub oracle: OracleConfig,
    pub server: WebConfig,
    /// The file the settings came from, if any.
    pub source: Option<PathBuf>,
}

/// Load settings from `explicit`, or from `oracle.toml` in `cwd` if it
/// exists, or fall back to built-in defaults.
///
/// An explicitly named file must exist.
pub fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<LoadedConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let candidate = cwd.join(DEFAULT_CONFIG_FILE);
            candidate.is_file().then_some(candidate)
        }
    };

    let Some(path) = path else {
        info!("no config file found, using defaults");
        return Ok(LoadedConfig {
            oracle: OracleConfig::default(),
            server: WebConfig::default(),
            source: None,
        });
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let oracle = OracleConfig::from_toml_str(&text)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    let server = WebConfig::from_toml_str(&text)
        .with_context(|| format!("invalid [server] table in {}", path.display()))?;

    info!(path = %path.display(), tools = oracle.providers.len(), "loaded config");
    Ok(LoadedConfig {
        oracle,
        server,
        source: Some(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(None, dir.path()).unwrap();
        assert!(loaded.source.is_none());
        assert_eq!(loaded.oracle.providers.len(), 3);
        assert_eq!(loaded.server, WebConfig::default());
    }

    #[test]
    fn picks_up_oracle_toml_from_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            r#"
[server]
port = 9100
emit_done_frame = false

[[providers]]
name = "ask_local"
kind = "openai"
model = "llama3"
base_url = "http://localhost:11434/v1"
"#,
        )
        .unwrap();

        let loaded = load_config(None, dir.path()).unwrap();
        assert_eq!(loaded.server.port, 9100);
        assert!(!loaded.server.emit_done_frame);
        assert_eq!(loaded.oracle.providers.len(), 1);
        assert_eq!(loaded.oracle.providers[0].name, "ask_local");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_config(Some(&missing), dir.path()).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server]\nport = \"eighty\"\n").unwrap();
        assert!(load_config(Some(&path), dir.path()).is_err());
    }
}
