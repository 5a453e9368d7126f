//! TOML configuration for the analyzer client.
//!
//! The first file found wins:
//!
//! 1. `<workspace>/.ttx/config.toml`
//! 2. `<config dir>/ttx/config.toml` (e.g. `~/.config/ttx/config.toml`)
//!
//! ```toml
//! [analyzer]
//! command = "${TTX_HOME}/bin/ttx-lang-server"
//! transport = "stdio"
//! request_timeout_ms = 10000
//! ```

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::Deserialize;
use ttx_lsp::AnalyzerConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TtxConfig {
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Replace `${VAR}` with the variable's value; unset variables become empty.
/// An unterminated `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let var = &after[..close];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

impl TtxConfig {
    /// Load the configuration for `workspace_root`, or defaults if no file
    /// exists.
    pub fn load(workspace_root: &Path) -> Result<Self, ConfigError> {
        let candidates = [Some(workspace_config_path(workspace_root)), user_config_path()];
        for path in candidates.into_iter().flatten() {
            if path.exists() {
                tracing::debug!("Loading config from {}", path.display());
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {}: {err}", path.display());
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str::<Self>(&content) {
            Ok(mut config) => {
                config.expand_env();
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {}: {err}", path.display());
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    fn expand_env(&mut self) {
        let analyzer = &mut self.analyzer;
        analyzer.command = PathBuf::from(expand_env_vars(&analyzer.command.to_string_lossy()));
        for arg in &mut analyzer.args {
            *arg = expand_env_vars(arg);
        }
    }
}

#[must_use]
pub fn workspace_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".ttx").join("config.toml")
}

#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ttx").join("config.toml"))
}
