//! Engine configuration (`shipyard.toml`).

use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// What an import does with a same-named target object owned by another package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Fail the package and end the run.
    #[default]
    Abort,
    /// Keep the target object and map the dependency onto it.
    Skip,
    /// Install over the target object.
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSettings {
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Recorded as the installing user in transaction logs.
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_user() -> String {
    "shipyard".to_string()
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            user: default_user(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identity of this server, recorded in exported archives.
    pub server_name: String,
    pub product_version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    /// Dependency-type catalog replacing the built-in one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types_file: Option<PathBuf>,
    #[serde(default)]
    pub import: ImportSettings,
}

impl EngineConfig {
    pub fn new(server_name: impl Into<String>, product_version: Version) -> Self {
        Self {
            server_name: server_name.into(),
            product_version,
            state_dir: None,
            types_file: None,
            import: ImportSettings::default(),
        }
    }

    pub fn with_state_dir(mut self, state_dir: PathBuf) -> Self {
        self.state_dir = Some(state_dir);
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DeployError::io(path, e))?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| DeployError::Config {
            path: origin.to_path_buf(),
            reason: describe_toml_error(&e, content),
        })?;
        if config.server_name.trim().is_empty() {
            return Err(DeployError::Config {
                path: origin.to_path_buf(),
                reason: "server_name must not be empty".into(),
            });
        }
        Ok(config)
    }

    /// Configured state directory, or the platform default.
    pub fn resolve_state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_state_dir(),
        }
    }
}

/// `$XDG_STATE_HOME/shipyard` on Unix (falling back to the local data dir),
/// `%LOCALAPPDATA%\shipyard` on Windows.
pub fn default_state_dir() -> Result<PathBuf> {
    let base = if cfg!(unix) {
        dirs::state_dir().or_else(dirs::data_local_dir)
    } else {
        dirs::data_local_dir()
    };
    base.map(|dir| dir.join("shipyard"))
        .ok_or_else(|| DeployError::Config {
            path: PathBuf::from("<state_dir>"),
            reason: "cannot determine a state directory; set state_dir".into(),
        })
}

/// TOML parse error with the offending lines quoted.
pub(crate) fn describe_toml_error(error: &toml::de::Error, content: &str) -> String {
    let message = error.message().to_string();
    match error.span() {
        Some(span) => {
            let line_num = content[..span.start.min(content.len())]
                .bytes()
                .filter(|b| *b == b'\n')
                .count()
                + 1;
            format!(
                "TOML parsing error at line {}:\n{}\n\nError: {}",
                line_num,
                line_context(content, line_num),
                message
            )
        }
        None => format!("TOML parsing error: {message}"),
    }
}

fn line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2);
    let end = (line_num + 2).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = EngineConfig::parse(
            r#"
server_name = "cms-prod:9992"
product_version = "8.1.0"
"#,
            Path::new("shipyard.toml"),
        )
        .unwrap();
        assert_eq!(config.server_name, "cms-prod:9992");
        assert_eq!(config.import.conflict_policy, ConflictPolicy::Abort);
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn parse_import_settings() {
        let config = EngineConfig::parse(
            r#"
server_name = "cms"
product_version = "8.1.0"
state_dir = "/var/lib/shipyard"

[import]
conflict_policy = "skip"
user = "deployer"
"#,
            Path::new("shipyard.toml"),
        )
        .unwrap();
        assert_eq!(config.import.conflict_policy, ConflictPolicy::Skip);
        assert_eq!(config.import.user, "deployer");
        assert_eq!(
            config.resolve_state_dir().unwrap(),
            PathBuf::from("/var/lib/shipyard")
        );
    }

    #[test]
    fn parse_error_quotes_line() {
        let err = EngineConfig::parse(
            "server_name = \"cms\"\nproduct_version = 8.1.0\n",
            Path::new("shipyard.toml"),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("shipyard.toml"));
        assert!(message.contains("line 2"));
    }

    #[test]
    fn empty_server_name_is_rejected() {
        let err = EngineConfig::parse(
            "server_name = \" \"\nproduct_version = \"1.0.0\"\n",
            Path::new("shipyard.toml"),
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::Config { .. }));
    }
}
