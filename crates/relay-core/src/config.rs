//! Runtime configuration
//!
//! YAML configuration merged from the user-level file and an optional
//! explicit file, with `${env://VAR:-default}` substitution applied before
//! parsing. CLI flags override whatever the files say; that layering lives
//! in the CLI, not here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hooks::config::{substitute_env_vars, HookConfig};

pub const DEFAULT_MAX_STEPS: usize = 20;
pub const DEFAULT_MESSAGE_WINDOW: usize = 40;

/// One tool server subprocess to spawn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// `provider:model` string, e.g. "anthropic:claude-sonnet-4-5".
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Generation steps per prompt before the loop stops; 0 means unlimited.
    #[serde(default)]
    pub max_steps: Option<usize>,

    /// Conversation window in messages; 0 disables pruning.
    #[serde(default)]
    pub message_window: Option<usize>,

    /// Override the provider base URL (self-hosted gateways).
    #[serde(default)]
    pub provider_url: Option<String>,

    #[serde(default)]
    pub tool_servers: HashMap<String, ToolServerConfig>,

    /// Standalone hook config files, merged after the inline hooks.
    #[serde(default)]
    pub hook_files: Vec<PathBuf>,

    #[serde(flatten)]
    pub hooks: HookConfig,
}

impl RuntimeConfig {
    /// Merge another config over this one. Scalars from `other` win when
    /// set; tool servers merge by name; hooks concatenate.
    pub fn merge(&mut self, other: RuntimeConfig) {
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.system_prompt.is_some() {
            self.system_prompt = other.system_prompt;
        }
        if other.max_steps.is_some() {
            self.max_steps = other.max_steps;
        }
        if other.message_window.is_some() {
            self.message_window = other.message_window;
        }
        if other.provider_url.is_some() {
            self.provider_url = other.provider_url;
        }
        self.tool_servers.extend(other.tool_servers);
        self.hook_files.extend(other.hook_files);
        self.hooks.merge(other.hooks);
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps.unwrap_or(DEFAULT_MAX_STEPS)
    }

    pub fn message_window(&self) -> usize {
        self.message_window.unwrap_or(DEFAULT_MESSAGE_WINDOW)
    }

    /// Parse one config file, substituting environment references first.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let substituted =
            substitute_env_vars(&raw).with_context(|| format!("in config {}", path.display()))?;
        serde_yaml::from_str(&substituted)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Load configuration: the user-level file (if present) overlaid by an
    /// explicit file (if given). A missing user-level file is not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = RuntimeConfig::default();

        if let Some(path) = default_config_path() {
            if path.exists() {
                config.merge(Self::from_file(&path)?);
            }
        }
        if let Some(path) = explicit {
            config.merge(Self::from_file(path)?);
        }

        // Standalone hook files append after the inline definitions.
        let hook_files = std::mem::take(&mut config.hook_files);
        if !hook_files.is_empty() {
            config
                .hooks
                .merge(crate::hooks::config::load_hook_config(&hook_files)?);
        }

        Ok(config)
    }
}

/// `~/.config/relay/config.yml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("relay").join("config.yml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookEvent;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "config.yml",
            r#"
model: "openai:gpt-4o"
maxSteps: 10
messageWindow: 30
toolServers:
  filesystem:
    command: "npx"
    args: ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
hooks:
  PreToolUse:
    - matcher: "bash"
      hooks:
        - type: command
          command: "echo ok"
"#,
        );

        let config = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(config.model.as_deref(), Some("openai:gpt-4o"));
        assert_eq!(config.max_steps(), 10);
        assert_eq!(config.message_window(), 30);
        assert_eq!(config.tool_servers["filesystem"].command, "npx");
        assert_eq!(config.hooks.hooks[&HookEvent::PreToolUse].len(), 1);
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_steps(), DEFAULT_MAX_STEPS);
        assert_eq!(config.message_window(), DEFAULT_MESSAGE_WINDOW);
        assert!(config.tool_servers.is_empty());
    }

    #[test]
    fn merge_overlays_scalars_and_concatenates_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let base = RuntimeConfig::from_file(&write(
            &dir,
            "base.yml",
            r#"
model: "anthropic:claude-sonnet-4-5"
maxSteps: 5
hooks:
  Stop:
    - matcher: ""
      hooks:
        - type: command
          command: "notify base"
"#,
        ))
        .unwrap();

        let overlay = RuntimeConfig::from_file(&write(
            &dir,
            "overlay.yml",
            r#"
maxSteps: 9
hooks:
  Stop:
    - matcher: ""
      hooks:
        - type: command
          command: "notify overlay"
"#,
        ))
        .unwrap();

        let mut merged = base;
        merged.merge(overlay);
        assert_eq!(merged.model.as_deref(), Some("anthropic:claude-sonnet-4-5"));
        assert_eq!(merged.max_steps(), 9);
        assert_eq!(merged.hooks.hooks[&HookEvent::Stop].len(), 2);
    }

    #[test]
    fn env_substitution_in_tool_server_env() {
        std::env::set_var("RELAY_CONFIG_TEST_TOKEN", "sekrit");
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "config.yml",
            r#"
toolServers:
  github:
    command: "gh-tools"
    env:
      TOKEN: "${env://RELAY_CONFIG_TEST_TOKEN}"
"#,
        );
        let config = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(config.tool_servers["github"].env["TOKEN"], "sekrit");
    }
}
