//! Hook configuration loading
//!
//! Hooks are configured in YAML:
//!
//! ```yaml
//! hooks:
//!   PreToolUse:
//!     - matcher: "bash|fetch"
//!       hooks:
//!         - type: command
//!           command: "/usr/local/bin/validate.py"
//!           timeout: 10
//! ```
//!
//! Multiple files merge by concatenating matcher lists per event in load
//! order; within-source order is preserved. The config is immutable after
//! load and safe for concurrent reads.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::events::HookEvent;

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{env://([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap());

/// One executable hook entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEntry {
    /// Entry kind; only "command" is supported.
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Shell command, run as `sh -c <command>`.
    pub command: String,
    /// Per-entry timeout in seconds; 0 means the engine default.
    #[serde(default)]
    pub timeout: u64,
}

/// A tool-name pattern with its attached entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookMatcher {
    /// Regex matched against the tool name; empty matches every tool.
    #[serde(default)]
    pub matcher: String,
    pub hooks: Vec<HookEntry>,
}

/// Merged hook configuration for all events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub hooks: HashMap<HookEvent, Vec<HookMatcher>>,
}

impl HookConfig {
    /// Append another source's matchers, preserving order within and across
    /// sources.
    pub fn merge(&mut self, other: HookConfig) {
        for (event, matchers) in other.hooks {
            self.hooks.entry(event).or_default().extend(matchers);
        }
    }

    /// Entries selected for an event, in matcher-then-entry order.
    ///
    /// For matcher-based events, a matcher contributes its entries when its
    /// pattern is empty or matches the tool name. Other events run every
    /// configured entry.
    pub fn entries_for(&self, event: HookEvent, tool_name: Option<&str>) -> Vec<&HookEntry> {
        let Some(matchers) = self.hooks.get(&event) else {
            return Vec::new();
        };

        let mut entries = Vec::new();
        for matcher in matchers {
            let selected = if event.requires_matcher() {
                matches_pattern(&matcher.matcher, tool_name.unwrap_or(""))
            } else {
                true
            };
            if selected {
                entries.extend(matcher.hooks.iter());
            }
        }
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(|m| m.is_empty())
    }
}

/// Check a matcher pattern against a tool name.
///
/// An empty pattern matches everything; otherwise the pattern is a regex
/// that must match the full tool name, so `"a|b"` matches exactly the
/// alternatives `"a"` and `"b"` and substring matching needs an explicit
/// `".*write.*"`.
pub fn matches_pattern(pattern: &str, tool_name: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re.is_match(tool_name),
        Err(e) => {
            tracing::warn!(pattern = %pattern, "Invalid hook matcher regex: {e}");
            false
        }
    }
}

/// Load and merge hook configuration from YAML files, in the given order.
pub fn load_hook_config<P: AsRef<Path>>(paths: &[P]) -> Result<HookConfig> {
    let mut merged = HookConfig::default();

    for path in paths {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read hook config {}", path.display()))?;
        let substituted = substitute_env_vars(&raw)
            .with_context(|| format!("in hook config {}", path.display()))?;
        let config: HookConfig = serde_yaml::from_str(&substituted)
            .with_context(|| format!("failed to parse hook config {}", path.display()))?;
        merged.merge(config);
    }

    Ok(merged)
}

/// Replace `${env://VAR}` and `${env://VAR:-default}` patterns.
///
/// A set variable wins; an unset variable falls back to its default, and a
/// missing default is an error so a broken config fails at load, not at
/// hook-fire time.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let mut missing = Vec::new();

    let result = ENV_VAR_PATTERN.replace_all(content, |caps: &regex::Captures<'_>| {
        let var_name = &caps[1];
        match std::env::var(var_name) {
            Ok(value) if !value.is_empty() => value,
            _ => match caps.get(3) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.push(var_name.to_string());
                    caps[0].to_string()
                }
            },
        }
    });

    if missing.is_empty() {
        Ok(result.into_owned())
    } else {
        Err(anyhow::anyhow!(
            "required environment variables not set: {}",
            missing.join(", ")
        ))
    }
}
