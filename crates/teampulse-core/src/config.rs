//! YAML configuration for a pulse deployment.
//!
//! One `pulse.yaml` file describes the data directory, the channels to
//! watch, the model provider, and the squad routing table. String values
//! support `${VAR}` environment placeholders so tokens stay out of the
//! file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use teampulse_schema::SquadConfig;

use crate::context::{RouteRule, SquadResolver};

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Channel ids scanned during ingestion.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub slack_token: String,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub squads: Vec<SquadConfig>,
    #[serde(default)]
    pub rules: Vec<RouteRule>,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            channels: vec![],
            slack_token: String::new(),
            provider: ProviderSettings::default(),
            squads: SquadResolver::default_squads(),
            rules: SquadResolver::default_rules(),
        }
    }
}

impl PulseConfig {
    /// Resolver over the configured squads and rules, falling back to the
    /// built-in defaults when either section is empty.
    pub fn resolver(&self) -> SquadResolver {
        let squads = if self.squads.is_empty() {
            SquadResolver::default_squads()
        } else {
            self.squads.clone()
        };
        let rules = if self.rules.is_empty() {
            SquadResolver::default_rules()
        } else {
            self.rules.clone()
        };
        SquadResolver::new(squads, rules)
    }
}

/// Substitute `${VAR}` placeholders with environment values. Missing
/// variables resolve to the empty string; an unclosed placeholder is
/// passed through untouched.
pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

pub fn load_config(path: &Path) -> Result<PulseConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let mut config: PulseConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))?;

    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn resolve_config_env(config: &mut PulseConfig) {
    config.slack_token = resolve_env_var(&config.slack_token);
    config.provider.api_key = resolve_env_var(&config.provider.api_key);
    config.provider.api_base = resolve_env_var(&config.provider.api_base);
    config.provider.model = resolve_env_var(&config.provider.model);
}

pub fn validate_config(config: &PulseConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for squad in &config.squads {
        if !seen.insert(squad.id.as_str()) {
            return Err(anyhow!("duplicate squad id: {}", squad.id));
        }
    }

    let by_id: std::collections::HashMap<&str, &SquadConfig> =
        config.squads.iter().map(|s| (s.id.as_str(), s)).collect();
    for squad in &config.squads {
        if let Some(parent) = squad.parent.as_deref() {
            let parent_squad = by_id
                .get(parent)
                .ok_or_else(|| anyhow!("unknown parent squad: {parent}"))?;
            // Hierarchy depth is capped at two levels.
            if parent_squad.parent.is_some() {
                return Err(anyhow!(
                    "squad '{}' would be nested more than two levels deep",
                    squad.id
                ));
            }
        }
        for sub in &squad.subsquads {
            if !by_id.contains_key(sub.as_str()) {
                return Err(anyhow!("unknown subsquad: {sub}"));
            }
        }
    }

    for rule in &config.rules {
        if rule.pattern.trim().is_empty() {
            return Err(anyhow!("route rule with empty pattern"));
        }
        if !config.squads.is_empty() && !by_id.contains_key(rule.squad.as_str()) {
            return Err(anyhow!("route rule targets unknown squad: {}", rule.squad));
        }
    }

    Ok(())
}
