//! Configuration for claimcheck.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CLAIMCHECK_HOME, CLAIMCHECK_WEBHOOK_URL, API keys)
//! 2. Config file (.claimcheck/config.yaml)
//! 3. Defaults (~/.claimcheck)
//!
//! Config file discovery:
//! - Searches current directory and parents for .claimcheck/config.yaml
//! - Paths in config file are relative to the .claimcheck/ directory
//!
//! Every subsystem section is optional and falls back to its defaults.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{ChatConfig, SearchGatewayConfig};
use crate::analysis::AnalysisSettings;
use crate::core::aggregate::AggregationSettings;
use crate::core::budget::BudgetLimits;
use crate::core::cache::CacheSettings;
use crate::core::controller::{ControllerConfig, ResearchSettings};
use crate::core::health::BreakerSettings;
use crate::core::provenance::ProvenanceSettings;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".claimcheck";
const DEFAULT_REASONING_KEY_ENV: &str = "CLAIMCHECK_REASONING_API_KEY";
const DEFAULT_SEARCH_KEY_ENV: &str = "CLAIMCHECK_SEARCH_API_KEY";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub budget: BudgetLimits,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub research: ResearchSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub provenance: ProvenanceSettings,
    #[serde(default)]
    pub aggregation: AggregationSettings,
    #[serde(default)]
    pub providers: ProviderSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .claimcheck/)
    pub home: Option<String>,
    /// SQLite cache file (relative to .claimcheck/)
    pub cache: Option<String>,
}

/// Collaborator endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub reasoning: Option<ReasoningProviderConfig>,
    #[serde(default)]
    pub search: Option<SearchProviderConfig>,
    /// Outage notifications are posted here when set
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_reasoning_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProviderConfig {
    pub endpoint: String,
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
}

fn default_reasoning_key_env() -> String {
    DEFAULT_REASONING_KEY_ENV.to_string()
}
fn default_search_key_env() -> String {
    DEFAULT_SEARCH_KEY_ENV.to_string()
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory (jobs, cache)
    pub home: PathBuf,
    pub cache_path: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub settings: ConfigFile,
}

impl ResolvedConfig {
    pub fn jobs_dir(&self) -> PathBuf {
        self.home.join("jobs")
    }

    /// Settings handed to the research controller
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            budget: self.settings.budget.clone(),
            research: self.settings.research.clone(),
            provenance: self.settings.provenance.clone(),
            aggregation: self.settings.aggregation.clone(),
        }
    }

    /// Reasoning client settings, if a provider is configured and its key is set
    pub fn chat_config(&self) -> Option<ChatConfig> {
        let reasoning = self.settings.providers.reasoning.as_ref()?;
        let api_key = std::env::var(&reasoning.api_key_env).ok().filter(|k| !k.is_empty())?;
        Some(ChatConfig {
            base_url: reasoning.base_url.clone(),
            model: reasoning.model.clone(),
            api_key,
        })
    }

    /// Search gateway settings, if configured
    pub fn search_config(&self) -> Option<SearchGatewayConfig> {
        let search = self.settings.providers.search.as_ref()?;
        Some(SearchGatewayConfig {
            endpoint: search.endpoint.clone(),
            api_key: std::env::var(&search.api_key_env).ok().filter(|k| !k.is_empty()),
        })
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.settings.providers.webhook_url.as_deref()
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path).canonicalize().unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    resolve(find_config_file())
}

fn resolve(config_file: Option<PathBuf>) -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let mut settings = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let home = if let Ok(env_home) = std::env::var("CLAIMCHECK_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(_), Some(home_path)) = (&config_file, &settings.paths.home) {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let cache_path = match (&config_file, &settings.paths.cache) {
        (Some(_), Some(cache)) => resolve_path(config_dir, cache),
        _ => home.join("cache.db"),
    };

    if let Ok(url) = std::env::var("CLAIMCHECK_WEBHOOK_URL") {
        if !url.is_empty() {
            settings.providers.webhook_url = Some(url);
        }
    }

    Ok(ResolvedConfig {
        home,
        cache_path,
        config_file,
        settings,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// The claimcheck state directory
pub fn claimcheck_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Per-job audit directories ($CLAIMCHECK_HOME/jobs)
pub fn jobs_dir() -> Result<PathBuf> {
    Ok(config()?.jobs_dir())
}

/// The search cache database
pub fn cache_path() -> Result<PathBuf> {
    Ok(config()?.cache_path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    use crate::core::budget::EnforcementMode;

    fn write_config(temp: &TempDir, yaml: &str) -> PathBuf {
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", yaml).unwrap();
        path
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "version: \"1.0\"\n");

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.version.as_deref(), Some("1.0"));
        assert_eq!(config.budget.max_iterations, 5);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.cache.ttl_days, 7);
        assert_eq!(config.research.evidence_cap, 40);
        assert!(config.providers.reasoning.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
budget:
  max_searches: 4
  enforcement: soft
research:
  queries_first_iteration: 2
  domain_deny: [example.com]
analysis:
  remote:
    evidence_quality: false
providers:
  reasoning:
    base_url: https://llm.internal/v1
    model: small
  webhook_url: https://hooks.internal/outage
"#,
        );

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.budget.max_searches, 4);
        assert_eq!(config.budget.max_iterations, 5);
        assert_eq!(config.budget.enforcement, EnforcementMode::Soft);
        assert_eq!(config.research.queries_first_iteration, 2);
        assert_eq!(config.research.domain_deny, vec!["example.com"]);
        assert!(!config.analysis.remote.evidence_quality);
        assert!(config.analysis.remote.verdict_generation);

        let reasoning = config.providers.reasoning.unwrap();
        assert_eq!(reasoning.model, "small");
        assert_eq!(reasoning.api_key_env, DEFAULT_REASONING_KEY_ENV);
    }

    #[test]
    fn test_paths_resolve_relative_to_config_dir() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "paths:\n  home: ./state\n  cache: /var/tmp/claimcheck.db\n");

        let resolved = resolve(Some(path)).unwrap();
        if std::env::var("CLAIMCHECK_HOME").is_err() {
            assert!(resolved.home.ends_with("state"));
            assert_eq!(resolved.jobs_dir(), resolved.home.join("jobs"));
        }
        assert_eq!(resolved.cache_path, PathBuf::from("/var/tmp/claimcheck.db"));
        assert_eq!(resolved.controller_config().research.evidence_cap, 40);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(resolve_path(&base, "./subdir"), PathBuf::from("/home/user/project/subdir"));
        assert_eq!(resolve_path(&base, "/absolute/path"), PathBuf::from("/absolute/path"));
    }
}
