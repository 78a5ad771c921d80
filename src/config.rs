// Dealwatch Configuration: TOML file + per-field environment overrides,
// the same "config file with env-var escape hatch for secrets" shape used
// elsewhere in the corpus for engine configuration.
//
// Resolution order: `DEALWATCH_CONFIG` env var path (default
// `./dealwatch.toml`, missing file tolerated — defaults apply), then
// environment variables listed per-field below win over whatever the
// file says.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::atoms::constants::DEFAULT_SCHEDULER_PARALLELISM;
use crate::atoms::error::{EngineError, EngineResult};

/// Default CRM field mapping (spec §6.2) — internal name to external key.
/// A fresh deployment with no configured CRM still has a sensible mapping
/// to tweak rather than an empty table.
fn default_field_map() -> HashMap<String, String> {
    [
        ("deal_score", "dealscore"),
        ("property_address", "propertyaddress"),
        ("list_price", "list_price"),
        ("est_profit", "estprofit"),
        ("mls_id", "mls_id"),
        ("price_per_sqft", "price_per_sqft"),
        ("below_market_pct", "below_market_pct"),
        ("days_on_market", "days_on_market"),
        ("deal_quality", "deal_quality"),
        ("estimated_arv", "estimated_arv"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrmConfig {
    /// Base URL of the CRM's opportunity-ingest endpoint. `None` leaves
    /// the CRM sync worker idle (outbox rows accumulate, never drained) —
    /// a deliberate no-op rather than a startup failure, so the rest of
    /// the service still runs without a CRM configured.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub pipeline_id: String,
    pub default_stage_id: String,
    pub field_map: HashMap<String, String>,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            pipeline_id: "default".into(),
            default_stage_id: "new".into(),
            field_map: default_field_map(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub parallelism: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_SCHEDULER_PARALLELISM,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the SQLite database and corpus snapshot backup.
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub scheduler: SchedulerConfig,
    pub crm: CrmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "0.0.0.0:8080".into(),
            scheduler: SchedulerConfig::default(),
            crm: CrmConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration: optional TOML file, then environment overrides
    /// for secrets and deployment-specific values. Missing file is not an
    /// error — defaults apply, with a log line noting it.
    pub fn load() -> EngineResult<Self> {
        let path = std::env::var("DEALWATCH_CONFIG").unwrap_or_else(|_| "./dealwatch.toml".into());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            info!("[config] no config file at {path:?}, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("failed to parse {path:?}: {e}")))?;
        info!("[config] loaded configuration from {path:?}");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("DEALWATCH_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("DEALWATCH_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(n) = std::env::var("DEALWATCH_SCHEDULER_PARALLELISM") {
            match n.parse() {
                Ok(parsed) => self.scheduler.parallelism = parsed,
                Err(_) => warn!("[config] ignoring non-numeric DEALWATCH_SCHEDULER_PARALLELISM={n:?}"),
            }
        }
        if let Ok(url) = std::env::var("DEALWATCH_CRM_BASE_URL") {
            self.crm.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("DEALWATCH_CRM_API_KEY") {
            self.crm.api_key = Some(key);
        }
        if let Ok(id) = std::env::var("DEALWATCH_CRM_PIPELINE_ID") {
            self.crm.pipeline_id = id;
        }
        if let Ok(id) = std::env::var("DEALWATCH_CRM_STAGE_ID") {
            self.crm.default_stage_id = id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::from_file(Path::new("/nonexistent/dealwatch.toml")).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.scheduler.parallelism, DEFAULT_SCHEDULER_PARALLELISM);
        assert_eq!(config.crm.field_map.get("deal_score"), Some(&"dealscore".to_string()));
    }

    #[test]
    fn parses_a_minimal_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dealwatch.toml");
        std::fs::write(
            &path,
            r#"
            bind_addr = "127.0.0.1:9000"

            [crm]
            base_url = "https://crm.example.com"
            pipeline_id = "investor-leads"
            "#,
        )
        .unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.crm.base_url.as_deref(), Some("https://crm.example.com"));
        assert_eq!(config.crm.pipeline_id, "investor-leads");
        // field_map omitted from the file entirely falls back to serde's
        // struct default via #[serde(default)] on CrmConfig.
        assert!(!config.crm.field_map.is_empty());
    }
}
