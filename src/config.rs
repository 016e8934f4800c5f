//! Process-wide configuration, built once at startup and handed to the pipeline.
//!
//! Precedence (lowest first): built-in defaults, YAML file, `RENTA_*` env vars.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub warehouse: WarehouseConfig,
    pub runtime: RuntimeConfig,
}

/// Where the processing log and the aggregate results are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub log_table: String,
    pub results_table: String,
    /// Location the load jobs run in.
    pub location: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: "my-cf-learning".into(),
            dataset_id: "file_processing".into(),
            log_table: "archivo_log".into(),
            results_table: "cliente_renta_resultado".into(),
            location: "US".into(),
        }
    }
}

impl WarehouseConfig {
    pub fn log_table_ref(&self) -> TableRef {
        TableRef::new(&self.project_id, &self.dataset_id, &self.log_table)
    }

    pub fn results_table_ref(&self) -> TableRef {
        TableRef::new(&self.project_id, &self.dataset_id, &self.results_table)
    }
}

/// Fully-qualified warehouse table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(project_id: &str, dataset_id: &str, table_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            dataset_id: dataset_id.to_string(),
            table_id: table_id.to_string(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Delay between load-job status polls.
    pub job_poll_interval_secs: u64,
    /// Upper bound on waiting for a load job.
    pub job_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            job_poll_interval_secs: 1,
            job_timeout_secs: 300,
        }
    }
}

impl RuntimeConfig {
    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_secs.max(1))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

impl Config {
    /// Defaults, overlaid by `path` (if given), overlaid by the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env(|k| env::var(k).ok())?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Apply `RENTA_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let wh = &mut self.warehouse;
        for (key, slot) in [
            ("RENTA_PROJECT_ID", &mut wh.project_id),
            ("RENTA_DATASET_ID", &mut wh.dataset_id),
            ("RENTA_LOG_TABLE", &mut wh.log_table),
            ("RENTA_RESULTS_TABLE", &mut wh.results_table),
            ("RENTA_LOCATION", &mut wh.location),
        ] {
            if let Some(v) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = v.trim().to_string();
            }
        }

        if let Some(v) = lookup("RENTA_JOB_TIMEOUT_SECS") {
            self.runtime.job_timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("RENTA_JOB_TIMEOUT_SECS must be an integer, got {v:?}"))?;
        }
        Ok(())
    }
}
