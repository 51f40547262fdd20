use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_dir: default_db_dir(),
            log_dir: default_log_dir(),
            metrics_enabled: default_metrics_enabled(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.db_dir.as_os_str().is_empty() {
            return Err(invalid("app.db_dir cannot be empty"));
        }
        if self.metrics_enabled && self.metrics_port == 0 {
            return Err(invalid("app.metrics_port must be set when metrics are enabled"));
        }
        Ok(())
    }
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("./db")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9181
}
