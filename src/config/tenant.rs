use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Process wide preferences held by the settings actor.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TenantSettings {
    /// IANA zone used wherever aggregates cross day boundaries
    #[serde(default = "default_time_zone")]
    pub preferred_time_zone: String,

    #[serde(default = "default_date_range")]
    pub default_date_range: String,

    #[serde(default = "default_week_starts_on")]
    pub week_starts_on: WeekStart,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    Monday,
    Saturday,
    Sunday,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            preferred_time_zone: default_time_zone(),
            default_date_range: default_date_range(),
            week_starts_on: default_week_starts_on(),
        }
    }
}

impl TenantSettings {
    pub fn validate(&self) -> Result<()> {
        if self.preferred_time_zone.trim().is_empty() {
            return Err(invalid("tenant.preferred_time_zone cannot be empty"));
        }
        if self.default_date_range.trim().is_empty() {
            return Err(invalid("tenant.default_date_range cannot be empty"));
        }
        Ok(())
    }
}

fn default_time_zone() -> String {
    "UTC".to_string()
}
fn default_date_range() -> String {
    "last7days".to_string()
}
fn default_week_starts_on() -> WeekStart {
    WeekStart::Monday
}
