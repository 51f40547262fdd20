use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;

/// Time since `since`, zero when `since` lies in the future.
pub(crate) fn elapsed_since(since: DateTime<Utc>) -> Duration {
    (Utc::now() - since).to_std().unwrap_or(Duration::ZERO)
}

