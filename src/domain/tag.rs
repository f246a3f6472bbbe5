use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default validity window for tags cached on first authorization.
pub const DEFAULT_TAG_VALIDITY_DAYS: i64 = 360;

/// An RFID/authorization identifier cached per station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_id: String,
    pub expiry_date: DateTime<Utc>,
}

impl Tag {
    pub fn new(tag_id: impl Into<String>, expiry_date: DateTime<Utc>) -> Self {
        Self {
            tag_id: tag_id.into(),
            expiry_date,
        }
    }

    /// Tag with the default 360-day validity window, counted from now.
    pub fn with_default_expiry(tag_id: impl Into<String>) -> Self {
        Self::new(tag_id, Utc::now() + Duration::days(DEFAULT_TAG_VALIDITY_DAYS))
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_date < Utc::now()
    }
}
