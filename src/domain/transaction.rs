use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One charging session, bounded by StartTransaction/StopTransaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: i64,
    pub tag_id: String,
    pub connector_id: u32,
    pub time_start: DateTime<Utc>,
    pub meter_start: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_stop: Option<i64>,
}

impl Transaction {
    pub fn begin(
        tx_id: i64,
        tag_id: impl Into<String>,
        connector_id: u32,
        time_start: DateTime<Utc>,
        meter_start: i64,
    ) -> Self {
        Self {
            tx_id,
            tag_id: tag_id.into(),
            connector_id,
            time_start,
            meter_start,
            time_end: None,
            meter_stop: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.time_end.is_none()
    }

    /// A transaction can be billed only once both meter ends are known.
    pub fn is_billable(&self) -> bool {
        self.meter_stop.is_some()
    }

    /// Energy delivered over the session, in the station's meter unit.
    pub fn energy_delivered(&self) -> Option<i64> {
        self.meter_stop.map(|stop| stop - self.meter_start)
    }
}
