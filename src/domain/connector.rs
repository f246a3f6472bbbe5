use serde::{Deserialize, Serialize};

/// A single physical socket on a charging station.
///
/// Created lazily on the first StatusNotification or MeterValues that names
/// its id, updated in place afterwards. The status is always overwritten;
/// meter fields only when the message carried a new reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub connector_id: u32,
    pub last_status: Option<String>,
    pub last_meter_read: Option<String>,
    pub meter_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Connector {
    pub fn new(connector_id: u32) -> Self {
        Self {
            connector_id,
            last_status: None,
            last_meter_read: None,
            meter_unit: None,
            metadata: None,
        }
    }
}
