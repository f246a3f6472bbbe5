//! OCPP 1.6 typed message payloads.
//!
//! Inbound Call payloads are deserialized into these structs and wrapped in
//! the closed [`Action`] enum; the engine dispatches over it exhaustively.
//! Field names follow the 1.6J camelCase wire convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Boot Notification request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootNotificationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_box_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

impl BootNotificationRequest {
    /// The stable station identity. Stations populate either serial field
    /// depending on vendor; the charge-point one wins when both are present.
    pub fn serial_number(&self) -> Option<&str> {
        self.charge_point_serial_number
            .as_deref()
            .or(self.charge_box_serial_number.as_deref())
    }
}

/// Authorize request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_tag: String,
}

/// Status Notification request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
}

/// One sampled reading inside a meter value block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A timestamped block of sampled readings. The same shape carries both
/// MeterValues payloads and StopTransaction's embedded transactionData.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sampled_value: Vec<SampledValue>,
}

/// Meter Values request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub connector_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
    #[serde(default)]
    pub meter_value: Vec<MeterValue>,
}

impl MeterValuesRequest {
    /// Only the first sample of the first value block is consumed; the rest
    /// of the payload is deliberately ignored.
    pub fn first_sample(&self) -> Option<&SampledValue> {
        self.meter_value.first().and_then(|block| block.sampled_value.first())
    }
}

/// Start Transaction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionRequest {
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i64,
    pub timestamp: DateTime<Utc>,
}

/// Stop Transaction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionRequest {
    pub transaction_id: i64,
    pub meter_stop: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub transaction_data: Vec<MeterValue>,
}

/// The closed set of station-originated actions this server understands.
///
/// Anything else decodes to `Unknown` and is logged without an answer, the
/// lenient-gateway behavior real 1.6 fleets expect.
#[derive(Debug, Clone)]
pub enum Action {
    Heartbeat,
    BootNotification(BootNotificationRequest),
    Authorize(AuthorizeRequest),
    StatusNotification(StatusNotificationRequest),
    MeterValues(MeterValuesRequest),
    StartTransaction(StartTransactionRequest),
    StopTransaction(StopTransactionRequest),
    Unknown(String),
}

impl Action {
    pub fn parse(action: &str, payload: &Value) -> Result<Self, ProtocolError> {
        fn typed<T: serde::de::DeserializeOwned>(
            action: &str,
            payload: &Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(payload.clone())
                .map_err(|e| ProtocolError::MalformedFrame(format!("bad {action} payload: {e}")))
        }

        Ok(match action {
            "Heartbeat" => Self::Heartbeat,
            "BootNotification" => Self::BootNotification(typed(action, payload)?),
            "Authorize" => Self::Authorize(typed(action, payload)?),
            "StatusNotification" => Self::StatusNotification(typed(action, payload)?),
            "MeterValues" => Self::MeterValues(typed(action, payload)?),
            "StartTransaction" => Self::StartTransaction(typed(action, payload)?),
            "StopTransaction" => Self::StopTransaction(typed(action, payload)?),
            other => Self::Unknown(other.to_string()),
        })
    }
}
