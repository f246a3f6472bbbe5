//! The per-station protocol state machine.
//!
//! [`Engine::handle`] is the single entry point: the caller resolves the
//! station, hands in one decoded message, and flushes the mutated station
//! back through the registry before the next dispatch. Station-originated
//! requests are answered synchronously; inbound responses are validated
//! against the pending request they correlate to.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tracing::warn;

use crate::domain::{ChargingStation, Tag};
use crate::error::ProtocolError;
use crate::ocpp::frame::{OcppMessage, Request, Response};
use crate::ocpp::messages::Action;

/// Heartbeat interval handed to stations on boot, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u32 = 14_400;

/// Deployment-specific behavior injected into the engine at construction.
#[async_trait]
pub trait EngineHooks: Send + Sync {
    /// Resolve a tag to its authorization record, or deny with `None`.
    async fn authorize_tag(&self, station: &mut ChargingStation, tag_id: &str) -> Option<Tag>;

    /// A station answered a server command with an unexpected status.
    /// Alert/retry policy lives behind this seam; the engine never retries.
    async fn wrong_answer(&self, station: &ChargingStation, request: &Request, response: &Response);
}

/// Default hooks: any unseen tag is accepted and cached with the default
/// expiry, and wrong answers are logged. Suitable for trusted or demo
/// fleets only; production deployments substitute their own implementation.
pub struct PermissiveHooks;

#[async_trait]
impl EngineHooks for PermissiveHooks {
    async fn authorize_tag(&self, station: &mut ChargingStation, tag_id: &str) -> Option<Tag> {
        if let Some(tag) = station.tags.get(tag_id) {
            return Some(tag.clone());
        }
        let tag = Tag::with_default_expiry(tag_id);
        station.tags.insert(tag_id.to_string(), tag.clone());
        Some(tag)
    }

    async fn wrong_answer(&self, station: &ChargingStation, request: &Request, response: &Response) {
        warn!(
            station = %station.reg_id,
            action = %request.action,
            status = response.status().unwrap_or("<missing>"),
            "station rejected server command"
        );
    }
}

/// Expected `status` value for server-originated requests that demand one.
fn expected_status(action: &str) -> Option<&'static str> {
    match action {
        "UnlockConnector" => Some("Unlocked"),
        "RemoteStartTransaction" | "RemoteStopTransaction" | "TriggerMessage" => Some("Accepted"),
        _ => None,
    }
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct Engine {
    hooks: Arc<dyn EngineHooks>,
    heartbeat_interval_secs: u32,
}

impl Engine {
    pub fn new(hooks: Arc<dyn EngineHooks>, heartbeat_interval_secs: u32) -> Self {
        Self {
            hooks,
            heartbeat_interval_secs,
        }
    }

    /// Drive the protocol for one inbound message against one station.
    ///
    /// Errors abort processing of this message only; the connection and the
    /// station record stay live.
    pub async fn handle(
        &self,
        station: &mut ChargingStation,
        message: OcppMessage,
    ) -> Result<(), ProtocolError> {
        match message {
            OcppMessage::Response(response) => self.handle_response(station, response).await,
            OcppMessage::Request(request) => self.handle_request(station, request).await,
        }
    }

    async fn handle_response(
        &self,
        station: &mut ChargingStation,
        response: Response,
    ) -> Result<(), ProtocolError> {
        let Some(request) = station.pending_requests.remove(&response.message_id) else {
            return Err(ProtocolError::OutOfSync(response.message_id));
        };
        station.pending_responses.remove(&response.message_id);

        if let Some(expected) = expected_status(&request.action) {
            let got = response.status().unwrap_or_default().to_string();
            if got != expected {
                self.hooks.wrong_answer(station, &request, &response).await;
                return Err(ProtocolError::ProtocolViolation {
                    action: request.action,
                    expected: expected.to_string(),
                    got,
                });
            }
        }
        Ok(())
    }

    async fn handle_request(
        &self,
        station: &mut ChargingStation,
        request: Request,
    ) -> Result<(), ProtocolError> {
        match Action::parse(&request.action, &request.payload)? {
            Action::Heartbeat => {
                let now = Utc::now();
                station.last_heartbeat = Some(now);
                station.answer(&request, json!({ "currentTime": iso(now) }));
            }
            Action::BootNotification(boot) => {
                let metadata = request.payload.as_object().cloned().unwrap_or_default();
                station.record_boot(boot.serial_number(), metadata);
                station.answer(
                    &request,
                    json!({
                        "status": "Accepted",
                        "currentTime": iso(Utc::now()),
                        "interval": self.heartbeat_interval_secs,
                    }),
                );
            }
            Action::Authorize(auth) => {
                let info = self.id_tag_info(station, &auth.id_tag).await;
                station.answer(&request, json!({ "idTagInfo": info }));
            }
            Action::StatusNotification(status) => {
                let mut meta = serde_json::Map::new();
                if let Some(code) = &status.error_code {
                    meta.insert("errorCode".into(), json!(code));
                }
                if let Some(info) = &status.info {
                    meta.insert("info".into(), json!(info));
                }
                station.upsert_connector(
                    status.connector_id,
                    Some(&status.status),
                    None,
                    None,
                    (!meta.is_empty()).then(|| serde_json::Value::Object(meta)),
                );
                station.answer(&request, json!({}));
            }
            Action::MeterValues(meter) => {
                if let Some(sample) = meter.first_sample() {
                    station.upsert_connector(
                        meter.connector_id,
                        None,
                        Some(&sample.value),
                        sample.unit.as_deref(),
                        None,
                    );
                }
                station.answer(&request, json!({}));
            }
            Action::StartTransaction(start) => {
                let tx_id = station.begin_transaction(
                    start.connector_id,
                    &start.id_tag,
                    start.timestamp,
                    start.meter_start,
                );
                let info = self.id_tag_info(station, &start.id_tag).await;
                station.answer(&request, json!({ "transactionId": tx_id, "idTagInfo": info }));
            }
            Action::StopTransaction(stop) => {
                let tx_id = station.close_transaction(
                    stop.transaction_id,
                    stop.timestamp,
                    stop.meter_stop,
                    stop.id_tag.as_deref(),
                    &stop.transaction_data,
                );
                let body = match &stop.id_tag {
                    Some(tag_id) => {
                        let info = self.id_tag_info(station, tag_id).await;
                        json!({ "transactionId": tx_id, "idTagInfo": info })
                    }
                    None => json!({ "transactionId": tx_id }),
                };
                station.answer(&request, body);
            }
            Action::Unknown(action) => return Err(ProtocolError::UnknownAction(action)),
        }
        Ok(())
    }

    async fn id_tag_info(&self, station: &mut ChargingStation, tag_id: &str) -> serde_json::Value {
        match self.hooks.authorize_tag(station, tag_id).await {
            Some(tag) => json!({ "status": "Accepted", "expiryDate": iso(tag.expiry_date) }),
            None => json!({ "status": "Rejected" }),
        }
    }
}
