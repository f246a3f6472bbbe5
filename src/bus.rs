//! Command and availability channels.
//!
//! Both channels are owned by the server's composition root and passed down
//! by handle; nothing reaches them through ambient lookup. The command
//! channel is bounded so a burst of external actions cannot grow without
//! limit; the availability channel is latest-wins, since only the newest
//! snapshot of connected identities matters.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};

use crate::domain::ChargingStation;

/// Currently identified stations: serial number to registration id.
pub type AvailabilityMap = BTreeMap<String, String>;

/// The closed set of remotely triggerable station actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "snake_case")]
pub enum CommandAction {
    UnlockConnector { connector_id: u32 },
    StartTransaction { tag_id: String },
    StopTransaction { tx_id: i64 },
    RequestMeterValues,
}

impl CommandAction {
    /// Invoke the matching outbound constructor; returns the message id of
    /// the queued request.
    pub fn apply(&self, station: &mut ChargingStation) -> String {
        match self {
            Self::UnlockConnector { connector_id } => station.unlock_connector(*connector_id),
            Self::StartTransaction { tag_id } => station.start_transaction(tag_id),
            Self::StopTransaction { tx_id } => station.stop_transaction(*tx_id),
            Self::RequestMeterValues => station.request_meter_values(),
        }
    }
}

/// A remote command addressed to a station identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub station_id: String,
    #[serde(flatten)]
    pub action: CommandAction,
}

/// Shared non-blocking consumer side of the command channel. Every
/// connection router drains it; whichever router sees a command first
/// executes it, which is safe because commands mutate store-backed station
/// state, not connection state.
#[derive(Clone)]
pub struct CommandDrain(Arc<Mutex<mpsc::Receiver<Command>>>);

impl CommandDrain {
    pub fn try_drain(&self) -> Vec<Command> {
        let Ok(mut rx) = self.0.try_lock() else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        while let Ok(command) = rx.try_recv() {
            drained.push(command);
        }
        drained
    }
}

pub fn command_channel(capacity: usize) -> (mpsc::Sender<Command>, CommandDrain) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, CommandDrain(Arc::new(Mutex::new(rx))))
}

pub fn availability_channel() -> (watch::Sender<AvailabilityMap>, watch::Receiver<AvailabilityMap>) {
    watch::channel(AvailabilityMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_wire_shape_is_snake_case_tagged() {
        let command: Command = serde_json::from_value(json!({
            "station_id": "SN1",
            "action": "unlock_connector",
            "args": { "connector_id": 2 }
        }))
        .unwrap();
        assert_eq!(command.station_id, "SN1");
        assert_eq!(command.action, CommandAction::UnlockConnector { connector_id: 2 });

        let bare: CommandAction = serde_json::from_value(json!({ "action": "request_meter_values" })).unwrap();
        assert_eq!(bare, CommandAction::RequestMeterValues);
    }

    #[test]
    fn apply_queues_the_matching_pending_request() {
        let mut cs = ChargingStation::new("localhost", 8080);
        let msg_id = CommandAction::StopTransaction { tx_id: 7 }.apply(&mut cs);
        let request = &cs.pending_requests[&msg_id];
        assert_eq!(request.action, "RemoteStopTransaction");
        assert_eq!(request.payload["transactionId"], 7);
    }

    #[tokio::test]
    async fn command_channel_is_bounded() {
        let (tx, _drain) = command_channel(1);
        tx.try_send(Command {
            station_id: "SN1".into(),
            action: CommandAction::RequestMeterValues,
        })
        .unwrap();
        let overflow = tx.try_send(Command {
            station_id: "SN2".into(),
            action: CommandAction::RequestMeterValues,
        });
        assert!(overflow.is_err());
    }

    #[tokio::test]
    async fn drain_empties_the_queue_without_blocking() {
        let (tx, drain) = command_channel(4);
        for id in ["SN1", "SN2"] {
            tx.send(Command {
                station_id: id.into(),
                action: CommandAction::RequestMeterValues,
            })
            .await
            .unwrap();
        }
        assert_eq!(drain.try_drain().len(), 2);
        assert!(drain.try_drain().is_empty());
    }

    #[tokio::test]
    async fn availability_is_latest_wins() {
        let (tx, rx) = availability_channel();
        tx.send_replace(AvailabilityMap::from([("SN1".into(), "SN1".into())]));
        tx.send_replace(AvailabilityMap::from([("SN2".into(), "SN2".into())]));
        assert!(rx.borrow().contains_key("SN2"));
        assert!(!rx.borrow().contains_key("SN1"));
    }
}
