use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Connector, Tag, Transaction};
use crate::ocpp::frame::{Request, Response};
use crate::ocpp::messages::MeterValue;
use crate::store::Model;

/// Build the provisional registration id for a transport address.
pub fn address_id(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

/// One record per physical charge point.
///
/// A station starts out provisional, keyed by its transport address, and is
/// promoted to its reported serial number once a BootNotification arrives.
/// The pending message maps are transport-session state and are never
/// persisted; any store round-trip yields them empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingStation {
    pub reg_id: String,
    pub host: String,
    pub port: u16,
    pub serial_number: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub last_seen: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub connectors: BTreeMap<u32, Connector>,
    #[serde(default)]
    pub transactions: BTreeMap<i64, Transaction>,
    #[serde(default)]
    pub tags: BTreeMap<String, Tag>,
    #[serde(skip)]
    pub pending_requests: HashMap<String, Request>,
    #[serde(skip)]
    pub pending_responses: HashMap<String, Response>,
}

impl Model for ChargingStation {
    fn reg_id(&self) -> &str {
        &self.reg_id
    }
}

impl ChargingStation {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            reg_id: address_id(&host, port),
            host,
            port,
            serial_number: None,
            metadata: serde_json::Map::new(),
            last_seen: Utc::now(),
            last_heartbeat: None,
            connectors: BTreeMap::new(),
            transactions: BTreeMap::new(),
            tags: BTreeMap::new(),
            pending_requests: HashMap::new(),
            pending_responses: HashMap::new(),
        }
    }

    /// A station is identified once a boot has reported its serial number.
    pub fn is_identified(&self) -> bool {
        self.serial_number.is_some()
    }

    /// Record identity and vendor metadata from a BootNotification.
    pub fn record_boot(
        &mut self,
        serial_number: Option<&str>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        if let Some(serial) = serial_number {
            self.serial_number = Some(serial.to_string());
        }
        self.metadata = metadata;
    }

    /// Upsert a connector. Status is always overwritten when present; meter
    /// fields only when the message carried a reading.
    pub fn upsert_connector(
        &mut self,
        connector_id: u32,
        status: Option<&str>,
        meter_read: Option<&str>,
        meter_unit: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) {
        let connector = self
            .connectors
            .entry(connector_id)
            .or_insert_with(|| Connector::new(connector_id));
        if let Some(status) = status {
            connector.last_status = Some(status.to_string());
        }
        if let Some(read) = meter_read {
            connector.last_meter_read = Some(read.to_string());
            connector.meter_unit = Some(meter_unit.unwrap_or("Wh").to_string());
        }
        if metadata.is_some() {
            connector.metadata = metadata;
        }
    }

    fn next_tx_id(&self) -> i64 {
        self.transactions.keys().max().map_or(1, |max| max + 1)
    }

    /// Open a new transaction and return its station-assigned id.
    pub fn begin_transaction(
        &mut self,
        connector_id: u32,
        tag_id: &str,
        time_start: DateTime<Utc>,
        meter_start: i64,
    ) -> i64 {
        let tx_id = self.next_tx_id();
        self.transactions
            .insert(tx_id, Transaction::begin(tx_id, tag_id, connector_id, time_start, meter_start));
        tx_id
    }

    /// Close a transaction, reconstructing it from the stop event's sample
    /// history when the station reports an id this server never opened
    /// (e.g. the record predates a server restart). The sample tagged
    /// `Transaction.Begin` backfills `meter_start`/`time_start`.
    pub fn close_transaction(
        &mut self,
        tx_id: i64,
        time_end: DateTime<Utc>,
        meter_stop: i64,
        tag_id: Option<&str>,
        transaction_data: &[MeterValue],
    ) -> i64 {
        match self.transactions.get_mut(&tx_id) {
            Some(tx) => {
                tx.time_end = Some(time_end);
                tx.meter_stop = Some(meter_stop);
            }
            None => {
                let mut tx = Transaction::begin(tx_id, tag_id.unwrap_or_default(), 0, Utc::now(), 0);
                tx.time_end = Some(time_end);
                tx.meter_stop = Some(meter_stop);
                'scan: for block in transaction_data {
                    for sample in &block.sampled_value {
                        if sample.context.as_deref() == Some("Transaction.Begin") {
                            tx.meter_start = parse_meter_value(&sample.value);
                            if let Some(ts) = block.timestamp {
                                tx.time_start = ts;
                            }
                            break 'scan;
                        }
                    }
                }
                self.transactions.insert(tx_id, tx);
            }
        }
        tx_id
    }

    /// Queue the answer to a station-originated request for delivery.
    pub fn answer(&mut self, request: &Request, body: serde_json::Value) {
        let response = Response::new(&request.message_id, body);
        self.pending_responses.insert(request.message_id.clone(), response);
    }

    fn ask(&mut self, action: &str, body: serde_json::Value) -> String {
        let message_id = Uuid::new_v4().to_string();
        let request = Request::new(&message_id, action, body);
        self.pending_requests.insert(message_id.clone(), request);
        message_id
    }

    // Outbound command constructors. These are the only source of
    // server-originated traffic; each inserts a pending request that stays
    // in `pending_requests` until the station's response correlates back.

    pub fn unlock_connector(&mut self, connector_id: u32) -> String {
        self.ask("UnlockConnector", serde_json::json!({ "connectorId": connector_id }))
    }

    pub fn start_transaction(&mut self, tag_id: &str) -> String {
        self.ask(
            "RemoteStartTransaction",
            serde_json::json!({ "connectorId": 1, "idTag": tag_id }),
        )
    }

    pub fn stop_transaction(&mut self, tx_id: i64) -> String {
        self.ask(
            "RemoteStopTransaction",
            serde_json::json!({ "transactionId": tx_id }),
        )
    }

    pub fn request_meter_values(&mut self) -> String {
        self.ask(
            "TriggerMessage",
            serde_json::json!({ "requestedMessage": "MeterValues" }),
        )
    }

    /// Collect every not-yet-delivered message as an encoded frame, marking
    /// each delivered. Delivered responses have served their purpose and are
    /// dropped; delivered requests stay correlatable in `pending_requests`.
    pub fn take_outbound(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        for request in self.pending_requests.values_mut() {
            if request.is_pending {
                request.is_pending = false;
                frames.push(request.encode());
            }
        }
        let delivered: Vec<String> = self
            .pending_responses
            .iter()
            .filter(|(_, res)| res.is_pending)
            .map(|(id, _)| id.clone())
            .collect();
        for id in delivered {
            if let Some(response) = self.pending_responses.remove(&id) {
                frames.push(response.encode());
            }
        }
        frames
    }

    /// Fold a superseded duplicate of this station into this record.
    ///
    /// `self` is the record most recently seen; its scalar fields win. Maps
    /// union, with this record's entries taking precedence on collisions.
    /// Pending messages carry over so traffic queued against the superseded
    /// record is still delivered on this station's connection.
    pub fn merge_from(&mut self, other: &ChargingStation) {
        if self.last_heartbeat < other.last_heartbeat {
            self.last_heartbeat = other.last_heartbeat;
        }
        for (id, connector) in &other.connectors {
            self.connectors.entry(*id).or_insert_with(|| connector.clone());
        }
        for (id, tx) in &other.transactions {
            self.transactions.entry(*id).or_insert_with(|| tx.clone());
        }
        for (id, tag) in &other.tags {
            self.tags.entry(id.clone()).or_insert_with(|| tag.clone());
        }
        for (id, request) in &other.pending_requests {
            self.pending_requests
                .entry(id.clone())
                .or_insert_with(|| request.clone());
        }
        for (id, response) in &other.pending_responses {
            self.pending_responses
                .entry(id.clone())
                .or_insert_with(|| response.clone());
        }
    }
}

fn parse_meter_value(raw: &str) -> i64 {
    raw.parse::<i64>()
        .or_else(|_| raw.parse::<f64>().map(|v| v.round() as i64))
        .unwrap_or(0)
}
