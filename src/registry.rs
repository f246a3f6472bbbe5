//! Canonical station identity and reconciliation.
//!
//! The registry owns the authoritative copy of every charging station. Live
//! records are handed out as `Arc<Mutex<_>>` so one dispatch mutates one
//! station at a time, and every mutation is written through to the backing
//! store before the next message is processed. Records are keyed by
//! registration id: the transport address until a BootNotification reports
//! a serial number, the serial number afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bus::AvailabilityMap;
use crate::domain::{address_id, ChargingStation};
use crate::store::{ModelStore, StoreError};

pub type StationHandle = Arc<Mutex<ChargingStation>>;
pub type SharedStore = Arc<dyn ModelStore<ChargingStation>>;

pub struct StationRegistry {
    stations: DashMap<String, StationHandle>,
    /// Transport address to registration id, so a promoted record stays
    /// resolvable by the address of its live connection.
    addr_index: DashMap<String, String>,
    store: SharedStore,
}

impl StationRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self {
            stations: DashMap::new(),
            addr_index: DashMap::new(),
            store,
        }
    }

    /// Return the station for a transport address, creating a provisional
    /// record when the address is unknown.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<StationHandle, StoreError> {
        let addr = address_id(host, port);
        if let Some(reg_id) = self.addr_index.get(&addr).map(|entry| entry.value().clone()) {
            if let Some(handle) = self.stations.get(&reg_id) {
                return Ok(handle.clone());
            }
        }

        // Unknown address: a durable record from a previous run, or a brand
        // new provisional station.
        let station = match self.store.retrieve(&addr).await {
            Ok(station) => station,
            Err(StoreError::NotFound(_)) => {
                let station = ChargingStation::new(host, port);
                self.store.create(&station).await?;
                info!(station = %station.reg_id, "new provisional station");
                station
            }
            Err(err) => return Err(err),
        };

        let reg_id = station.reg_id.clone();
        let handle = Arc::new(Mutex::new(station));
        self.stations.insert(reg_id.clone(), handle.clone());
        self.addr_index.insert(addr, reg_id);
        Ok(handle)
    }

    /// Look up a live station by registration id (command addressing).
    pub fn get(&self, reg_id: &str) -> Option<StationHandle> {
        self.stations.get(reg_id).map(|entry| entry.value().clone())
    }

    /// Write a station through to the store, promoting it to its serial
    /// number identity when one has been learned. If another record already
    /// owns that serial the promotion is deferred; the next reconciliation
    /// pass merges the pair.
    pub async fn commit(&self, handle: &StationHandle) -> Result<(), StoreError> {
        let mut station = handle.lock().await;
        self.promote_locked(handle, &mut station).await?;
        self.store.update(&station).await
    }

    async fn promote_locked(
        &self,
        handle: &StationHandle,
        station: &mut ChargingStation,
    ) -> Result<(), StoreError> {
        let Some(serial) = station.serial_number.clone() else {
            return Ok(());
        };
        if station.reg_id == serial || self.stations.contains_key(&serial) {
            return Ok(());
        }
        let old_id = std::mem::replace(&mut station.reg_id, serial.clone());
        self.stations.remove(&old_id);
        self.stations.insert(serial.clone(), handle.clone());
        self.addr_index
            .insert(address_id(&station.host, station.port), serial.clone());
        info!(station = %serial, previous = %old_id, "station identified");
        match self.store.delete(&old_id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Point-in-time snapshot of the live table.
    pub fn handles(&self) -> Vec<(String, StationHandle)> {
        self.stations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Snapshot of identified stations for the availability channel.
    pub async fn identified(&self) -> AvailabilityMap {
        let mut map = AvailabilityMap::new();
        for (_, handle) in self.handles() {
            let station = handle.lock().await;
            if let Some(serial) = &station.serial_number {
                map.insert(serial.clone(), station.reg_id.clone());
            }
        }
        map
    }

    async fn remove(&self, reg_id: &str) -> Result<(), StoreError> {
        self.stations.remove(reg_id);
        self.addr_index.retain(|_, target| target.as_str() != reg_id);
        match self.store.delete(reg_id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Periodic merge of duplicate station records and purge of records that
/// never identified themselves.
///
/// Both passes are advisory: they race benignly with live dispatch. A
/// record is never freed while a dispatch holds its handle, and a merge
/// lost to such a race is simply retried on the next interval.
pub struct Reconciler {
    registry: Arc<StationRegistry>,
    grace: Duration,
}

impl Reconciler {
    pub fn new(registry: Arc<StationRegistry>, grace_seconds: i64) -> Self {
        Self {
            registry,
            grace: Duration::seconds(grace_seconds),
        }
    }

    pub async fn run_once(&self) -> Result<(), StoreError> {
        self.merge_duplicates().await?;
        self.purge_stale().await
    }

    /// Group identified stations by serial number; within each group the
    /// most recently seen record wins and absorbs the others.
    async fn merge_duplicates(&self) -> Result<(), StoreError> {
        let mut by_serial: HashMap<String, Vec<(String, DateTime<Utc>, StationHandle)>> =
            HashMap::new();
        for (reg_id, handle) in self.registry.handles() {
            let station = handle.lock().await;
            if let Some(serial) = &station.serial_number {
                by_serial
                    .entry(serial.clone())
                    .or_default()
                    .push((reg_id.clone(), station.last_seen, handle.clone()));
            }
        }

        for (serial, mut group) in by_serial {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| b.1.cmp(&a.1));
            let (winner_id, _, winner_handle) = group[0].clone();
            let mut winner = winner_handle.lock().await;
            for (loser_id, _, loser_handle) in &group[1..] {
                {
                    let loser = loser_handle.lock().await;
                    winner.merge_from(&loser);
                }
                self.registry.remove(loser_id).await?;
                debug!(station = %serial, merged = %loser_id, into = %winner_id, "duplicate record folded");
            }
            self.registry
                .promote_locked(&winner_handle, &mut winner)
                .await?;
            self.registry.store.update(&winner).await?;
        }
        Ok(())
    }

    /// Drop provisional records that never learned a serial number within
    /// the grace period, both live and durable.
    async fn purge_stale(&self) -> Result<(), StoreError> {
        let cutoff = Utc::now() - self.grace;

        for (reg_id, handle) in self.registry.handles() {
            let expired = {
                let station = handle.lock().await;
                !station.is_identified() && station.last_seen < cutoff
            };
            if expired {
                warn!(station = %reg_id, "purging stale unidentified station");
                self.registry.remove(&reg_id).await?;
            }
        }

        let orphans = self
            .registry
            .store
            .find_by(&json!({ "serial_number": null }))
            .await?;
        for station in orphans {
            if station.last_seen < cutoff && self.registry.get(&station.reg_id).is_none() {
                warn!(station = %station.reg_id, "purging stale durable record");
                match self.registry.store.delete(&station.reg_id).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }
}
