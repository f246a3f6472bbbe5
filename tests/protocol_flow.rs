//! End-to-end dispatch cycle: registry, engine and store wired together the
//! way the connection router wires them, minus the socket.

use std::sync::Arc;

use chrono::{Duration, Utc};
use open_charge_central::bus::CommandAction;
use open_charge_central::domain::ChargingStation;
use open_charge_central::error::ProtocolError;
use open_charge_central::ocpp::{decode, Engine, PermissiveHooks};
use open_charge_central::registry::{Reconciler, StationHandle, StationRegistry};
use open_charge_central::store::{MemoryStore, ModelStore};
use serde_json::Value;

fn fixture() -> (Arc<StationRegistry>, Engine, Arc<MemoryStore<ChargingStation>>) {
    let store = Arc::new(MemoryStore::<ChargingStation>::new());
    let registry = Arc::new(StationRegistry::new(store.clone()));
    let engine = Engine::new(Arc::new(PermissiveHooks), 14_400);
    (registry, engine, store)
}

/// Resolve, dispatch, commit: one router iteration's inbound duty.
async fn dispatch(
    registry: &Arc<StationRegistry>,
    engine: &Engine,
    host: &str,
    port: u16,
    raw: &str,
) -> Result<StationHandle, ProtocolError> {
    let message = decode(raw)?;
    let handle = registry.resolve(host, port).await.map_err(ProtocolError::Store)?;
    let outcome = {
        let mut station = handle.lock().await;
        station.last_seen = Utc::now();
        engine.handle(&mut station, message).await
    };
    registry.commit(&handle).await?;
    outcome.map(|()| handle)
}

fn frames(handle: &StationHandle) -> Vec<Value> {
    let mut station = handle.try_lock().expect("station is idle");
    station
        .take_outbound()
        .iter()
        .map(|frame| serde_json::from_str(frame).expect("valid frame"))
        .collect()
}

#[tokio::test]
async fn boot_identifies_the_station_and_answers_accepted() {
    let (registry, engine, _) = fixture();

    let handle = dispatch(
        &registry,
        &engine,
        "192.168.1.20",
        50111,
        r#"[2,"1","BootNotification",{"chargePointVendor":"AVT","chargePointModel":"Express","chargePointSerialNumber":"SN1"}]"#,
    )
    .await
    .unwrap();

    assert_eq!(handle.lock().await.reg_id, "SN1");
    let available = registry.identified().await;
    assert_eq!(available.get("SN1"), Some(&"SN1".to_string()));

    let sent = frames(&handle);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], 3);
    assert_eq!(sent[0][1], "1");
    assert_eq!(sent[0][2]["status"], "Accepted");
    assert_eq!(sent[0][2]["interval"], 14_400);
}

#[tokio::test]
async fn full_session_with_remote_unlock() {
    let (registry, engine, store) = fixture();
    let (host, port) = ("192.168.1.20", 50111);

    dispatch(&registry, &engine, host, port,
        r#"[2,"1","BootNotification",{"chargePointSerialNumber":"SN1","chargePointVendor":"AVT","chargePointModel":"Express"}]"#)
        .await
        .unwrap();
    dispatch(&registry, &engine, host, port,
        r#"[2,"2","StatusNotification",{"connectorId":1,"status":"Preparing","errorCode":"NoError"}]"#)
        .await
        .unwrap();
    let handle = dispatch(&registry, &engine, host, port,
        r#"[2,"3","StartTransaction",{"connectorId":1,"idTag":"T1","meterStart":1528,"timestamp":"2019-03-25T14:34:14Z"}]"#)
        .await
        .unwrap();

    // Every station-originated request got exactly one answer.
    let sent = frames(&handle);
    assert_eq!(sent.len(), 3);
    let start_answer = sent.iter().find(|f| f[1] == "3").unwrap();
    assert_eq!(start_answer[2]["transactionId"], 1);
    assert_eq!(start_answer[2]["idTagInfo"]["status"], "Accepted");

    // External command addressed by identity, as the router's drain duty
    // would execute it.
    let target = registry.get("SN1").expect("identified station");
    let msg_id = {
        let mut station = target.lock().await;
        CommandAction::UnlockConnector { connector_id: 1 }.apply(&mut station)
    };
    registry.commit(&target).await.unwrap();

    let sent = frames(&handle);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], 2);
    assert_eq!(sent[0][1], msg_id);
    assert_eq!(sent[0][2], "UnlockConnector");
    assert_eq!(sent[0][3]["connectorId"], 1);

    // The station's answer correlates back and clears the pending entry.
    dispatch(&registry, &engine, host, port,
        &format!(r#"[3,"{msg_id}",{{"status":"Unlocked"}}]"#))
        .await
        .unwrap();
    assert!(handle.lock().await.pending_requests.is_empty());

    // The durable copy holds domain state but never transport state.
    let persisted = store.retrieve("SN1").await.unwrap();
    assert_eq!(persisted.transactions.len(), 1);
    assert_eq!(persisted.connectors.len(), 1);
    assert!(persisted.pending_requests.is_empty());
    assert!(persisted.pending_responses.is_empty());
}

#[tokio::test]
async fn reconnect_is_reconciled_and_queued_traffic_survives() {
    let (registry, engine, store) = fixture();

    // First session identifies as SN1 and records a connector.
    dispatch(&registry, &engine, "192.168.1.20", 50111,
        r#"[2,"1","BootNotification",{"chargePointSerialNumber":"SN1","chargePointVendor":"AVT","chargePointModel":"Express"}]"#)
        .await
        .unwrap();
    dispatch(&registry, &engine, "192.168.1.20", 50111,
        r#"[2,"2","StatusNotification",{"connectorId":1,"status":"Available","errorCode":"NoError"}]"#)
        .await
        .unwrap();
    {
        // Make the first record visibly older and drain its answers.
        let first = registry.get("SN1").unwrap();
        let mut station = first.lock().await;
        station.last_seen = Utc::now() - Duration::minutes(10);
        station.take_outbound();
    }

    // A command arrives while the station is between connections.
    let target = registry.get("SN1").unwrap();
    {
        let mut station = target.lock().await;
        CommandAction::RequestMeterValues.apply(&mut station);
    }
    registry.commit(&target).await.unwrap();

    // The station reconnects from a fresh ephemeral port and boots again.
    let second = dispatch(&registry, &engine, "192.168.1.20", 50999,
        r#"[2,"1","BootNotification",{"chargePointSerialNumber":"SN1","chargePointVendor":"AVT","chargePointModel":"Express"}]"#)
        .await
        .unwrap();

    Reconciler::new(registry.clone(), 3600).run_once().await.unwrap();

    // One record remains, keyed by serial, carrying the first session's
    // connector and the undelivered command.
    assert_eq!(registry.handles().len(), 1);
    let survivor = registry.get("SN1").expect("merged station");
    assert!(Arc::ptr_eq(&survivor, &second));
    {
        let station = survivor.lock().await;
        assert_eq!(station.host, "192.168.1.20");
        assert_eq!(station.port, 50999);
        assert_eq!(station.connectors.len(), 1);
        assert_eq!(
            station
                .pending_requests
                .values()
                .filter(|req| req.action == "TriggerMessage")
                .count(),
            1
        );
    }
    assert_eq!(store.retrieve_all().await.unwrap().len(), 1);

    // The next flush on the new connection delivers it.
    let sent = frames(&survivor);
    assert!(sent.iter().any(|f| f[2] == "TriggerMessage"));
}
