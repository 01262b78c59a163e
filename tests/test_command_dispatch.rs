//! Command dispatch: validation, device resolution and serialized device I/O

use aircon_bridge::dispatcher::{CommandDispatcher, DispatchError, DispatchOutcome};
use aircon_bridge::gateway::GatewayError;
use aircon_bridge::protocol::{CommandError, PartialUpdate};
use aircon_bridge::testing::{MockGateway, MockResponse};
use aircon_bridge::transport::InboundMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use test_helpers::{test_registry, topics, LOUNGE_ADDRESS, OFFICE_ADDRESS};

fn dispatcher(gateway: Arc<MockGateway>) -> CommandDispatcher<MockGateway> {
    CommandDispatcher::new(gateway, test_registry(), topics(), Duration::from_secs(10))
}

#[tokio::test]
async fn test_airflow_command_applies_single_field() {
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = dispatcher(gateway.clone());

    let outcome = dispatcher
        .dispatch(&InboundMessage::new("klima/Lounge/airflow/set", "2"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome {
            device: "Lounge".to_string(),
            update: PartialUpdate::airflow(2),
            retained: false,
        }
    );

    let applied = gateway.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0, LOUNGE_ADDRESS);
    assert_eq!(applied[0].1.airflow, Some(2));
    assert_eq!(applied[0].1.power, None);
    assert_eq!(applied[0].1.preset_temperature, None);
    assert_eq!(applied[0].1.wind_ud, None);
    assert_eq!(applied[0].1.wind_lr, None);
}

#[tokio::test]
async fn test_airflow_range_is_enforced() {
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = dispatcher(gateway.clone());

    assert!(dispatcher
        .dispatch(&InboundMessage::new("klima/Lounge/airflow/set", "4"))
        .await
        .is_ok());

    for payload in ["5", "-1"] {
        let result = dispatcher
            .dispatch(&InboundMessage::new("klima/Lounge/airflow/set", payload))
            .await;
        assert!(
            matches!(
                result,
                Err(DispatchError::Command(CommandError::OutOfRange { .. }))
            ),
            "payload {payload:?} should be out of range"
        );
    }

    let result = dispatcher
        .dispatch(&InboundMessage::new("klima/Lounge/airflow/set", "high"))
        .await;
    assert!(matches!(
        result,
        Err(DispatchError::Command(CommandError::InvalidPayload { .. }))
    ));

    assert_eq!(gateway.applied().len(), 1);
    assert_eq!(gateway.applied()[0].1, PartialUpdate::airflow(4));
}

#[tokio::test]
async fn test_duplicate_power_commands_apply_twice() {
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = dispatcher(gateway.clone());
    let message = InboundMessage::new("klima/Office/power_status/set", "ON");

    dispatcher.dispatch(&message).await.unwrap();
    dispatcher.dispatch(&message).await.unwrap();

    let applied = gateway.applied();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0], applied[1]);
    assert_eq!(applied[0], (OFFICE_ADDRESS.to_string(), PartialUpdate::power(true)));
}

#[tokio::test]
async fn test_power_payload_must_be_on_or_off() {
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = dispatcher(gateway.clone());

    for payload in ["on", "1", "true", ""] {
        let result = dispatcher
            .dispatch(&InboundMessage::new("klima/Lounge/power_status/set", payload))
            .await;
        assert!(result.is_err(), "payload {payload:?} should be rejected");
    }
    assert!(gateway.applied().is_empty());
}

#[tokio::test]
async fn test_temperature_and_wind_commands() {
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = dispatcher(gateway.clone());

    dispatcher
        .dispatch(&InboundMessage::new("klima/Lounge/preset_temperatur/set", "22.5"))
        .await
        .unwrap();
    dispatcher
        .dispatch(&InboundMessage::new("klima/Lounge/wind_lr/set", "7"))
        .await
        .unwrap();
    assert!(dispatcher
        .dispatch(&InboundMessage::new("klima/Lounge/wind_ud/set", "5"))
        .await
        .is_err());

    let state = gateway.state(LOUNGE_ADDRESS).unwrap();
    assert_eq!(state.preset_temperature, Some(22.5));
    assert_eq!(state.wind_lr, Some(7));
    assert_eq!(state.wind_ud, MockGateway::sample_state().wind_ud);
}

#[tokio::test]
async fn test_unknown_device_is_discarded() {
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = dispatcher(gateway.clone());

    let result = dispatcher
        .dispatch(&InboundMessage::new("klima/Attic/airflow/set", "2"))
        .await;

    assert!(matches!(
        result,
        Err(DispatchError::Command(CommandError::UnknownDevice(name))) if name == "Attic"
    ));
    assert!(gateway.applied().is_empty());
}

#[tokio::test]
async fn test_read_only_attribute_cannot_be_set() {
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = dispatcher(gateway.clone());

    let result = dispatcher
        .dispatch(&InboundMessage::new("klima/Lounge/operation_mode/set", "1"))
        .await;

    assert!(matches!(
        result,
        Err(DispatchError::Command(CommandError::UnsupportedAttribute(_)))
    ));
}

#[tokio::test]
async fn test_retained_commands_are_applied() {
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = dispatcher(gateway.clone());

    let mut message = InboundMessage::new("klima/Lounge/airflow/set", "2");
    message.retain = true;

    let outcome = dispatcher.dispatch(&message).await.unwrap();
    assert!(outcome.retained);
    assert_eq!(
        gateway.applied(),
        vec![(LOUNGE_ADDRESS.to_string(), PartialUpdate::airflow(2))]
    );
}

#[tokio::test]
async fn test_run_applies_retained_commands_from_queue() {
    let gateway = Arc::new(MockGateway::new());
    let (tx, rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = dispatcher(gateway.clone()).spawn(rx, shutdown_rx);

    let mut message = InboundMessage::new("klima/Office/power_status/set", "ON");
    message.retain = true;
    tx.send(message).await.unwrap();
    drop(tx);

    handle.await.unwrap();
    assert_eq!(
        gateway.applied(),
        vec![(OFFICE_ADDRESS.to_string(), PartialUpdate::power(true))]
    );
}

#[tokio::test]
async fn test_gateway_failure_is_reported_and_not_retried() {
    let gateway = Arc::new(MockGateway::new());
    gateway.push_apply_failure(LOUNGE_ADDRESS, MockResponse::Recoverable);
    let dispatcher = dispatcher(gateway.clone());

    let result = dispatcher
        .dispatch(&InboundMessage::new("klima/Lounge/airflow/set", "3"))
        .await;

    match result {
        Err(DispatchError::Gateway { device, source }) => {
            assert_eq!(device, "Lounge");
            assert!(matches!(source, GatewayError::Timeout(_)));
        }
        other => panic!("expected gateway error, got {other:?}"),
    }
    assert!(gateway.applied().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_same_device_operations_are_serialized() {
    let gateway = Arc::new(MockGateway::new().with_delay(Duration::from_secs(1)));
    let dispatcher = Arc::new(dispatcher(gateway.clone()));

    let first = InboundMessage::new("klima/Lounge/airflow/set", "1");
    let second = InboundMessage::new("klima/Lounge/airflow/set", "3");

    let start = Instant::now();
    let (a, b) = tokio::join!(dispatcher.dispatch(&first), dispatcher.dispatch(&second));
    a.unwrap();
    b.unwrap();

    assert_eq!(gateway.max_concurrent(LOUNGE_ADDRESS), 1);
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_different_devices_proceed_independently() {
    let gateway = Arc::new(MockGateway::new().with_delay(Duration::from_secs(1)));
    let dispatcher = Arc::new(dispatcher(gateway.clone()));

    let lounge = InboundMessage::new("klima/Lounge/airflow/set", "1");
    let office = InboundMessage::new("klima/Office/airflow/set", "3");

    let start = Instant::now();
    let (a, b) = tokio::join!(dispatcher.dispatch(&lounge), dispatcher.dispatch(&office));
    a.unwrap();
    b.unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(gateway.applied().len(), 2);
}

#[tokio::test]
async fn test_run_drains_queue_until_closed() {
    let gateway = Arc::new(MockGateway::new());
    let (tx, rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = dispatcher(gateway.clone()).spawn(rx, shutdown_rx);

    tx.send(InboundMessage::new("klima/Lounge/airflow/set", "9"))
        .await
        .unwrap();
    tx.send(InboundMessage::new("klima/Lounge/airflow/set", "1"))
        .await
        .unwrap();
    tx.send(InboundMessage::new("klima/Office/power_status/set", "OFF"))
        .await
        .unwrap();
    drop(tx);

    handle.await.unwrap();

    let applied = gateway.applied();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0], (LOUNGE_ADDRESS.to_string(), PartialUpdate::airflow(1)));
    assert_eq!(applied[1], (OFFICE_ADDRESS.to_string(), PartialUpdate::power(false)));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let gateway = Arc::new(MockGateway::new());
    let (_tx, rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = dispatcher(gateway).spawn(rx, shutdown_rx);
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("dispatcher should stop")
        .unwrap();
}
