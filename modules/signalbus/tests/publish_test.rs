//! Integration tests for the outbound side: notice reshaping, routing,
//! prefixes and the connection lifecycle.

use std::sync::{Arc, Mutex};

use serde_json::json;
use signalbus::codec::unmarshal;
use signalbus::{
    BusError, Config, EventBus, EventDefinition, JsonCodec, Map, MemoryDriver, Metadata,
    NoticeDefinition, Var, Vars,
};

fn payload(value: serde_json::Value) -> Map {
    value.as_object().cloned().unwrap()
}

/// A bus whose memory driver is observable from the test.
fn bus_with_driver() -> (EventBus, MemoryDriver) {
    let driver = MemoryDriver::recording();
    let mut bus = EventBus::new();
    bus.register_driver(signalbus::drivers::MEMORY, driver.clone(), true);
    (bus, driver)
}

fn decoded(driver: &MemoryDriver, index: usize) -> Metadata {
    unmarshal(&JsonCodec, &driver.published()[index].data).unwrap()
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn published_event_reaches_its_subscriber() {
    let received: Arc<Mutex<Vec<Map>>> = Arc::default();
    let (mut bus, driver) = bus_with_driver();
    bus.register_event(
        "pay.finish",
        EventDefinition::new()
            .with_args(Vars::new().with("order", Var::string().required()))
            .with_action({
                let received = Arc::clone(&received);
                move |ctx| received.lock().unwrap().push(ctx.args.clone())
            }),
        false,
    )
    .unwrap();
    let bus = bus.start().await.unwrap();

    let meta = Metadata::new(payload(json!({"order": "A-1"}))).with_trace("trace-1");
    bus.publish("pay.finish", meta.clone()).await.unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["order"], json!("A-1"));

    let published = driver.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].name, "pay.finish");
    assert_eq!(decoded(&driver, 0), meta);
}

#[tokio::test]
async fn publish_without_subscribers_is_still_sent() {
    let (bus, driver) = bus_with_driver();
    let bus = bus.start().await.unwrap();

    bus.publish("nobody.listens", Metadata::default()).await.unwrap();
    assert_eq!(driver.published().len(), 1);
}

#[tokio::test]
async fn outbound_prefix_is_prepended_and_stripped_on_receipt() {
    let names: Arc<Mutex<Vec<String>>> = Arc::default();
    let (mut bus, driver) = bus_with_driver();
    bus.register_config(signalbus::DEFAULT, Config::builder().prefix("prod.").build(), false);
    bus.register_event(
        "pay.finish",
        EventDefinition::new().with_action({
            let names = Arc::clone(&names);
            move |ctx| names.lock().unwrap().push(ctx.alias.clone())
        }),
        false,
    )
    .unwrap();
    let bus = bus.start().await.unwrap();

    bus.publish("pay.finish", Metadata::default()).await.unwrap();

    assert_eq!(driver.published()[0].name, "prod.pay.finish");
    assert_eq!(*names.lock().unwrap(), vec!["pay.finish"]);
}

#[tokio::test]
async fn unbound_event_is_received_only_on_the_sending_connection() {
    let connections: Arc<Mutex<Vec<String>>> = Arc::default();
    let (mut bus, _driver) = bus_with_driver();
    bus.register_configs([("a", Config::default()), ("b", Config::default())], false);
    bus.register_event(
        "job",
        EventDefinition::new().with_action({
            let connections = Arc::clone(&connections);
            move |ctx| connections.lock().unwrap().push(ctx.connection.clone())
        }),
        false,
    )
    .unwrap();
    let bus = bus.start().await.unwrap();

    bus.publish_to("a", "job", Metadata::default()).await.unwrap();
    assert_eq!(*connections.lock().unwrap(), vec!["a"]);

    connections.lock().unwrap().clear();
    bus.publish("job", Metadata::default()).await.unwrap();
    let owner = bus.locate("job").unwrap();
    assert_eq!(*connections.lock().unwrap(), vec![owner]);
}

#[tokio::test]
async fn grouped_event_is_received_once() {
    let count = Arc::new(Mutex::new(0));
    let (mut bus, _driver) = bus_with_driver();
    bus.register_configs([("a", Config::default()), ("b", Config::default())], false);
    bus.register_event(
        "job",
        EventDefinition::new().with_group("workers").with_action({
            let count = Arc::clone(&count);
            move |_| *count.lock().unwrap() += 1
        }),
        false,
    )
    .unwrap();
    let bus = bus.start().await.unwrap();

    for _ in 0..4 {
        bus.publish("job", Metadata::default()).await.unwrap();
    }
    assert_eq!(*count.lock().unwrap(), 4);
}

// ---------------------------------------------------------------------------
// Notice reshaping
// ---------------------------------------------------------------------------

fn receipt_notice() -> NoticeDefinition {
    NoticeDefinition::new(
        Vars::new()
            .with("order", Var::string().required())
            .with("amount", Var::float())
            .with("paid", Var::bool().default_value(false)),
    )
    .with_text("Emitted once a payment settles")
}

#[tokio::test]
async fn notice_payload_is_reshaped_to_its_schema() {
    let (mut bus, driver) = bus_with_driver();
    bus.register_notice("pay.receipt", receipt_notice(), false)
        .unwrap();
    let bus = bus.start().await.unwrap();

    let meta = Metadata::new(payload(json!({"order": 42, "amount": "9.99", "debug": true})));
    bus.publish("pay.receipt", meta.clone()).await.unwrap();

    let sent = decoded(&driver, 0);
    assert_eq!(sent.id, meta.id);
    assert_eq!(
        sent.payload.unwrap(),
        payload(json!({"order": "42", "amount": 9.99, "paid": false}))
    );
}

#[tokio::test]
async fn notice_mismatch_is_published_unchanged() {
    let (mut bus, driver) = bus_with_driver();
    bus.register_notice("pay.receipt", receipt_notice(), false)
        .unwrap();
    let bus = bus.start().await.unwrap();

    let original = payload(json!({"amount": "not a number"}));
    bus.publish("pay.receipt", Metadata::new(original.clone()))
        .await
        .unwrap();

    assert_eq!(decoded(&driver, 0).payload.unwrap(), original);
}

#[tokio::test]
async fn conforming_notice_round_trips_through_its_owner() {
    let received: Arc<Mutex<Vec<(String, Map)>>> = Arc::default();
    let (mut bus, driver) = bus_with_driver();
    bus.register_configs([("a", Config::default()), ("b", Config::default())], false);
    bus.register_notice("pay.receipt", receipt_notice(), false)
        .unwrap();
    bus.register_event(
        "pay.receipt",
        EventDefinition::new().with_action({
            let received = Arc::clone(&received);
            move |ctx| {
                received
                    .lock()
                    .unwrap()
                    .push((ctx.connection.clone(), ctx.value.clone()))
            }
        }),
        false,
    )
    .unwrap();
    let bus = bus.start().await.unwrap();

    let body = payload(json!({"order": "A-1", "amount": 9.99, "paid": true}));
    bus.publish("pay.receipt", Metadata::new(body.clone()))
        .await
        .unwrap();

    let owner = bus.locate("pay.receipt").unwrap();
    let published = driver.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].connection, owner);
    assert_eq!(decoded(&driver, 0).payload.unwrap(), body);
    assert_eq!(*received.lock().unwrap(), vec![(owner.to_string(), body)]);
}

#[tokio::test]
async fn empty_payload_is_not_reshaped() {
    let (mut bus, driver) = bus_with_driver();
    bus.register_notice("pay.receipt", receipt_notice(), false)
        .unwrap();
    let bus = bus.start().await.unwrap();

    bus.publish("pay.receipt", Metadata::new(Map::new()))
        .await
        .unwrap();

    assert_eq!(decoded(&driver, 0).payload, Some(Map::new()));
}

#[tokio::test]
async fn duplicate_notice_is_refused() {
    let mut bus = EventBus::new();
    bus.register_notice("pay.receipt", receipt_notice(), false)
        .unwrap();
    let err = bus
        .register_notice("pay.receipt", receipt_notice(), false)
        .unwrap_err();
    assert!(matches!(err, BusError::DuplicateNotice(_)));
    assert!(bus.register_notice("pay.receipt", receipt_notice(), true).is_ok());
}

// ---------------------------------------------------------------------------
// Lifecycle and errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_without_configs_creates_default_connection() {
    let bus = EventBus::new().start().await.unwrap();
    assert!(bus.instance(signalbus::DEFAULT).is_some());
    assert_eq!(bus.locate("anything"), Some(signalbus::DEFAULT));
    bus.stop().await;
}

#[tokio::test]
async fn publish_to_unknown_connection_names_the_connection() {
    let bus = EventBus::new().start().await.unwrap();
    let err = bus
        .publish_to("missing", "pay.finish", Metadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::UnknownConnection(ref name) if name == "missing"));
    assert_eq!(err.to_string(), "no such connection missing");
}

#[tokio::test]
async fn oversized_weight_fails_start() {
    let mut bus = EventBus::new();
    bus.register_config("queue", Config::builder().weight(30_000_000).build(), false);
    let err = bus.start().await.err().unwrap();
    assert!(matches!(err, BusError::InvalidConfig { ref subject, .. } if subject == "queue"));
}

#[tokio::test]
async fn unbounded_default_concurrency_fails_start() {
    let mut bus = EventBus::new().with_settings(signalbus::BusSettings {
        concurrency: Some(usize::MAX),
        ..Default::default()
    });
    bus.register_event("job", EventDefinition::new(), false)
        .unwrap();
    let err = bus.start().await.err().unwrap();
    assert!(matches!(err, BusError::InvalidConfig { ref subject, .. } if subject == "job"));
}

#[tokio::test]
async fn unknown_driver_fails_start() {
    let mut bus = EventBus::new();
    bus.register_config("queue", Config::builder().driver("carrier-pigeon").build(), false);
    let err = bus.start().await.err().unwrap();
    assert!(matches!(
        err,
        BusError::UnknownDriver { ref connection, ref driver }
            if connection == "queue" && driver == "carrier-pigeon"
    ));
}

#[tokio::test]
async fn unknown_codec_fails_start() {
    let mut bus = EventBus::new();
    bus.register_config("queue", Config::builder().codec("xml").build(), false);
    let err = bus.start().await.err().unwrap();
    assert!(matches!(err, BusError::UnknownCodec { ref codec, .. } if codec == "xml"));
}

#[tokio::test]
async fn duplicate_event_is_refused() {
    let mut bus = EventBus::new();
    bus.register_event("pay.finish", EventDefinition::new(), false)
        .unwrap();
    let err = bus
        .register_event("pay.finish", EventDefinition::new(), false)
        .unwrap_err();
    assert_eq!(err.to_string(), "event pay.finish already registered");
}

#[tokio::test]
async fn health_covers_every_connection() {
    let mut bus = EventBus::new();
    bus.register_configs([("a", Config::default()), ("b", Config::default())], false);
    let bus = bus.start().await.unwrap();

    let health = bus.health().await;
    assert_eq!(health.len(), 2);
    assert_eq!(health["a"].as_ref().unwrap().workload, 0);
}

#[tokio::test]
async fn stopped_connections_no_longer_receive() {
    let count = Arc::new(Mutex::new(0));
    let driver = MemoryDriver::recording();

    let mut listener = EventBus::new();
    listener.register_driver(signalbus::drivers::MEMORY, driver.clone(), true);
    listener
        .register_event(
            "job",
            EventDefinition::new().with_action({
                let count = Arc::clone(&count);
                move |_| *count.lock().unwrap() += 1
            }),
            false,
        )
        .unwrap();
    let listener = listener.start().await.unwrap();

    let mut sender = EventBus::new();
    sender.register_driver(signalbus::drivers::MEMORY, driver.clone(), true);
    let sender = sender.start().await.unwrap();

    sender.publish("job", Metadata::default()).await.unwrap();
    listener.stop().await;
    sender.publish("job", Metadata::default()).await.unwrap();

    assert_eq!(*count.lock().unwrap(), 1);
    assert_eq!(driver.published().len(), 2);
}
