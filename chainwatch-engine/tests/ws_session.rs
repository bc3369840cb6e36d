use chainwatch_engine::{
    ConnectionPhase, EngineConfig, EngineState, Ratio, RecordFilter, Session, StreamConfig,
};
use futures::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing_subscriber::EnvFilter;

const SUBSCRIBE: &str = r#"{"op":"subscribe","symbol":"NIFTY"}"#;

/// Two historical snapshots of the same contract, three minutes apart.
const BATCH: &str = r#"[
    {"timestamp": "16-Oct-2026 10:03:00", "underlyingValue": 24480.10,
     "data": [{"strikePrice": 24500, "expiryDate": "28-Oct-2026",
               "CE": {"openInterest": 1000, "changeinOpenInterest": 40, "totalTradedVolume": 900},
               "PE": {"openInterest": 1500, "changeinOpenInterest": 60, "totalTradedVolume": 700}}]},
    {"timestamp": "16-Oct-2026 10:06:00", "underlyingValue": 24512.35,
     "data": [{"strikePrice": 24500, "expiryDate": "28-Oct-2026",
               "CE": {"openInterest": 1200, "changeinOpenInterest": 240, "totalTradedVolume": 1300},
               "PE": {"openInterest": 1800, "changeinOpenInterest": 360, "totalTradedVolume": 1100}}]}
]"#;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait_until(session: &Session, done: impl Fn(&EngineState) -> bool) {
    let mut revision = session.subscribe();
    let wait = async {
        while !session.read(&done) {
            if revision.changed().await.is_err() {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("session did not reach the expected state");
}

#[tokio::test]
async fn test_websocket_batch_yields_one_record_per_timestamp() {
    init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let subscribe = ws.next().await.unwrap().unwrap();
        assert_eq!(subscribe, Message::text(SUBSCRIBE.to_string()));

        ws.send(Message::text(BATCH.to_string())).await.unwrap();

        // hold the connection until the client closes it
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });

    let session = Session::start(
        StreamConfig::new(format!("ws://{addr}")).with_subscribe_message(SUBSCRIBE),
        EngineConfig::default(),
    )
    .unwrap();

    wait_until(&session, |state| state.meta().records == 2).await;

    let view = session.view(&RecordFilter::default());
    assert_eq!(view.connection.phase, ConnectionPhase::Receiving);
    assert_eq!(view.records.len(), 2);
    assert_ne!(view.records[0].timestamp, view.records[1].timestamp);
    assert_eq!(view.records[0].call.map(|m| m.open_interest), Some(1000));
    assert_eq!(view.records[1].call.map(|m| m.open_interest), Some(1200));
    assert_eq!(view.meta.underlying_value, Some(24512.35));

    // summary only sees the latest observation
    assert_eq!(view.summaries.len(), 1);
    assert_eq!(view.summaries[0].call.open_interest, 1200);
    assert_eq!(view.summaries[0].pcr(), Ratio::Value(1.5));

    let latest = session.view(&RecordFilter::default().with_latest_only(true));
    assert_eq!(latest.records.len(), 1);

    let slots = session.bucket("28-Oct-2026", dec!(24500));
    assert_eq!(slots.len(), 126);
    let labels: Vec<_> = slots
        .iter()
        .filter(|slot| slot.has_data())
        .map(|slot| slot.label())
        .collect();
    assert_eq!(labels, vec!["10:03", "10:06"]);

    session.shutdown().await;
    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server did not observe the close")
        .unwrap();
}

#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // first connection closes straight away
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();

        // second connection serves one snapshot
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let snapshot = r#"{"timestamp": "16-Oct-2026 10:03:00", "underlyingValue": 24480.1,
            "data": [{"strikePrice": 24500, "expiryDate": "28-Oct-2026", "CE": {"openInterest": 10}}]}"#;
        ws.send(Message::text(snapshot.to_string())).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });

    let session = Session::start(StreamConfig::new(format!("ws://{addr}")), EngineConfig::default()).unwrap();

    wait_until(&session, |state| state.meta().records == 1).await;
    let view = session.view(&RecordFilter::default());
    assert_eq!(view.connection.retry_count, 0);

    session.shutdown().await;
    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server did not observe the close")
        .unwrap();
}
