use analytics_relay::objstore::{ObjectStore, ObjectStoreClient, ObjectStoreConfig};
use analytics_relay::{Callback, Error, Event, Track};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use serde_json::json;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

fn mock_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2009, 11, 10, 23, 0, 0).unwrap()
}

fn mock_config() -> ObjectStoreConfig {
    ObjectStoreConfig {
        stage: "test".to_owned(),
        stream: "tuna".to_owned(),
        now: Some(Arc::new(mock_now)),
        uid: Some(Arc::new(|| "I'm unique".to_owned())),
        ..ObjectStoreConfig::default()
    }
}

fn track(version: i64) -> Track {
    let mut track = Track {
        event: "Download".to_owned(),
        user_id: "123456".to_owned(),
        ..Track::default()
    };
    track.properties.insert("version".to_owned(), json!(version));
    track
}

/// Store double that records every object it receives.
#[derive(Default)]
struct InMemoryStore {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.objects.lock().await.push((key.to_owned(), body));
        Ok(())
    }
}

/// Store double that fails a configurable number of times before accepting.
struct FlakyStore {
    failures_left: Mutex<usize>,
    inner: InMemoryStore,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        {
            let mut failures = self.failures_left.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err("simulated outage".into());
            }
        }
        self.inner.put_object(key, body).await
    }
}

fn decode_lines(body: &[u8]) -> Vec<serde_json::Value> {
    let mut text = String::new();
    GzDecoder::new(body).read_to_string(&mut text).unwrap();
    text.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn uploads_gzip_ndjson_under_the_default_key_layout() {
    let store = Arc::new(InMemoryStore::default());
    let client = ObjectStoreClient::new(
        store.clone(),
        ObjectStoreConfig {
            batch_size: 2,
            ..mock_config()
        },
    )
    .unwrap();

    for version in 0..3 {
        client.enqueue(track(version)).await.unwrap();
    }
    client.close().await.unwrap();

    let objects = store.objects.lock().await;
    assert_eq!(objects.len(), 2);

    // 2009-11-10T23:00:00Z is 1257894000 seconds into the epoch.
    let expected_key = "analytics/test/bulk/tuna/json/2009/11/10/23/1257894000-I'm unique.json.gz";
    assert_eq!(objects[0].0, expected_key);

    let rows = decode_lines(&objects[0].1);
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0]["context"],
        json!({"apiId": "I'm unique", "stage": "test"})
    );
    assert_eq!(rows[0]["sentAt"], json!("2009-11-10T23:00:00Z"));
    assert_eq!(rows[0]["receivedAt"], json!("2009-11-10T23:00:00Z"));
    assert_eq!(rows[0]["event"]["type"], json!("track"));
    assert_eq!(rows[0]["event"]["messageId"], json!("I'm unique"));
    assert_eq!(rows[0]["event"]["properties"]["version"], json!(0));
    assert_eq!(rows[1]["event"]["properties"]["version"], json!(1));

    let rows = decode_lines(&objects[1].1);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["event"]["properties"]["version"], json!(2));
}

#[tokio::test]
async fn custom_key_constructor_is_honored() {
    let store = Arc::new(InMemoryStore::default());
    let client = ObjectStoreClient::new(
        store.clone(),
        ObjectStoreConfig {
            batch_size: 1,
            key_constructor: Some(Arc::new(|now, uid| {
                format!("events/{}/{uid}.gz", now.timestamp())
            })),
            ..mock_config()
        },
    )
    .unwrap();

    client.enqueue(track(1)).await.unwrap();
    client.close().await.unwrap();

    let objects = store.objects.lock().await;
    assert_eq!(objects[0].0, "events/1257894000/I'm unique.gz");
}

#[tokio::test]
async fn file_backed_buffer_produces_the_same_objects() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::default());
    let client = ObjectStoreClient::new(
        store.clone(),
        ObjectStoreConfig {
            batch_size: 2,
            buffer_file_path: Some(dir.path().join("encoder.buf")),
            ..mock_config()
        },
    )
    .unwrap();

    for version in 0..4 {
        client.enqueue(track(version)).await.unwrap();
    }
    client.close().await.unwrap();

    let objects = store.objects.lock().await;
    assert_eq!(objects.len(), 2);
    for (n, object) in objects.iter().enumerate() {
        let rows = decode_lines(&object.1);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0]["event"]["properties"]["version"],
            json!(2 * n as i64)
        );
    }
}

struct SuccessCounter {
    successes: mpsc::UnboundedSender<Event>,
}

impl Callback for SuccessCounter {
    fn on_success(&self, event: Event) {
        let _ = self.successes.send(event);
    }

    fn on_failure(&self, _event: Event, _error: &Error) {}
}

#[tokio::test]
async fn store_failures_are_retried() {
    let store = Arc::new(FlakyStore {
        failures_left: Mutex::new(2),
        inner: InMemoryStore::default(),
    });
    let (success_tx, mut success_rx) = mpsc::unbounded_channel();
    let client = ObjectStoreClient::new(
        store.clone(),
        ObjectStoreConfig {
            batch_size: 1,
            retry_after: Some(Arc::new(|_| Duration::from_millis(1))),
            callback: Some(Arc::new(SuccessCounter {
                successes: success_tx,
            })),
            ..mock_config()
        },
    )
    .unwrap();

    client.enqueue(track(1)).await.unwrap();

    // Wait for delivery before closing: close cancels pending retry sleeps.
    tokio::time::timeout(Duration::from_secs(5), success_rx.recv())
        .await
        .expect("upload never recovered")
        .expect("callback channel closed");
    client.close().await.unwrap();

    let objects = store.inner.objects.lock().await;
    assert_eq!(objects.len(), 1);
}

struct FailureCounter {
    failures: mpsc::UnboundedSender<String>,
}

impl Callback for FailureCounter {
    fn on_success(&self, _event: Event) {}

    fn on_failure(&self, _event: Event, error: &Error) {
        let _ = self.failures.send(error.to_string());
    }
}

#[tokio::test]
async fn exhausted_retries_notify_failure_per_event() {
    let store = Arc::new(FlakyStore {
        failures_left: Mutex::new(usize::MAX),
        inner: InMemoryStore::default(),
    });
    let (failure_tx, mut failure_rx) = mpsc::unbounded_channel();
    let client = ObjectStoreClient::new(
        store,
        ObjectStoreConfig {
            batch_size: 2,
            retry_attempts: 2,
            retry_after: Some(Arc::new(|_| Duration::from_millis(1))),
            callback: Some(Arc::new(FailureCounter {
                failures: failure_tx,
            })),
            ..mock_config()
        },
    )
    .unwrap();

    client.enqueue(track(1)).await.unwrap();
    client.enqueue(track(2)).await.unwrap();
    client.close().await.unwrap();

    let mut failures = Vec::new();
    while let Ok(error) = failure_rx.try_recv() {
        failures.push(error);
    }
    assert_eq!(failures.len(), 2);
    assert!(failures[0].contains("simulated outage"));
}

/// Store double that holds its permit long enough for the pool to saturate.
struct SlowStore {
    inner: InMemoryStore,
}

#[async_trait]
impl ObjectStore for SlowStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.inner.put_object(key, body).await
    }
}

#[tokio::test]
async fn saturated_pool_fails_batches_instead_of_blocking() {
    let store = Arc::new(SlowStore {
        inner: InMemoryStore::default(),
    });
    let (failure_tx, mut failure_rx) = mpsc::unbounded_channel();
    let client = ObjectStoreClient::new(
        store.clone(),
        ObjectStoreConfig {
            batch_size: 1,
            max_concurrent_requests: 1,
            callback: Some(Arc::new(FailureCounter {
                failures: failure_tx,
            })),
            ..mock_config()
        },
    )
    .unwrap();

    // The first batch occupies the only uploader slot; the second finds the
    // pool saturated and is failed immediately.
    client.enqueue(track(1)).await.unwrap();
    client.enqueue(track(2)).await.unwrap();
    client.close().await.unwrap();

    let error = failure_rx.try_recv().unwrap();
    assert!(
        error.contains("too many concurrent"),
        "unexpected error: {error}"
    );
    assert_eq!(store.inner.objects.lock().await.len(), 1);
}

#[tokio::test]
async fn missing_stream_is_a_config_error() {
    let store = Arc::new(InMemoryStore::default());
    let err = ObjectStoreClient::new(
        store,
        ObjectStoreConfig {
            stream: String::new(),
            ..mock_config()
        },
    )
    .unwrap_err();

    match err {
        Error::Config(config_err) => assert_eq!(config_err.field, "Stream"),
        other => panic!("expected a config error, got {other}"),
    }
}

#[tokio::test]
async fn close_is_idempotent() {
    let store = Arc::new(InMemoryStore::default());
    let client = ObjectStoreClient::new(store, mock_config()).unwrap();

    client.enqueue(track(1)).await.unwrap();
    client.close().await.unwrap();
    assert!(client.close().await.unwrap_err().is_closed());
    assert!(client.enqueue(track(2)).await.unwrap_err().is_closed());
}
