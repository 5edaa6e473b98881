use analytics_relay::{Callback, Client, Config, Error, Event, Track};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry_config(server: &MockServer, attempts: usize) -> Config {
    Config {
        endpoint: server.uri(),
        batch_size: 1,
        retry_attempts: attempts,
        retry_after: Some(Arc::new(|_| Duration::from_millis(1))),
        ..Config::default()
    }
}

fn track() -> Track {
    Track {
        event: "Download".to_owned(),
        user_id: "123456".to_owned(),
        ..Track::default()
    }
}

struct RecordingCallback {
    success: mpsc::UnboundedSender<Event>,
    failure: mpsc::UnboundedSender<(Event, String)>,
}

impl RecordingCallback {
    fn channels() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<Event>,
        mpsc::UnboundedReceiver<(Event, String)>,
    ) {
        let (success_tx, success_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                success: success_tx,
                failure: failure_tx,
            }),
            success_rx,
            failure_rx,
        )
    }
}

impl Callback for RecordingCallback {
    fn on_success(&self, event: Event) {
        let _ = self.success.send(event);
    }

    fn on_failure(&self, event: Event, error: &Error) {
        let _ = self.failure.send((event, error.to_string()));
    }
}

#[tokio::test]
async fn server_errors_are_retried_until_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let (callback, _success_rx, mut failure_rx) = RecordingCallback::channels();
    let client = Client::with_config(
        "key",
        Config {
            callback: Some(callback),
            ..fast_retry_config(&server, 3)
        },
    )
    .unwrap();

    client.enqueue(track()).await.unwrap();

    // Wait for the terminal notification before closing: close cancels any
    // pending retry sleep.
    let (_event, error) = tokio::time::timeout(Duration::from_secs(5), failure_rx.recv())
        .await
        .expect("retries never exhausted")
        .expect("callback channel closed");
    client.close().await.unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert!(error.contains("500"), "unexpected error: {error}");
    assert!(failure_rx.try_recv().is_err(), "failure notified twice");
}

#[tokio::test]
async fn too_many_requests_is_retried_and_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/batch"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (callback, mut success_rx, mut failure_rx) = RecordingCallback::channels();
    let client = Client::with_config(
        "key",
        Config {
            callback: Some(callback),
            ..fast_retry_config(&server, 5)
        },
    )
    .unwrap();

    client.enqueue(track()).await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(5), success_rx.recv())
        .await
        .expect("upload never recovered")
        .expect("callback channel closed");
    assert_eq!(delivered.kind(), "track");
    client.close().await.unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert!(failure_rx.try_recv().is_err());
}

#[tokio::test]
async fn permanent_rejections_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
        .expect(1)
        .mount(&server)
        .await;

    let (callback, _success_rx, mut failure_rx) = RecordingCallback::channels();
    let client = Client::with_config(
        "key",
        Config {
            callback: Some(callback),
            ..fast_retry_config(&server, 10)
        },
    )
    .unwrap();

    client.enqueue(track()).await.unwrap();
    client.close().await.unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    let (_event, error) = failure_rx.try_recv().unwrap();
    assert!(error.contains("400"), "unexpected error: {error}");
    assert!(error.contains("bad payload"), "body missing: {error}");
}

#[tokio::test]
async fn redirect_class_statuses_count_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch"))
        .respond_with(ResponseTemplate::new(399))
        .expect(1)
        .mount(&server)
        .await;

    let (callback, mut success_rx, _failure_rx) = RecordingCallback::channels();
    let client = Client::with_config(
        "key",
        Config {
            callback: Some(callback),
            ..fast_retry_config(&server, 10)
        },
    )
    .unwrap();

    client.enqueue(track()).await.unwrap();
    client.close().await.unwrap();

    assert!(success_rx.try_recv().is_ok());
}

#[tokio::test]
async fn connection_failures_count_toward_the_retry_budget() {
    // Nothing is listening on this port.
    let (callback, _success_rx, mut failure_rx) = RecordingCallback::channels();
    let client = Client::with_config(
        "key",
        Config {
            endpoint: "http://127.0.0.1:9".to_owned(),
            batch_size: 1,
            retry_attempts: 2,
            retry_after: Some(Arc::new(|_| Duration::from_millis(1))),
            callback: Some(callback),
            ..Config::default()
        },
    )
    .unwrap();

    client.enqueue(track()).await.unwrap();

    let (_event, error) = tokio::time::timeout(Duration::from_secs(5), failure_rx.recv())
        .await
        .expect("retries never exhausted")
        .expect("callback channel closed");
    client.close().await.unwrap();

    assert!(
        error.contains("sending request"),
        "unexpected error: {error}"
    );
}

#[tokio::test]
async fn config_errors_surface_from_the_constructor() {
    let err = Client::with_config(
        "key",
        Config {
            interval: Duration::ZERO,
            ..Config::default()
        },
    )
    .unwrap_err();

    match err {
        Error::Config(config_err) => {
            assert_eq!(config_err.field, "Interval");
            assert_eq!(config_err.reason, "must be positive");
        }
        other => panic!("expected a config error, got {other}"),
    }
}
