use std::sync::Arc;
use std::time::Duration;

use controme::{ContromeClient, Coordinator, Error};
use futures::future::join_all;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEMPS: &str = "/get/json/v1/1/temps/";

fn body(temperature: f64) -> serde_json::Value {
    json!([{
        "id": "1",
        "etagenname": "Ground",
        "raeume": [{"id": "10", "name": "Living Room", "temperatur": temperature, "solltemperatur": 22.0}]
    }])
}

fn coordinator(server: &MockServer) -> Coordinator {
    let client = ContromeClient::builder(server.uri()).build().unwrap();
    Coordinator::builder(client, "1").build()
}

fn current(c: &Coordinator) -> Option<f64> {
    c.snapshot()
        .and_then(|s| s.room("1", "10").and_then(|r| r.temperature))
}

#[tokio::test]
async fn concurrent_refreshes_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(body(21.5))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let c = coordinator(&server);
    let results = join_all((0..8).map(|_| c.refresh())).await;

    let snapshots: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
    assert!(Arc::ptr_eq(&c.snapshot().unwrap(), &snapshots[0]));
    assert_eq!(snapshots[0].tick, 1);
}

#[tokio::test]
async fn concurrent_refreshes_share_one_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let c = coordinator(&server);
    let results = join_all((0..4).map(|_| c.refresh())).await;

    let errors: Vec<Arc<Error>> = results
        .into_iter()
        .map(|r| match r {
            Err(Error::Fetch(inner)) => inner,
            other => panic!("expected fetch error, got {other:?}"),
        })
        .collect();
    assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));
    assert!(matches!(*errors[0], Error::HttpStatus(503)));
    assert!(c.snapshot().is_none());
}

#[tokio::test]
async fn sequential_refreshes_issue_new_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(21.5)))
        .expect(2)
        .mount(&server)
        .await;

    let c = coordinator(&server);
    let first = c.refresh().await.unwrap();
    let second = c.refresh().await.unwrap();
    assert_eq!((first.tick, second.tick), (1, 2));
    assert_eq!(c.snapshot().unwrap().tick, 2);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(21.5)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let c = coordinator(&server);
    let good = c.refresh().await.unwrap();
    let before = (*good).clone();

    let err = c.refresh().await.unwrap_err();
    assert!(matches!(err.root(), Error::HttpStatus(500)), "{err:?}");

    let published = c.snapshot().unwrap();
    assert!(Arc::ptr_eq(&published, &good));
    assert_eq!(*published, before);
    assert!(matches!(c.last_error().as_deref(), Some(Error::HttpStatus(500))));
    assert_eq!(current(&c), Some(21.5));
}

#[tokio::test]
async fn success_clears_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(20.0)))
        .mount(&server)
        .await;

    let c = coordinator(&server);
    assert!(c.refresh().await.is_err());
    assert!(c.last_error().is_some());

    c.refresh().await.unwrap();
    assert!(c.last_error().is_none());
    assert_eq!(current(&c), Some(20.0));
}

#[tokio::test]
async fn slow_refresh_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(body(21.5))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = ContromeClient::builder(server.uri()).build().unwrap();
    let c = Coordinator::builder(client, "1")
        .refresh_timeout(Duration::from_millis(100))
        .build();

    let err = c.refresh().await.unwrap_err();
    assert!(matches!(err.root(), Error::Timeout), "{err:?}");
    assert!(err.root().is_transport());
    assert!(c.snapshot().is_none());
}

#[tokio::test]
async fn scheduler_publishes_and_stops() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(21.5)))
        .mount(&server)
        .await;

    let client = ContromeClient::builder(server.uri()).build().unwrap();
    let c = Coordinator::builder(client, "1")
        .update_interval(Duration::from_millis(100))
        .build();
    let mut rx = c.subscribe();

    c.start();
    c.start();
    assert!(c.is_running());

    tokio::time::timeout(Duration::from_secs(2), rx.changed())
        .await
        .expect("scheduler should publish")
        .unwrap();
    assert_eq!(current(&c), Some(21.5));

    c.stop();
    assert!(!c.is_running());
}

#[tokio::test]
async fn request_refresh_publishes_in_background() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(19.0)))
        .expect(1)
        .mount(&server)
        .await;

    let c = coordinator(&server);
    let mut rx = c.subscribe();
    c.request_refresh();

    tokio::time::timeout(Duration::from_secs(2), rx.changed())
        .await
        .expect("requested refresh should publish")
        .unwrap();
    assert_eq!(rx.borrow().as_ref().unwrap().tick, 1);
    assert_eq!(current(&c), Some(19.0));
}

#[tokio::test]
async fn request_refresh_joins_in_flight_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(body(21.5))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let c = coordinator(&server);
    let pending = tokio::spawn({
        let c = c.clone();
        async move { c.refresh().await }
    });
    while c.issued_tick() < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    c.request_refresh();

    let snapshot = pending.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(c.issued_tick(), 1);
    assert!(Arc::ptr_eq(&c.snapshot().unwrap(), &snapshot));
}
