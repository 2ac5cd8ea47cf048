use std::sync::Arc;
use std::time::Duration;

use controme::{
    ClimateEntity, ContromeClient, Coordinator, Credentials, EntityKey, Error, MetricKind,
    Reading, SensorEntity,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEMPS: &str = "/get/json/v1/1/temps/";
const SET_LIVING: &str = "/set/json/v1/1/soll/10/";

fn living_room(target: f64) -> serde_json::Value {
    json!([{
        "id": "1",
        "etagenname": "Ground",
        "raeume": [{"id": "10", "name": "Living Room", "temperatur": 21.5, "solltemperatur": target}]
    }])
}

fn coordinator(server: &MockServer) -> Coordinator {
    let client = ContromeClient::builder(server.uri()).build().unwrap();
    Coordinator::builder(client, "1").build()
}

fn credentials(server: &MockServer) -> Arc<Credentials> {
    Arc::new(Credentials {
        base_url: server.uri(),
        house_id: "1".to_string(),
        user: "admin".to_string(),
        password: "good".to_string(),
    })
}

fn climate(server: &MockServer, c: &Coordinator) -> ClimateEntity {
    ClimateEntity::new("1", "10", "Living Room", c.clone(), credentials(server))
}

#[tokio::test]
async fn sensors_read_current_and_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(living_room(22.0)))
        .mount(&server)
        .await;

    let c = coordinator(&server);
    let current = SensorEntity::new(
        EntityKey::new("1", "1", "10", MetricKind::Current),
        "Living Room Temperature",
        c.clone(),
    );
    let target = SensorEntity::new(
        EntityKey::new("1", "1", "10", MetricKind::Target),
        "Living Room Target Temperature",
        c.clone(),
    );
    assert!(!current.available());
    assert_eq!(current.value(), None);

    c.refresh().await.unwrap();

    assert!(current.available());
    assert_eq!(current.value(), Some(Reading::Number(21.5)));
    assert_eq!(target.value(), Some(Reading::Number(22.0)));
    assert_eq!(current.unique_id(), "controme_1_10_current");
    assert_eq!(current.unit(), Some("°C"));
}

#[tokio::test]
async fn room_missing_from_one_refresh_is_temporarily_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(living_room(22.0)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "1", "etagenname": "Ground", "raeume": []}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(living_room(22.0)))
        .mount(&server)
        .await;

    let c = coordinator(&server);
    let sensor = SensorEntity::new(
        EntityKey::new("1", "1", "10", MetricKind::Current),
        "Living Room Temperature",
        c.clone(),
    );

    c.refresh().await.unwrap();
    assert_eq!(sensor.value(), Some(Reading::Number(21.5)));

    c.refresh().await.unwrap();
    assert_eq!(sensor.value(), None);
    assert!(sensor.available());

    c.refresh().await.unwrap();
    assert_eq!(sensor.value(), Some(Reading::Number(21.5)));
}

#[tokio::test]
async fn set_target_shows_value_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(living_room(22.0)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SET_LIVING))
        .and(body_string_contains("soll=23.0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let c = coordinator(&server);
    c.refresh().await.unwrap();
    let entity = climate(&server, &c);
    assert_eq!(entity.target_temperature(), Some(22.0));

    entity.set_target_temperature(23.0).await.unwrap();

    assert_eq!(entity.target_temperature(), Some(23.0));
    let target = entity.target();
    assert_eq!(target.confirmed, Some(22.0));
    assert_eq!(target.optimistic, Some(23.0));
}

#[tokio::test]
async fn stale_refresh_in_flight_does_not_override_write() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(living_room(22.0)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(living_room(22.0))
                .set_delay(Duration::from_millis(300)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(living_room(23.0)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SET_LIVING))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let c = coordinator(&server);
    c.refresh().await.unwrap();
    let entity = climate(&server, &c);

    let stale = tokio::spawn({
        let c = c.clone();
        async move { c.refresh().await }
    });
    while c.issued_tick() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    entity.set_target_temperature(23.0).await.unwrap();
    assert_eq!(entity.target_temperature(), Some(23.0));

    let stale = stale.await.unwrap().unwrap();
    assert_eq!(stale.tick, 2);
    assert_eq!(c.snapshot().unwrap().tick, 2);
    assert_eq!(entity.target().confirmed, Some(22.0));
    assert_eq!(entity.target_temperature(), Some(23.0));

    c.refresh().await.unwrap();
    let target = entity.target();
    assert_eq!(target.optimistic, None);
    assert_eq!(target.confirmed, Some(23.0));
    assert_eq!(entity.target_temperature(), Some(23.0));
}

#[tokio::test]
async fn next_refresh_is_authoritative_even_when_it_disagrees() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(living_room(22.0)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SET_LIVING))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let c = coordinator(&server);
    c.refresh().await.unwrap();
    let entity = climate(&server, &c);

    entity.set_target_temperature(25.0).await.unwrap();
    assert_eq!(entity.target_temperature(), Some(25.0));

    c.refresh().await.unwrap();
    assert_eq!(entity.target_temperature(), Some(22.0));
    assert_eq!(entity.target().optimistic, None);
}

#[tokio::test]
async fn rejected_credentials_leave_target_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(living_room(22.0)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SET_LIVING))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let c = coordinator(&server);
    c.refresh().await.unwrap();
    let entity = climate(&server, &c);
    let before = entity.target();

    let err = entity.set_target_temperature(23.0).await.unwrap_err();
    assert!(matches!(err, Error::Auth), "{err:?}");
    assert_eq!(entity.target(), before);
    assert_eq!(entity.target_temperature(), Some(22.0));
}

#[tokio::test]
async fn climate_reports_room_readings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TEMPS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "1",
            "raeume": [{"id": "10", "name": "Living Room", "temperatur": 21.5, "luftfeuchte": 45.0}]
        }])))
        .mount(&server)
        .await;

    let c = coordinator(&server);
    let entity = climate(&server, &c);
    assert!(!entity.available());
    assert_eq!(entity.current_temperature(), None);

    c.refresh().await.unwrap();
    assert!(entity.available());
    assert_eq!(entity.current_temperature(), Some(21.5));
    assert_eq!(entity.humidity(), Some(45.0));
    assert_eq!(entity.target_temperature(), None);
    assert_eq!(entity.unique_id(), "controme_1_10_climate");
}
