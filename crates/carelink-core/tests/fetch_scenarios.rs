//! End-to-end fetch cycle tests against a scripted transport.
//!
//! These cover the role flows, session refresh, proxy rotation, backoff
//! timing and the per-attempt request ceiling.

mod common;

use carelink_core::network::RequestBody;
use carelink_core::{
    CareLinkClient, CareLinkError, NetworkErrorKind, ProxyRotator, RetryConfig, Role,
    SessionStore, SnapshotSource,
};
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn client(
    transport: &ScriptedTransport,
    store: Arc<carelink_core::MemorySessionStore>,
    rotator: ProxyRotator,
) -> CareLinkClient {
    CareLinkClient::builder(endpoints(), store)
        .with_transport(Box::new(transport.clone()))
        .with_proxies(rotator)
        .build()
        .unwrap()
}

fn json_body(body: &RequestBody) -> serde_json::Value {
    match body {
        RequestBody::Json(value) => value.clone(),
        other => panic!("expected JSON body, got {:?}", other),
    }
}

#[tokio::test]
async fn test_patient_monitor_data_is_returned_directly() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, patient_profile())
        .get(&ep.monitor_data, ok(json!({"a": 1, "b": 2})));
    let session = valid_session();
    let mut client = client(&transport, store_with(Some(session.clone())), ProxyRotator::disabled());

    let snapshot = client.fetch().await.unwrap();

    assert_eq!(snapshot.data, json!({"a": 1, "b": 2}));
    assert_eq!(snapshot.source, SnapshotSource::MonitorData);
    assert_eq!(snapshot.role, Role::Patient);
    assert_eq!(transport.urls(), vec![ep.me.clone(), ep.monitor_data.clone()]);
    assert!(transport
        .requests()
        .iter()
        .all(|r| r.bearer.as_deref() == Some(session.access_token.as_str())));

    let stats = client.last_stats();
    assert!(stats.success);
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.proxy_swaps, 0);
}

#[tokio::test]
async fn test_patient_ble_device_switches_to_periodic_endpoint() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, patient_profile())
        .get(&ep.monitor_data, ok(json!({"deviceFamily": "BLE_7XXG", "x": 1})))
        .get(&ep.country_settings, country_settings(Some(PERIODIC_TEMPLATE)))
        .post(
            PERIODIC_TEMPLATE,
            ok(json!({"patientData": {"lastSG": {"sg": 140}}, "metadata": {}})),
        );
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    let snapshot = client.fetch().await.unwrap();

    assert_eq!(
        snapshot.data,
        json!({"patientData": {"lastSG": {"sg": 140}}, "metadata": {}})
    );
    assert_eq!(
        snapshot.source,
        SnapshotSource::BlePeriodic {
            endpoint: PERIODIC_TEMPLATE.to_string()
        }
    );
    assert_eq!(snapshot.last_sg_value(), Some(140.0));

    // Profile is read again for the patient id.
    assert_eq!(transport.requests_to(&ep.me).len(), 2);
    let post = &transport.requests_to(PERIODIC_TEMPLATE)[0];
    assert_eq!(
        json_body(&post.body),
        json!({"username": "alice", "role": "patient", "patientId": "alice-id"})
    );
}

#[tokio::test]
async fn test_ble_empty_response_fails() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, patient_profile())
        .get(&ep.monitor_data, ok(json!({"deviceFamily": "SIMPLERA"})))
        .get(&ep.country_settings, country_settings(Some(PERIODIC_TEMPLATE)))
        .post(PERIODIC_TEMPLATE, ok(json!({})));
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, CareLinkError::EmptyBleResponse));
}

#[tokio::test]
async fn test_ble_without_endpoint_fails() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, patient_profile())
        .get(&ep.monitor_data, ok(json!({"deviceFamily": "MINIMED_BLE"})))
        .get(&ep.country_settings, country_settings(None));
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, CareLinkError::NoBleEndpoint));
}

#[tokio::test]
async fn test_patient_falls_back_to_connect_data() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, patient_profile())
        .get(&ep.monitor_data, Reply::Status(500, json!(null)))
        .get(&format!("{}/patient/connect/data", ep.base), ok(json!({"sgs": []})));
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    let snapshot = client.fetch().await.unwrap();

    assert_eq!(snapshot.source, SnapshotSource::ConnectData);
    assert_eq!(snapshot.data, json!({"sgs": []}));
    let connect = transport.urls()[2].clone();
    assert!(connect.contains("cpSerialNumber=NONE"));
    assert!(connect.contains("msgType=last24hours"));
    assert!(connect.contains("requestTime="));
}

#[tokio::test]
async fn test_single_field_monitor_data_counts_as_empty() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, patient_profile())
        .get(&ep.monitor_data, ok(json!({"only": 1})))
        .get(&format!("{}/patient/connect/data", ep.base), ok(json!(null)));
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    // Connect data is returned even when empty.
    let snapshot = client.fetch().await.unwrap();
    assert_eq!(snapshot.source, SnapshotSource::ConnectData);
    assert!(snapshot.data.is_null());
}

#[tokio::test]
async fn test_expired_token_is_refreshed_and_data_fetched() {
    let ep = endpoints();
    let fresh_token = jwt_with_exp(now_secs() + 7200);
    let transport = ScriptedTransport::new();
    transport
        .post(
            TOKEN_URL,
            ok(json!({"access_token": fresh_token, "refresh_token": "rotated"})),
        )
        .get(&ep.me, patient_profile())
        .get(&ep.monitor_data, ok(json!({"a": 1, "b": 2})));
    let store = store_with(Some(expired_session()));
    let mut client = client(&transport, store.clone(), ProxyRotator::disabled());

    let snapshot = client.fetch().await.unwrap();
    assert_eq!(snapshot.data, json!({"a": 1, "b": 2}));

    let persisted = store.load().unwrap().unwrap();
    assert_eq!(persisted.access_token, fresh_token);
    assert_eq!(persisted.refresh_token, "rotated");

    let requests = transport.requests();
    assert_eq!(requests[0].url, TOKEN_URL);
    assert_eq!(requests[0].bearer, None);
    assert!(matches!(requests[0].body, RequestBody::Form(_)));
    assert_eq!(requests[1].bearer.as_deref(), Some(fresh_token.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_deletes_session_without_rotation() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .post(TOKEN_URL, Reply::Status(400, json!({"error": "invalid_grant"})))
        .get(&ep.me, patient_profile());
    let store = store_with(Some(expired_session()));
    let mut client = client(&transport, store.clone(), proxies(3));

    let err = client.fetch().await.unwrap_err();

    assert!(matches!(err, CareLinkError::RefreshExpired { .. }));
    assert!(err.is_credential_failure());
    assert!(store.load().unwrap().is_none());
    assert_eq!(transport.bound_proxies(), vec![proxy_address(1)]);
    assert_eq!(transport.urls(), vec![TOKEN_URL.to_string()]);
    assert_eq!(client.last_stats().attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsaved_refresh_survives_proxy_swap() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    let rotated = jwt_with_exp(now_secs() + 3600);
    transport
        .route(
            reqwest::Method::POST,
            TOKEN_URL,
            vec![
                ok(json!({"access_token": rotated, "refresh_token": "refresh-2"})),
                Reply::Status(400, json!({"error": "invalid_grant"})),
            ],
        )
        .route(
            reqwest::Method::GET,
            &ep.me,
            vec![Reply::Status(403, json!(null)), patient_profile()],
        )
        .get(&ep.monitor_data, ok(json!({"a": 1})));
    let store = ReadOnlyStore::new(expired_session());
    let mut client = CareLinkClient::builder(endpoints(), store.clone())
        .with_transport(Box::new(transport.clone()))
        .with_proxies(proxies(2))
        .build()
        .unwrap();

    let snapshot = client.fetch().await.unwrap();

    assert_eq!(snapshot.source, SnapshotSource::MonitorData);
    assert_eq!(transport.requests_to(TOKEN_URL).len(), 1);
    let data = transport.requests_to(&ep.monitor_data);
    assert_eq!(data[0].bearer.as_deref(), Some(rotated.as_str()));
    assert!(store.inner.load().unwrap().is_some());
    assert_eq!(client.last_stats().proxy_swaps, 1);
}

#[tokio::test]
async fn test_missing_session_fails_without_requests() {
    let transport = ScriptedTransport::new();
    let mut client = client(&transport, store_with(None), proxies(2));

    let err = client.fetch().await.unwrap_err();

    assert!(matches!(err, CareLinkError::NoCredentials));
    assert!(transport.requests().is_empty());
    assert!(!client.last_stats().success);
}

#[tokio::test(start_paused = true)]
async fn test_transient_status_rotates_through_every_proxy() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport.get(&ep.me, Reply::Status(503, json!(null)));
    let mut client = client(&transport, store_with(Some(valid_session())), proxies(3));

    let started = Instant::now();
    let err = client.fetch().await.unwrap_err();

    assert!(matches!(err, CareLinkError::HttpStatus { status: 503, .. }));
    assert_eq!(
        transport.bound_proxies(),
        vec![proxy_address(1), proxy_address(2), proxy_address(3)]
    );
    let used: Vec<_> = transport.requests().into_iter().map(|r| r.proxy).collect();
    assert_eq!(used, vec![proxy_address(1), proxy_address(2), proxy_address(3)]);

    let stats = client.last_stats();
    assert_eq!(stats.proxy_swaps, 2);
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.total_delay, Duration::from_secs(2));
    assert_eq!(started.elapsed().as_secs(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_custom_proxy_swap_delay() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport.get(&ep.me, Reply::Status(502, json!(null)));
    let mut client = CareLinkClient::builder(endpoints(), store_with(Some(valid_session())))
        .with_transport(Box::new(transport.clone()))
        .with_proxies(proxies(3))
        .with_retry_config(
            RetryConfig::for_proxies(true).with_proxy_swap_delay(Duration::from_secs(5)),
        )
        .build()
        .unwrap();

    let started = Instant::now();
    assert!(client.fetch().await.is_err());

    let times: Vec<u64> = transport
        .requests()
        .iter()
        .map(|r| (r.at - started).as_secs())
        .collect();
    assert_eq!(times, vec![0, 5, 10]);
    assert_eq!(client.last_stats().total_delay, Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_network_error_with_single_proxy_propagates() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport.get(&ep.me, Reply::Network(NetworkErrorKind::ConnectionRefused));
    let mut client = client(&transport, store_with(Some(valid_session())), proxies(1));

    let err = client.fetch().await.unwrap_err();

    assert!(matches!(
        err,
        CareLinkError::Network {
            kind: NetworkErrorKind::ConnectionRefused,
            ..
        }
    ));
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(client.last_stats().proxy_swaps, 0);
}

#[tokio::test(start_paused = true)]
async fn test_proxy_swap_recovers() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .route(
            reqwest::Method::GET,
            &ep.me,
            vec![Reply::Status(403, json!(null)), patient_profile()],
        )
        .get(&ep.monitor_data, ok(json!({"a": 1, "b": 2})));
    let mut client = client(&transport, store_with(Some(valid_session())), proxies(3));

    let snapshot = client.fetch().await.unwrap();

    assert_eq!(snapshot.source, SnapshotSource::MonitorData);
    let stats = client.last_stats();
    assert_eq!(stats.proxy_swaps, 1);
    assert!(stats.success);
    assert_eq!(
        transport.requests_to(&ep.monitor_data)[0].proxy,
        proxy_address(2)
    );
}

#[tokio::test(start_paused = true)]
async fn test_proxy_rotation_rearms_each_cycle() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport.get(&ep.me, Reply::Status(407, json!(null)));
    let mut client = client(&transport, store_with(Some(valid_session())), proxies(2));

    assert!(client.fetch().await.is_err());
    assert!(client.fetch().await.is_err());

    // Second cycle starts from the proxy the first one ended on.
    assert_eq!(
        transport.bound_proxies(),
        vec![
            proxy_address(1),
            proxy_address(2),
            proxy_address(2),
            proxy_address(1)
        ]
    );
    assert_eq!(client.last_stats().proxy_swaps, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unclassified_failures_back_off_exponentially() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport.get(&ep.me, Reply::Status(500, json!(null)));
    let mut client = CareLinkClient::builder(endpoints(), store_with(Some(valid_session())))
        .with_transport(Box::new(transport.clone()))
        .with_proxies(proxies(2))
        .with_retry_config(RetryConfig::for_proxies(true).with_max_attempts(4))
        .build()
        .unwrap();

    let started = Instant::now();
    let err = client.fetch().await.unwrap_err();

    assert!(matches!(err, CareLinkError::HttpStatus { status: 500, .. }));
    let times: Vec<u64> = transport
        .requests()
        .iter()
        .map(|r| (r.at - started).as_secs())
        .collect();
    // Waits of 2, 4 and 8 seconds; nothing after the final attempt.
    assert_eq!(times, vec![0, 2, 6, 14]);
    assert_eq!(started.elapsed().as_secs(), 14);

    let stats = client.last_stats();
    assert_eq!(stats.attempts, 4);
    assert_eq!(stats.proxy_swaps, 0);
    assert_eq!(stats.total_delay, Duration::from_secs(14));
}

#[tokio::test(start_paused = true)]
async fn test_direct_mode_makes_a_single_attempt() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport.get(&ep.me, Reply::Status(500, json!(null)));
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    let started = Instant::now();
    assert!(client.fetch().await.is_err());

    assert_eq!(client.retry_config().max_attempts, 1);
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(transport.bound_proxies().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_request_ceiling_is_fatal() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, patient_profile())
        .get(&ep.monitor_data, ok(json!({})))
        .get(&format!("{}/patient/connect/data", ep.base), ok(json!({"a": 1})));
    let mut client = CareLinkClient::builder(endpoints(), store_with(Some(valid_session())))
        .with_transport(Box::new(transport.clone()))
        .with_proxies(proxies(3))
        .with_request_ceiling(2)
        .build()
        .unwrap();

    let err = client.fetch().await.unwrap_err();

    assert!(matches!(
        err,
        CareLinkError::RequestCeilingExceeded { ceiling: 2 }
    ));
    // The third call is refused before it reaches the transport.
    assert_eq!(transport.requests().len(), 2);
    assert_eq!(client.last_stats().attempts, 1);
    assert_eq!(client.last_stats().proxy_swaps, 0);
}

#[tokio::test]
async fn test_care_partner_version_fallback_order() {
    let ep = endpoints();
    let v5 = PERIODIC_TEMPLATE.replace("/v6/", "/v5/");
    let v11 = PERIODIC_TEMPLATE.replace("/v6/", "/v11/");
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, care_partner_profile())
        .get(&ep.linked_patients, ok(json!([{"username": "alice"}, {"username": "carol"}])))
        .get(&ep.monitor_data, ok(json!({"deviceFamily": "NGP", "x": 1})))
        .get(&ep.country_settings, country_settings(Some(PERIODIC_TEMPLATE)))
        .post(PERIODIC_TEMPLATE, Reply::Status(404, json!(null)))
        .post(&v5, Reply::Status(403, json!(null)))
        .post(&v11, ok(json!({"patientData": {"lastSG": {"sg": 101}}})));
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    let snapshot = client.fetch().await.unwrap();

    assert_eq!(snapshot.role, Role::CarePartnerOus);
    assert_eq!(snapshot.source, SnapshotSource::CarePartner { endpoint: v11.clone() });

    let posts: Vec<_> = transport
        .requests()
        .into_iter()
        .filter(|r| r.method == reqwest::Method::POST)
        .collect();
    let order: Vec<_> = posts.iter().map(|r| r.url.clone()).collect();
    assert_eq!(order, vec![PERIODIC_TEMPLATE.to_string(), v5, v11]);
    assert_eq!(
        json_body(&posts[0].body),
        json!({"username": "bob", "role": "carepartner", "patientId": "alice"})
    );
    assert!(transport.urls()[2].ends_with("/patient/monitor/data?patientId=alice"));
}

#[tokio::test]
async fn test_care_partner_all_endpoints_failing() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, care_partner_profile())
        .get(&ep.monitor_data, ok(json!({"deviceFamily": "NGP"})))
        .get(&ep.country_settings, country_settings(Some(PERIODIC_TEMPLATE)))
        .post("https://clcloud.carelink.test/", Reply::Status(500, json!(null)));
    let mut client = CareLinkClient::builder(endpoints(), store_with(Some(valid_session())))
        .with_transport(Box::new(transport.clone()))
        .with_patient_id(Some("fixed-patient".into()))
        .build()
        .unwrap();

    let err = client.fetch().await.unwrap_err();

    match err {
        CareLinkError::AllEndpointsFailed { tried } => assert_eq!(tried.len(), 3),
        other => panic!("expected AllEndpointsFailed, got {:?}", other),
    }
    // A configured patient id skips the linked-patients lookup.
    assert!(transport.requests_to(&ep.linked_patients).is_empty());
    assert!(transport.urls()[1].ends_with("patientId=fixed-patient"));
}

#[tokio::test]
async fn test_care_partner_without_linked_patient() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, care_partner_profile())
        .get(&ep.linked_patients, ok(json!([])));
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, CareLinkError::NoLinkedPatient));
}

#[tokio::test]
async fn test_care_partner_without_data_endpoint() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, care_partner_profile())
        .get(&ep.linked_patients, ok(json!([{"username": "alice"}])))
        .get(&ep.monitor_data, ok(json!({"deviceFamily": "NGP"})))
        .get(&ep.country_settings, country_settings(None));
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, CareLinkError::MissingDataEndpoint));
}

#[tokio::test]
async fn test_care_partner_ble_patient() {
    let ep = endpoints();
    let transport = ScriptedTransport::new();
    transport
        .get(&ep.me, ok(json!({"username": "bob", "role": "care_partner"})))
        .get(&ep.linked_patients, ok(json!([{"username": "alice"}])))
        .get(&ep.monitor_data, ok(json!({"deviceFamily": "BLE_780G"})))
        .get(&ep.country_settings, country_settings(Some(PERIODIC_TEMPLATE)))
        .post(PERIODIC_TEMPLATE, ok(json!({"patientData": {"x": 1}})));
    let mut client = client(&transport, store_with(Some(valid_session())), ProxyRotator::disabled());

    let snapshot = client.fetch().await.unwrap();

    assert_eq!(snapshot.role, Role::CarePartner);
    assert!(matches!(snapshot.source, SnapshotSource::BlePeriodic { .. }));
    let post = &transport.requests_to(PERIODIC_TEMPLATE)[0];
    assert_eq!(
        json_body(&post.body),
        json!({"username": "bob", "role": "carepartner", "patientId": "alice"})
    );
    // Patient id is known, so the profile is not read twice.
    assert_eq!(transport.requests_to(&ep.me).len(), 1);
}
