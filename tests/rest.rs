mod common;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use cordial::{
    api::{self, types::APIErrorMessage},
    ws::event::RateLimit,
    Config, Subscribers,
};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use common::*;

fn client(config: Config) -> (api::Client, Arc<Subscribers>) {
    let subscribers = Arc::new(Subscribers::new(true));
    let client = api::Client::new(Arc::new(config), subscribers.clone()).unwrap();
    (client, subscribers)
}

fn rate_limited(retry_after: f64) -> MockResponse {
    MockResponse::json(
        429,
        json!({
            "message": "You are being rate limited.",
            "retry_after": retry_after,
            "global": false,
        }),
    )
}

#[tokio::test]
async fn test_success_returns_body() {
    init_log();

    let http = MockHttp::start(vec![MockResponse::json(200, json!({ "id": "1" }))]).await;
    let (client, _) = client(config(&http));

    let value: Value = client
        .request_json(Method::POST, "/channels/1/messages?x=1", &json!({ "content": "hi" }))
        .await
        .unwrap();

    assert_eq!(value, json!({ "id": "1" }));

    let request = &http.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/channels/1/messages?x=1");
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(
        serde_json::from_slice::<Value>(&request.body).unwrap(),
        json!({ "content": "hi" })
    );
}

#[tokio::test]
async fn test_no_content_is_success() {
    init_log();

    let http = MockHttp::start(vec![MockResponse::empty(204)]).await;
    let (client, _) = client(config(&http));

    let body = client
        .request(Method::DELETE, "/channels/1/messages/2", None)
        .await
        .unwrap();

    assert_eq!(body, Bytes::new());
}

#[tokio::test]
async fn test_bad_gateway_is_retried() {
    init_log();

    let http = MockHttp::start(vec![
        MockResponse::empty(502),
        MockResponse::empty(502),
        MockResponse::json(200, json!({ "url": "wss://gateway.example.gg" })),
    ])
    .await;
    let (client, _) = client(config(&http).with_max_rest_retries(3));

    let url = client.gateway().await.unwrap();

    assert_eq!(url, "wss://gateway.example.gg");
    assert_eq!(http.requests().len(), 3);
}

#[tokio::test]
async fn test_bad_gateway_exceeds_max_retries() {
    init_log();

    let http = MockHttp::start(vec![MockResponse::empty(502)]).await;
    let (client, _) = client(config(&http).with_max_rest_retries(2));

    let err = client.gateway().await.unwrap_err();

    assert!(matches!(
        err,
        api::Error::ExceededMaxRetries {
            status_code: StatusCode::BAD_GATEWAY,
            ..
        }
    ));
    assert_eq!(http.requests().len(), 3);
}

#[tokio::test]
async fn test_rate_limit_is_waited_and_retried() {
    init_log();

    let http = MockHttp::start(vec![
        rate_limited(0.25),
        MockResponse::json(200, json!({ "url": "wss://gateway.example.gg" })),
    ])
    .await;
    let (client, subscribers) = client(config(&http).with_max_rest_retries(0));

    let (tx, mut limits) = mpsc::unbounded_channel();
    subscribers.on(move |limit: RateLimit| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(limit);
        }
    });

    let start = tokio::time::Instant::now();
    let url = client.gateway().await.unwrap();

    assert_eq!(url, "wss://gateway.example.gg");
    assert!(start.elapsed() >= Duration::from_millis(250));
    // 429 retries do not use the 502 budget
    assert_eq!(http.requests().len(), 2);

    let limit = limits.try_recv().unwrap();
    assert!(limit.url.ends_with("/gateway"));
    assert_eq!(limit.too_many_requests.retry_after(), Duration::from_millis(250));
}

#[tokio::test]
async fn test_rate_limit_without_retry_is_typed_error() {
    init_log();

    let http = MockHttp::start(vec![rate_limited(0.5)]).await;
    let (client, subscribers) = client(config(&http).with_retry_on_rate_limit(false));

    let (tx, mut limits) = mpsc::unbounded_channel();
    subscribers.on(move |limit: RateLimit| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(limit);
        }
    });

    let err = client.gateway().await.unwrap_err();

    assert!(matches!(err, api::Error::RateLimited { .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_millis(500)));
    assert_eq!(http.requests().len(), 1);
    // notification is emitted even when not retrying
    assert!(limits.try_recv().is_ok());
}

#[tokio::test]
async fn test_rate_limit_falls_back_to_retry_after_header() {
    init_log();

    let http = MockHttp::start(vec![MockResponse::empty(429).header("Retry-After", "2")]).await;
    let (client, _) = client(config(&http).with_retry_on_rate_limit(false));

    let err = client.gateway().await.unwrap_err();

    assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
}

#[tokio::test]
async fn test_unauthorized_without_bot_prefix() {
    init_log();

    let http = MockHttp::start(vec![MockResponse::json(
        401,
        json!({ "message": "401: Unauthorized", "code": 0 }),
    )])
    .await;
    let (client, _) = client(Config::new("test").with_api_base(http.url()));

    let err = client.gateway().await.unwrap_err();

    assert!(matches!(err, api::Error::Unauthorized));
    assert_eq!(http.requests()[0].header("authorization"), Some("test"));
}

#[tokio::test]
async fn test_unauthorized_with_bot_prefix_is_generic() {
    init_log();

    let http = MockHttp::start(vec![MockResponse::json(
        401,
        json!({ "message": "401: Unauthorized", "code": 0 }),
    )])
    .await;
    let (client, _) = client(config(&http));

    let err = client.gateway().await.unwrap_err();

    assert!(matches!(
        err,
        api::Error::HTTPStatusNotOK {
            status_code: StatusCode::UNAUTHORIZED,
            ..
        }
    ));
}

#[tokio::test]
async fn test_other_status_decodes_error_message() {
    init_log();

    let http = MockHttp::start(vec![MockResponse::json(
        404,
        json!({ "message": "Unknown Channel", "code": 10003 }),
    )])
    .await;
    let (client, _) = client(config(&http));

    let err = client
        .request(Method::GET, "/channels/404", None)
        .await
        .unwrap_err();

    match err {
        api::Error::HTTPStatusNotOK {
            method,
            status_code,
            message,
            body,
            ..
        } => {
            assert_eq!(method, Method::GET);
            assert_eq!(status_code, StatusCode::NOT_FOUND);
            assert_eq!(
                message,
                Some(APIErrorMessage {
                    code: 10003,
                    message: "Unknown Channel".to_string(),
                })
            );
            assert!(!body.is_empty());
        }
        other => panic!("unexpected error {}", other),
    }
}

#[tokio::test]
async fn test_rate_limit_headers_delay_next_call() {
    init_log();

    let http = MockHttp::start(vec![
        MockResponse::json(200, json!({ "url": "wss://a.example.gg" }))
            .header("X-RateLimit-Remaining", "0")
            .header("X-RateLimit-Reset-After", "0.5"),
        MockResponse::json(200, json!({ "url": "wss://b.example.gg" })),
    ])
    .await;
    let (client, _) = client(config(&http));

    client.gateway().await.unwrap();

    let start = tokio::time::Instant::now();
    let url = client.gateway().await.unwrap();

    assert_eq!(url, "wss://b.example.gg");
    assert!(start.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn test_global_rate_limit_body_delays_other_buckets() {
    init_log();

    let http = MockHttp::start(vec![
        MockResponse::json(
            429,
            json!({
                "message": "You are being rate limited.",
                "retry_after": 1.0,
                "global": true,
            }),
        ),
        MockResponse::json(200, json!({ "id": "2" })),
    ])
    .await;
    let (client, _) = client(config(&http).with_retry_on_rate_limit(false));

    let err = client
        .request(Method::GET, "/channels/1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, api::Error::RateLimited { .. }));
    assert!(client.rate_limiter().global_wait().is_some());

    let start = tokio::time::Instant::now();
    let value: Value = client.get_json("/users/@me").await.unwrap();

    assert_eq!(value, json!({ "id": "2" }));
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_global_rate_limit_header_delays_other_buckets() {
    init_log();

    let http = MockHttp::start(vec![
        MockResponse::empty(429)
            .header("X-RateLimit-Global", "true")
            .header("Retry-After", "1"),
        MockResponse::json(200, json!({ "id": "2" })),
    ])
    .await;
    let (client, _) = client(config(&http).with_retry_on_rate_limit(false));

    let err = client
        .request(Method::GET, "/channels/1", None)
        .await
        .unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));

    let start = tokio::time::Instant::now();
    let value: Value = client.get_json("/users/@me").await.unwrap();

    assert_eq!(value, json!({ "id": "2" }));
    assert!(start.elapsed() >= Duration::from_millis(900));
    assert_eq!(http.requests().len(), 2);
}
