//! End-to-end retry/backoff/cancellation behavior of [`RequestEngine`]
//! against a real HTTP listener (spec §4.4 / C4).

use std::time::Duration;

use docbase_error::ErrorKind;
use docbase_transport::{CancellationToken, Endpoints, RequestEngine, RetryConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(config: RetryConfig) -> RequestEngine {
    RequestEngine::new(config)
}

#[tokio::test]
async fn success_on_first_attempt_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/p:lookup"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(RetryConfig::default());
    let endpoints = Endpoints::new(url::Url::parse(&server.uri()).unwrap());
    let url = endpoints.lookup("p");
    let cancel = CancellationToken::new();
    let body = serde_json::json!({});
    let result = engine.do_request(&cancel, &url, &body, "tok", "p", None).await.unwrap();
    assert_eq!(result, b"{\"ok\":true}");
}

#[tokio::test]
async fn retries_on_5xx_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/p:commit"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/p:commit"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = RetryConfig::default();
    config.base_delay = Duration::from_millis(1);
    config.max_delay = Duration::from_millis(5);
    let engine = engine(config);
    let endpoints = Endpoints::new(url::Url::parse(&server.uri()).unwrap());
    let url = endpoints.commit("p");
    let cancel = CancellationToken::new();
    let result = engine
        .do_request(&cancel, &url, &serde_json::json!({}), "tok", "p", None)
        .await
        .unwrap();
    assert_eq!(result, b"ok");
}

#[tokio::test]
async fn client_error_issues_exactly_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/p:commit"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(RetryConfig::default());
    let endpoints = Endpoints::new(url::Url::parse(&server.uri()).unwrap());
    let url = endpoints.commit("p");
    let cancel = CancellationToken::new();
    let err = engine
        .do_request(&cancel, &url, &serde_json::json!({}), "tok", "p", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientError);
}

#[tokio::test]
async fn unexpected_2xx_is_an_error_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/p:commit"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(RetryConfig::default());
    let endpoints = Endpoints::new(url::Url::parse(&server.uri()).unwrap());
    let url = endpoints.commit("p");
    let cancel = CancellationToken::new();
    let err = engine
        .do_request(&cancel, &url, &serde_json::json!({}), "tok", "p", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedSuccess);
}

#[tokio::test]
async fn retries_exhausted_surfaces_wrapped_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/p:commit"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = RetryConfig::default();
    config.base_delay = Duration::from_millis(1);
    config.max_delay = Duration::from_millis(2);
    let engine = engine(config);
    let endpoints = Endpoints::new(url::Url::parse(&server.uri()).unwrap());
    let url = endpoints.commit("p");
    let cancel = CancellationToken::new();
    let err = engine
        .do_request(&cancel, &url, &serde_json::json!({}), "tok", "p", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert!(err.to_string().contains("exhausted"));
}

#[tokio::test]
async fn cancelling_before_first_attempt_issues_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine(RetryConfig::default());
    let endpoints = Endpoints::new(url::Url::parse(&server.uri()).unwrap());
    let url = endpoints.commit("p");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .do_request(&cancel, &url, &serde_json::json!({}), "tok", "p", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn conflict_status_is_a_client_error_at_the_transport_layer() {
    // The request engine itself treats 409/ABORTED as an ordinary
    // client error; only the transaction retry loop (docbase-client)
    // treats it as a retriable conflict by inspecting the message.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/p:commit"))
        .respond_with(ResponseTemplate::new(409).set_body_string("ABORTED"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(RetryConfig::default());
    let endpoints = Endpoints::new(url::Url::parse(&server.uri()).unwrap());
    let url = endpoints.commit("p");
    let cancel = CancellationToken::new();
    let err = engine
        .do_request(&cancel, &url, &serde_json::json!({}), "tok", "p", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientError);
    assert!(err.to_string().contains("409"));
    assert!(err.to_string().contains("ABORTED"));
}
