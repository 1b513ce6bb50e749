//! Fetch engine behavior against a local mock HTTP server

use proxy_scout::error::ErrorKind;
use proxy_scout::fetch::retry::RetryPolicy;
use proxy_scout::fetch::{FetchEngine, FetchRequest, FetcherConfig};
use proxy_scout::signal::StopSignal;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_engine(max_concurrent: usize, timeout_ms: u64, max_retries: u32) -> FetchEngine {
    let config = FetcherConfig::new()
        .with_max_concurrent(max_concurrent)
        .with_timeout(Duration::from_millis(timeout_ms))
        .with_max_retries(max_retries)
        .with_retry_policy(RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter: false,
        });
    FetchEngine::new(config, StopSignal::new()).unwrap()
}

#[tokio::test]
async fn mixed_batch_yields_one_typed_outcome_per_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("vmess://one"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("vmess://two"))
        .mount(&server)
        .await;
    // Rate-limited once, then fine.
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("vmess://three"))
        .mount(&server)
        .await;
    // Slower than the per-request timeout on every attempt.
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let engine = fast_engine(5, 300, 2);
    let requests = ["/ok-1", "/ok-2", "/flaky", "/slow", "/gone"]
        .iter()
        .map(|suffix| FetchRequest::new(format!("{}{}", server.uri(), suffix)))
        .collect();

    let results = engine.fetch_many(requests).await;
    assert_eq!(results.len(), 5, "one outcome per request");

    let by_suffix = |suffix: &str| {
        results
            .iter()
            .find(|r| r.url.ends_with(suffix))
            .unwrap_or_else(|| panic!("missing result for {suffix}"))
    };

    assert!(by_suffix("/ok-1").is_success());
    assert!(by_suffix("/ok-2").is_success());
    assert!(
        by_suffix("/flaky").is_success(),
        "429 followed by 200 should succeed via retry"
    );
    assert_eq!(
        by_suffix("/slow").error().unwrap().kind(),
        ErrorKind::Timeout
    );
    assert_eq!(
        by_suffix("/gone").error().unwrap().kind(),
        ErrorKind::NotFound
    );

    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 3);
}

#[tokio::test]
async fn concurrency_never_exceeds_the_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let engine = fast_engine(3, 2000, 0);
    let requests = (0..12)
        .map(|i| FetchRequest::new(format!("{}/item-{i}", server.uri())))
        .collect();

    let results = engine.fetch_many(requests).await;
    assert_eq!(results.len(), 12);
    assert!(results.iter().all(|r| r.is_success()));

    let peak = engine.stats().peak_in_flight;
    assert!(peak <= 3, "peak in-flight was {peak}, cap is 3");
}

#[tokio::test]
async fn exhausted_retry_budget_attempts_exactly_budget_plus_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let engine = fast_engine(1, 500, 2);
    let results = engine
        .fetch_many(vec![FetchRequest::new(format!("{}/broken", server.uri()))])
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error().unwrap().kind(), ErrorKind::Http);
    assert_eq!(
        engine.stats().requests,
        3,
        "max_retries=2 means 3 total attempts"
    );
    assert_eq!(engine.stats().retries, 2);
}

#[tokio::test]
async fn server_retry_after_hint_is_honored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let engine = fast_engine(1, 500, 1);
    let results = engine
        .fetch_many(vec![FetchRequest::new(format!("{}/limited", server.uri()))])
        .await;

    assert!(results[0].is_success());
    assert!(
        results[0].elapsed_ms >= 1000,
        "should have waited the hinted 1s, waited {}ms",
        results[0].elapsed_ms
    );
}

#[tokio::test]
async fn stop_mid_batch_preserves_gathered_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let stop = StopSignal::new();
    let config = FetcherConfig::new()
        .with_max_concurrent(1)
        .with_timeout(Duration::from_secs(2))
        .with_max_retries(0);
    let engine = FetchEngine::new(config, stop.clone()).unwrap();

    // The first request is in flight when the stop lands; the remaining
    // two must never start.
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.request_stop();
    });

    let requests = (0..3)
        .map(|i| FetchRequest::new(format!("{}/item-{i}", server.uri())))
        .collect();
    let results = engine.fetch_many(requests).await;
    stopper.await.unwrap();

    assert_eq!(results.len(), 1, "only the in-flight request completes");
    assert!(results[0].is_success(), "gathered result stays intact");
    assert_eq!(engine.stats().requests, 1);
}

#[tokio::test]
async fn per_request_timeout_override_beats_engine_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    // Engine default would tolerate the delay; the override does not.
    let engine = fast_engine(1, 2000, 0);
    let results = engine
        .fetch_many(vec![FetchRequest::new(format!("{}/x", server.uri()))
            .with_timeout(Duration::from_millis(50))])
        .await;

    assert_eq!(results[0].error().unwrap().kind(), ErrorKind::Timeout);
}
