use std::time::{Duration, Instant};

use whv_harvester::{FetchCause, FetchError, HarvesterConfig, RateLimiter, RetryingFetcher};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(config: &HarvesterConfig) -> RetryingFetcher {
    let limiter = RateLimiter::new(Duration::from_secs_f64(config.rate_limit_delay_secs));
    RetryingFetcher::new(config, limiter).unwrap()
}

fn quick_config() -> HarvesterConfig {
    HarvesterConfig {
        rate_limit_delay_secs: 0.0,
        retry_attempts: 3,
        retry_backoff_secs: 0.05,
        request_timeout_secs: 2,
        ..Default::default()
    }
}

#[tokio::test]
async fn recovers_from_transient_503s_on_final_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
        .mount(&server)
        .await;

    let config = quick_config();
    let start = Instant::now();
    let fetched = fetcher(&config)
        .fetch(&format!("{}/flaky", server.uri()))
        .await
        .unwrap();

    assert_eq!(fetched.attempts, 3);
    assert_eq!(fetched.body, b"finally");
    // Backoff 0.05 * (1 + 2) between the three attempts.
    assert!(start.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn exhausts_retries_and_reports_last_cause() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = fetcher(&quick_config())
        .fetch(&format!("{}/down", server.uri()))
        .await
        .unwrap_err();

    match err {
        FetchError::Exhausted {
            attempts,
            cause: FetchCause::Status(503),
            ..
        } => assert_eq!(attempts, 3),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn does_not_retry_a_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher(&quick_config())
        .fetch(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();

    match err {
        FetchError::Permanent {
            attempts,
            cause: FetchCause::Status(404),
            ..
        } => assert_eq!(attempts, 1),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn retries_429_only_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let no_retry = HarvesterConfig {
        retry_on_429: false,
        ..quick_config()
    };
    let err = fetcher(&no_retry)
        .fetch(&format!("{}/busy", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Permanent { attempts: 1, .. }));

    let with_retry = quick_config();
    let err = fetcher(&with_retry)
        .fetch(&format!("{}/busy", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn classifies_per_attempt_timeout_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_string("late"),
        )
        .mount(&server)
        .await;

    let config = HarvesterConfig {
        request_timeout_secs: 1,
        retry_attempts: 2,
        retry_backoff_secs: 0.05,
        rate_limit_delay_secs: 0.0,
        ..Default::default()
    };
    let err = fetcher(&config)
        .fetch(&format!("{}/slow", server.uri()))
        .await
        .unwrap_err();

    match err {
        FetchError::Exhausted {
            attempts,
            cause: FetchCause::Timeout,
            ..
        } => assert_eq!(attempts, 2),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn every_attempt_takes_a_rate_limit_slot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = HarvesterConfig {
        rate_limit_delay_secs: 0.1,
        retry_attempts: 2,
        retry_backoff_secs: 0.0,
        ..Default::default()
    };
    let start = Instant::now();
    fetcher(&config)
        .fetch(&format!("{}/flaky", server.uri()))
        .await
        .unwrap();
    // Two attempts, two slots 0.1s apart.
    assert!(start.elapsed() >= Duration::from_millis(100));
}
