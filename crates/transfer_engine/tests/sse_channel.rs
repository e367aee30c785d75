use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::timeout;
use transfer_engine::{JobStatus, LatestBox, ProgressHub, RelevanceFilter, TransferSettings};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM: &str = concat!(
    ": connected\n\n",
    "data: {\"type\":\"ping\"}\n\n",
    "data: {\"type\":\"packDownloadProgress\",\"downloadId\":\"job-2\",\"status\":\"zipping\",\"progressPercent\":55.5}\n\n",
    "event: packDownloadProgress\r\n",
    "data: {\"downloadId\":\"job-1\",\"status\":\"completed\",\"progressPercent\":100,\"url\":\"https://cdn.example/p.zip\"}\r\n\r\n",
);

#[tokio::test]
async fn server_sent_events_reach_subscribers_and_replays_are_filtered() {
    transfer_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM, "text/event-stream"))
        .mount(&server)
        .await;

    let mut settings = TransferSettings::for_api(server.uri().parse().unwrap());
    settings.reconnect_delay = Duration::from_millis(50);
    let hub = ProgressHub::from_settings(&settings).unwrap();
    let mut subscription = hub.subscribe(LatestBox::new(RelevanceFilter::AcceptAll));

    let wait = Duration::from_secs(5);
    let zipping = timeout(wait, subscription.next()).await.unwrap().unwrap();
    assert_eq!(zipping.job_id, "job-2");
    assert_eq!(zipping.status, JobStatus::Zipping);
    assert_eq!(zipping.progress_percent, 55);

    let completed = timeout(wait, subscription.next()).await.unwrap().unwrap();
    assert_eq!(completed.job_id, "job-1");
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(
        completed.result_url.as_deref(),
        Some("https://cdn.example/p.zip")
    );

    // The body ends, the hub reconnects and the server repeats itself. Only
    // the unfinished job comes through again.
    let replay = timeout(wait, subscription.next()).await.unwrap().unwrap();
    assert_eq!(replay.job_id, "job-2");
    assert_eq!(replay.status, JobStatus::Zipping);
}

#[tokio::test]
async fn rejected_connection_is_retried() {
    transfer_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM, "text/event-stream"))
        .with_priority(2)
        .mount(&server)
        .await;

    let mut settings = TransferSettings::for_api(server.uri().parse().unwrap());
    settings.reconnect_delay = Duration::from_millis(50);
    let hub = ProgressHub::from_settings(&settings).unwrap();
    let mut subscription = hub.subscribe(LatestBox::new(RelevanceFilter::Only("job-1".into())));

    let event = timeout(Duration::from_secs(5), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.job_id, "job-1");
    assert!(server.received_requests().await.unwrap().len() >= 2);
}
