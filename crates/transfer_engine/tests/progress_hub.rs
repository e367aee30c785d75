use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use transfer_engine::{
    await_job, AbortSignal, CancellationController, ChannelError, ChannelMessage,
    EventConnector, FailureKind, JobProgressEvent, JobStatus, LatestBox, MessageStream,
    ProgressHub, RelevanceFilter, TransferError,
};

type Feed = mpsc::UnboundedSender<Result<ChannelMessage, ChannelError>>;

/// Each `connect` hands out the next scripted stream; once the script runs
/// out, connections stay open and silent.
#[derive(Default)]
struct ScriptedConnector {
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<ChannelMessage, ChannelError>>>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    fn with_connections(count: usize) -> (Arc<Self>, Vec<Feed>) {
        let connector = Arc::new(Self::default());
        let mut feeds = Vec::new();
        for _ in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            connector.streams.lock().unwrap().push_back(rx);
            feeds.push(tx);
        }
        (connector, feeds)
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EventConnector for ScriptedConnector {
    async fn connect(&self) -> Result<MessageStream, ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.streams.lock().unwrap().pop_front();
        match next {
            Some(rx) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|message| (message, rx))
            }))),
            None => Ok(Box::pin(stream::pending::<Result<ChannelMessage, ChannelError>>())),
        }
    }
}

fn hub(connector: Arc<ScriptedConnector>, liveness: Duration) -> ProgressHub {
    ProgressHub::new(connector, Duration::from_millis(10), liveness, 64)
}

fn progress(job: &str, status: JobStatus, percent: u8) -> Result<ChannelMessage, ChannelError> {
    Ok(ChannelMessage::PackProgress(JobProgressEvent {
        job_id: job.to_string(),
        status,
        progress_percent: percent,
        current_item: None,
        processed_items: None,
        total_items: None,
        error_message: None,
        result_url: (status == JobStatus::Completed).then(|| format!("https://cdn/{job}.zip")),
        expires_at: None,
    }))
}

async fn next_within(subscription: &mut transfer_engine::Subscription) -> Option<JobProgressEvent> {
    tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .ok()
        .flatten()
}

async fn nothing_within(subscription: &mut transfer_engine::Subscription) -> bool {
    tokio::time::timeout(Duration::from_millis(150), subscription.next())
        .await
        .is_err()
}

async fn wait_for_connects(connector: &ScriptedConnector, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while connector.connects() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection opened");
}

#[tokio::test]
async fn subscribers_share_one_connection() {
    let (connector, feeds) = ScriptedConnector::with_connections(1);
    let hub = hub(connector.clone(), Duration::from_secs(60));
    let mut first = hub.subscribe(LatestBox::new(RelevanceFilter::AcceptAll));
    let mut second = hub.subscribe(LatestBox::new(RelevanceFilter::Only("j1".into())));
    assert_eq!(hub.subscriber_count(), 2);

    feeds[0].send(progress("j1", JobStatus::Processing, 10)).unwrap();

    assert_eq!(next_within(&mut first).await.unwrap().job_id, "j1");
    assert_eq!(next_within(&mut second).await.unwrap().progress_percent, 10);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn replayed_terminal_event_is_delivered_once() {
    let (connector, feeds) = ScriptedConnector::with_connections(2);
    let hub = hub(connector.clone(), Duration::from_secs(60));
    let mut subscription = hub.subscribe(LatestBox::new(RelevanceFilter::AcceptAll));

    feeds[0].send(progress("j1", JobStatus::Zipping, 90)).unwrap();
    feeds[0].send(progress("j1", JobStatus::Completed, 100)).unwrap();
    feeds[0]
        .send(Err(ChannelError::Stream("connection reset".into())))
        .unwrap();
    // After the reconnect the server replays the last state of j1.
    feeds[1].send(progress("j1", JobStatus::Completed, 100)).unwrap();
    feeds[1].send(progress("j2", JobStatus::Queued, 0)).unwrap();

    let statuses: Vec<(String, JobStatus)> = {
        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = next_within(&mut subscription).await.unwrap();
            seen.push((event.job_id, event.status));
        }
        seen
    };
    assert_eq!(
        statuses,
        vec![
            ("j1".to_string(), JobStatus::Zipping),
            ("j1".to_string(), JobStatus::Completed),
            ("j2".to_string(), JobStatus::Queued),
        ]
    );
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn filter_changes_apply_without_resubscribing() {
    let (connector, feeds) = ScriptedConnector::with_connections(1);
    let hub = hub(connector, Duration::from_secs(60));
    let filter = LatestBox::new(RelevanceFilter::Only("j2".into()));
    let mut subscription = hub.subscribe(filter.clone());

    feeds[0].send(progress("j1", JobStatus::Processing, 5)).unwrap();
    feeds[0].send(progress("j2", JobStatus::Processing, 6)).unwrap();
    assert_eq!(next_within(&mut subscription).await.unwrap().job_id, "j2");

    filter.set(RelevanceFilter::Only("j1".into()));
    feeds[0].send(progress("j2", JobStatus::Processing, 7)).unwrap();
    feeds[0].send(progress("j1", JobStatus::Processing, 8)).unwrap();
    let event = next_within(&mut subscription).await.unwrap();
    assert_eq!((event.job_id.as_str(), event.progress_percent), ("j1", 8));

    filter.set(RelevanceFilter::Detached);
    feeds[0].send(progress("j1", JobStatus::Processing, 9)).unwrap();
    assert!(nothing_within(&mut subscription).await);
}

#[tokio::test]
async fn silent_connection_is_replaced() {
    let (connector, feeds) = ScriptedConnector::with_connections(2);
    let hub = hub(connector.clone(), Duration::from_millis(50));
    let mut subscription = hub.subscribe(LatestBox::new(RelevanceFilter::AcceptAll));

    // The first connection never says anything.
    feeds[1].send(progress("j5", JobStatus::Uploading, 95)).unwrap();

    assert_eq!(next_within(&mut subscription).await.unwrap().job_id, "j5");
    assert!(connector.connects() >= 2);
}

#[tokio::test]
async fn keepalives_hold_the_connection_open() {
    let (connector, feeds) = ScriptedConnector::with_connections(1);
    let hub = hub(connector.clone(), Duration::from_millis(300));
    let mut subscription = hub.subscribe(LatestBox::new(RelevanceFilter::AcceptAll));

    for _ in 0..4 {
        feeds[0].send(Ok(ChannelMessage::Liveness)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    feeds[0].send(progress("j6", JobStatus::Queued, 0)).unwrap();

    assert_eq!(next_within(&mut subscription).await.unwrap().job_id, "j6");
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn last_subscriber_closes_the_connection() {
    let (connector, _feeds) = ScriptedConnector::with_connections(0);
    let hub = hub(connector.clone(), Duration::from_secs(60));
    let first = hub.subscribe(LatestBox::default());
    let second = hub.subscribe(LatestBox::default());
    assert!(hub.is_connected());
    wait_for_connects(&connector, 1).await;

    drop(first);
    assert!(hub.is_connected());
    drop(second);
    assert!(!hub.is_connected());
    assert_eq!(hub.subscriber_count(), 0);

    let _again = hub.subscribe(LatestBox::default());
    assert!(hub.is_connected());
    wait_for_connects(&connector, 2).await;
}

#[tokio::test]
async fn await_job_resolves_on_completion() {
    let (connector, feeds) = ScriptedConnector::with_connections(1);
    let hub = hub(connector, Duration::from_secs(60));
    let mut subscription = hub.subscribe(LatestBox::default());

    feeds[0].send(progress("other", JobStatus::Completed, 100)).unwrap();
    feeds[0].send(progress("mine", JobStatus::Processing, 50)).unwrap();
    feeds[0].send(progress("mine", JobStatus::Completed, 100)).unwrap();

    let done = await_job(&mut subscription, &"mine".to_string(), &AbortSignal::never())
        .await
        .unwrap();
    assert_eq!(done.result_url.as_deref(), Some("https://cdn/mine.zip"));
    assert_eq!(subscription.filter().get(), RelevanceFilter::Detached);
}

#[tokio::test]
async fn await_job_reports_failure_with_generic_text() {
    let (connector, feeds) = ScriptedConnector::with_connections(1);
    let hub = hub(connector, Duration::from_secs(60));
    let mut subscription = hub.subscribe(LatestBox::default());

    feeds[0].send(progress("mine", JobStatus::Failed, 30)).unwrap();

    let result = await_job(&mut subscription, &"mine".to_string(), &AbortSignal::never()).await;
    assert_eq!(
        result,
        Err(TransferError::Failed(FailureKind::JobFailed(
            "Pack generation failed".into()
        )))
    );
}

#[tokio::test]
async fn await_job_can_be_abandoned() {
    let (connector, _feeds) = ScriptedConnector::with_connections(1);
    let hub = hub(connector, Duration::from_secs(60));
    let mut subscription = hub.subscribe(LatestBox::default());
    let mut controller = CancellationController::new();
    let signal = controller.acquire();

    let waiting = async { await_job(&mut subscription, &"mine".to_string(), &signal).await };
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.cancel();
    };
    let (result, ()) = tokio::join!(waiting, cancel);

    assert_eq!(result, Err(TransferError::Cancelled));
}
