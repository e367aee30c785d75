use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use transfer_engine::{
    AbortSignal, CancellationController, ChunkAck, ChunkRequest, ChunkSendError, ChunkSink,
    ChunkTransport, FailureKind, FileId, ProgressSink, TransferError, UploadEvent,
};

const MB: u64 = 1024 * 1024;

fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(transfer_logging::initialize_for_tests);
}

/// Records every delivered chunk and fails scripted attempts.
#[derive(Default)]
struct FakeSink {
    delivered: Mutex<HashMap<u32, ChunkRequest>>,
    attempts: Mutex<Vec<u32>>,
    /// chunk index -> failures still to inject
    failures: Mutex<HashMap<u32, (u32, ChunkSendError)>>,
    file_ids: Mutex<Vec<Option<String>>>,
    cancel_at: Mutex<Option<(u32, CancellationController)>>,
}

impl FakeSink {
    fn failing(index: u32, times: u32, error: ChunkSendError) -> Self {
        let sink = Self::default();
        sink.failures.lock().unwrap().insert(index, (times, error));
        sink
    }

    fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }

    fn reassemble(&self) -> Vec<u8> {
        let delivered = self.delivered.lock().unwrap();
        let mut indexes: Vec<u32> = delivered.keys().copied().collect();
        indexes.sort_unstable();
        indexes
            .into_iter()
            .flat_map(|index| delivered[&index].data.to_vec())
            .collect()
    }
}

#[async_trait::async_trait]
impl ChunkSink for FakeSink {
    async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkAck, ChunkSendError> {
        self.attempts.lock().unwrap().push(request.chunk_index);
        if let Some((index, controller)) = self.cancel_at.lock().unwrap().as_mut() {
            if *index == request.chunk_index {
                controller.cancel();
            }
        }
        if let Some((remaining, error)) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&request.chunk_index)
        {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        self.file_ids
            .lock()
            .unwrap()
            .push(request.file_id.as_ref().map(|id| id.to_string()));
        let index = request.chunk_index;
        self.delivered.lock().unwrap().insert(index, request);
        Ok(ChunkAck {
            file_id: Some(FileId("file-1".to_string())),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<UploadEvent>>,
}

impl RecordingSink {
    fn percents(&self) -> Vec<u8> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                UploadEvent::Progress(progress) => Some(progress.percent),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: UploadEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn payload(len: u64) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn transport(sink: Arc<FakeSink>, chunk_size: u64, retries: u32) -> ChunkTransport {
    ChunkTransport::new(sink, chunk_size, retries, Duration::from_millis(1))
}

#[tokio::test]
async fn flaky_chunk_is_retried_and_progress_reaches_hundred_once() {
    init_logging();
    let sink = Arc::new(FakeSink::failing(
        4,
        2,
        ChunkSendError::Retryable("connection reset".into()),
    ));
    let data = payload(50 * MB);
    let progress = RecordingSink::default();

    let file_id = transport(sink.clone(), 5 * MB, 3)
        .send(Cursor::new(data.clone()), 50 * MB, &AbortSignal::never(), &progress)
        .await
        .expect("upload succeeds");

    assert_eq!(file_id, FileId("file-1".into()));
    assert_eq!(sink.attempts(), vec![0, 1, 2, 3, 4, 4, 4, 5, 6, 7, 8, 9]);
    let percents = progress.percents();
    assert_eq!(percents, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
    assert!(sink.reassemble() == data, "chunks reassemble by index");
}

#[tokio::test]
async fn file_id_is_sent_on_every_chunk_after_the_first() {
    let sink = Arc::new(FakeSink::default());
    let progress = RecordingSink::default();
    transport(sink.clone(), 4, 0)
        .send(Cursor::new(payload(10)), 10, &AbortSignal::never(), &progress)
        .await
        .unwrap();

    assert_eq!(
        *sink.file_ids.lock().unwrap(),
        vec![None, Some("file-1".to_string()), Some("file-1".to_string())]
    );
    let delivered = sink.delivered.lock().unwrap();
    assert!(delivered.values().all(|chunk| chunk.total_chunks == 3));
    assert_eq!(delivered[&2].data.len(), 2);
    let events = progress.events.lock().unwrap();
    assert_eq!(
        events[0],
        UploadEvent::FileIdAssigned(FileId("file-1".into()))
    );
}

#[tokio::test]
async fn retries_exhausted_reports_chunk_and_attempts() {
    let sink = Arc::new(FakeSink::failing(
        1,
        10,
        ChunkSendError::Retryable("503 Service Unavailable".into()),
    ));
    let result = transport(sink.clone(), 4, 2)
        .send(
            Cursor::new(payload(12)),
            12,
            &AbortSignal::never(),
            &RecordingSink::default(),
        )
        .await;

    assert_eq!(
        result,
        Err(TransferError::Failed(FailureKind::Transport {
            chunk_index: 1,
            attempts: 3,
            message: "503 Service Unavailable".into(),
        }))
    );
    assert_eq!(sink.attempts(), vec![0, 1, 1, 1]);
}

#[tokio::test]
async fn unknown_file_id_is_a_validation_error_without_retry() {
    let sink = Arc::new(FakeSink::failing(
        2,
        1,
        ChunkSendError::UnknownFile("Upload session expired".into()),
    ));
    let result = transport(sink.clone(), 4, 3)
        .send(
            Cursor::new(payload(12)),
            12,
            &AbortSignal::never(),
            &RecordingSink::default(),
        )
        .await;

    assert_eq!(
        result,
        Err(TransferError::Failed(FailureKind::Validation(
            "Upload session expired".into()
        )))
    );
    assert_eq!(sink.attempts(), vec![0, 1, 2]);
}

#[tokio::test]
async fn rejected_chunk_is_not_retried() {
    let sink = Arc::new(FakeSink::failing(
        0,
        1,
        ChunkSendError::Rejected("413 Payload Too Large".into()),
    ));
    let result = transport(sink.clone(), 4, 3)
        .send(
            Cursor::new(payload(8)),
            8,
            &AbortSignal::never(),
            &RecordingSink::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(TransferError::Failed(FailureKind::Transport { chunk_index: 0, attempts: 1, .. }))
    ));
    assert_eq!(sink.attempts(), vec![0]);
}

#[tokio::test]
async fn cancel_stops_further_chunks() {
    let sink = Arc::new(FakeSink::default());
    let mut controller = CancellationController::new();
    let signal = controller.acquire();
    *sink.cancel_at.lock().unwrap() = Some((2, controller));
    let progress = RecordingSink::default();

    let result = transport(sink.clone(), 4, 3)
        .send(Cursor::new(payload(40)), 40, &signal, &progress)
        .await;

    assert_eq!(result, Err(TransferError::Cancelled));
    assert_eq!(sink.attempts(), vec![0, 1, 2]);
    assert!(progress.percents().iter().all(|p| *p < 100));
}

#[tokio::test]
async fn empty_payload_is_rejected_before_any_request() {
    let sink = Arc::new(FakeSink::default());
    let result = transport(sink.clone(), 4, 3)
        .send(
            Cursor::new(Vec::new()),
            0,
            &AbortSignal::never(),
            &RecordingSink::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(TransferError::Failed(FailureKind::Validation(_)))
    ));
    assert!(sink.attempts().is_empty());
}

#[tokio::test]
async fn short_source_fails_as_transport() {
    let sink = Arc::new(FakeSink::default());
    let result = transport(sink.clone(), 4, 0)
        .send(
            Cursor::new(payload(6)),
            10,
            &AbortSignal::never(),
            &RecordingSink::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(TransferError::Failed(FailureKind::Transport { chunk_index: 1, .. }))
    ));
    assert_eq!(sink.attempts(), vec![0]);
}
