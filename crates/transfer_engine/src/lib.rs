//! Transfer engine: chunked uploads, pack jobs, the shared progress channel,
//! and the command/event bridge that runs them off the UI thread.
mod cancel;
mod channel;
mod chunk;
mod engine;
mod filename;
mod finalize;
mod http;
mod job;
mod latest;
mod levels;
mod settings;
mod sse;
mod types;
mod upload;

pub use cancel::{AbortSignal, CancellationController};
pub use channel::{
    ChannelError, EventConnector, MessageStream, ProgressHub, RelevanceFilter, SseConnector,
    Subscription,
};
pub use chunk::{
    ChunkAck, ChunkPlan, ChunkRequest, ChunkSendError, ChunkSink, ChunkTransport,
    ReqwestChunkSink,
};
pub use engine::{EngineEvent, EngineHandle, EngineParts, PopupId};
pub use filename::{decode_filename, encode_filename};
pub use finalize::{CommitRequest, FinalizeApi, ReqwestFinalizeApi, UploadFinalizer};
pub use job::{await_job, JobApi, JobRequester, PackContext, ReqwestJobApi};
pub use latest::LatestBox;
pub use levels::LevelFileClient;
pub use settings::{Endpoints, TransferSettings};
pub use sse::{decode_frame, ChannelMessage, SseDecoder, SseFrame, SseItem};
pub use types::{
    CommitReceipt, DownloadLink, FailureKind, FileId, JobId, JobProgressEvent, JobStart,
    JobStatus, LevelFile, LevelRecord, ProgressSink, SetupError, TransferError, TransferProgress,
    UploadEvent, UploadStage,
};
pub use upload::{LevelUploader, UploadRequest};
