use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{stream, Stream, StreamExt};
use reqwest::header::ACCEPT;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use transfer_logging::{xfer_debug, xfer_info, xfer_warn};
use url::Url;

use crate::http::{build_client, describe};
use crate::sse::decode_item;
use crate::{
    ChannelMessage, JobId, JobProgressEvent, LatestBox, SetupError, SseDecoder, TransferSettings,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("server answered {0}")]
    Status(u16),
    #[error("stream interrupted: {0}")]
    Stream(String),
}

pub type MessageStream = Pin<Box<dyn Stream<Item = Result<ChannelMessage, ChannelError>> + Send>>;

#[async_trait::async_trait]
pub trait EventConnector: Send + Sync {
    async fn connect(&self) -> Result<MessageStream, ChannelError>;
}

/// Opens the server's event stream over HTTP.
#[derive(Debug, Clone)]
pub struct SseConnector {
    client: reqwest::Client,
    url: Url,
}

impl SseConnector {
    pub fn new(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self {
            client: build_client(settings.connect_timeout, None)?,
            url: settings.endpoint(&settings.endpoints.events)?,
        })
    }
}

#[async_trait::async_trait]
impl EventConnector for SseConnector {
    async fn connect(&self) -> Result<MessageStream, ChannelError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| ChannelError::Connect(describe(&err)))?;
        if !response.status().is_success() {
            return Err(ChannelError::Status(response.status().as_u16()));
        }
        let messages = response
            .bytes_stream()
            .scan(SseDecoder::new(), |decoder, chunk| {
                let batch: Vec<Result<ChannelMessage, ChannelError>> = match chunk {
                    Ok(bytes) => decoder
                        .push(&bytes)
                        .into_iter()
                        .map(|item| Ok(decode_item(item)))
                        .collect(),
                    Err(err) => vec![Err(ChannelError::Stream(describe(&err)))],
                };
                futures_util::future::ready(Some(stream::iter(batch)))
            })
            .flatten();
        Ok(Box::pin(messages))
    }
}

/// Which job ids a subscriber currently wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RelevanceFilter {
    /// Nothing; the subscriber is idle.
    #[default]
    Detached,
    /// Every job on the channel.
    AcceptAll,
    Only(JobId),
}

impl RelevanceFilter {
    pub fn admits(&self, job_id: &str) -> bool {
        match self {
            Self::Detached => false,
            Self::AcceptAll => true,
            Self::Only(wanted) => wanted == job_id,
        }
    }
}

/// One server connection shared by every subscriber of the process. The
/// connection opens with the first subscriber, closes with the last, and is
/// re-established after errors or silence.
#[derive(Clone)]
pub struct ProgressHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    connector: Arc<dyn EventConnector>,
    sender: broadcast::Sender<JobProgressEvent>,
    reconnect_delay: Duration,
    liveness_timeout: Duration,
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    subscribers: usize,
    connection: Option<CancellationToken>,
}

impl ProgressHub {
    pub fn new(
        connector: Arc<dyn EventConnector>,
        reconnect_delay: Duration,
        liveness_timeout: Duration,
        capacity: usize,
    ) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(HubInner {
                connector,
                sender,
                reconnect_delay,
                liveness_timeout,
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    pub fn from_settings(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self::new(
            Arc::new(SseConnector::new(settings)?),
            settings.reconnect_delay,
            settings.liveness_timeout,
            settings.channel_capacity,
        ))
    }

    /// Must be called from within a Tokio runtime; the first subscriber
    /// spawns the connection task.
    pub fn subscribe(&self, filter: LatestBox<RelevanceFilter>) -> Subscription {
        let receiver = self.inner.sender.subscribe();
        let mut state = self.inner.lock_state();
        state.subscribers += 1;
        if state.connection.is_none() {
            let token = CancellationToken::new();
            state.connection = Some(token.clone());
            xfer_info!("opening shared progress channel");
            tokio::spawn(maintain_connection(
                Arc::clone(&self.inner.connector),
                self.inner.sender.clone(),
                token,
                self.inner.reconnect_delay,
                self.inner.liveness_timeout,
            ));
        }
        Subscription {
            hub: Arc::clone(&self.inner),
            receiver,
            filter,
            settled: HashSet::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_state().subscribers
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().connection.is_some()
    }
}

impl HubInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut state = self.lock_state();
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            if let Some(token) = state.connection.take() {
                xfer_info!("last subscriber left; closing progress channel");
                token.cancel();
            }
        }
    }
}

async fn maintain_connection(
    connector: Arc<dyn EventConnector>,
    sender: broadcast::Sender<JobProgressEvent>,
    token: CancellationToken,
    reconnect_delay: Duration,
    liveness_timeout: Duration,
) {
    let mut attempt = 0u64;
    while !token.is_cancelled() {
        attempt += 1;
        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            connected = connector.connect() => connected,
        };
        match connected {
            Ok(mut messages) => {
                xfer_debug!("progress channel connected (attempt {attempt})");
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        next = tokio::time::timeout(liveness_timeout, messages.next()) => next,
                    };
                    match next {
                        Ok(Some(Ok(ChannelMessage::PackProgress(event)))) => {
                            // No receivers is fine; nobody is listening right now.
                            let _ = sender.send(event);
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(err))) => {
                            xfer_warn!("progress channel error: {err}");
                            break;
                        }
                        Ok(None) => {
                            xfer_info!("progress channel closed by server");
                            break;
                        }
                        Err(_) => {
                            xfer_warn!(
                                "progress channel silent for {liveness_timeout:?}; reconnecting"
                            );
                            break;
                        }
                    }
                }
            }
            Err(err) => xfer_warn!("progress channel connect failed: {err}"),
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    xfer_debug!("progress channel task finished");
}

/// A subscriber's view of the shared channel.
///
/// The filter is read on every event, so changes made through the
/// [`LatestBox`] apply immediately. Once a terminal event for a job has been
/// delivered, later events for that job (for example replays after a
/// reconnect) are dropped.
pub struct Subscription {
    hub: Arc<HubInner>,
    receiver: broadcast::Receiver<JobProgressEvent>,
    filter: LatestBox<RelevanceFilter>,
    settled: HashSet<JobId>,
}

impl Subscription {
    pub fn filter(&self) -> &LatestBox<RelevanceFilter> {
        &self.filter
    }

    /// Next relevant event in arrival order. `None` only if the hub is gone.
    pub async fn next(&mut self) -> Option<JobProgressEvent> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    xfer_warn!("progress subscriber lagged; {skipped} event(s) skipped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };
            if self.settled.contains(&event.job_id) {
                xfer_debug!("dropping event for settled job {}", event.job_id);
                continue;
            }
            if !self.filter.with(|filter| filter.admits(&event.job_id)) {
                continue;
            }
            if event.status.is_terminal() {
                self.settled.insert(event.job_id.clone());
            }
            return Some(event);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.release();
    }
}
