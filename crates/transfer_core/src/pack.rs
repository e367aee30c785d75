use std::collections::HashMap;

use crate::merge::{CompletionSlot, CompletionSource, Offer};
use crate::view_model::{PackViewModel, ProgressBarView};
use crate::{
    format_estimated_size, format_file_size, AttemptId, DownloadLink, JobFilter, JobId,
    JobProgress, JobStatus, PackEffect, Phase, PopupError, PopupErrorKind, SizeSummary,
};

/// Hard ceiling for a generated pack archive.
pub const MAX_PACK_DOWNLOAD_BYTES: u64 = 15 * 1024 * 1024 * 1024;

const GENERIC_FAILURE: &str = "Pack generation failed";

const LINK_NOT_READY: &str = "Download link is not available yet. Please try again.";

/// State of one pack-download popup instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackDownloadState {
    open: bool,
    phase: Phase,
    attempt: AttemptId,
    ceiling_bytes: u64,
    size: SizeSummary,
    error: Option<PopupError>,
    /// Job whose events render; the proposed id until a reply names another.
    tracked: Option<JobId>,
    /// A start reply has named the tracked job.
    job_confirmed: bool,
    /// Latest event of every other job seen before the first reply, in case
    /// the reply names one of them.
    early: HashMap<JobId, JobProgress>,
    progress: Option<JobProgress>,
    completion: CompletionSlot<DownloadLink>,
    /// Start-or-fetch calls issued for this attempt and not yet answered.
    starts_in_flight: u32,
    /// The tracked job completed without a link; a refetch was issued.
    refetch_pending: bool,
    dirty: bool,
}

impl Default for PackDownloadState {
    fn default() -> Self {
        Self::new(MAX_PACK_DOWNLOAD_BYTES)
    }
}

impl PackDownloadState {
    pub fn new(ceiling_bytes: u64) -> Self {
        Self {
            open: false,
            phase: Phase::Confirm,
            attempt: 0,
            ceiling_bytes,
            size: SizeSummary::default(),
            error: None,
            tracked: None,
            job_confirmed: false,
            early: HashMap::new(),
            progress: None,
            completion: CompletionSlot::new(),
            starts_in_flight: 0,
            refetch_pending: false,
            dirty: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn tracked_job(&self) -> Option<&JobId> {
        self.tracked.as_ref()
    }

    pub fn link(&self) -> Option<&DownloadLink> {
        self.completion.settled().map(|c| &c.value)
    }

    pub fn completion_source(&self) -> Option<CompletionSource> {
        self.completion.settled().map(|c| c.source)
    }

    pub fn exceeds_ceiling(&self) -> bool {
        self.size.total_bytes > self.ceiling_bytes
    }

    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn view(&self) -> PackViewModel {
        let estimate = format_estimated_size(&self.size);
        let exceeds_limit = self.exceeds_ceiling();
        let progress_bar = match (&self.phase, &self.progress) {
            (Phase::Processing, Some(progress)) => Some(ProgressBarView {
                percent: progress.progress_percent.min(100),
                detail: detail_text(progress),
            }),
            _ => None,
        };
        PackViewModel {
            open: self.open,
            phase: self.phase,
            size_label: estimate.size_label,
            estimate_note: estimate.estimated_note,
            exceeds_limit,
            can_confirm: self.open && self.phase == Phase::Confirm && !exceeds_limit,
            error: self.error.clone(),
            progress_bar,
            link: self.link().cloned(),
            dirty: self.dirty,
        }
    }

    pub(crate) fn open(&mut self, size: SizeSummary) -> bool {
        if self.open {
            return false;
        }
        self.reset_attempt();
        self.open = true;
        self.size = size;
        self.dirty = true;
        true
    }

    pub(crate) fn close(&mut self) -> bool {
        if !self.open {
            return false;
        }
        self.reset_attempt();
        self.open = false;
        self.dirty = true;
        true
    }

    /// Back to confirm without an error; late replies and events become stale.
    pub(crate) fn reset_attempt(&mut self) {
        self.attempt += 1;
        self.phase = Phase::Confirm;
        self.error = None;
        self.forget_job();
        self.progress = None;
        self.completion.reset();
        self.starts_in_flight = 0;
        self.refetch_pending = false;
        self.dirty = true;
    }

    pub(crate) fn reject_oversized(&mut self) {
        let limit = format_file_size(self.ceiling_bytes);
        let estimate = format_file_size(self.size.total_bytes);
        self.error = Some(PopupError::new(
            PopupErrorKind::SizeExceeded,
            format!("Estimated size {estimate} exceeds the {limit} download limit."),
        ));
        self.dirty = true;
    }

    /// Enters processing already tracking `proposed_job_id`, so its progress
    /// renders while the start call is in flight. Other jobs stay visible until
    /// the reply confirms which job is ours.
    pub(crate) fn begin_attempt(&mut self, proposed_job_id: JobId, effects: &mut Vec<PackEffect>) {
        self.reset_attempt();
        self.phase = Phase::Processing;
        self.tracked = Some(proposed_job_id.clone());
        effects.push(PackEffect::SetJobFilter(JobFilter::AcceptAll));
        self.request_start(proposed_job_id, effects);
    }

    fn forget_job(&mut self) {
        self.tracked = None;
        self.job_confirmed = false;
        self.early.clear();
    }

    fn request_start(&mut self, proposed_job_id: JobId, effects: &mut Vec<PackEffect>) {
        self.starts_in_flight += 1;
        effects.push(PackEffect::StartJob {
            attempt: self.attempt,
            proposed_job_id,
        });
    }

    pub(crate) fn is_current(&self, attempt: AttemptId) -> bool {
        self.open && self.attempt == attempt && self.phase == Phase::Processing
    }

    /// Accounts for one answered start-or-fetch call of the current attempt.
    pub(crate) fn start_answered(&mut self) {
        self.starts_in_flight = self.starts_in_flight.saturating_sub(1);
    }

    pub(crate) fn fail(&mut self, error: PopupError, effects: &mut Vec<PackEffect>) {
        self.phase = Phase::Confirm;
        self.error = Some(error);
        self.forget_job();
        self.progress = None;
        self.refetch_pending = false;
        self.dirty = true;
        effects.push(PackEffect::SetJobFilter(JobFilter::Detached));
    }

    /// Offers a completion; only the accepted offer transitions and notifies.
    pub(crate) fn settle(
        &mut self,
        link: DownloadLink,
        source: CompletionSource,
        effects: &mut Vec<PackEffect>,
    ) {
        let url = link.url.clone();
        match self.completion.offer(link, source) {
            Offer::Accepted => {
                self.phase = Phase::Ready;
                self.forget_job();
                self.refetch_pending = false;
                self.error = None;
                self.dirty = true;
                effects.push(PackEffect::SetJobFilter(JobFilter::Detached));
                effects.push(PackEffect::NotifyReady { url });
            }
            Offer::AlreadySettled { .. } => {}
        }
    }

    /// Handles an enqueued reply. A job id other than the proposed one takes
    /// over and picks up whatever that job already reported.
    pub(crate) fn track(&mut self, job_id: JobId, effects: &mut Vec<PackEffect>) {
        if self.tracked.as_ref() == Some(&job_id) {
            if !self.job_confirmed {
                self.job_confirmed = true;
                self.early.clear();
                effects.push(PackEffect::SetJobFilter(JobFilter::Only(job_id)));
            } else if self.refetch_pending && self.starts_in_flight == 0 {
                // Completed without a link and the refetch enqueued it again.
                self.fail(PopupError::new(PopupErrorKind::JobStart, LINK_NOT_READY), effects);
            }
            return;
        }
        let reported = self.early.remove(&job_id);
        self.early.clear();
        self.tracked = Some(job_id.clone());
        self.job_confirmed = true;
        self.progress = None;
        self.refetch_pending = false;
        self.dirty = true;
        effects.push(PackEffect::SetJobFilter(JobFilter::Only(job_id)));
        if let Some(event) = reported {
            self.apply_tracked(event, effects);
        }
    }

    pub(crate) fn receive(&mut self, event: JobProgress, effects: &mut Vec<PackEffect>) {
        if !self.open || self.phase != Phase::Processing {
            return;
        }
        if self.tracked.as_ref() == Some(&event.job_id) {
            self.apply_tracked(event, effects);
        } else if !self.job_confirmed {
            let settled = self
                .early
                .get(&event.job_id)
                .is_some_and(|held| held.status.is_terminal());
            if !settled {
                self.early.insert(event.job_id.clone(), event);
            }
        }
    }

    fn apply_tracked(&mut self, event: JobProgress, effects: &mut Vec<PackEffect>) {
        if self.completion.is_settled() {
            return;
        }
        match event.status {
            JobStatus::Completed => {
                let job_id = event.job_id.clone();
                let link = event.result_url.as_deref().and_then(|url| {
                    DownloadLink::parse(url, Some(job_id.clone()), event.expires_at.clone())
                });
                self.progress = Some(event);
                self.dirty = true;
                match link {
                    Some(link) => self.settle(link, CompletionSource::ProgressEvent, effects),
                    None if !self.refetch_pending => {
                        // The archive exists server-side; the next start reply is a cache hit.
                        self.refetch_pending = true;
                        self.request_start(job_id, effects);
                    }
                    None => {}
                }
            }
            JobStatus::Failed => {
                let message = event
                    .error_message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                self.fail(PopupError::new(PopupErrorKind::JobFailed, message), effects);
            }
            JobStatus::Queued
            | JobStatus::Processing
            | JobStatus::Zipping
            | JobStatus::Uploading => {
                self.progress = Some(event);
                self.dirty = true;
            }
        }
    }
}

fn detail_text(progress: &JobProgress) -> String {
    match progress.status {
        JobStatus::Processing => match &progress.current_item {
            Some(item) => match (progress.processed_items, progress.total_items) {
                (Some(done), Some(total)) if total > 0 => {
                    format!("Unpacking: {item} ({done} / {total})")
                }
                _ => format!("Unpacking: {item}"),
            },
            None => "This may take a moment depending on the total size of the pack.".to_string(),
        },
        JobStatus::Zipping => "Creating zip file...".to_string(),
        JobStatus::Uploading => "Uploading to storage...".to_string(),
        JobStatus::Queued => "Waiting for a free worker...".to_string(),
        JobStatus::Completed => "Finalizing download link...".to_string(),
        JobStatus::Failed => String::new(),
    }
}
