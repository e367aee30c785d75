use std::path::PathBuf;

use crate::view_model::{LevelFileRow, UploadProgressView, UploadViewModel};
use crate::{
    format_file_size, Phase, PopupError, PopupErrorKind, SessionId, UploadEffect, UploadReceipt,
    UploadStage, UploadStatus,
};

/// Default ceiling for a single level archive.
pub const MAX_UPLOAD_BYTES: u64 = 1024 * 1024 * 1024;

/// One in-progress file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub id: SessionId,
    pub file_name: String,
    pub file_id: Option<String>,
    pub total_bytes: u64,
    pub bytes_sent: u64,
    pub status: UploadStatus,
}

impl UploadSession {
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        ((self.bytes_sent.min(self.total_bytes) as u128 * 100) / self.total_bytes as u128) as u8
    }
}

/// State of one level-upload popup instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelUploadState {
    open: bool,
    phase: Phase,
    max_upload_bytes: u64,
    next_session: SessionId,
    session: Option<UploadSession>,
    error: Option<PopupError>,
    close_prompt: bool,
    delete_prompt: bool,
    delete_pending: bool,
    has_current_file: bool,
    receipt: Option<UploadReceipt>,
    highlighted: Option<String>,
    target: Option<String>,
    selection_pending: bool,
    dirty: bool,
}

impl Default for LevelUploadState {
    fn default() -> Self {
        Self::new(MAX_UPLOAD_BYTES)
    }
}

impl LevelUploadState {
    pub fn new(max_upload_bytes: u64) -> Self {
        Self {
            open: false,
            phase: Phase::Confirm,
            max_upload_bytes,
            next_session: 1,
            session: None,
            error: None,
            close_prompt: false,
            delete_prompt: false,
            delete_pending: false,
            has_current_file: false,
            receipt: None,
            highlighted: None,
            target: None,
            selection_pending: false,
            dirty: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> Option<&UploadSession> {
        self.session.as_ref()
    }

    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn view(&self) -> UploadViewModel {
        let progress = self.session.as_ref().map(|session| UploadProgressView {
            file_name: session.file_name.clone(),
            status: session.status,
            bytes_sent: session.bytes_sent,
            total_bytes: session.total_bytes,
            percent: session.percent(),
            label: progress_label(session),
        });
        let level_files = self
            .receipt
            .as_ref()
            .map(|receipt| {
                receipt
                    .level_files
                    .iter()
                    .map(|file| LevelFileRow {
                        path: file.path.clone(),
                        name: file.name.clone(),
                        size_label: file.size_bytes.map(format_file_size),
                        highlighted: self.highlighted.as_deref() == Some(file.path.as_str()),
                        is_target: self.target.as_deref() == Some(file.path.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        UploadViewModel {
            open: self.open,
            phase: self.phase,
            progress,
            error: self.error.clone(),
            awaiting_close_confirmation: self.close_prompt,
            awaiting_delete_confirmation: self.delete_prompt,
            can_delete: self.can_delete(),
            dl_link: self.receipt.as_ref().map(|r| r.dl_link.clone()),
            level_files,
            can_select: self.can_select(),
            dirty: self.dirty,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.session.is_some()
    }

    fn active_session_mut(&mut self, id: SessionId) -> Option<&mut UploadSession> {
        self.session.as_mut().filter(|s| s.id == id)
    }

    pub(crate) fn open(&mut self, has_current_file: bool) -> bool {
        if self.open {
            return false;
        }
        let max_upload_bytes = self.max_upload_bytes;
        let next_session = self.next_session;
        *self = Self::new(max_upload_bytes);
        self.next_session = next_session;
        self.open = true;
        self.has_current_file = has_current_file;
        self.dirty = true;
        true
    }

    pub(crate) fn close(&mut self, effects: &mut Vec<UploadEffect>) {
        self.open = false;
        self.close_prompt = false;
        self.delete_prompt = false;
        self.dirty = true;
        effects.push(UploadEffect::Dismiss);
    }

    pub(crate) fn start(
        &mut self,
        path: PathBuf,
        file_name: String,
        total_bytes: u64,
        effects: &mut Vec<UploadEffect>,
    ) {
        if !self.open || self.is_active() || self.delete_pending {
            return;
        }
        if let Some(error) = self.check_file(&file_name, total_bytes) {
            self.error = Some(error);
            self.dirty = true;
            return;
        }
        let id = self.next_session;
        self.next_session += 1;
        self.session = Some(UploadSession {
            id,
            file_name: file_name.clone(),
            file_id: None,
            total_bytes,
            bytes_sent: 0,
            status: UploadStatus::Sending,
        });
        self.phase = Phase::Processing;
        self.error = None;
        self.receipt = None;
        self.highlighted = None;
        self.target = None;
        self.dirty = true;
        effects.push(UploadEffect::StartUpload {
            session: id,
            path,
            file_name,
            total_bytes,
        });
    }

    fn check_file(&self, file_name: &str, total_bytes: u64) -> Option<PopupError> {
        if !file_name.to_ascii_lowercase().ends_with(".zip") {
            return Some(PopupError::new(
                PopupErrorKind::Validation,
                "Invalid file type. Please upload a zip file.",
            ));
        }
        if total_bytes == 0 {
            return Some(PopupError::new(
                PopupErrorKind::Validation,
                "The selected file is empty.",
            ));
        }
        if total_bytes > self.max_upload_bytes {
            return Some(PopupError::new(
                PopupErrorKind::SizeExceeded,
                format!(
                    "File is {} which exceeds the {} upload limit.",
                    format_file_size(total_bytes),
                    format_file_size(self.max_upload_bytes)
                ),
            ));
        }
        None
    }

    pub(crate) fn assign_file_id(&mut self, id: SessionId, file_id: String) {
        if let Some(session) = self.active_session_mut(id) {
            session.file_id = Some(file_id);
            self.dirty = true;
        }
    }

    pub(crate) fn acknowledge(&mut self, id: SessionId, bytes_sent: u64) {
        if let Some(session) = self.active_session_mut(id) {
            let clamped = bytes_sent.min(session.total_bytes);
            if session.status == UploadStatus::Sending && clamped > session.bytes_sent {
                session.bytes_sent = clamped;
                self.dirty = true;
            }
        }
    }

    pub(crate) fn advance(&mut self, id: SessionId, stage: UploadStage) {
        if let Some(session) = self.active_session_mut(id) {
            let next = match stage {
                UploadStage::Validating => UploadStatus::Validating,
                UploadStage::Committing => UploadStatus::Committing,
            };
            if next != session.status {
                session.bytes_sent = session.total_bytes;
                session.status = next;
                self.dirty = true;
            }
        }
    }

    pub(crate) fn complete(
        &mut self,
        id: SessionId,
        receipt: UploadReceipt,
        effects: &mut Vec<UploadEffect>,
    ) {
        if self.active_session_mut(id).is_none() {
            return;
        }
        self.session = None;
        self.has_current_file = true;
        self.close_prompt = false;
        self.phase = Phase::Ready;
        self.dirty = true;
        effects.push(UploadEffect::NotifyUploaded {
            dl_link: receipt.dl_link.clone(),
        });
        let needs_selection = receipt.level_files.len() > 1;
        self.receipt = Some(receipt);
        if !needs_selection && self.open {
            self.close(effects);
        }
    }

    pub(crate) fn fail(&mut self, id: SessionId, error: PopupError) {
        if self.active_session_mut(id).is_none() {
            return;
        }
        self.session = None;
        self.phase = Phase::Confirm;
        self.error = Some(error);
        self.close_prompt = false;
        self.dirty = true;
    }

    /// Silent end of a session the engine observed being aborted.
    pub(crate) fn cancelled(&mut self, id: SessionId) {
        if self.active_session_mut(id).is_none() {
            return;
        }
        self.session = None;
        self.phase = Phase::Confirm;
        self.dirty = true;
    }

    /// Drops the active session and asks the host to abort it.
    pub(crate) fn abort(&mut self, effects: &mut Vec<UploadEffect>) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        self.phase = Phase::Confirm;
        self.close_prompt = false;
        self.dirty = true;
        effects.push(UploadEffect::AbortUpload {
            session: session.id,
        });
        true
    }

    pub(crate) fn request_close(&mut self, effects: &mut Vec<UploadEffect>) {
        if !self.open {
            return;
        }
        if self.is_active() {
            if !self.close_prompt {
                self.close_prompt = true;
                self.dirty = true;
                effects.push(UploadEffect::AskCloseConfirmation);
            }
            return;
        }
        self.close(effects);
    }

    pub(crate) fn confirm_close(&mut self, effects: &mut Vec<UploadEffect>) {
        if !self.close_prompt {
            return;
        }
        self.abort(effects);
        self.close(effects);
    }

    pub(crate) fn dismiss_close(&mut self) {
        if self.close_prompt {
            self.close_prompt = false;
            self.dirty = true;
        }
    }

    fn can_select(&self) -> bool {
        self.phase == Phase::Ready
            && !self.selection_pending
            && self.highlighted.is_some()
            && self.highlighted != self.target
    }

    pub(crate) fn highlight(&mut self, path: String) {
        let known = self
            .receipt
            .as_ref()
            .is_some_and(|r| r.level_files.iter().any(|f| f.path == path));
        if known && self.phase == Phase::Ready {
            self.highlighted = Some(path);
            self.error = None;
            self.dirty = true;
        }
    }

    pub(crate) fn request_selection(&mut self, effects: &mut Vec<UploadEffect>) {
        if !self.can_select() {
            return;
        }
        if let Some(path) = self.highlighted.clone() {
            self.selection_pending = true;
            self.dirty = true;
            effects.push(UploadEffect::SelectTargetLevel { path });
        }
    }

    pub(crate) fn resolve_selection(
        &mut self,
        result: Result<String, PopupError>,
        effects: &mut Vec<UploadEffect>,
    ) {
        if !self.selection_pending {
            return;
        }
        self.selection_pending = false;
        self.dirty = true;
        match result {
            Ok(path) => {
                self.target = Some(path);
                if self.open {
                    self.close(effects);
                }
            }
            Err(error) => self.error = Some(error),
        }
    }

    fn can_delete(&self) -> bool {
        self.open && self.has_current_file && !self.is_active() && !self.delete_pending
    }

    pub(crate) fn request_delete(&mut self, effects: &mut Vec<UploadEffect>) {
        if self.can_delete() && !self.delete_prompt {
            self.delete_prompt = true;
            self.dirty = true;
            effects.push(UploadEffect::AskDeleteConfirmation);
        }
    }

    pub(crate) fn confirm_delete(&mut self, effects: &mut Vec<UploadEffect>) {
        if !self.delete_prompt {
            return;
        }
        self.delete_prompt = false;
        self.delete_pending = true;
        self.dirty = true;
        effects.push(UploadEffect::DeleteCurrentFile);
    }

    pub(crate) fn dismiss_delete(&mut self) {
        if self.delete_prompt {
            self.delete_prompt = false;
            self.dirty = true;
        }
    }

    pub(crate) fn resolve_delete(
        &mut self,
        result: Result<(), PopupError>,
        effects: &mut Vec<UploadEffect>,
    ) {
        if !self.delete_pending {
            return;
        }
        self.delete_pending = false;
        self.dirty = true;
        match result {
            Ok(()) => {
                self.has_current_file = false;
                self.receipt = None;
                if self.open {
                    self.close(effects);
                }
            }
            Err(error) => self.error = Some(error),
        }
    }
}

fn progress_label(session: &UploadSession) -> String {
    match session.status {
        UploadStatus::Sending => format!(
            "Uploading... {}% ({} / {})",
            session.percent(),
            format_file_size(session.bytes_sent),
            format_file_size(session.total_bytes)
        ),
        UploadStatus::Validating => "Verifying uploaded chunks...".to_string(),
        UploadStatus::Committing => "Processing level archive...".to_string(),
    }
}
