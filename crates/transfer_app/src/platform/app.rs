use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use dialoguer::{Confirm, Select};
use transfer_core::{
    format_estimated_size, update_pack, update_upload, LevelUploadState, PackDownloadState,
    PackMsg, Phase, SizeSummary, UploadMsg,
};
use transfer_engine::{EngineHandle, PackContext, PopupId};
use transfer_logging::{xfer_error, xfer_info, xfer_warn};
use uuid::Uuid;

use super::config::{estimate, load_config, load_manifest};
use super::effects::{pack_msg, upload_msg, EffectRunner, HostAction};
use super::render::{
    level_file_label, print_estimate, print_failure, print_link, print_notice, PackRenderer,
    UploadRenderer,
};
use crate::{Cli, Command};

const UPLOAD_POPUP: PopupId = 1;
const PACK_POPUP: PopupId = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const DELETE_PROMPT: &str =
    "Are you sure you want to delete this level file? This action cannot be undone.";
const CLOSE_PROMPT: &str = "An upload is still running. Cancel it and close?";

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(&cli.config)?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    if let Some(chunk_size_mb) = cli.chunk_size_mb {
        config.chunk_size_mb = chunk_size_mb;
    }

    if let Command::Estimate { items } = &cli.command {
        let summary = estimate(&load_manifest(items)?, None)?;
        print_estimate(&format_estimated_size(&summary), &summary);
        return Ok(());
    }

    let settings = config.to_settings()?;
    let engine = EngineHandle::new(&settings).context("failed to start transfer engine")?;
    let interrupts = install_interrupt_handler()?;
    xfer_info!("leveltransfer started against {}", settings.api_base);

    match cli.command {
        Command::Upload { level, zip } => {
            let runner = EffectRunner::new(engine, UPLOAD_POPUP);
            UploadSession::new(runner, level, settings.max_upload_bytes, interrupts).upload(&zip)
        }
        Command::DeleteUpload { level, yes } => {
            let runner = EffectRunner::new(engine, UPLOAD_POPUP);
            UploadSession::new(runner, level, settings.max_upload_bytes, interrupts).delete(yes)
        }
        Command::PackDownload {
            pack,
            folder,
            name,
            estimated_bytes,
            items,
        } => {
            let (size, estimated) = match (items, estimated_bytes) {
                (Some(items), _) => {
                    let summary = estimate(&load_manifest(&items)?, folder)?;
                    print_estimate(&format_estimated_size(&summary), &summary);
                    (summary, Some(summary.total_bytes))
                }
                (None, Some(bytes)) => (
                    SizeSummary {
                        total_bytes: bytes,
                        ..SizeSummary::default()
                    },
                    Some(bytes),
                ),
                (None, None) => (SizeSummary::default(), None),
            };
            let label = name.unwrap_or_else(|| format!("pack {pack}"));
            let context = PackContext {
                pack_id: pack,
                folder_id: folder,
            };
            let runner = EffectRunner::new(engine, PACK_POPUP);
            PackSession::new(runner, context, estimated, settings.max_pack_bytes, interrupts)
                .run(size, &label)
        }
        Command::Estimate { .. } => Ok(()),
    }
}

/// Ctrl-C is delivered as a message so prompts and the engine can wind down.
fn install_interrupt_handler() -> anyhow::Result<mpsc::Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(rx)
}

fn confirm(prompt: &str) -> bool {
    match Confirm::new().with_prompt(prompt).default(false).interact() {
        Ok(answer) => answer,
        Err(err) => {
            xfer_warn!("confirmation prompt failed: {err}");
            false
        }
    }
}

struct UploadSession {
    runner: EffectRunner,
    level_id: u64,
    state: LevelUploadState,
    renderer: UploadRenderer,
    interrupts: mpsc::Receiver<()>,
    queue: VecDeque<UploadMsg>,
    assume_yes: bool,
    uploaded: Option<String>,
}

impl UploadSession {
    fn new(
        runner: EffectRunner,
        level_id: u64,
        max_upload_bytes: u64,
        interrupts: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            runner,
            level_id,
            state: LevelUploadState::new(max_upload_bytes),
            renderer: UploadRenderer::default(),
            interrupts,
            queue: VecDeque::new(),
            assume_yes: false,
            uploaded: None,
        }
    }

    fn upload(mut self, zip: &Path) -> anyhow::Result<()> {
        let total_bytes = std::fs::metadata(zip)
            .with_context(|| format!("could not read {}", zip.display()))?
            .len();
        let file_name = zip
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.dispatch(UploadMsg::Opened {
            has_current_file: false,
        });
        self.dispatch(UploadMsg::FileSelected {
            path: PathBuf::from(zip),
            file_name,
            total_bytes,
        });

        while self.state.is_open() {
            if self.state.session().is_none() && self.state.phase() == Phase::Confirm {
                let error = self.state.view().error;
                self.dispatch(UploadMsg::CloseRequested);
                return match error {
                    Some(error) => Err(anyhow!(error.message)),
                    None => {
                        print_notice("Upload cancelled.");
                        Ok(())
                    }
                };
            }
            if self.state.view().can_select {
                self.prompt_target_level();
                continue;
            }
            self.pump();
        }
        self.renderer.clear();

        if self.uploaded.is_none() {
            print_notice("Upload cancelled.");
        }
        Ok(())
    }

    fn delete(mut self, assume_yes: bool) -> anyhow::Result<()> {
        self.assume_yes = assume_yes;
        self.dispatch(UploadMsg::Opened {
            has_current_file: true,
        });
        self.dispatch(UploadMsg::DeleteClicked);

        loop {
            let view = self.state.view();
            if !view.open {
                print_notice("Level upload deleted.");
                return Ok(());
            }
            if let Some(error) = view.error {
                self.dispatch(UploadMsg::CloseRequested);
                return Err(anyhow!(error.message));
            }
            if !view.awaiting_delete_confirmation && view.can_delete {
                // Confirmation declined; delete never started.
                self.dispatch(UploadMsg::CloseRequested);
                print_notice("Nothing deleted.");
                return Ok(());
            }
            self.pump();
        }
    }

    /// Waits briefly for one engine event or interrupt and applies it.
    fn pump(&mut self) {
        if self.interrupts.try_recv().is_ok() {
            xfer_info!("interrupt received during upload");
            self.dispatch(UploadMsg::CloseRequested);
            return;
        }
        let popup = self.runner.popup();
        if let Some(event) = self.runner.engine().recv_timeout(POLL_INTERVAL) {
            if let Some(msg) = upload_msg(popup, event) {
                self.dispatch(msg);
            }
        }
    }

    fn prompt_target_level(&mut self) {
        let view = self.state.view();
        if let Some(error) = &view.error {
            self.renderer.suspend(|| print_failure(&error.message));
        }
        let rows = view.level_files;
        let mut labels: Vec<String> = rows.iter().map(level_file_label).collect();
        labels.push("Skip for now".to_string());
        let choice = self.renderer.suspend(|| {
            Select::new()
                .with_prompt("The archive contains several levels. Which one should be used?")
                .items(&labels)
                .default(0)
                .interact()
        });
        match choice {
            Ok(index) if index < rows.len() => {
                self.dispatch(UploadMsg::LevelHighlighted {
                    path: rows[index].path.clone(),
                });
                self.dispatch(UploadMsg::SelectLevelClicked);
            }
            Ok(_) => self.dispatch(UploadMsg::CloseRequested),
            Err(err) => {
                xfer_warn!("level selection prompt failed: {err}");
                self.dispatch(UploadMsg::CloseRequested);
            }
        }
    }

    fn dispatch(&mut self, msg: UploadMsg) {
        self.queue.push_back(msg);
        while let Some(msg) = self.queue.pop_front() {
            let state = std::mem::take(&mut self.state);
            let (mut state, effects) = update_upload(state, msg);
            if state.consume_dirty() {
                self.renderer.render(&state.view());
            }
            self.state = state;
            for action in self.runner.run_upload(self.level_id, effects) {
                self.handle(action);
            }
        }
    }

    fn handle(&mut self, action: HostAction) {
        match action {
            HostAction::ConfirmClose => {
                let answer = self.renderer.suspend(|| confirm(CLOSE_PROMPT));
                self.queue.push_back(if answer {
                    UploadMsg::CloseConfirmed
                } else {
                    UploadMsg::CloseDismissed
                });
            }
            HostAction::ConfirmDelete => {
                let answer = self.assume_yes || self.renderer.suspend(|| confirm(DELETE_PROMPT));
                self.queue.push_back(if answer {
                    UploadMsg::DeleteConfirmed
                } else {
                    UploadMsg::DeleteDismissed
                });
            }
            HostAction::Uploaded { dl_link } => {
                self.renderer
                    .suspend(|| print_link("Level uploaded", &dl_link, None));
                self.uploaded = Some(dl_link);
            }
            HostAction::Dismiss => self.renderer.clear(),
            HostAction::PackReady { .. } | HostAction::OpenLink { .. } => {}
        }
    }
}

struct PackSession {
    runner: EffectRunner,
    context: PackContext,
    estimated_bytes: Option<u64>,
    state: PackDownloadState,
    renderer: PackRenderer,
    interrupts: mpsc::Receiver<()>,
}

impl PackSession {
    fn new(
        runner: EffectRunner,
        context: PackContext,
        estimated_bytes: Option<u64>,
        ceiling_bytes: u64,
        interrupts: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            runner,
            context,
            estimated_bytes,
            state: PackDownloadState::new(ceiling_bytes),
            renderer: PackRenderer::default(),
            interrupts,
        }
    }

    fn run(mut self, size: SizeSummary, label: &str) -> anyhow::Result<()> {
        self.dispatch(PackMsg::Opened { size });
        self.dispatch(PackMsg::ConfirmClicked {
            proposed_job_id: Uuid::new_v4().to_string(),
        });
        print_notice(&format!("Preparing download for {label}..."));

        loop {
            if self.interrupts.try_recv().is_ok() {
                self.dispatch(PackMsg::CancelClicked);
                self.dispatch(PackMsg::Closed);
                print_notice(
                    "Stopped waiting. The server keeps preparing the pack; run the command again to fetch it.",
                );
                return Ok(());
            }

            let view = self.state.view();
            if let Some(error) = view.error {
                self.dispatch(PackMsg::Closed);
                xfer_error!("pack download for {} failed: {}", label, error.message);
                return Err(anyhow!(error.message));
            }
            if view.phase == Phase::Ready {
                if let Some(link) = view.link {
                    print_link(
                        &format!("Download ready for {label}"),
                        &link.url,
                        link.expires_at.as_deref(),
                    );
                }
                self.dispatch(PackMsg::Closed);
                return Ok(());
            }

            let popup = self.runner.popup();
            if let Some(event) = self.runner.engine().recv_timeout(POLL_INTERVAL) {
                if let Some(msg) = pack_msg(popup, event) {
                    self.dispatch(msg);
                }
            }
        }
    }

    fn dispatch(&mut self, msg: PackMsg) {
        let state = std::mem::take(&mut self.state);
        let (mut state, effects) = update_pack(state, msg);
        if state.consume_dirty() {
            self.renderer.render(&state.view());
        }
        self.state = state;
        let actions = self
            .runner
            .run_pack(&self.context, self.estimated_bytes, effects);
        for action in actions {
            match action {
                HostAction::PackReady { url } => xfer_info!("pack ready: {url}"),
                HostAction::Dismiss => self.renderer.clear(),
                _ => {}
            }
        }
    }
}
