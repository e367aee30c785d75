use std::time::Duration;

use chrono::{DateTime, Utc};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use transfer_core::{
    EstimateLabel, LevelFileRow, PackViewModel, Phase, SizeSummary, UploadStatus, UploadViewModel,
};

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}";
const PREPARING: &str = "Preparing pack...";

fn percent_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Terminal rendering of the upload popup. The bar exists only while a
/// session is active.
#[derive(Default)]
pub struct UploadRenderer {
    bar: Option<ProgressBar>,
}

impl UploadRenderer {
    pub fn render(&mut self, view: &UploadViewModel) {
        match upload_line(view) {
            Some((percent, label)) => {
                let bar = self.bar.get_or_insert_with(percent_bar);
                bar.set_position(u64::from(percent));
                bar.set_message(label);
            }
            None => self.clear(),
        }
    }

    /// Runs `f` with the bar hidden, for prompts and plain output.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.bar {
            Some(bar) => bar.suspend(f),
            None => f(),
        }
    }

    pub fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Terminal rendering of the pack-download popup.
#[derive(Default)]
pub struct PackRenderer {
    bar: Option<ProgressBar>,
}

impl PackRenderer {
    pub fn render(&mut self, view: &PackViewModel) {
        if view.open && view.phase == Phase::Processing {
            let (percent, detail) = pack_line(view);
            let bar = self.bar.get_or_insert_with(percent_bar);
            bar.set_position(u64::from(percent));
            bar.set_message(detail);
        } else {
            self.clear();
        }
    }

    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.bar {
            Some(bar) => bar.suspend(f),
            None => f(),
        }
    }

    pub fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Percent and label for the active upload, or `None` when idle.
pub fn upload_line(view: &UploadViewModel) -> Option<(u8, String)> {
    let progress = view.progress.as_ref()?;
    Some((
        progress.percent,
        format!("{}: {}", progress.file_name, progress.label),
    ))
}

pub fn pack_line(view: &PackViewModel) -> (u8, String) {
    match &view.progress_bar {
        Some(bar) if bar.detail.is_empty() => (bar.percent, PREPARING.to_string()),
        Some(bar) => (bar.percent, bar.detail.clone()),
        None => (0, PREPARING.to_string()),
    }
}

pub fn level_file_label(row: &LevelFileRow) -> String {
    match &row.size_label {
        Some(size) => format!("{} ({size})", row.path),
        None => row.path.clone(),
    }
}

/// Formats an expiry timestamp in UTC; unparseable values are shown as-is.
pub fn format_expiry(expires_at: &str) -> String {
    DateTime::parse_from_rfc3339(expires_at)
        .map(|parsed| {
            parsed
                .with_timezone(&Utc)
                .format("%Y-%m-%d %H:%M UTC")
                .to_string()
        })
        .unwrap_or_else(|_| expires_at.to_string())
}

pub fn estimate_lines(label: &EstimateLabel, summary: &SizeSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {} ({} levels)",
        style("Estimated size:").bold(),
        style(&label.size_label).cyan(),
        summary.level_count
    )];
    if let Some(note) = &label.estimated_note {
        lines.push(format!("  {}", style(note).dim()));
    }
    lines
}

pub fn print_estimate(label: &EstimateLabel, summary: &SizeSummary) {
    for line in estimate_lines(label, summary) {
        println!("{line}");
    }
}

pub fn print_link(heading: &str, url: &str, expires_at: Option<&str>) {
    println!("{} {}", style("✓").green(), style(heading).bold());
    println!("  {} {}", style("Link:").bold(), style(url).cyan());
    if let Some(expires_at) = expires_at {
        println!(
            "  {} {}",
            style("Expires:").bold(),
            style(format_expiry(expires_at)).dim()
        );
    }
}

pub fn print_notice(message: &str) {
    println!("{} {}", style("•").blue(), message);
}

pub fn print_failure(message: &str) {
    eprintln!("{} {}", style("✗").red(), style(message).red());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use transfer_core::{format_estimated_size, ProgressBarView, UploadProgressView};

    fn upload_view(status: UploadStatus) -> UploadViewModel {
        UploadViewModel {
            open: true,
            phase: Phase::Processing,
            progress: Some(UploadProgressView {
                file_name: "level.zip".into(),
                status,
                bytes_sent: 5,
                total_bytes: 10,
                percent: 50,
                label: "Uploading... 50% (5 Bytes / 10 Bytes)".into(),
            }),
            error: None,
            awaiting_close_confirmation: false,
            awaiting_delete_confirmation: false,
            can_delete: false,
            dl_link: None,
            level_files: Vec::new(),
            can_select: false,
            dirty: false,
        }
    }

    fn pack_view(progress_bar: Option<ProgressBarView>) -> PackViewModel {
        PackViewModel {
            open: true,
            phase: Phase::Processing,
            size_label: "1 GB".into(),
            estimate_note: None,
            exceeds_limit: false,
            can_confirm: false,
            error: None,
            progress_bar,
            link: None,
            dirty: false,
        }
    }

    #[test]
    fn active_upload_shows_file_and_label() {
        assert_eq!(
            upload_line(&upload_view(UploadStatus::Sending)),
            Some((
                50,
                "level.zip: Uploading... 50% (5 Bytes / 10 Bytes)".to_string()
            ))
        );
        let mut idle = upload_view(UploadStatus::Sending);
        idle.progress = None;
        assert_eq!(upload_line(&idle), None);
    }

    #[test]
    fn pack_line_waits_for_first_event() {
        assert_eq!(pack_line(&pack_view(None)), (0, PREPARING.to_string()));
        let view = pack_view(Some(ProgressBarView {
            percent: 40,
            detail: "Zipping 4 / 10".into(),
        }));
        assert_eq!(pack_line(&view), (40, "Zipping 4 / 10".to_string()));
    }

    #[test]
    fn expiry_is_shown_in_utc() {
        assert_eq!(
            format_expiry("2026-03-01T12:30:00+02:00"),
            "2026-03-01 10:30 UTC"
        );
        assert_eq!(format_expiry("tomorrow"), "tomorrow");
    }

    #[test]
    fn level_rows_include_size_when_known() {
        let row = LevelFileRow {
            path: "songs/main.adofai".into(),
            name: "main.adofai".into(),
            size_label: Some("2 KB".into()),
            highlighted: false,
            is_target: false,
        };
        assert_eq!(level_file_label(&row), "songs/main.adofai (2 KB)");
    }

    #[test]
    fn estimate_mentions_missing_metadata() {
        console::set_colors_enabled(false);
        let summary = SizeSummary {
            total_bytes: 2048,
            missing_count: 2,
            level_count: 5,
        };
        let lines = estimate_lines(&format_estimated_size(&summary), &summary);
        assert_eq!(lines[0], "Estimated size: 2 KB (5 levels)");
        assert_eq!(lines.len(), 2);
    }
}
