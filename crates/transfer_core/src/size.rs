//! Size estimates for pack archives.

/// An item of a pack tree as far as size estimation is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackItem {
    Level { size_bytes: Option<u64> },
    Folder { children: Vec<PackItem> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeSummary {
    pub total_bytes: u64,
    /// Levels without size metadata; the total underestimates when non-zero.
    pub missing_count: usize,
    pub level_count: usize,
}

impl SizeSummary {
    pub fn is_estimated(&self) -> bool {
        self.missing_count > 0
    }

    fn absorb(&mut self, other: SizeSummary) {
        self.total_bytes = self.total_bytes.saturating_add(other.total_bytes);
        self.missing_count += other.missing_count;
        self.level_count += other.level_count;
    }
}

pub fn summarize_pack_size(items: &[PackItem]) -> SizeSummary {
    let mut summary = SizeSummary::default();
    for item in items {
        match item {
            PackItem::Level { size_bytes } => {
                match size_bytes {
                    Some(size) => summary.total_bytes = summary.total_bytes.saturating_add(*size),
                    None => summary.missing_count += 1,
                }
                summary.level_count += 1;
            }
            PackItem::Folder { children } => summary.absorb(summarize_pack_size(children)),
        }
    }
    summary
}

/// Summary of a single folder; a level yields an empty summary.
pub fn summarize_folder_size(folder: &PackItem) -> SizeSummary {
    match folder {
        PackItem::Folder { children } => summarize_pack_size(children),
        PackItem::Level { .. } => SizeSummary::default(),
    }
}

/// Human-readable size using 1024-based units, e.g. `1.5 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimateLabel {
    pub size_label: String,
    pub estimated_note: Option<String>,
    pub short_note: Option<String>,
}

pub fn format_estimated_size(summary: &SizeSummary) -> EstimateLabel {
    let size_label = format_file_size(summary.total_bytes);
    if summary.is_estimated() {
        let missing = summary.missing_count;
        return EstimateLabel {
            size_label,
            estimated_note: Some(format!(
                "(estimated, {missing} items missing metadata)"
            )),
            short_note: Some(format!("(est., {missing} missing)")),
        };
    }
    EstimateLabel {
        size_label,
        estimated_note: None,
        short_note: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_trimmed_decimals() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5 MB");
        assert_eq!(format_file_size(15 * 1024 * 1024 * 1024), "15 GB");
    }

    #[test]
    fn sizes_beyond_gigabytes_stay_in_gigabytes() {
        assert_eq!(format_file_size(2 * 1024 * 1024 * 1024 * 1024), "2048 GB");
    }

    #[test]
    fn nested_folders_are_aggregated() {
        let items = vec![
            PackItem::Level {
                size_bytes: Some(100),
            },
            PackItem::Folder {
                children: vec![
                    PackItem::Level { size_bytes: None },
                    PackItem::Folder {
                        children: vec![PackItem::Level {
                            size_bytes: Some(50),
                        }],
                    },
                ],
            },
        ];
        let summary = summarize_pack_size(&items);
        assert_eq!(
            summary,
            SizeSummary {
                total_bytes: 150,
                missing_count: 1,
                level_count: 3,
            }
        );
        assert_eq!(
            summarize_folder_size(&items[1]),
            SizeSummary {
                total_bytes: 50,
                missing_count: 1,
                level_count: 2,
            }
        );
    }

    #[test]
    fn estimate_note_only_when_metadata_missing() {
        let exact = SizeSummary {
            total_bytes: 2048,
            missing_count: 0,
            level_count: 2,
        };
        assert_eq!(format_estimated_size(&exact).estimated_note, None);

        let partial = SizeSummary {
            missing_count: 3,
            ..exact
        };
        let label = format_estimated_size(&partial);
        assert_eq!(label.size_label, "2 KB");
        assert_eq!(
            label.estimated_note.as_deref(),
            Some("(estimated, 3 items missing metadata)")
        );
        assert_eq!(label.short_note.as_deref(), Some("(est., 3 missing)"));
    }
}
