//! Dataset layout checks and pairing summaries.

use crate::index::{GT_SUBDIR, IMAGE_SUBDIR};
use crate::types::{
    DatasetResult, DirCount, LayoutReport, RoadDatasetError, SampleIndex, SummaryReport,
    TrainingSummary, ValidationOutcome, ValidationThresholds,
};
use data_contracts::{DatasetLayout, SplitCounts};
use std::fs;
use std::path::Path;

fn count_files(dir: &Path) -> Option<usize> {
    let entries = fs::read_dir(dir).ok()?;
    Some(
        entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_file())
            .count(),
    )
}

fn check_split(
    split_dir: &Path,
    expected: &SplitCounts,
    counts: &mut Vec<DirCount>,
    reasons: &mut Vec<String>,
) {
    let mut dirs = vec![("calib", expected.calib), (IMAGE_SUBDIR, expected.image_2)];
    if let Some(gt) = expected.gt_image_2 {
        dirs.push((GT_SUBDIR, gt));
    }
    for (name, want) in dirs {
        let dir = split_dir.join(name);
        let found = match count_files(&dir) {
            Some(n) => n,
            None => {
                reasons.push(format!("{} is missing", dir.display()));
                0
            }
        };
        if found != want {
            reasons.push(format!(
                "expected {want} files in {}, found {found}",
                dir.display()
            ));
        }
        counts.push(DirCount {
            dir,
            expected: want,
            found,
        });
    }
}

/// Count the files of every split directory against the expected layout.
pub fn check_layout(data_dir: &Path, layout: &DatasetLayout) -> LayoutReport {
    let mut counts = Vec::new();
    let mut reasons = Vec::new();
    let root = data_dir.join(&layout.root_subdir);
    if !root.is_dir() {
        reasons.push(format!("dataset root {} not found", root.display()));
    }
    check_split(
        &root.join("training"),
        &layout.training,
        &mut counts,
        &mut reasons,
    );
    check_split(
        &root.join("testing"),
        &layout.testing,
        &mut counts,
        &mut reasons,
    );
    let outcome = if reasons.is_empty() {
        ValidationOutcome::Pass
    } else {
        ValidationOutcome::Fail
    };
    LayoutReport {
        outcome,
        reasons,
        counts,
    }
}

pub fn ensure_layout(data_dir: &Path, layout: &DatasetLayout) -> DatasetResult<LayoutReport> {
    let report = check_layout(data_dir, layout);
    if report.outcome == ValidationOutcome::Fail {
        return Err(RoadDatasetError::Layout(report.reasons.join("; ")));
    }
    Ok(report)
}

pub fn summarize_training(indices: &[SampleIndex]) -> TrainingSummary {
    let paired = indices.iter().filter(|i| i.label_path.is_some()).count();
    TrainingSummary {
        images: indices.len(),
        paired,
        unpaired: indices.len() - paired,
    }
}

pub fn validate_training_summary(
    summary: TrainingSummary,
    thresholds: &ValidationThresholds,
) -> SummaryReport {
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();
    let denom = summary.images.max(1) as f32;
    let ratio = summary.unpaired as f32 / denom;

    if let Some(min) = thresholds.min_images {
        if summary.paired < min {
            outcome = ValidationOutcome::Fail;
            reasons.push(format!("paired images: {} below min {min}", summary.paired));
        }
    }
    if let Some(max) = thresholds.max_unpaired {
        if summary.unpaired > max {
            outcome = ValidationOutcome::Fail;
            reasons.push(format!("unpaired images: {} exceeds max {max}", summary.unpaired));
        }
    }
    if let Some(max_r) = thresholds.max_unpaired_ratio {
        if ratio > max_r {
            outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "unpaired images: ratio {:.3} exceeds max {:.3}",
                ratio, max_r
            ));
        }
    }
    if summary.unpaired > 0 {
        if outcome == ValidationOutcome::Pass {
            outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("unpaired images: {} observed", summary.unpaired));
    }
    if summary.paired == 0 {
        outcome = ValidationOutcome::Fail;
        reasons.push("no image has a ground-truth mask".to_string());
    }

    SummaryReport {
        outcome,
        reasons,
        summary,
    }
}
