use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Value recorded for a metric that could not be measured or parsed.
pub const MISSING_SCORE: f64 = 0.0;

/// Label preceding the overall PSNR in the output of FFmpeg's `psnr` filter.
pub const PSNR_LABEL: &str = "average";

/// Label preceding the overall SSIM in the output of FFmpeg's `ssim` filter.
pub const SSIM_LABEL: &str = "All";

/// Pooled VMAF score from a libvmaf JSON log.
///
/// Newer libvmaf versions write `pooled_metrics.vmaf.mean`, older ones `aggregate.vmaf`.
pub fn try_vmaf_from_json(text: &str) -> anyhow::Result<f64> {
    let document: Value =
        serde_json::from_str(text).context("Unable to parse VMAF log as JSON")?;

    if let Some(pooled) = document.get("pooled_metrics") {
        return pooled
            .pointer("/vmaf/mean")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("VMAF log has no numeric pooled_metrics.vmaf.mean"));
    }

    if let Some(aggregate) = document.get("aggregate") {
        return aggregate
            .get("vmaf")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("VMAF log has no numeric aggregate.vmaf"));
    }

    Err(anyhow!(
        "VMAF log has neither a pooled_metrics nor an aggregate section"
    ))
}

pub fn vmaf_from_json(text: &str) -> f64 {
    try_vmaf_from_json(text).unwrap_or_else(|err| {
        warn!("Could not extract VMAF score: {err:#}");
        MISSING_SCORE
    })
}

pub fn vmaf_from_log(path: &Path) -> f64 {
    match fs::read_to_string(path) {
        Ok(text) => vmaf_from_json(&text),
        Err(err) => {
            warn!("Could not read VMAF log {path:?}: {err}");
            MISSING_SCORE
        }
    }
}

/// Last `label:<number>` value in free text such as FFmpeg filter summaries.
pub fn try_last_labeled_value(text: &str, label: &str) -> anyhow::Result<f64> {
    let pattern = Regex::new(&format!(r"{}:\s*([0-9]+(?:\.[0-9]+)?)", regex::escape(label)))
        .with_context(|| format!("Unable to build pattern for label '{label}'"))?;

    let value = pattern
        .captures_iter(text)
        .last()
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| anyhow!("No '{label}:' value found in output"))?;

    value
        .as_str()
        .parse()
        .with_context(|| format!("Unable to parse '{}' as a number", value.as_str()))
}

pub fn last_labeled_value(text: &str, label: &str) -> f64 {
    try_last_labeled_value(text, label).unwrap_or_else(|err| {
        warn!("Could not extract {label} value: {err:#}");
        MISSING_SCORE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_vmaf_shape() {
        assert!(
            (vmaf_from_json(r#"{"pooled_metrics": {"vmaf": {"mean": 87.5}}}"#) - 87.5).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn aggregate_vmaf_shape() {
        assert!((vmaf_from_json(r#"{"aggregate": {"vmaf": 90}}"#) - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_or_broken_vmaf_logs_yield_sentinel() {
        assert!(vmaf_from_json("{}").abs() < f64::EPSILON);
        assert!(vmaf_from_json("not json").abs() < f64::EPSILON);
        assert!(vmaf_from_json(r#"{"pooled_metrics": {"psnr": {}}}"#).abs() < f64::EPSILON);
        assert!(try_vmaf_from_json(r#"{"aggregate": {}}"#).is_err());
    }

    #[test]
    fn missing_vmaf_log_yields_sentinel() {
        let directory = tempfile::tempdir().unwrap();

        assert!(vmaf_from_log(&directory.path().join("absent.json")).abs() < f64::EPSILON);
    }

    #[test]
    fn psnr_summary_line() {
        let text = "[Parsed_psnr_0 @ 0x1] PSNR y:43.10 u:45.02 v:45.67 average:42.17 min:38.20 max:48.90";

        assert!((last_labeled_value(text, PSNR_LABEL) - 42.17).abs() < f64::EPSILON);
    }

    #[test]
    fn ssim_summary_line() {
        let text = "[Parsed_ssim_0 @ 0x1] SSIM Y:0.981 (17.2) U:0.990 (20.1) V:0.991 (20.4) All:0.9853 (18.31)";

        assert!((last_labeled_value(text, SSIM_LABEL) - 0.9853).abs() < f64::EPSILON);
    }

    #[test]
    fn last_occurrence_wins() {
        let text = "frame average:10.0\nframe average:11.5\nsummary average:12.25\n";

        assert!((last_labeled_value(text, "average") - 12.25).abs() < f64::EPSILON);
    }

    #[test]
    fn no_match_yields_sentinel() {
        assert!(last_labeled_value("Conversion failed!", PSNR_LABEL).abs() < f64::EPSILON);
        assert!(last_labeled_value("average:inf", PSNR_LABEL).abs() < f64::EPSILON);
    }
}
