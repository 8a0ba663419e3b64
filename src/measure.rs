use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::extract::{last_labeled_value, vmaf_from_log, MISSING_SCORE, PSNR_LABEL, SSIM_LABEL};
use crate::naming::parse_variant_filename;
use crate::process::{Capture, Invocation, Output, Runner};
use crate::table::{MeasurementRecord, ResultTable};
use crate::util::{create_batch_progress_bar, print_summary, verify_directory};

/// An encoded file found under `{encoded}/{codec}/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedVariant {
    pub codec: String,
    pub filename: String,
    pub path: PathBuf,
}

/// Encoded variants in codec directory order, then file name order.
pub fn discover_variants(config: &Config) -> anyhow::Result<Vec<EncodedVariant>> {
    let temporary_suffix = format!(".tmp.{}", config.extension).to_lowercase();
    let mut variants = vec![];

    if let Err(err) = fs::metadata(&config.encoded_directory) {
        if err.kind() == ErrorKind::NotFound {
            warn!(
                "Encoded clip directory {:?} does not exist; nothing to measure",
                config.encoded_directory
            );
            return Ok(variants);
        }
    }

    for entry in WalkDir::new(&config.encoded_directory)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| {
            format!(
                "Unable to read encoded clip directory {:?}",
                config.encoded_directory
            )
        })?;

        if !entry.file_type().is_file() || !config.has_clip_extension(entry.path()) {
            continue;
        }

        let Some(filename) = entry.file_name().to_str() else {
            warn!("Skipping {:?}: file name is not valid UTF-8", entry.path());
            continue;
        };

        if filename.to_lowercase().ends_with(&temporary_suffix) {
            continue;
        }

        let Some(codec) = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
        else {
            warn!("Skipping {:?}: codec directory name is not valid UTF-8", entry.path());
            continue;
        };

        variants.push(EncodedVariant {
            codec: codec.to_owned(),
            filename: filename.to_owned(),
            path: entry.path().to_path_buf(),
        });
    }

    Ok(variants)
}

fn filter_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub struct Measurer<'a> {
    config: &'a Config,
    runner: &'a dyn Runner,
}

impl<'a> Measurer<'a> {
    #[must_use]
    pub fn new(config: &'a Config, runner: &'a dyn Runner) -> Self {
        Self { config, runner }
    }

    /// Measures every encoded variant and replaces the summary table with the results.
    pub fn measure(&self) -> anyhow::Result<ResultTable> {
        let summary_path = self.config.summary_path();

        ResultTable::remove_existing(&summary_path)?;

        verify_directory(&self.config.metrics_directory).with_context(|| {
            format!(
                "Unable to verify metrics directory {:?}",
                self.config.metrics_directory
            )
        })?;

        let variants = discover_variants(self.config).context("Unable to discover encoded clips")?;
        let progress_bar = create_batch_progress_bar(variants.len(), "Measuring")?;

        let mut table = ResultTable::new();

        for variant in &variants {
            progress_bar.set_message(format!(
                "{} ({})",
                variant.filename,
                variant.codec.to_uppercase()
            ));

            if let Some(record) = self.measure_variant(variant).with_context(|| {
                format!("Unable to measure {:?}", variant.path)
            })? {
                info!(
                    "{} ({}): VMAF={:.2}, PSNR={:.2}, SSIM={:.4}",
                    record.clip, record.codec, record.vmaf, record.psnr, record.ssim
                );

                table.push(record);
            }

            progress_bar.inc(1);
        }

        progress_bar.finish_with_message("done");

        table
            .write(&summary_path)
            .with_context(|| format!("Unable to write summary table {summary_path:?}"))?;

        info!("Wrote {} rows to {summary_path:?}", table.len());
        print_summary(&table);

        Ok(table)
    }

    /// Scores one variant, or `None` when it has to be skipped.
    pub fn measure_variant(
        &self,
        variant: &EncodedVariant,
    ) -> anyhow::Result<Option<MeasurementRecord>> {
        let key = match parse_variant_filename(&variant.filename) {
            Ok(key) => key,
            Err(err) => {
                warn!("Skipping {}: {err:#}", variant.filename);
                return Ok(None);
            }
        };

        let reference_path = self.config.reference_path(&key.base);

        if !reference_path.exists() {
            warn!(
                "Skipping {}: missing reference {reference_path:?}",
                variant.filename
            );
            return Ok(None);
        }

        let stem = variant
            .path
            .file_stem()
            .map_or_else(|| variant.filename.clone(), |stem| stem.to_string_lossy().to_string());

        let json_path = self
            .config
            .metrics_directory
            .join(format!("{}_{stem}_metrics.json", variant.codec));

        match fs::remove_file(&json_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("Unable to remove stale {json_path:?}"));
            }
        }

        let vmaf = self
            .run_metric("VMAF", &self.vmaf_invocation(&reference_path, &variant.path, &json_path))
            .map_or(MISSING_SCORE, |_output| vmaf_from_log(&json_path));

        let psnr = self
            .run_metric("PSNR", &self.filter_invocation(&reference_path, &variant.path, "psnr"))
            .map_or(MISSING_SCORE, |output| {
                last_labeled_value(&output.text, PSNR_LABEL)
            });

        let ssim = self
            .run_metric("SSIM", &self.filter_invocation(&reference_path, &variant.path, "ssim"))
            .map_or(MISSING_SCORE, |output| {
                last_labeled_value(&output.text, SSIM_LABEL)
            });

        Ok(Some(MeasurementRecord {
            clip: variant.filename.clone(),
            codec: variant.codec.clone(),
            vmaf,
            psnr,
            ssim,
        }))
    }

    /// Runs one measurement. Failures are logged and reported as `None`.
    fn run_metric(&self, name: &str, invocation: &Invocation) -> Option<Output> {
        match self.runner.run(invocation) {
            Ok(output) if output.success => Some(output),
            Ok(output) => {
                warn!(
                    "{name} measurement exited with status {}: {}",
                    output.status,
                    invocation.command_line()
                );
                None
            }
            Err(err) => {
                warn!("{name} measurement could not be run: {err:#}");
                None
            }
        }
    }

    fn vmaf_invocation(&self, reference: &Path, distorted: &Path, log_path: &Path) -> Invocation {
        let width = self.config.scale.width;
        let height = self.config.scale.height;

        let filters = [
            format!("[0:v]scale={width}:{height}:flags=bicubic[ref]"),
            format!("[1:v]scale={width}:{height}:flags=bicubic[dist]"),
            format!(
                "[dist][ref]libvmaf=log_fmt=json:log_path='{}'",
                filter_path(log_path)
            ),
        ];

        Invocation::new(&self.config.ffmpeg, Capture::Discard)
            .args(["-hide_banner", "-i"])
            .arg(reference)
            .arg("-i")
            .arg(distorted)
            .arg("-lavfi")
            .arg(filters.join(";"))
            .args(["-f", "null", "-"])
    }

    fn filter_invocation(&self, reference: &Path, distorted: &Path, filter: &str) -> Invocation {
        Invocation::new(&self.config.ffmpeg, Capture::Text)
            .args(["-hide_banner", "-i"])
            .arg(reference)
            .arg("-i")
            .arg(distorted)
            .args(["-lavfi", filter, "-f", "null", "-"])
    }
}
