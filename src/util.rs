use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use indicatif::{HumanDuration, ProgressBar, ProgressState, ProgressStyle};
use prettytable::{row, Table};
use statrs::statistics::Statistics;
use tracing::{error, level_filters::LevelFilter};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::table::ResultTable;

#[allow(clippy::as_conversions)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::cast_sign_loss)]
pub fn create_progress_style(template: &str) -> anyhow::Result<ProgressStyle> {
    let progress_style = ProgressStyle::with_template(template)
        .with_context(|| format!("Unable to create progress bar style with template '{template}'"))?
        .with_key("smooth_eta", |s: &ProgressState, w: &mut dyn Write| {
            match (s.pos(), s.len()) {
                (pos, Some(len)) if pos > 0 => write!(
                    w,
                    "{:#}",
                    HumanDuration(Duration::from_millis(
                        (s.elapsed().as_millis() as f64 * (len as f64 - pos as f64) / pos as f64)
                            .round() as u64
                    ))
                ),
                _ => write!(w, "-"),
            }
            .unwrap_or_else(|err| {
                error!("Unexpected error while formatting smooth_eta in progress bar: {err}");
            });
        });

    Ok(progress_style)
}

/// Progress bar over `length` batch items, labelled with the stage name.
pub fn create_batch_progress_bar(length: usize, stage: &str) -> anyhow::Result<ProgressBar> {
    let progress_bar = ProgressBar::new(length.try_into().unwrap_or(u64::MAX));

    progress_bar.set_style(
        create_progress_style(&format!(
            "{{spinner:.green}} [{{elapsed_precise}}] {stage:<10} [{{wide_bar:.cyan/blue}}] {{pos:>3}}/{{len:>3}} (ETA: {{smooth_eta:>3}}) {{msg}}"
        ))
        .with_context(|| format!("Unable to create {stage} progress bar style"))?,
    );

    progress_bar.enable_steady_tick(Duration::from_secs(1));

    Ok(progress_bar)
}

pub fn install_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .context("Unable to initialize global default subscriber")?;

    Ok(())
}

pub fn verify_filename(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create directory {parent:?}"))?;
    }

    Ok(())
}

pub fn verify_directory(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(anyhow!("{path:?} exists but is not a directory"));
        }
    } else {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Unable to create directory {path:?}"))?;
    }

    Ok(())
}

/// Per-codec mean of each metric, in codec name order.
#[must_use]
pub fn codec_means(table: &ResultTable) -> Vec<(String, usize, [f64; 3])> {
    let mut groups: BTreeMap<&str, [Vec<f64>; 3]> = BTreeMap::new();

    for record in table.records() {
        let [vmaf, psnr, ssim] = groups.entry(record.codec.as_str()).or_default();
        vmaf.push(record.vmaf);
        psnr.push(record.psnr);
        ssim.push(record.ssim);
    }

    groups
        .into_iter()
        .map(|(codec, [vmaf, psnr, ssim])| {
            (
                codec.to_owned(),
                vmaf.len(),
                [vmaf.mean(), psnr.mean(), ssim.mean()],
            )
        })
        .collect()
}

#[allow(clippy::print_stdout)]
pub fn print_summary(table: &ResultTable) {
    if table.is_empty() {
        println!("No variants were measured.");
        return;
    }

    let mut output = Table::new();
    output.set_titles(row!["Codec", "Variants", "VMAF", "PSNR", "SSIM"]);

    for (codec, count, [vmaf, psnr, ssim]) in codec_means(table) {
        output.add_row(row![
            codec.to_uppercase(),
            count,
            format!("{vmaf:.2}"),
            format!("{psnr:.2}"),
            format!("{ssim:.4}")
        ]);
    }

    println!();
    output.printstd();
}
