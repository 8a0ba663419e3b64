use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use plotters::prelude::*;
use tracing::{info, warn};

use crate::config::{Config, Metric};
use crate::naming::parse_variant_filename;
use crate::table::{MeasurementRecord, ResultTable};
use crate::util::verify_directory;

/// Points of one codec's curve: (bitrate in Mbps, score), ordered by bitrate.
pub type Curve = Vec<(f64, f64)>;

/// Curves grouped by clip base name, then codec.
pub type ClipCurves = BTreeMap<String, BTreeMap<String, Curve>>;

fn metric_value(record: &MeasurementRecord, metric: Metric) -> f64 {
    match metric {
        Metric::Vmaf => record.vmaf,
        Metric::Psnr => record.psnr,
        Metric::Ssim => record.ssim,
    }
}

#[allow(clippy::as_conversions)]
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn group_curves(table: &ResultTable, metric: Metric) -> ClipCurves {
    let mut curves = ClipCurves::new();

    for record in table.records() {
        let key = match parse_variant_filename(&record.clip) {
            Ok(key) => key,
            Err(err) => {
                warn!("Could not parse bitrate from {}: {err:#}", record.clip);
                continue;
            }
        };

        curves
            .entry(key.base)
            .or_default()
            .entry(record.codec.clone())
            .or_default()
            .push((
                key.bits_per_second as f64 / 1_000_000.0,
                metric_value(record, metric),
            ));
    }

    for codecs in curves.values_mut() {
        for curve in codecs.values_mut() {
            curve.sort_by(|(a, _), (b, _)| a.total_cmp(b));
        }
    }

    curves
}

fn axis_ranges(
    curves: &BTreeMap<String, Curve>,
    metric: Metric,
) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let points = curves.values().flatten();

    let max_bitrate = points
        .clone()
        .map(|&(bitrate, _score)| bitrate)
        .fold(0.0_f64, f64::max);

    let max_score = points
        .map(|&(_bitrate, score)| score)
        .fold(0.0_f64, f64::max);

    let y_range = match metric {
        Metric::Vmaf => 0.0..100.0,
        Metric::Ssim => 0.0..1.0,
        Metric::Psnr => 0.0..(max_score * 1.1).max(1.0),
    };

    (0.0..(max_bitrate * 1.1).max(1.0), y_range)
}

pub fn generate_rate_quality_chart(
    path: &Path,
    clip: &str,
    metric: Metric,
    curves: &BTreeMap<String, Curve>,
) -> anyhow::Result<()> {
    let root = SVGBackend::new(path, (600, 400)).into_drawing_area();

    root.fill(&WHITE)
        .with_context(|| format!("Unable to fill chart background for {path:?}"))?;

    let (x_range, y_range) = axis_ranges(curves, metric);

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("{} vs Bitrate - {clip}", metric.name()),
            ("sans-serif", 20),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range, y_range)
        .context("Unable to build chart coordinate system")?;

    chart
        .configure_mesh()
        .x_desc("Bitrate (Mbps)")
        .y_desc(metric.description())
        .draw()
        .context("Unable to draw chart mesh")?;

    for (index, (codec, curve)) in curves.iter().enumerate() {
        let color = Palette99::pick(index).mix(1.0);

        chart
            .draw_series(
                LineSeries::new(
                    curve.iter().copied(),
                    color.stroke_width(2),
                )
                .point_size(3),
            )
            .with_context(|| format!("Unable to draw {codec} series"))?
            .label(codec.to_uppercase())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .context("Unable to draw chart legend")?;

    root.present()
        .with_context(|| format!("Unable to write chart {path:?}"))?;

    Ok(())
}

/// Writes one chart per clip base name and returns their paths.
pub fn plot(config: &Config) -> anyhow::Result<Vec<PathBuf>> {
    let summary_path = config.summary_path();

    let table = ResultTable::read(&summary_path)
        .with_context(|| format!("Unable to load summary table {summary_path:?}"))?;

    verify_directory(&config.plots_directory).with_context(|| {
        format!(
            "Unable to verify plots directory {:?}",
            config.plots_directory
        )
    })?;

    let mut outputs = vec![];

    for (clip, curves) in group_curves(&table, config.plot_metric) {
        let path = config
            .plots_directory
            .join(format!("{clip}_{}.svg", config.plot_metric));

        generate_rate_quality_chart(&path, &clip, config.plot_metric, &curves)
            .with_context(|| format!("Unable to generate chart for {clip}"))?;

        info!("Wrote {path:?}");
        outputs.push(path);
    }

    Ok(outputs)
}
