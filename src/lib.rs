use anyhow::Context;

pub mod config;
pub mod encode;
pub mod extract;
pub mod measure;
pub mod naming;
pub mod plot;
pub mod process;
pub mod table;
pub mod util;

use config::Stage;
use process::Runner;

/// Runs the configured stage(s) strictly in sequence: encode, measure, plot.
pub fn run(config: &config::Config, runner: &dyn Runner) -> anyhow::Result<()> {
    let stage = config.stage();

    if matches!(stage, Stage::Encode | Stage::All) {
        encode::Encoder::new(config, runner)
            .encode()
            .context("Failed to encode clips")?;
    }

    if matches!(stage, Stage::Measure | Stage::All) {
        measure::Measurer::new(config, runner)
            .measure()
            .context("Failed to measure encoded clips")?;
    }

    if matches!(stage, Stage::Plot | Stage::All) {
        plot::plot(config).context("Failed to plot results")?;
    }

    Ok(())
}
