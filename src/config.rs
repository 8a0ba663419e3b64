use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use number_prefix::NumberPrefix;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum Codec {
    H264,
    Hevc,
    Av1,
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::H264 => write!(f, "h264"),
            Self::Hevc => write!(f, "hevc"),
            Self::Av1 => write!(f, "av1"),
        }
    }
}

impl Codec {
    #[must_use]
    pub const fn encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Hevc => "libx265",
            Self::Av1 => "libsvtav1",
        }
    }

    #[must_use]
    pub const fn preset(&self) -> &'static str {
        match self {
            Self::H264 | Self::Hevc => "medium",
            Self::Av1 => "7",
        }
    }

    /// Number of sequential encoder invocations needed for one variant.
    #[must_use]
    pub const fn passes(&self) -> usize {
        match self {
            Self::H264 | Self::Hevc => 2,
            Self::Av1 => 1,
        }
    }

    #[must_use]
    pub fn base_arguments(&self) -> Vec<String> {
        let mut arguments = vec![
            "-c:v".to_owned(),
            self.encoder().to_owned(),
            "-preset".to_owned(),
            self.preset().to_owned(),
        ];

        // Rate Control Arguments
        match self {
            Self::Av1 => {
                arguments.push("-rc".to_owned());
                arguments.push("1".to_owned());
            }
            Self::H264 | Self::Hevc => {}
        }

        arguments
    }

    #[must_use]
    pub fn arguments(
        &self,
        bitrate: &Bitrate,
        pass: Option<usize>,
        pass_log: Option<&Path>,
    ) -> Vec<String> {
        // Base Arguments
        let mut arguments = self.base_arguments();

        // Quality Arguments
        arguments.push("-b:v".to_owned());
        arguments.push(bitrate.label().to_owned());

        // Pass Arguments
        if let Some(pass) = pass {
            if let Some(pass_log) = pass_log {
                match self {
                    Self::Hevc => {
                        arguments.push("-x265-params".to_owned());
                        arguments.push(format!(
                            "pass={pass}:stats={}",
                            pass_log.to_string_lossy()
                        ));
                    }
                    Self::H264 | Self::Av1 => {
                        arguments.push("-pass".to_owned());
                        arguments.push(format!("{pass}"));
                        arguments.push("-passlogfile".to_owned());
                        arguments.push(pass_log.to_string_lossy().to_string());
                    }
                }
            }
        }

        arguments
    }
}

/// A target rate label as understood by the encoder, such as `1M` or `500K`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bitrate {
    label: String,
    bits_per_second: u64,
}

impl Bitrate {
    pub fn parse(label: &str) -> anyhow::Result<Self> {
        let label = label.trim();

        let (digits, multiplier) = match label.char_indices().last() {
            Some((index, 'K' | 'k')) => (label.get(..index), 1_000),
            Some((index, 'M' | 'm')) => (label.get(..index), 1_000_000),
            Some((index, 'G' | 'g')) => (label.get(..index), 1_000_000_000),
            Some(_) => (Some(label), 1),
            None => return Err(anyhow!("Bitrate label is empty")),
        };

        let value: u64 = digits
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| anyhow!("Bitrate label '{label}' is not of the form <digits>[K|M|G]"))?
            .parse()
            .with_context(|| format!("Unable to parse bitrate label '{label}'"))?;

        let bits_per_second = value
            .checked_mul(multiplier)
            .ok_or_else(|| anyhow!("Bitrate label '{label}' is out of range"))?;

        Ok(Self {
            label: label.to_owned(),
            bits_per_second,
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn bits_per_second(&self) -> u64 {
        self.bits_per_second
    }
}

impl std::fmt::Display for Bitrate {
    #[allow(clippy::as_conversions)]
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match NumberPrefix::decimal(self.bits_per_second as f64) {
            NumberPrefix::Standalone(bits) => write!(f, "{bits:.0} bps"),
            NumberPrefix::Prefixed(prefix, value) => write!(f, "{value:.1} {prefix}bps"),
        }
    }
}

fn parse_bitrate(label: &str) -> Result<Bitrate, String> {
    Bitrate::parse(label).map_err(|err| format!("{err:#}"))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn parse_resolution(value: &str) -> Result<Resolution, String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Resolution '{value}' is not of the form WIDTHxHEIGHT"))?;

    let width = width
        .parse()
        .map_err(|err| format!("Invalid width in '{value}': {err}"))?;
    let height = height
        .parse()
        .map_err(|err| format!("Invalid height in '{value}': {err}"))?;

    Ok(Resolution { width, height })
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Metric {
    Vmaf,
    Psnr,
    Ssim,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Vmaf => write!(f, "vmaf"),
            Self::Psnr => write!(f, "psnr"),
            Self::Ssim => write!(f, "ssim"),
        }
    }
}

impl Metric {
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Vmaf => "VMAF Score",
            Self::Psnr => "PSNR (dB)",
            Self::Ssim => "SSIM",
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Vmaf => "VMAF",
            Self::Psnr => "PSNR",
            Self::Ssim => "SSIM",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum Stage {
    /// Encode every source clip with every codec and bitrate
    Encode,

    /// Measure every encoded clip against its reference and write the summary table
    Measure,

    /// Plot rate-quality curves from the summary table
    Plot,

    /// Run encode, measure and plot in sequence
    All,
}

#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub stage: Option<Stage>,

    /// Directory holding the reference clips
    #[arg(long, default_value = "Clips", global = true)]
    pub source_directory: PathBuf,

    /// Directory receiving one subdirectory of encodes per codec
    #[arg(long, default_value = "encoded_clips", global = true)]
    pub encoded_directory: PathBuf,

    /// Directory receiving metric logs and the summary table
    #[arg(long, default_value = "metrics", global = true)]
    pub metrics_directory: PathBuf,

    /// Directory receiving the rate-quality charts
    #[arg(long, default_value = "plots", global = true)]
    pub plots_directory: PathBuf,

    /// FFmpeg executable to invoke
    #[arg(long, default_value = "ffmpeg", global = true)]
    pub ffmpeg: PathBuf,

    /// Codecs to encode with
    #[arg(long = "codec", value_enum, value_delimiter = ',', default_values_t = [Codec::H264, Codec::Hevc, Codec::Av1], global = true)]
    pub codecs: Vec<Codec>,

    /// Target bitrates, as rate labels understood by FFmpeg
    #[arg(long = "bitrate", value_parser = parse_bitrate, value_delimiter = ',', default_values = ["1M", "2M", "4M"], global = true)]
    pub bitrates: Vec<Bitrate>,

    /// Container extension of source and encoded clips
    #[arg(long, default_value = "mp4", global = true)]
    pub extension: String,

    /// Common resolution both clips are scaled to before VMAF is computed
    #[arg(long, value_parser = parse_resolution, default_value = "1920x1080", global = true)]
    pub scale: Resolution,

    /// Re-encode variants whose output already exists
    #[arg(long, global = true)]
    pub force: bool,

    /// Metric plotted against bitrate
    #[arg(long, value_enum, default_value_t = Metric::Vmaf, global = true)]
    pub plot_metric: Metric,
}

impl Config {
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage.unwrap_or(Stage::All)
    }

    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.metrics_directory.join("summary.csv")
    }

    #[must_use]
    pub fn codec_directory(&self, codec: Codec) -> PathBuf {
        self.encoded_directory.join(codec.to_string())
    }

    /// Deterministic location of an encoded variant: `{codec}/{clip}_{bitrate}.{ext}`.
    #[must_use]
    pub fn variant_path(&self, clip: &str, codec: Codec, bitrate: &Bitrate) -> PathBuf {
        self.codec_directory(codec)
            .join(format!("{clip}_{}.{}", bitrate.label(), self.extension))
    }

    #[must_use]
    pub fn reference_path(&self, clip: &str) -> PathBuf {
        self.source_directory
            .join(format!("{clip}.{}", self.extension))
    }

    /// Returns true when `path` carries the configured clip extension, ignoring case.
    #[must_use]
    pub fn has_clip_extension(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case(self.extension.as_str()))
    }
}
