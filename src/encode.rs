use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{Bitrate, Codec, Config};
use crate::process::{run_checked, Capture, Invocation, Runner};
use crate::util::{create_batch_progress_bar, verify_directory};

const NULL_DEVICE: &str = if cfg!(windows) { "NUL" } else { "/dev/null" };

/// A reference clip found in the source directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clip {
    pub name: String,
    pub path: PathBuf,
}

/// Reference clips in the source directory, in file name order.
pub fn discover_clips(config: &Config) -> anyhow::Result<Vec<Clip>> {
    let mut clips = vec![];

    for entry in WalkDir::new(&config.source_directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| {
            format!(
                "Unable to read source directory {:?}",
                config.source_directory
            )
        })?;

        if !entry.file_type().is_file() || !config.has_clip_extension(entry.path()) {
            continue;
        }

        let Some(name) = entry.path().file_stem().and_then(|stem| stem.to_str()) else {
            warn!("Skipping {:?}: file name is not valid UTF-8", entry.path());
            continue;
        };

        clips.push(Clip {
            name: name.to_owned(),
            path: entry.path().to_path_buf(),
        });
    }

    Ok(clips)
}

fn container_format(extension: &str) -> &str {
    if extension.eq_ignore_ascii_case("mkv") {
        "matroska"
    } else {
        extension
    }
}

/// Files written by an encoder's first pass for the given pass log prefix.
pub fn pass_artifacts(pass_log: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let directory = pass_log
        .parent()
        .ok_or_else(|| anyhow!("Pass log {pass_log:?} has no parent directory"))?;

    let prefix = pass_log
        .file_name()
        .ok_or_else(|| anyhow!("Pass log {pass_log:?} has no file name"))?
        .to_string_lossy()
        .to_string();

    let mut artifacts = vec![];

    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Unable to read directory {directory:?}"))?;

        if entry.file_type().is_file() && entry.file_name().to_string_lossy().starts_with(&prefix) {
            artifacts.push(entry.path().to_path_buf());
        }
    }

    Ok(artifacts)
}

/// Ensures the first pass left its analysis on durable storage before the second pass reads it.
fn sync_pass_artifacts(pass_log: &Path) -> anyhow::Result<()> {
    let artifacts = pass_artifacts(pass_log)?;

    if artifacts.is_empty() {
        return Err(anyhow!(
            "First pass finished but wrote no analysis file for {pass_log:?}"
        ));
    }

    for artifact in artifacts {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&artifact)
            .and_then(|file| file.sync_all())
            .with_context(|| format!("Unable to sync pass analysis file {artifact:?}"))?;
    }

    Ok(())
}

fn remove_pass_artifacts(pass_log: &Path) -> anyhow::Result<()> {
    for artifact in pass_artifacts(pass_log)? {
        fs::remove_file(&artifact)
            .with_context(|| format!("Unable to remove pass analysis file {artifact:?}"))?;
    }

    Ok(())
}

pub struct Encoder<'a> {
    config: &'a Config,
    runner: &'a dyn Runner,
}

impl<'a> Encoder<'a> {
    #[must_use]
    pub fn new(config: &'a Config, runner: &'a dyn Runner) -> Self {
        Self { config, runner }
    }

    /// Encodes every clip with every configured codec and bitrate, in that nesting order.
    pub fn encode(&self) -> anyhow::Result<Vec<PathBuf>> {
        let clips = discover_clips(self.config).context("Unable to discover source clips")?;

        if clips.is_empty() {
            warn!(
                "No *.{} clips found in {:?}",
                self.config.extension, self.config.source_directory
            );
        }

        verify_directory(&self.config.encoded_directory).with_context(|| {
            format!(
                "Unable to verify encoding output directory {:?}",
                self.config.encoded_directory
            )
        })?;

        let progress_bar = create_batch_progress_bar(
            clips.len() * self.config.codecs.len() * self.config.bitrates.len(),
            "Encoding",
        )?;

        let mut outputs = vec![];

        for clip in &clips {
            for &codec in &self.config.codecs {
                for bitrate in &self.config.bitrates {
                    progress_bar.set_message(format!(
                        "{} -> {} @ {bitrate}",
                        clip.name,
                        codec.to_string().to_uppercase()
                    ));

                    outputs.push(self.encode_variant(clip, codec, bitrate).with_context(|| {
                        format!("Unable to encode {} with {codec} at {}", clip.name, bitrate.label())
                    })?);

                    progress_bar.inc(1);
                }
            }
        }

        progress_bar.finish_with_message("done");

        Ok(outputs)
    }

    pub fn encode_variant(
        &self,
        clip: &Clip,
        codec: Codec,
        bitrate: &Bitrate,
    ) -> anyhow::Result<PathBuf> {
        verify_directory(&self.config.codec_directory(codec))
            .with_context(|| format!("Unable to verify {codec} output directory"))?;

        let output_filename = self.config.variant_path(&clip.name, codec, bitrate);

        if output_filename.exists() && !self.config.force {
            info!("Skipping existing encode {output_filename:?}");
            return Ok(output_filename);
        }

        let temporary_output_filename =
            output_filename.with_extension(format!("tmp.{}", self.config.extension));

        if temporary_output_filename.exists() {
            fs::remove_file(&temporary_output_filename).with_context(|| {
                format!("Unable to remove temporary encoding file {temporary_output_filename:?}")
            })?;
        }

        info!(
            "Encoding {} -> {} @ {bitrate}",
            clip.name,
            codec.to_string().to_uppercase()
        );

        if codec.passes() > 1 {
            let pass_log = self
                .config
                .codec_directory(codec)
                .join(format!("{}_{}_log", clip.name, bitrate.label()));

            remove_pass_artifacts(&pass_log).context("Unable to remove stale pass analysis")?;

            let first_pass = Invocation::new(&self.config.ffmpeg, Capture::Discard)
                .args(["-hide_banner", "-y", "-i"])
                .arg(&clip.path)
                .args(codec.arguments(bitrate, Some(1), Some(&pass_log)))
                .args(["-f", container_format(&self.config.extension), NULL_DEVICE]);

            run_checked(self.runner, &first_pass).context("First encoding pass failed")?;

            sync_pass_artifacts(&pass_log)?;

            let second_pass = Invocation::new(&self.config.ffmpeg, Capture::Text)
                .args(["-hide_banner", "-y", "-i"])
                .arg(&clip.path)
                .args(codec.arguments(bitrate, Some(2), Some(&pass_log)))
                .arg(&temporary_output_filename);

            run_checked(self.runner, &second_pass).context("Second encoding pass failed")?;

            remove_pass_artifacts(&pass_log).context("Unable to remove pass analysis")?;
        } else {
            let invocation = Invocation::new(&self.config.ffmpeg, Capture::Text)
                .args(["-hide_banner", "-y", "-i"])
                .arg(&clip.path)
                .args(codec.arguments(bitrate, None, None))
                .arg(&temporary_output_filename);

            run_checked(self.runner, &invocation).context("Encoding failed")?;
        }

        if !temporary_output_filename.exists() {
            return Err(anyhow!(
                "Encoder exited successfully but did not write {temporary_output_filename:?}"
            ));
        }

        fs::rename(&temporary_output_filename, &output_filename).with_context(|| {
            format!("Unable to rename {temporary_output_filename:?} to {output_filename:?}")
        })?;

        Ok(output_filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_format_maps_matroska() {
        assert_eq!(container_format("mkv"), "matroska");
        assert_eq!(container_format("mp4"), "mp4");
    }

    #[test]
    fn pass_artifacts_match_prefix_only() {
        let directory = tempfile::tempdir().unwrap();
        let pass_log = directory.path().join("clip_1M_log");

        fs::write(directory.path().join("clip_1M_log-0.log"), "stats").unwrap();
        fs::write(directory.path().join("clip_1M_log-0.log.mbtree"), "tree").unwrap();
        fs::write(directory.path().join("clip_2M_log-0.log"), "other").unwrap();
        fs::write(directory.path().join("clip_1M.mp4"), "video").unwrap();

        let artifacts = pass_artifacts(&pass_log).unwrap();

        assert_eq!(
            artifacts,
            [
                directory.path().join("clip_1M_log-0.log"),
                directory.path().join("clip_1M_log-0.log.mbtree"),
            ]
        );

        remove_pass_artifacts(&pass_log).unwrap();

        assert!(pass_artifacts(&pass_log).unwrap().is_empty());
        assert!(directory.path().join("clip_2M_log-0.log").exists());
    }

    #[test]
    fn missing_first_pass_analysis_is_fatal() {
        let directory = tempfile::tempdir().unwrap();

        assert!(sync_pass_artifacts(&directory.path().join("clip_1M_log")).is_err());
    }
}
