use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::util::verify_filename;

pub const HEADER: [&str; 5] = ["Clip", "Codec", "VMAF", "PSNR", "SSIM"];

/// Scores for one encoded variant. Unmeasurable metrics hold [`crate::extract::MISSING_SCORE`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Encoded file name, e.g. `football_4k_1M.mp4`.
    #[serde(rename = "Clip")]
    pub clip: String,

    #[serde(rename = "Codec")]
    pub codec: String,

    #[serde(rename = "VMAF")]
    pub vmaf: f64,

    #[serde(rename = "PSNR")]
    pub psnr: f64,

    #[serde(rename = "SSIM")]
    pub ssim: f64,
}

/// Ordered measurements of one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultTable {
    records: Vec<MeasurementRecord>,
}

/// Any failure other than absence is reported as a lock: Windows sharing violations carry no
/// portable error kind.
fn locked_error(err: io::Error, path: &Path, action: &str) -> anyhow::Error {
    anyhow::Error::new(err).context(format!(
        "Unable to {action} {path:?} because it is locked or read-only. Close it if it is open in another program (e.g. a spreadsheet), then re-run."
    ))
}

impl ResultTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { records: vec![] }
    }

    pub fn push(&mut self, record: MeasurementRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[MeasurementRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Deletes any previous table at `path`, failing if it cannot be removed.
    pub fn remove_existing(path: &Path) -> anyhow::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(locked_error(err, path, "remove")),
        }
    }

    /// Replaces the table at `path` with this one, header first.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        verify_filename(path)
            .with_context(|| format!("Unable to verify summary table path {path:?}"))?;

        Self::remove_existing(path)?;

        let file = File::create(path).map_err(|err| locked_error(err, path, "create"))?;

        let mut writer = csv::Writer::from_writer(file);

        writer
            .write_record(HEADER)
            .with_context(|| format!("Unable to write header to {path:?}"))?;

        for record in &self.records {
            writer
                .write_record([
                    record.clip.clone(),
                    record.codec.clone(),
                    record.vmaf.to_string(),
                    record.psnr.to_string(),
                    record.ssim.to_string(),
                ])
                .with_context(|| format!("Unable to write {} to {path:?}", record.clip))?;
        }

        let file = writer
            .into_inner()
            .map_err(|err| anyhow!("Unable to flush {path:?}: {}", err.error()))?;

        file.sync_all()
            .with_context(|| format!("Unable to sync {path:?}"))?;

        Ok(())
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Unable to open summary table {path:?}"))?;

        let headers = reader
            .headers()
            .with_context(|| format!("Unable to read header of {path:?}"))?;

        if headers.iter().ne(HEADER) {
            return Err(anyhow!(
                "{path:?} has header {:?}, expected {}",
                headers,
                HEADER.join(",")
            ));
        }

        let records = reader
            .deserialize()
            .collect::<Result<Vec<MeasurementRecord>, _>>()
            .with_context(|| format!("Unable to parse rows of {path:?}"))?;

        Ok(Self { records })
    }
}

impl FromIterator<MeasurementRecord> for ResultTable {
    fn from_iter<I: IntoIterator<Item = MeasurementRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(clip: &str, codec: &str, vmaf: f64) -> MeasurementRecord {
        MeasurementRecord {
            clip: clip.to_owned(),
            codec: codec.to_owned(),
            vmaf,
            psnr: 41.5,
            ssim: 0.985,
        }
    }

    #[test]
    fn writes_header_and_rows_in_order() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("metrics").join("summary.csv");

        let table: ResultTable = [
            record("football_4k_1M.mp4", "h264", 87.5),
            record("football_4k_2M.mp4", "h264", 90.0),
        ]
        .into_iter()
        .collect();

        table.write(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Clip,Codec,VMAF,PSNR,SSIM\n\
             football_4k_1M.mp4,h264,87.5,41.5,0.985\n\
             football_4k_2M.mp4,h264,90,41.5,0.985\n"
        );
    }

    #[test]
    fn empty_table_still_has_header() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("summary.csv");

        ResultTable::new().write(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "Clip,Codec,VMAF,PSNR,SSIM\n");
    }

    #[test]
    fn previous_table_is_replaced() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("summary.csv");

        fs::write(&path, "stale contents that are much longer than the new table\n".repeat(8))
            .unwrap();

        let mut table = ResultTable::new();
        table.push(record("clip_1M.mp4", "av1", 70.25));
        table.write(&path).unwrap();
        table.write(&path).unwrap();

        assert_eq!(ResultTable::read(&path).unwrap(), table);
    }

    #[test]
    fn unexpected_header_is_rejected() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("summary.csv");

        fs::write(&path, "Clip,Codec,Score\nclip_1M.mp4,av1,1\n").unwrap();

        assert!(ResultTable::read(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn locked_table_is_fatal_with_instructions() {
        use std::os::unix::fs::PermissionsExt;

        let directory = tempfile::tempdir().unwrap();
        let metrics = directory.path().join("metrics");
        let path = metrics.join("summary.csv");

        ResultTable::new().write(&path).unwrap();
        fs::set_permissions(&metrics, fs::Permissions::from_mode(0o555)).unwrap();

        // Permission bits do not bind root.
        if fs::write(metrics.join("writable"), "").is_ok() {
            fs::set_permissions(&metrics, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let removal = ResultTable::remove_existing(&path).unwrap_err();
        let rewrite = ResultTable::new().write(&path).unwrap_err();

        fs::set_permissions(&metrics, fs::Permissions::from_mode(0o755)).unwrap();

        for error in [removal, rewrite] {
            let message = format!("{error:#}");

            assert!(message.contains("locked or read-only"), "{message}");
            assert!(message.contains("then re-run"), "{message}");
        }

        assert!(path.exists());
    }

    #[test]
    fn missing_table_is_not_an_error_to_remove() {
        let directory = tempfile::tempdir().unwrap();

        ResultTable::remove_existing(&directory.path().join("summary.csv")).unwrap();
    }
}
