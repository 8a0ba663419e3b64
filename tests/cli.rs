use assert_cmd::Command;
use predicates::prelude::*;

fn rate_quality_cmd() -> Command {
    Command::cargo_bin("rate-quality").unwrap()
}

#[test]
fn help_lists_stages() {
    rate_quality_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("encode"))
        .stdout(predicate::str::contains("measure"))
        .stdout(predicate::str::contains("plot"));
}

#[test]
fn rejects_malformed_bitrate() {
    rate_quality_cmd()
        .args(["encode", "--bitrate", "fast"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("fast"));
}

#[test]
fn plot_without_table_fails_with_context() {
    let directory = tempfile::tempdir().unwrap();

    rate_quality_cmd()
        .current_dir(directory.path())
        .arg("plot")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unable to load summary table"));
}

#[test]
fn encode_with_missing_ffmpeg_aborts() {
    let directory = tempfile::tempdir().unwrap();
    std::fs::create_dir(directory.path().join("Clips")).unwrap();
    std::fs::write(directory.path().join("Clips").join("clip.mp4"), "reference").unwrap();

    rate_quality_cmd()
        .current_dir(directory.path())
        .args([
            "encode",
            "--ffmpeg",
            "definitely-not-an-installed-ffmpeg",
            "--codec",
            "av1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unable to encode clip with av1 at 1M"));
}
