use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{RwLock, RwLockReadGuard};
use tempfile::TempDir;

/// Launches hold the read side; writing an executable holds the write side,
/// so no child forked mid-write inherits the open script and hits ETXTBSY.
static LAUNCH: RwLock<()> = RwLock::new(());

fn launch_guard() -> RwLockReadGuard<'static, ()> {
    LAUNCH.read().unwrap_or_else(|e| e.into_inner())
}

fn launch(cmd: &mut Command) -> Output {
    let _guard = launch_guard();
    cmd.output().expect("command runs")
}

fn ffmpeg_available() -> bool {
    let _guard = launch_guard();
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn combined_output(output: &std::process::Output) -> String {
    format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

fn write_log(path: &Path, entries: &[(i64, &str, f64, f64)]) {
    let body = entries
        .iter()
        .map(|(tile, quality, time, duration)| {
            format!(
                r#"{{"tileIndex": {}, "quality": "{}", "time": {}, "duration": {}}}"#,
                tile, quality, time, duration
            )
        })
        .collect::<Vec<_>>()
        .join(",\n  ");
    fs::write(path, format!("[\n  {}\n]\n", body)).expect("write quality log");
}

/// Two segments for every tile, alternating tiers.
fn full_log_entries() -> Vec<(i64, &'static str, f64, f64)> {
    let mut entries = Vec::new();
    for tile in 0..8 {
        entries.push((tile, "low", 0.0, 1.0));
        entries.push((tile, if tile % 2 == 0 { "high" } else { "mid" }, 1.0, 1.0));
    }
    entries
}

fn reconstruct_cmd(root: &Path, ffmpeg: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tile360"));
    cmd.arg("reconstruct")
        .arg("--tile-dir")
        .arg(root.join("tiles"))
        .arg("--output-dir")
        .arg(root.join("segments"))
        .arg("--log-file")
        .arg(root.join("quality_log.json"))
        .arg("--final-video")
        .arg(root.join("final_output.mp4"))
        .arg("--ffmpeg")
        .arg(ffmpeg)
        .arg("--progress")
        .arg("plain");
    cmd
}

#[test]
fn reconstruct_help_lists_layout_flags() {
    let output = launch(
        Command::new(assert_cmd::cargo::cargo_bin!("tile360"))
            .arg("reconstruct")
            .arg("--help"),
    );

    assert!(output.status.success());
    let text = combined_output(&output);
    for flag in [
        "--tile-dir",
        "--output-dir",
        "--log-file",
        "--final-video",
        "--ffmpeg",
        "--dry-run",
        "--progress",
    ] {
        assert!(text.contains(flag), "help text missing {flag}: {text}");
    }
}

#[test]
fn out_of_range_tile_fails_before_any_process_runs() {
    let tmp = TempDir::new().expect("tempdir");
    write_log(
        &tmp.path().join("quality_log.json"),
        &[(0, "low", 0.0, 1.0), (8, "low", 0.0, 1.0)],
    );

    // A missing ffmpeg would fail the -version probe; validation must come first.
    let output = launch(&mut reconstruct_cmd(tmp.path(), Path::new("/nonexistent/ffmpeg")));

    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("quality log entry 1"), "{text}");
    assert!(text.contains("tileIndex 8"), "{text}");
    assert!(!tmp.path().join("segments").exists());
    assert!(!tmp.path().join("final_output.mp4").exists());
}

#[test]
fn unknown_quality_fails_validation() {
    let tmp = TempDir::new().expect("tempdir");
    write_log(
        &tmp.path().join("quality_log.json"),
        &[(0, "ultra", 0.0, 1.0)],
    );

    let output = launch(&mut reconstruct_cmd(tmp.path(), Path::new("/nonexistent/ffmpeg")));

    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("unknown quality \"ultra\""), "{text}");
    assert!(!tmp.path().join("segments").exists());
}

#[test]
fn dry_run_prints_plan_without_writing() {
    let tmp = TempDir::new().expect("tempdir");
    write_log(
        &tmp.path().join("quality_log.json"),
        &[(0, "low", 0.0, 2.0), (0, "high", 5.0, 3.0)],
    );

    let output = launch(
        reconstruct_cmd(tmp.path(), Path::new("/nonexistent/ffmpeg")).arg("--dry-run"),
    );

    assert!(output.status.success(), "{}", combined_output(&output));
    let text = String::from_utf8_lossy(&output.stdout).to_string();
    assert!(text.contains("#   file '0_part0.mp4'"), "{text}");
    assert!(text.contains("#   file '0_part1.mp4'"), "{text}");
    assert!(text.contains("hstack=inputs=4"), "{text}");
    assert!(text.contains("vstack=inputs=2"), "{text}");
    // 2 extractions + 8 concats + 2 rows + 1 frame
    let commands = text.lines().filter(|l| !l.starts_with('#')).count();
    assert_eq!(commands, 13, "{text}");
    assert!(!tmp.path().join("segments").exists());
}

#[cfg(unix)]
mod fake_ffmpeg {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::OnceLock;

    const SCRIPT: &str = r#"#!/bin/sh
printf '%s\n' "$*" >> "$FAKE_FFMPEG_LOG"
case "$1" in -version) exit 0 ;; esac
for last; do :; done
: > "$last"
if [ -n "$FAKE_FFMPEG_FAIL_ON" ]; then
  case "$*" in *"$FAKE_FFMPEG_FAIL_ON"*) echo "simulated failure for $last" >&2; exit 1 ;; esac
fi
"#;

    /// One shared script per test binary, written before any test spawns it.
    fn script() -> &'static Path {
        static DIR: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
        &DIR.get_or_init(|| {
            let _exclusive = LAUNCH.write().unwrap_or_else(|e| e.into_inner());
            let dir = TempDir::new().expect("script dir");
            let path = dir.path().join("ffmpeg");
            fs::write(&path, SCRIPT).expect("write fake ffmpeg");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
            (dir, path)
        })
        .1
    }

    fn calls(log: &Path) -> Vec<String> {
        fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn full_run_writes_manifests_and_final_video() {
        let tmp = TempDir::new().expect("tempdir");
        let calls_log = tmp.path().join("calls.txt");
        write_log(&tmp.path().join("quality_log.json"), &full_log_entries());

        let output =
            launch(reconstruct_cmd(tmp.path(), script()).env("FAKE_FFMPEG_LOG", &calls_log));

        assert!(output.status.success(), "{}", combined_output(&output));
        let text = combined_output(&output);
        assert!(text.contains("Reconstruct summary:"), "{text}");
        assert!(text.contains("steps=27/27"), "{text}");

        let segments = tmp.path().join("segments");
        for tile in 0..8 {
            let manifest = fs::read_to_string(segments.join(format!("{}_concat.txt", tile)))
                .expect("manifest");
            assert_eq!(
                manifest,
                format!("file '{0}_part0.mp4'\nfile '{0}_part1.mp4'\n", tile)
            );
            assert!(segments.join(format!("{}_part1.mp4", tile)).is_file());
            assert!(segments.join(format!("{}_final.mp4", tile)).is_file());
        }
        assert!(tmp.path().join("final_output.mp4").is_file());

        let calls = calls(&calls_log);
        assert_eq!(calls[0], "-version");
        assert_eq!(calls.len(), 1 + 16 + 8 + 2 + 1);
        assert!(calls[1].contains("-ss 0 -t 1 -i"), "{}", calls[1]);
        assert!(calls[1].contains("144p"), "{}", calls[1]);
        assert!(calls[2].contains("480p"), "{}", calls[2]);
        assert!(calls[17].contains("-f concat -safe 0"), "{}", calls[17]);

        let top = &calls[25];
        let order = ["3_final", "2_final", "0_final", "1_final"]
            .iter()
            .map(|n| top.find(n).expect(n))
            .collect::<Vec<_>>();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{top}");
        let bottom = &calls[26];
        let order = ["7_final", "6_final", "4_final", "5_final"]
            .iter()
            .map(|n| bottom.find(n).expect(n))
            .collect::<Vec<_>>();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{bottom}");
        assert!(calls[27].contains("vstack=inputs=2"), "{}", calls[27]);
    }

    #[test]
    fn concat_failure_aborts_without_final_video() {
        let tmp = TempDir::new().expect("tempdir");
        let calls_log = tmp.path().join("calls.txt");
        write_log(&tmp.path().join("quality_log.json"), &full_log_entries());

        let output = launch(
            reconstruct_cmd(tmp.path(), script())
                .env("FAKE_FFMPEG_LOG", &calls_log)
                .env("FAKE_FFMPEG_FAIL_ON", "2_concat.txt"),
        );

        assert!(!output.status.success());
        let text = combined_output(&output);
        assert!(text.contains("was running stage concat (tile 2)"), "{text}");
        assert!(text.contains("simulated failure"), "{text}");
        assert!(!tmp.path().join("final_output.mp4").exists());
        assert!(!tmp.path().join("segments").join("top_row.mp4").exists());

        // -version, 16 extractions, concat for tiles 0..=2
        assert_eq!(calls(&calls_log).len(), 1 + 16 + 3);
    }

    #[test]
    fn frame_failure_leaves_no_partial_final_video() {
        let tmp = TempDir::new().expect("tempdir");
        let calls_log = tmp.path().join("calls.txt");
        write_log(&tmp.path().join("quality_log.json"), &full_log_entries());

        let output = launch(
            reconstruct_cmd(tmp.path(), script())
                .env("FAKE_FFMPEG_LOG", &calls_log)
                .env("FAKE_FFMPEG_FAIL_ON", "vstack"),
        );

        assert!(!output.status.success());
        let text = combined_output(&output);
        assert!(text.contains("was running stage vstack"), "{text}");
        assert!(tmp.path().join("segments").join("bot_row.mp4").is_file());
        assert!(!tmp.path().join("final_output.mp4").exists());
        assert_eq!(calls(&calls_log).len(), 1 + 16 + 8 + 2 + 1);
    }

    #[test]
    fn reruns_produce_identical_manifests() {
        let tmp = TempDir::new().expect("tempdir");
        let calls_log = tmp.path().join("calls.txt");
        write_log(&tmp.path().join("quality_log.json"), &full_log_entries());

        let read_manifests = || {
            (0..8)
                .map(|t| {
                    fs::read(tmp.path().join("segments").join(format!("{}_concat.txt", t)))
                        .expect("manifest")
                })
                .collect::<Vec<_>>()
        };

        let rerun = || {
            let output =
                launch(reconstruct_cmd(tmp.path(), script()).env("FAKE_FFMPEG_LOG", &calls_log));
            assert!(output.status.success(), "{}", combined_output(&output));
        };
        rerun();
        let first = read_manifests();
        rerun();
        assert_eq!(first, read_manifests());
    }
}

fn make_source_tiles(tile_dir: &Path) {
    for folder in ["144p", "360p", "480p"] {
        let dir = tile_dir.join(folder);
        fs::create_dir_all(&dir).expect("mkdir quality folder");
        for tile in 0..8 {
            let _guard = launch_guard();
            let status = std::process::Command::new("ffmpeg")
                .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "lavfi", "-i"])
                .arg("testsrc=size=160x120:rate=30:duration=3")
                .args(["-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p"])
                .arg(dir.join(format!("{}.mp4", tile)))
                .status()
                .expect("generate source tile");
            assert!(status.success(), "ffmpeg could not generate test tiles");
        }
    }
}

#[test]
fn real_ffmpeg_reconstructs_full_frame() {
    if !ffmpeg_available() {
        return;
    }

    let tmp = TempDir::new().expect("tempdir");
    make_source_tiles(&tmp.path().join("tiles"));
    write_log(&tmp.path().join("quality_log.json"), &full_log_entries());

    let output = launch(&mut reconstruct_cmd(tmp.path(), Path::new("ffmpeg")));

    assert!(output.status.success(), "{}", combined_output(&output));
    let text = combined_output(&output);
    assert!(text.contains("[PROGRESS] reconstruct"), "missing plain progress: {text}");
    assert!(text.contains("Reconstruct summary:"), "missing summary: {text}");

    let final_video = tmp.path().join("final_output.mp4");
    assert!(final_video.is_file());
    assert!(fs::metadata(&final_video).expect("stat").len() > 0);
}
