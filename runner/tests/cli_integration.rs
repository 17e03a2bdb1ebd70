use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const EX_USAGE: i32 = 64;

fn sandbox_tests_enabled() -> bool {
    cfg!(target_os = "macos") && env::var("SBX_SANDBOX_TESTS").ok().as_deref() == Some("1")
}

fn runner_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_metadata-runner"))
}

fn extract_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dsc-extract"))
}

fn run_runner(args: &[&str]) -> Output {
    Command::new(runner_bin())
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to run metadata-runner: {err}"))
}

fn run_extract(args: &[&str], bundle_override: Option<&Path>) -> Output {
    let mut cmd = Command::new(extract_bin());
    cmd.args(args);
    if let Some(bundle) = bundle_override {
        cmd.env("DSC_EXTRACTOR_BUNDLE", bundle);
    }
    cmd.output()
        .unwrap_or_else(|err| panic!("failed to run dsc-extract: {err}"))
}

fn parse_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("failed to parse JSON output: {err}\nstdout:\n{stdout}"))
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

#[test]
fn usage_errors_exit_64_without_json() {
    let cases: &[&[&str]] = &[
        &[],
        &["--op", "file-read-metadata", "--path", "/tmp"],
        &["--sbpl", "/tmp/p.sb", "--path", "/tmp"],
        &["--sbpl", "/tmp/p.sb", "--op", "file-read-metadata"],
        &["--sbpl", "/tmp/p.sb", "--op", "file-exec", "--path", "/tmp"],
        &["--sbpl", "/tmp/p.sb", "--op", "file-write*", "--path", "/tmp", "--chmod-mode", "abc"],
        &["--sbpl"],
    ];
    for args in cases {
        let out = run_runner(args);
        assert_eq!(out.status.code(), Some(EX_USAGE), "args: {args:?}");
        assert!(out.stdout.is_empty(), "no JSON expected for {args:?}");
        assert!(stderr_text(&out).contains("usage:"), "args: {args:?}");
    }
}

#[test]
fn help_prints_usage_and_succeeds() {
    let out = run_runner(&["--help"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(out.stdout.is_empty());
    assert!(stderr_text(&out).contains("metadata-runner"));
}

#[test]
fn unreadable_sbpl_reports_apply_failed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = write_file(dir.path(), "target", b"x");
    std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o644)).unwrap();
    let missing = dir.path().join("missing.sb");

    let out = run_runner(&[
        "--sbpl",
        missing.to_str().unwrap(),
        "--op",
        "file-write*",
        "--path",
        target.to_str().unwrap(),
        "--chmod-mode",
        "600",
    ]);
    assert_eq!(out.status.code(), Some(0));
    let json = parse_json(&out);
    assert_eq!(json["status"], "apply_failed");
    assert_eq!(json["syscall"], "chmod");
    assert_eq!(json["op"], "file-write*");
    assert!(json["errno"].is_null());
    assert_eq!(json["message"], "sandbox apply rc -2");
    assert_eq!(json["apply"]["rc"], -2);
    assert_eq!(json["apply"]["mode"], "sbpl");
    assert_eq!(json["apply"]["message"], "failed to read sbpl");
    assert_eq!(json["apply"]["errno_name"], "ENOENT");

    let mode = std::fs::metadata(&target).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644, "operation must not run after apply failure");
}

#[test]
fn failures_are_reported_only_in_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = Command::new(runner_bin())
        .args([
            "--sbpl",
            dir.path().join("missing.sb").to_str().unwrap(),
            "--op",
            "file-read-metadata",
            "--path",
            "/",
        ])
        .env_remove("SBX_RUNNER_LOG")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|err| panic!("failed to run metadata-runner: {err}"));
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(parse_json(&out)["status"], "apply_failed");
    assert!(out.stderr.is_empty(), "stderr: {}", stderr_text(&out));
}

#[test]
fn malformed_blob_reports_apply_failed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blob = write_file(dir.path(), "garbage.sb.bin", b"not a compiled profile");

    let out = run_runner(&[
        "--blob",
        blob.to_str().unwrap(),
        "--op",
        "file-read-metadata",
        "--path",
        "/",
        "--attr-payload",
        "file-size",
    ]);
    assert_eq!(out.status.code(), Some(0));
    let json = parse_json(&out);
    assert_eq!(json["status"], "apply_failed");
    assert_eq!(json["syscall"], "lstat");
    assert_eq!(json["attr_payload"], "file-size");
    assert_eq!(json["apply"]["mode"], "blob");
    assert_ne!(json["apply"]["rc"], 0);
}

#[test]
fn output_keys_are_sorted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = run_runner(&[
        "--sbpl",
        dir.path().join("missing.sb").to_str().unwrap(),
        "--op",
        "file-read-metadata",
        "--path",
        "/",
    ]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.ends_with("}\n"));
    let apply = stdout.find("\"apply\"").unwrap();
    let attr = stdout.find("\"attr_payload\"").unwrap();
    let syscall = stdout.find("\"syscall\"").unwrap();
    assert!(apply < attr && attr < syscall, "{stdout}");
}

#[test]
fn sandboxed_metadata_calls_classify_outcomes() {
    if !sandbox_tests_enabled() {
        eprintln!("skipping: set SBX_SANDBOX_TESTS=1 on macOS to run");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let profile = write_file(dir.path(), "allow.sb", b"(version 1)\n(allow default)\n");
    let target = write_file(dir.path(), "target", b"x");
    let missing = dir.path().join("missing");

    let cases = [
        ("file-read-metadata", "lstat"),
        ("file-read-metadata", "fstat"),
        ("file-read-metadata", "getattrlist"),
        ("file-write*", "chmod"),
        ("file-write*", "fchmod"),
        ("file-write*", "utimes"),
        ("file-write*", "futimes"),
        ("file-write*", "lutimes"),
        ("file-write*", "lchown"),
        ("file-write*", "fchown"),
        ("file-write*", "fchownat"),
    ];
    for (op, syscall) in cases {
        let ok = run_runner(&[
            "--sbpl",
            profile.to_str().unwrap(),
            "--op",
            op,
            "--path",
            target.to_str().unwrap(),
            "--syscall",
            syscall,
        ]);
        assert_eq!(ok.status.code(), Some(0));
        let json = parse_json(&ok);
        assert_eq!(json["status"], "ok", "{op} {syscall}: {json}");
        assert!(json["errno"].is_null());
        assert_eq!(json["apply"]["rc"], 0);

        let failed = run_runner(&[
            "--sbpl",
            profile.to_str().unwrap(),
            "--op",
            op,
            "--path",
            missing.to_str().unwrap(),
            "--syscall",
            syscall,
        ]);
        let json = parse_json(&failed);
        assert_eq!(json["status"], "op_failed", "{op} {syscall}: {json}");
        assert_eq!(json["errno_name"], "ENOENT");
    }

    for (syscall, payload) in [("getattrlist", "file-size"), ("setattrlist", "cmn-times")] {
        for (path, status) in [(&target, "ok"), (&missing, "op_failed")] {
            let out = run_runner(&[
                "--sbpl",
                profile.to_str().unwrap(),
                "--op",
                "file-read-metadata",
                "--path",
                path.to_str().unwrap(),
                "--syscall",
                syscall,
                "--attr-payload",
                payload,
            ]);
            let json = parse_json(&out);
            assert_eq!(json["status"], status, "{syscall} {payload}: {json}");
            assert_eq!(json["attr_payload"], payload);
        }
    }

    let invalid = run_runner(&[
        "--sbpl",
        profile.to_str().unwrap(),
        "--op",
        "file-write*",
        "--path",
        missing.to_str().unwrap(),
        "--syscall",
        "lstat",
    ]);
    let json = parse_json(&invalid);
    assert_eq!(json["status"], "invalid_op");
    assert_eq!(json["message"], "unsupported file-write* syscall lstat");
}

#[test]
fn extractor_rejects_wrong_argument_count() {
    for args in [&[][..], &["only-one"][..], &["a", "b", "c"][..]] {
        let out = run_extract(args, None);
        assert_eq!(out.status.code(), Some(2), "args: {args:?}");
        assert!(stderr_text(&out).contains("usage: dsc-extract"));
    }
}

#[test]
fn extractor_without_bundle_exits_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let absent = dir.path().join("dsc_extractor.bundle");
    let out = run_extract(&["cache", dir.path().to_str().unwrap()], Some(&absent));
    assert_eq!(out.status.code(), Some(1));
    assert!(
        stderr_text(&out).contains("dsc_extractor.bundle not found. Install Xcode if needed."),
        "stderr: {}",
        stderr_text(&out)
    );
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn extractor_rejects_non_bundle_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fake = write_file(dir.path(), "dsc_extractor.bundle", b"not a mach-o");
    let out_dir = dir.path().join("out");
    let out = run_extract(&["cache", out_dir.to_str().unwrap()], Some(&fake));
    assert_eq!(out.status.code(), Some(1));
    assert!(!out_dir.exists());
}

#[test]
fn extractor_propagates_failure_for_missing_cache() {
    let bundle = Path::new("/usr/lib/dsc_extractor.bundle");
    if !sandbox_tests_enabled() || !bundle.exists() {
        eprintln!("skipping: needs SBX_SANDBOX_TESTS=1 and a system dsc_extractor.bundle");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("no-such-cache");
    let out = run_extract(
        &[missing.to_str().unwrap(), dir.path().join("out").to_str().unwrap()],
        Some(bundle),
    );
    assert_ne!(out.status.code(), Some(0));
    assert!(stderr_text(&out).contains("extraction failed rc="));
}
