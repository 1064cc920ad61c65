use std::process::Command;

fn matte_bin() -> String {
    std::env::var("CARGO_BIN_EXE_matte").unwrap_or_else(|_| {
        std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../target/debug/matte")
            .to_string_lossy()
            .to_string()
    })
}

#[test]
fn dry_run_stdout_is_pure_json() {
    let output = Command::new(matte_bin())
        .args(["render", "--dry-run", "--frames", "4"])
        .env("RUST_LOG", "info")
        .output()
        .expect("failed to spawn matte render");

    assert!(output.status.success(), "render failed: {:?}", output.status);

    let stdout = String::from_utf8(output.stdout).expect("stdout not utf-8");
    let stderr = String::from_utf8(output.stderr).expect("stderr not utf-8");

    assert!(
        !stdout.contains("session finished"),
        "stdout contaminated with log text: {stdout}"
    );

    let value: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout is not valid JSON");
    assert_eq!(value["frames"], 4);
    assert_eq!(value["presented"], 4);
    assert_eq!(value["completed"], 4);

    assert!(
        stderr.contains("session finished"),
        "expected session log in stderr, got: {stderr}"
    );
}

#[test]
fn zero_frames_is_rejected() {
    let output = Command::new(matte_bin())
        .args(["render", "--dry-run", "--frames", "0"])
        .output()
        .expect("failed to spawn matte render");

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("stderr not utf-8");
    assert!(stderr.contains("--frames must be at least 1"), "{stderr}");
}
