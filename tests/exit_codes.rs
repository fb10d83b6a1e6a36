use std::process::Command;

#[test]
fn nullspect_exits_non_zero_on_missing_input() {
    let output = Command::new(env!("CARGO_BIN_EXE_nullspect"))
        .arg("--input")
        .arg("missing-program.json")
        .output()
        .expect("run nullspect");

    assert!(!output.status.success());
}

#[test]
fn nullspect_exits_non_zero_on_malformed_input() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").expect("write fixture");

    let output = Command::new(env!("CARGO_BIN_EXE_nullspect"))
        .arg("--input")
        .arg(&path)
        .output()
        .expect("run nullspect");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to parse"), "stderr: {stderr}");
}
