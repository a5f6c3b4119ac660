use std::path::Path;
use std::process::Command;

use rxevm::vm::SlotType;
use rxevm::vm::asm::{CodeBuilder, ImageBuilder};
use tempfile::TempDir;

fn run_rxevm(dir: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_rxevm"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute rxevm");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn write_image(dir: &TempDir, name: &str, b: &ImageBuilder) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, b.build().to_bytes()).unwrap();
    path.to_str().unwrap().to_string()
}

fn assert_success(dir: &TempDir, args: &[&str]) -> String {
    let (stdout, stderr, success) = run_rxevm(dir.path(), args);
    assert!(success, "rxevm should succeed, stderr:\n{}", stderr);
    stdout
}

fn assert_failure(dir: &TempDir, args: &[&str]) -> String {
    let (_, stderr, success) = run_rxevm(dir.path(), args);
    assert!(!success, "rxevm should fail");
    stderr
}

/// `r2 = r0 + r1; STOP`
fn add_program() -> ImageBuilder {
    let mut b = ImageBuilder::new();
    let r0 = b.zeroed(SlotType::SLong);
    let r1 = b.zeroed(SlotType::SLong);
    let r2 = b.zeroed(SlotType::SLong);
    let mut code = CodeBuilder::new();
    code.set(r0, 5).set(r1, 3).add(r2, r0, r1).stop();
    b.clump(&code, &[]);
    b
}

#[test]
fn test_run_human_report() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_image(&dir, "add.rxe", &add_program());

    let stdout = assert_success(&dir, &["run", &file]);
    assert!(stdout.contains("outcome: stopped at pc 10"), "{stdout}");
    assert!(stdout.contains("steps: 4"), "{stdout}");
    assert!(stdout.contains("diagnostics: none"), "{stdout}");
}

#[test]
fn test_run_json_with_memory() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_image(&dir, "add.rxe", &add_program());

    let stdout = assert_success(&dir, &["run", &file, "--format", "json", "--dump-memory"]);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["outcome"], "stopped");
    assert_eq!(report["status"], "halted");
    let scalars = report["memory"]["scalars"].as_array().unwrap();
    assert!(scalars.iter().any(|s| s["value"] == 8));
}

#[test]
fn test_run_invalid_opcode_fails() {
    let mut b = ImageBuilder::new();
    let mut code = CodeBuilder::new();
    code.raw(&[0x2010]);
    b.clump(&code, &[]);
    let dir = tempfile::tempdir().unwrap();
    let file = write_image(&dir, "bad.rxe", &b);

    let stderr = assert_failure(&dir, &["run", &file]);
    assert!(stderr.contains("invalid long opcode 0x10"), "{stderr}");
}

#[test]
fn test_run_corrupt_image_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.rxe");
    std::fs::write(&path, b"NotAnNxtProgram!").unwrap();

    let stderr = assert_failure(&dir, &["run", path.to_str().unwrap()]);
    assert!(stderr.contains("corrupt image"), "{stderr}");
}

#[test]
fn test_run_step_limit_and_simulated_clock() {
    // Loop forever, waiting a minute per iteration.
    let mut b = ImageBuilder::new();
    let minute = b.scalar(SlotType::ULong, 60_000);
    let mut code = CodeBuilder::new();
    code.wait(minute).jmp(-3);
    b.clump(&code, &[]);
    let dir = tempfile::tempdir().unwrap();
    let file = write_image(&dir, "loop.rxe", &b);

    let stdout = assert_success(
        &dir,
        &["run", &file, "--simulated-clock", "--max-steps", "100"],
    );
    assert!(stdout.contains("outcome: step limit reached"), "{stdout}");
    assert!(stdout.contains("steps: 100"), "{stdout}");
}

#[test]
fn test_run_config_file() {
    let mut b = ImageBuilder::new();
    let light = b.zeroed(SlotType::SLong);
    let port = b.scalar(SlotType::UByte, 2);
    let mut code = CodeBuilder::new();
    code.getin(light, port, rxevm::host::IO_IN_SCALED_VAL)
        .setout(port, &[(rxevm::host::IO_OUT_SPEED, light)]);
    b.clump(&code, &[]);
    let dir = tempfile::tempdir().unwrap();
    let file = write_image(&dir, "light.rxe", &b);
    let config = dir.path().join("rxevm.toml");
    std::fs::write(&config, "clock = \"simulated\"\nsensors = [0.0, 0.0, 0.6, 0.0]\n").unwrap();

    let stdout = assert_success(
        &dir,
        &["run", &file, "--config", config.to_str().unwrap(), "--format", "json"],
    );
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["outcome"], "finished");
    let events = report["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "set_output");
    assert_eq!(events[0]["port"], 2);
    assert_eq!(events[0]["value"], 60);
}

#[test]
fn test_run_bad_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_image(&dir, "add.rxe", &add_program());
    let config = dir.path().join("rxevm.toml");
    std::fs::write(&config, "clock = 3").unwrap();

    let stderr = assert_failure(&dir, &["run", &file, "--config", config.to_str().unwrap()]);
    assert!(stderr.contains("failed to parse"), "{stderr}");
}

#[test]
fn test_unsupported_opcode_is_diagnosed() {
    let mut b = ImageBuilder::new();
    let mut code = CodeBuilder::new();
    code.op(rxevm::vm::Opcode::NumToString, 0, &[0, 0]).stop();
    b.clump(&code, &[]);
    let dir = tempfile::tempdir().unwrap();
    let file = write_image(&dir, "str.rxe", &b);

    let (stdout, stderr, success) = run_rxevm(dir.path(), &["run", &file]);
    assert!(success, "stderr:\n{stderr}");
    assert!(stdout.contains("pc 0: ignored NUMTOSTRING"), "{stdout}");
    assert!(stderr.contains("ignored NUMTOSTRING"), "{stderr}");
}

#[test]
fn test_dump_human() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_image(&dir, "add.rxe", &add_program());

    let stdout = assert_success(&dir, &["dump", &file]);
    assert!(stdout.contains("== Header =="));
    assert!(stdout.contains("== Clumps =="));
    assert!(stdout.contains("0000: SET r0, #5"), "{stdout}");
    assert!(stdout.contains("0006: ADD r2, r0, r1"), "{stdout}");
}

#[test]
fn test_dump_json() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_image(&dir, "add.rxe", &add_program());

    let stdout = assert_success(&dir, &["dump", &file, "--format", "json"]);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["version"], 5);
    assert_eq!(report["entries"].as_array().unwrap().len(), 3);
    assert_eq!(report["instructions"][3]["opcode"], "STOP");
}
