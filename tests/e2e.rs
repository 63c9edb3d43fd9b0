//! End-to-end tests that run the built binary against code files.

use std::io::Write;
use std::process::Command;

fn run_ferrite(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_ferrite"))
        .args(args)
        .output()
        .expect("failed to execute ferrite");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();

    (stdout, stderr, success)
}

fn code_file(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_disasm_simple_code() {
    // mov eax, 2Ah; ret
    let file = code_file(&[0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3]);
    let (stdout, stderr, success) = run_ferrite(&["disasm", file.path().to_str().unwrap()]);
    assert!(success, "disasm should succeed, stderr:\n{}", stderr);
    assert!(stdout.contains("mov"));
    assert!(stdout.contains("eax, 2Ah"));
    assert!(stdout.contains("ret"));
}

#[test]
fn test_disasm_honors_start_address() {
    // jmp short back to the start
    let file = code_file(&[0x90, 0xeb, 0xfd]);
    let (stdout, _, success) = run_ferrite(&[
        "disasm",
        file.path().to_str().unwrap(),
        "--address",
        "4096",
    ]);
    assert!(success);
    assert!(stdout.contains("00001000"));
}

#[test]
fn test_disasm_rejects_unknown_opcode() {
    let file = code_file(&[0x90, 0x0f, 0x0b]);
    let (stdout, stderr, success) = run_ferrite(&["disasm", file.path().to_str().unwrap()]);
    assert!(!success, "unknown opcode must fail");
    // The valid prefix of the code is still printed.
    assert!(stdout.contains("nop"));
    assert!(stderr.contains("unknown opcode"));
}

#[test]
fn test_disasm_rejects_truncated_instruction() {
    // mov eax, imm32 cut short after one immediate byte
    let file = code_file(&[0x90, 0xb8, 0x2a]);
    let (stdout, stderr, success) = run_ferrite(&["disasm", file.path().to_str().unwrap()]);
    assert!(!success, "truncated code must fail");
    // The valid prefix of the code is still printed.
    assert!(stdout.contains("nop"));
    assert!(stderr.contains("truncated instruction"));
}

#[test]
fn test_disasm_missing_file() {
    let (_, stderr, success) = run_ferrite(&["disasm", "/nonexistent/code.bin"]);
    assert!(!success);
    assert!(stderr.contains("cannot read"));
}

#[test]
fn test_dump_prints_all_bytes() {
    let file = code_file(&[0xde, 0xad, 0xbe, 0xef]);
    let (stdout, _, success) = run_ferrite(&["dump", file.path().to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("DE"));
    assert!(stdout.contains("EF"));
}

#[test]
fn test_empty_file_is_an_error() {
    let file = code_file(&[]);
    let (_, stderr, success) = run_ferrite(&["disasm", file.path().to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("empty"));
}
