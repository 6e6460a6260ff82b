//! Driver tests: the binary against real files, artifacts in a scratch
//! directory, exit codes as the contract says.

use std::process::Command;

fn bin() -> Command {
  Command::new(env!("CARGO_BIN_EXE_lyrec"))
}

#[test]
fn writes_a_c_on_success() {
  let dir = tempfile::tempdir().expect("tempdir");
  let src = dir.path().join("m.ly");
  std::fs::write(&src, "module m function main() { }").expect("write source");
  let out = bin().arg(&src).current_dir(dir.path()).output().expect("run");
  assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
  let artifact = std::fs::read_to_string(dir.path().join("a.c")).expect("a.c written");
  assert!(artifact.contains("int main(void)"));
}

#[test]
fn llvm_backend_writes_a_ll() {
  let dir = tempfile::tempdir().expect("tempdir");
  let src = dir.path().join("m.ly");
  std::fs::write(&src, "module m function main() { }").expect("write source");
  let out = bin().arg(&src).arg("--backend").arg("llvm")
    .current_dir(dir.path()).output().expect("run");
  assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
  let artifact = std::fs::read_to_string(dir.path().join("a.ll")).expect("a.ll written");
  assert!(artifact.contains("define i32 @main()"));
}

#[test]
fn errors_exit_nonzero_and_write_nothing() {
  let dir = tempfile::tempdir().expect("tempdir");
  let src = dir.path().join("m.ly");
  std::fs::write(&src, "module m const a = b; const b = a").expect("write source");
  let out = bin().arg(&src).current_dir(dir.path()).output().expect("run");
  assert!(!out.status.success());
  let stderr = String::from_utf8_lossy(&out.stderr);
  assert!(stderr.contains("error[E0211]"), "{stderr}");
  assert!(stderr.contains("m.ly:1:"), "wire format expects path:line:col: {stderr}");
  assert!(!dir.path().join("a.c").exists());
}

#[test]
fn missing_file_is_fatal() {
  let dir = tempfile::tempdir().expect("tempdir");
  let out = bin().arg("no-such-file.ly").current_dir(dir.path()).output().expect("run");
  assert!(!out.status.success());
  assert!(String::from_utf8_lossy(&out.stderr).contains("error[E0001]"));
}

#[test]
fn print_debug_dumps_ir() {
  let dir = tempfile::tempdir().expect("tempdir");
  let src = dir.path().join("m.ly");
  std::fs::write(&src, "module m function main() { let x = 1 + 2 }").expect("write source");
  let out = bin().arg(&src).arg("--print-debug").current_dir(dir.path()).output().expect("run");
  assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
  let stdout = String::from_utf8_lossy(&out.stdout);
  assert!(stdout.contains("tokens of"), "{stdout}");
  assert!(stdout.contains("syntax of"), "{stdout}");
  assert!(stdout.contains("function main:"), "{stdout}");
}
