use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn write_contacts(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "wristcall-bin-{tag}-{}.json",
        std::process::id()
    ));
    fs::write(
        &path,
        r#"[
            {"name": "Ana", "phone_number": "5550101"},
            {"name": "Marco", "phone_number": "5550102"},
            {"name": "Emergency", "phone_number": "112", "marker": true}
        ]"#,
    )
    .expect("write contacts file");
    path
}

#[test]
fn main_lists_contacts() {
    let contacts = write_contacts("list");
    let bin = env!("CARGO_BIN_EXE_wristcall");
    let output = Command::new(bin)
        .arg("--contacts")
        .arg(&contacts)
        .arg("--list-contacts")
        .output()
        .expect("run wristcall");
    fs::remove_file(&contacts).ok();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Contact list:"));
    assert!(stdout.contains("0. Ana (5550101)"));
    assert!(stdout.contains("2. Emergency (112) [marker]"));
}

#[test]
fn main_walks_to_the_voiced_contact() {
    let contacts = write_contacts("walk");
    let bin = env!("CARGO_BIN_EXE_wristcall");
    let output = Command::new(bin)
        .arg("--contacts")
        .arg(&contacts)
        .args([
            "--scenario",
            "no-answer,voice",
            "--ring-timeout-ms",
            "150",
            "--voice-window-ms",
            "100",
            "--poll-interval-ms",
            "10",
            "--log-events",
        ])
        .output()
        .expect("run wristcall");
    fs::remove_file(&contacts).ok();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Calling Ana (5550101)..."));
    assert!(stdout.contains("notice|advanced|from=0|to=1|reason=no_answer"));
    assert!(stdout.contains("notice|succeeded|index=1"));
    assert!(stdout.contains("Marco answered; sequence complete."));
}

#[test]
fn main_reports_exhaustion_with_an_attempt_cap() {
    let contacts = write_contacts("cap");
    let bin = env!("CARGO_BIN_EXE_wristcall");
    let output = Command::new(bin)
        .arg("--contacts")
        .arg(&contacts)
        .args([
            "--scenario",
            "no-answer,no-answer",
            "--max-attempts",
            "3",
            "--ring-timeout-ms",
            "100",
            "--voice-window-ms",
            "100",
            "--poll-interval-ms",
            "10",
            "--log-events",
        ])
        .output()
        .expect("run wristcall");
    fs::remove_file(&contacts).ok();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("notice|advanced|from=0|to=1|reason=no_answer"));
    // The marker slot is skipped on the wrap back to the first contact.
    assert!(stdout.contains("notice|advanced|from=1|to=0|reason=no_answer"));
    assert!(stdout.contains("notice|exhausted|attempts=3"));
}

#[test]
fn main_rejects_out_of_range_timings() {
    let bin = env!("CARGO_BIN_EXE_wristcall");
    let output = Command::new(bin)
        .args(["--ring-timeout-ms", "1"])
        .output()
        .expect("run wristcall");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--ring-timeout-ms"));
}
