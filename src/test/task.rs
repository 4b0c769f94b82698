use serde_json::json;

use crate::sandbox::{TaskSpec, WatchdogReport};

fn spec() -> TaskSpec {
  TaskSpec {
    command: "./main arg".to_string(),
    stdin: "5\n".to_string(),
    timeout_ms: 1000,
    memory_limit_mb: 256,
    uid: 1000,
    gid: 1000,
  }
}

#[test]
fn task_json_keys_are_bit_exact() {
  let value = serde_json::to_value(spec()).unwrap();
  assert_eq!(
    value,
    json!({
      "command": "./main arg",
      "stdin": "5\n",
      "timeoutMS": 1000,
      "memoryLimitMB": 256,
      "uid": 1000,
      "gid": 1000,
    })
  );
}

#[test]
fn watchdog_report_parses_the_canonical_document() {
  let report = WatchdogReport::parse(
    r#"{
      "exit_code": 0,
      "stdout": "Hello\n",
      "stderr": "",
      "timeMS": 12,
      "memoryKB": 2048,
      "TLE": false,
      "MLE": false,
      "OLE": false
    }"#,
  )
  .unwrap();

  assert_eq!(report.exit_code, 0);
  assert_eq!(report.stdout, "Hello\n");
  assert_eq!(report.time_ms, 12);
  assert_eq!(report.memory_kb, 2048);
  assert!(!report.tle && !report.mle && !report.ole);
}

#[test]
fn watchdog_report_rejects_missing_fields() {
  // No OLE field.
  let doc = r#"{"exit_code": 0, "stdout": "", "stderr": "",
                "timeMS": 1, "memoryKB": 1, "TLE": false, "MLE": false}"#;
  assert!(WatchdogReport::parse(doc).is_err());
}

#[test]
fn watchdog_report_rejects_unknown_fields() {
  let doc = r#"{"exit_code": 0, "stdout": "", "stderr": "", "timeMS": 1, "memoryKB": 1,
                "TLE": false, "MLE": false, "OLE": false, "extra": 1}"#;
  assert!(WatchdogReport::parse(doc).is_err());
}

#[test]
fn watchdog_report_rejects_trailing_garbage() {
  let doc = r#"{"exit_code": 0, "stdout": "", "stderr": "", "timeMS": 1, "memoryKB": 1,
                "TLE": false, "MLE": false, "OLE": false} tail"#;
  assert!(WatchdogReport::parse(doc).is_err());
}

#[test]
fn watchdog_report_tolerates_surrounding_whitespace() {
  let doc = r#"
    {"exit_code": 1, "stdout": "", "stderr": "boom",
     "timeMS": 3, "memoryKB": 9,
     "TLE": false, "MLE": false, "OLE": false}
  "#;
  let report = WatchdogReport::parse(doc).unwrap();
  assert_eq!(report.exit_code, 1);
  assert_eq!(report.stderr, "boom");
}
