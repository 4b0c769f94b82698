use serde::{Deserialize, Serialize};

/// Per-run instructions for the in-container watchdog, serialized to
/// `/home/guest/task.json` (chowned root:root, mode 0600) before exec.
///
/// Key names are part of the watchdog wire contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
  /// Shell command line (command plus normalized arguments).
  pub command: String,

  /// Contents piped to the child's stdin.
  pub stdin: String,

  /// Wall-clock limit enforced by the watchdog.
  #[serde(rename = "timeoutMS")]
  pub timeout_ms: u64,

  /// Peak-RSS limit enforced by the watchdog.
  #[serde(rename = "memoryLimitMB")]
  pub memory_limit_mb: u64,

  /// Uid the watchdog drops to before running the command.
  pub uid: u32,

  /// Gid the watchdog drops to.
  pub gid: u32,
}

/// The single JSON document the watchdog emits on its stdout.
///
/// The schema is strict: a missing or unknown field fails deserialization and
/// the test case is classified as an internal error, never as a runtime
/// error of the student program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WatchdogReport {
  /// Exit status of the child (signal-derived when killed), regardless of
  /// the limit flags.
  pub exit_code: i32,

  pub stdout: String,

  pub stderr: String,

  #[serde(rename = "timeMS")]
  pub time_ms: i64,

  #[serde(rename = "memoryKB")]
  pub memory_kb: i64,

  /// Wall clock reached `timeoutMS`.
  #[serde(rename = "TLE")]
  pub tle: bool,

  /// Peak memory reached `memoryLimitMB`.
  #[serde(rename = "MLE")]
  pub mle: bool,

  /// Either output stream hit the watchdog's own cap.
  #[serde(rename = "OLE")]
  pub ole: bool,
}

impl WatchdogReport {
  /// Parse the watchdog's stdout. Exactly one JSON document, no trailing
  /// garbage.
  pub fn parse(stdout: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(stdout.trim())
  }
}
