use crate::etc::{Cfg, JudgeCfg};

#[test]
fn scheduler_defaults_match_the_deployment() {
  let judge = JudgeCfg::default();
  assert_eq!(judge.workers, 6);
  assert_eq!(judge.queue_capacity, 20);
  assert_eq!(judge.poll_interval_s, 5);
  assert_eq!(judge.build_time_limit_ms, 2000);
  assert_eq!(judge.build_memory_limit_mb, 512);
  assert_eq!(judge.memory_headroom_mb, 512);
  assert_eq!(judge.pids_limit, 100);
  assert_eq!(judge.exec_timeout_s, 8);
}

#[test]
fn default_config_deserializes_from_empty_sources() {
  // Every field carries a default, so an empty config document is valid.
  let cfg: Cfg = serde_json::from_str("{}").unwrap();
  assert_eq!(cfg.judge.workers, JudgeCfg::default().workers);
  assert_eq!(cfg.output_limit_stdout_bytes, 8000);
  assert_eq!(cfg.output_limit_stderr_bytes, 8000);
}
