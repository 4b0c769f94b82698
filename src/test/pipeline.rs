use crate::{
  db::records::{CaseKind, JudgeResult, TestCase},
  pipeline::Summary,
  verdict::{CaseVerdict, SubmissionVerdict},
};

fn case(id: i32, score: i32, message_on_fail: &str) -> TestCase {
  TestCase {
    id,
    lecture_id: 1,
    assignment_id: 1,
    eval: false,
    kind: CaseKind::Judge,
    score,
    title: format!("case{id}"),
    description: None,
    message_on_fail: Some(message_on_fail.to_string()),
    command: "./main".to_string(),
    args: None,
    stdin_path: None,
    stdout_path: None,
    stderr_path: None,
    exit_code: 0,
  }
}

fn outcome(testcase_id: i32, verdict: CaseVerdict, time_ms: i32, memory_kb: i32) -> JudgeResult {
  JudgeResult {
    submission_id: 7,
    testcase_id,
    result: verdict,
    command: "./main".to_string(),
    time_ms,
    memory_kb,
    exit_code: 0,
    stdout: String::new(),
    stderr: String::new(),
  }
}

#[test]
fn aggregate_is_the_maximum_verdict() {
  let cases = [case(1, 10, "m1"), case(2, 20, "m2"), case(3, 30, "m3")];
  let results = [
    outcome(1, CaseVerdict::AC, 5, 100),
    outcome(2, CaseVerdict::WA, 9, 300),
    outcome(3, CaseVerdict::TLE, 1000, 200),
  ];

  let mut summary = Summary::new();
  for (case, result) in cases.iter().zip(results.iter()) {
    summary.absorb(case, result);
  }

  assert_eq!(summary.result, SubmissionVerdict::TLE);
  assert_eq!(summary.time_ms, 1000);
  assert_eq!(summary.memory_kb, 300);
}

#[test]
fn score_sums_accepted_cases_only() {
  let cases = [case(1, 10, "m1"), case(2, 20, "m2"), case(3, 30, "m3")];
  let results = [
    outcome(1, CaseVerdict::AC, 1, 1),
    outcome(2, CaseVerdict::WA, 1, 1),
    outcome(3, CaseVerdict::AC, 1, 1),
  ];

  let mut summary = Summary::new();
  for (case, result) in cases.iter().zip(results.iter()) {
    summary.absorb(case, result);
  }

  assert_eq!(summary.score, 40);
}

#[test]
fn every_failed_case_contributes_a_detail_line() {
  let cases = [case(1, 10, "build broke"), case(2, 20, "wrong output"), case(3, 30, "too slow")];
  let results = [
    outcome(1, CaseVerdict::CE, 1, 1),
    outcome(2, CaseVerdict::WA, 1, 1),
    outcome(3, CaseVerdict::TLE, 1, 1),
  ];

  let mut summary = Summary::new();
  for (case, result) in cases.iter().zip(results.iter()) {
    summary.absorb(case, result);
  }

  assert_eq!(
    summary.detail,
    "build broke: CE (-10)\nwrong output: WA (-20)\ntoo slow: TLE (-30)\n"
  );
  assert_eq!(summary.result, SubmissionVerdict::CE);
  assert_eq!(summary.score, 0);
}

#[test]
fn accepted_cases_leave_no_detail() {
  let cases = [case(1, 10, "m1")];
  let results = [outcome(1, CaseVerdict::AC, 1, 1)];

  let mut summary = Summary::new();
  summary.absorb(&cases[0], &results[0]);

  assert_eq!(summary.detail, "");
  assert_eq!(summary.result, SubmissionVerdict::AC);
}
