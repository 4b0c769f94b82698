use crate::db::{crud::clip_detail, records::CaseKind, records::TestCase};

#[test]
fn detail_is_clipped_with_an_ellipsis() {
  let short = "a".repeat(200);
  assert_eq!(clip_detail(&short), short);

  let long = "a".repeat(201);
  let clipped = clip_detail(&long);
  assert_eq!(clipped.chars().count(), 203);
  assert!(clipped.ends_with("..."));
  assert!(clipped.starts_with(&"a".repeat(200)));
}

#[test]
fn detail_clipping_counts_characters_not_bytes() {
  let long = "あ".repeat(201);
  let clipped = clip_detail(&long);
  assert_eq!(clipped.chars().count(), 203);
  assert!(clipped.ends_with("..."));
}

#[test]
fn shell_command_normalizes_the_argument_string() {
  let mut case = TestCase {
    id: 1,
    lecture_id: 1,
    assignment_id: 1,
    eval: false,
    kind: CaseKind::Judge,
    score: 0,
    title: "t".to_string(),
    description: None,
    message_on_fail: None,
    command: "./main".to_string(),
    args: None,
    stdin_path: None,
    stdout_path: None,
    stderr_path: None,
    exit_code: 0,
  };

  assert_eq!(case.shell_command(), "./main");

  case.args = Some("  -a   1\t-b  2 ".to_string());
  assert_eq!(case.shell_command(), "./main -a 1 -b 2");

  case.args = Some("   ".to_string());
  assert_eq!(case.shell_command(), "./main");
}
