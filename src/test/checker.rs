use crate::checker::outputs_match;

#[test]
fn exact_match() {
  assert!(outputs_match("Hello", "Hello"));
  assert!(outputs_match("Hello\n", "Hello"));
}

#[test]
fn whitespace_runs_and_blank_lines_are_normalized() {
  assert!(outputs_match("1 2 3\n", "  1\t2   3  \n\n"));
  assert!(outputs_match("a b\nc d\n", "a    b\n\n\nc\td\n"));
}

#[test]
fn token_mismatch_is_detected() {
  assert!(!outputs_match("1 2 3\n", "1 2 4\n"));
  // Joined tokens are a different token list, not a spacing variation.
  assert!(!outputs_match("a b", "ab"));
}

#[test]
fn line_count_mismatch_is_detected() {
  assert!(!outputs_match("1\n2\n", "1\n"));
  assert!(!outputs_match("1\n", "1\n2\n"));
}

#[test]
fn ideographic_space_counts_as_whitespace() {
  assert!(outputs_match("1\u{3000}2", "1 2"));
  assert!(outputs_match("\u{3000}ok\u{3000}\n", "ok"));
}

#[test]
fn empty_and_blank_streams_match() {
  assert!(outputs_match("", ""));
  assert!(outputs_match("", " \n\t\n"));
}

#[test]
fn symmetric_and_idempotent() {
  let samples = ["", "a b c", " a\nb ", "1 2 4\n", "x\n\ny"];
  for a in samples {
    assert!(outputs_match(a, a));
    for b in samples {
      assert_eq!(outputs_match(a, b), outputs_match(b, a));
    }
  }
}
