/// Whitespace-normalized comparison of an expected and an observed output
/// stream.
///
/// Both sides are split into lines, each line is trimmed of Unicode
/// whitespace, empty lines are dropped, and the surviving lines are compared
/// pairwise as token lists (tokens separated by runs of whitespace). The
/// relation is symmetric and every string matches itself.
pub fn outputs_match(expected: &str, observed: &str) -> bool {
  let lhs = normalize(expected);
  let rhs = normalize(observed);

  if lhs.len() != rhs.len() {
    return false;
  }

  return lhs
    .iter()
    .zip(rhs.iter())
    .all(|(l, r)| l.split_whitespace().eq(r.split_whitespace()));
}

fn normalize(text: &str) -> Vec<&str> {
  text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .collect()
}
