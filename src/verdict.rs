use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Judge status of a single test case.
///
/// Verdicts carry a total order (see [`CaseVerdict::rank`]); the submission
/// aggregate is the maximum over its cases under that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize)]
pub enum CaseVerdict {
  AC,
  WA,
  TLE,
  MLE,
  RE,
  CE,
  OLE,
  IE,
}

impl CaseVerdict {
  fn rank(&self) -> u8 {
    match self {
      CaseVerdict::AC => 0,
      CaseVerdict::WA => 1,
      CaseVerdict::TLE => 2,
      CaseVerdict::MLE => 3,
      CaseVerdict::RE => 4,
      CaseVerdict::CE => 5,
      CaseVerdict::OLE => 6,
      CaseVerdict::IE => 7,
    }
  }
}

impl PartialOrd for CaseVerdict {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for CaseVerdict {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.rank().cmp(&other.rank())
  }
}

/// Aggregate judge status of a whole submission.
///
/// Same order as [`CaseVerdict`] with the extra top element `FN`
/// (a required file or the problem itself was missing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize)]
pub enum SubmissionVerdict {
  AC,
  WA,
  TLE,
  MLE,
  RE,
  CE,
  OLE,
  IE,
  FN,
}

impl SubmissionVerdict {
  fn rank(&self) -> u8 {
    match self {
      SubmissionVerdict::AC => 0,
      SubmissionVerdict::WA => 1,
      SubmissionVerdict::TLE => 2,
      SubmissionVerdict::MLE => 3,
      SubmissionVerdict::RE => 4,
      SubmissionVerdict::CE => 5,
      SubmissionVerdict::OLE => 6,
      SubmissionVerdict::IE => 7,
      SubmissionVerdict::FN => 8,
    }
  }
}

impl PartialOrd for SubmissionVerdict {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for SubmissionVerdict {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.rank().cmp(&other.rank())
  }
}

impl From<CaseVerdict> for SubmissionVerdict {
  fn from(v: CaseVerdict) -> Self {
    match v {
      CaseVerdict::AC => SubmissionVerdict::AC,
      CaseVerdict::WA => SubmissionVerdict::WA,
      CaseVerdict::TLE => SubmissionVerdict::TLE,
      CaseVerdict::MLE => SubmissionVerdict::MLE,
      CaseVerdict::RE => SubmissionVerdict::RE,
      CaseVerdict::CE => SubmissionVerdict::CE,
      CaseVerdict::OLE => SubmissionVerdict::OLE,
      CaseVerdict::IE => SubmissionVerdict::IE,
    }
  }
}

/// Lifecycle state of a submission row.
///
/// Transitions are `pending -> queued -> running -> done`, plus the recovery
/// edge `running -> queued` applied once at process startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Progress {
  Pending,
  Queued,
  Running,
  Done,
}
