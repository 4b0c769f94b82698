//! Per-submission orchestration: sandbox allocation, the build and run
//! phases, verdict aggregation, and transactional finalization.

use bollard::Docker;
use sqlx::PgPool;
use tracing::{error, info};

use crate::{
  db::{
    crud,
    records::{CaseKind, JudgeResult, Problem, Submission, TestCase},
  },
  runner::{self, Limits, GUEST_HOME},
  sandbox::{Container, ContainerSpec, Volume, VolumeMount},
  verdict::{Progress, SubmissionVerdict},
  CONFIG,
};

/// Running aggregate over the per-case results of one submission.
pub(crate) struct Summary {
  pub(crate) result: SubmissionVerdict,
  pub(crate) message: String,
  pub(crate) detail: String,
  pub(crate) score: i32,
  pub(crate) time_ms: i32,
  pub(crate) memory_kb: i32,
}

impl Summary {
  pub(crate) fn new() -> Self {
    return Self {
      result: SubmissionVerdict::AC,
      message: String::new(),
      detail: String::new(),
      score: 0,
      time_ms: 0,
      memory_kb: 0,
    };
  }

  /// Fold one case into the aggregate: maxima for time and memory, score
  /// only for accepted cases, verdict under the total order, and one detail
  /// line per failed case.
  pub(crate) fn absorb(&mut self, case: &TestCase, result: &JudgeResult) {
    self.time_ms = self.time_ms.max(result.time_ms);
    self.memory_kb = self.memory_kb.max(result.memory_kb);
    if result.result == crate::verdict::CaseVerdict::AC {
      self.score += case.score;
    } else {
      self.detail.push_str(&format!(
        "{}: {} (-{})\n",
        case.message_on_fail.as_deref().unwrap_or(""),
        result.result,
        case.score
      ));
    }
    self.result = self.result.max(result.result.into());
  }

  fn fail(&mut self, failure: &PhaseFailure) {
    self.result = SubmissionVerdict::IE;
    self.message.push_str(&failure.message);
    self.detail.push_str(&failure.detail);
  }
}

/// Infrastructure failure of one pipeline phase, with the operator-facing
/// message and the diagnostic detail.
struct PhaseFailure {
  message: String,
  detail: String,
}

impl PhaseFailure {
  fn new(message: &str, detail: impl std::fmt::Display) -> Self {
    return Self {
      message: message.to_string(),
      detail: detail.to_string(),
    };
  }
}

/// Judge one claimed submission start to finish and return its aggregate
/// verdict.
///
/// Every sandbox resource created here is removed on every exit path; the
/// submission row always ends `done`, with `IE` when the infrastructure
/// failed.
pub async fn judge_one(
  pool: &PgPool,
  docker: &Docker,
  mut submission: Submission,
) -> SubmissionVerdict {
  info!(
    submission = submission.id,
    lecture = submission.lecture_id,
    assignment = submission.assignment_id,
    eval = submission.eval,
    "start judging"
  );

  let problem = match crud::fetch_problem(
    pool,
    submission.lecture_id,
    submission.assignment_id,
    submission.eval,
  )
  .await
  {
    Ok(Some(problem)) => problem,
    Ok(None) => {
      let mut summary = Summary::new();
      summary.result = SubmissionVerdict::IE;
      summary.message = format!(
        "Error on Problem {}-{}: Not found",
        submission.lecture_id, submission.assignment_id
      );
      finalize(pool, &mut submission, summary, &[]).await;
      return SubmissionVerdict::IE;
    }
    Err(err) => {
      let mut summary = Summary::new();
      summary.fail(&PhaseFailure::new("error when loading problem", err));
      finalize(pool, &mut submission, summary, &[]).await;
      return SubmissionVerdict::IE;
    }
  };

  let built: Vec<&TestCase> = problem
    .test_cases
    .iter()
    .filter(|c| c.kind == CaseKind::Built)
    .collect();
  let judged: Vec<&TestCase> = problem
    .test_cases
    .iter()
    .filter(|c| c.kind == CaseKind::Judge)
    .collect();

  let mut summary = Summary::new();
  let mut judge_results: Vec<JudgeResult> = Vec::new();

  let volume = match Volume::create(docker).await {
    Ok(volume) => volume,
    Err(err) => {
      summary.fail(&PhaseFailure::new("error when creating volume", err));
      finalize(pool, &mut submission, summary, &[]).await;
      return SubmissionVerdict::IE;
    }
  };

  // Build phase: compile everything on the toolchain image. Build failures
  // do not short-circuit; the student sees every failing case.
  let aborted = match build_phase(pool, docker, &mut submission, &problem, &volume, &built).await {
    Ok((results, aborted)) => {
      for (case, result) in built.iter().zip(results.iter()) {
        summary.absorb(case, result);
      }
      judge_results.extend(results);
      aborted
    }
    Err(failure) => {
      summary.fail(&failure);
      finalize(pool, &mut submission, summary, &judge_results).await;
      cleanup(None, Some(&volume)).await;
      return SubmissionVerdict::IE;
    }
  };

  if aborted {
    let verdict = summary.result;
    finalize(pool, &mut submission, summary, &judge_results).await;
    cleanup(None, Some(&volume)).await;
    return verdict;
  }

  // Run phase: minimal runtime image over the same volume. The container
  // gets headroom on top of the problem limit so the watchdog can kill the
  // child before the OOM killer takes the container.
  let run_container = match create_run_container(docker, &problem, &volume).await {
    Ok(container) => container,
    Err(failure) => {
      summary.fail(&failure);
      finalize(pool, &mut submission, summary, &judge_results).await;
      cleanup(None, Some(&volume)).await;
      return SubmissionVerdict::IE;
    }
  };

  let limits = Limits {
    time_ms: problem.time_ms as u64,
    memory_mb: problem.memory_mb as u64,
  };
  match runner::run_cases(pool, &run_container, &mut submission, &judged, limits).await {
    Ok((results, _aborted)) => {
      for (case, result) in judged.iter().zip(results.iter()) {
        summary.absorb(case, result);
      }
      judge_results.extend(results);
    }
    Err(stage) => {
      summary.fail(&PhaseFailure::new(&stage.operator_message(), &stage));
      finalize(pool, &mut submission, summary, &judge_results).await;
      cleanup(Some(&run_container), Some(&volume)).await;
      return SubmissionVerdict::IE;
    }
  }

  let verdict = summary.result;
  finalize(pool, &mut submission, summary, &judge_results).await;
  cleanup(Some(&run_container), Some(&volume)).await;

  info!(submission = submission.id, verdict = %verdict, "finished judging");
  return verdict;
}

/// Build container lifecycle: create, start, stage the student upload and
/// the arranged files, run every Built case, and remove the container (the
/// volume persists into the run phase).
async fn build_phase(
  pool: &PgPool,
  docker: &Docker,
  submission: &mut Submission,
  problem: &Problem,
  volume: &Volume,
  built: &[&TestCase],
) -> Result<(Vec<JudgeResult>, bool), PhaseFailure> {
  let container = Container::create(
    docker,
    sandbox_spec(
      CONFIG.judge.compiler_image.clone(),
      CONFIG.judge.build_container_memory_mb,
      volume,
    ),
  )
  .await
  .map_err(|err| PhaseFailure::new("error when creating build container", err))?;

  let outcome = async {
    container
      .start()
      .await
      .map_err(|err| PhaseFailure::new("error when starting build container", err))?;

    let upload_root = CONFIG.upload_dir_path.join(&submission.upload_dir);
    container
      .upload_tree(&upload_root, GUEST_HOME, CONFIG.guest_uid, CONFIG.guest_gid)
      .await
      .map_err(|err| PhaseFailure::new("error when copying files to build container", err))?;

    for file in &problem.arranged_files {
      container
        .upload_file(
          &CONFIG.resource_path.join(&file.path),
          GUEST_HOME,
          CONFIG.guest_uid,
          CONFIG.guest_gid,
        )
        .await
        .map_err(|err| PhaseFailure::new("error when copying files to build container", err))?;
    }

    let limits = Limits {
      time_ms: CONFIG.judge.build_time_limit_ms,
      memory_mb: CONFIG.judge.build_memory_limit_mb,
    };
    runner::run_cases(pool, &container, submission, built, limits)
      .await
      .map_err(|err| PhaseFailure::new(&err.operator_message(), &err))
  }
  .await;

  // The build container goes away on every path. A failed removal is a
  // cleanup failure: logged, never allowed to override the build outcome.
  if let Err(err) = container.remove().await {
    error!(container = %container.name, error = %err, "failed to remove build container");
  }

  return outcome;
}

async fn create_run_container(
  docker: &Docker,
  problem: &Problem,
  volume: &Volume,
) -> Result<Container, PhaseFailure> {
  let container = Container::create(
    docker,
    sandbox_spec(
      CONFIG.judge.runner_image.clone(),
      problem.memory_mb as i64 + CONFIG.judge.memory_headroom_mb,
      volume,
    ),
  )
  .await
  .map_err(|err| PhaseFailure::new("error when creating sandbox container", err))?;

  if let Err(err) = container.start().await {
    let failure = PhaseFailure::new("error when starting sandbox container", &err);
    cleanup(Some(&container), None).await;
    return Err(failure);
  }

  return Ok(container);
}

fn sandbox_spec(image: String, memory_limit_mb: i64, volume: &Volume) -> ContainerSpec {
  return ContainerSpec {
    image,
    // The container idles for at most an hour; every case runs via exec.
    argv: vec!["sleep".to_string(), "3600".to_string()],
    user: "root".to_string(),
    groups: vec!["root".to_string()],
    memory_limit_mb,
    stack_limit_kb: None,
    pids_limit: CONFIG.judge.pids_limit,
    cgroup_parent: if CONFIG.cgroup_parent.is_empty() {
      None
    } else {
      Some(CONFIG.cgroup_parent.clone())
    },
    network_disabled: true,
    workdir: GUEST_HOME.to_string(),
    mounts: vec![VolumeMount {
      volume: volume.name.clone(),
      path: GUEST_HOME.to_string(),
      read_only: false,
    }],
  };
}

/// Write the final submission state plus all per-case rows, then refresh the
/// batch roll-up when this submission came from a batch upload.
async fn finalize(
  pool: &PgPool,
  submission: &mut Submission,
  summary: Summary,
  judge_results: &[JudgeResult],
) {
  submission.progress = Progress::Done;
  submission.result = Some(summary.result);
  submission.message = Some(summary.message);
  submission.detail = Some(summary.detail);
  submission.score = Some(summary.score);
  submission.time_ms = Some(summary.time_ms);
  submission.memory_kb = Some(summary.memory_kb);

  if let Err(err) = crud::finalize_submission(pool, submission, judge_results).await {
    error!(submission = submission.id, error = %err, "failed to finalize submission");
    return;
  }

  if let Some(evaluation_status_id) = submission.evaluation_status_id {
    if let Err(err) = crud::update_batch_rollup(pool, evaluation_status_id).await {
      error!(
        submission = submission.id,
        evaluation_status = evaluation_status_id,
        error = %err,
        "failed to update batch roll-up"
      );
    }
  }
}

/// Remove sandbox resources. Failures are logged and never override the
/// already-persisted verdict.
async fn cleanup(container: Option<&Container>, volume: Option<&Volume>) {
  if let Some(container) = container {
    if let Err(err) = container.remove().await {
      error!(container = %container.name, error = %err, "failed to remove container");
    }
  }
  if let Some(volume) = volume {
    if let Err(err) = volume.remove().await {
      error!(volume = %volume.name, error = %err, "failed to remove volume");
    }
  }
}
