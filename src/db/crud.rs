//! The narrow persistence interface of the scheduler. Every operation
//! commits before its effect is observable to the pipeline.

use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, info};

use crate::{
  db::records::{ArrangedFile, CaseKind, JudgeResult, Problem, Submission, TestCase},
  verdict::{Progress, SubmissionVerdict},
};

/// `detail` column budget; longer strings are clipped with an ellipsis.
const DETAIL_MAX_CHARS: usize = 200;

/// Atomically claim up to `limit` queued submissions.
///
/// In one transaction: row-lock the selected rows, flip them to `running`,
/// and store each row's `total_task` (eval-only test cases count only when
/// the submission itself is judged with `eval`). The serialization point of
/// the whole scheduler — no two callers ever receive the same row.
pub async fn claim_queued(pool: &PgPool, limit: i64) -> Result<Vec<Submission>, sqlx::Error> {
  if limit <= 0 {
    return Ok(Vec::new());
  }

  let mut tx = pool.begin().await?;

  let rows = sqlx::query(
    r#"SELECT id, ts, evaluation_status_id, user_id, lecture_id, assignment_id, eval, upload_dir
       FROM "Submission" WHERE progress = 'queued' ORDER BY id LIMIT $1 FOR UPDATE"#,
  )
  .bind(limit)
  .fetch_all(&mut *tx)
  .await?;

  let mut claimed = Vec::with_capacity(rows.len());
  for row in rows {
    let id: i32 = row.try_get("id")?;
    let lecture_id: i32 = row.try_get("lecture_id")?;
    let assignment_id: i32 = row.try_get("assignment_id")?;
    let eval: bool = row.try_get("eval")?;

    let total_task: i64 = sqlx::query_scalar(
      r#"SELECT COUNT(*) FROM "TestCases"
         WHERE lecture_id = $1 AND assignment_id = $2 AND (eval = $3 OR eval = FALSE)"#,
    )
    .bind(lecture_id)
    .bind(assignment_id)
    .bind(eval)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
      r#"UPDATE "Submission" SET progress = 'running', total_task = $2, completed_task = 0
         WHERE id = $1"#,
    )
    .bind(id)
    .bind(total_task as i32)
    .execute(&mut *tx)
    .await?;

    claimed.push(Submission {
      id,
      ts: row.try_get("ts")?,
      evaluation_status_id: row.try_get("evaluation_status_id")?,
      user_id: row.try_get("user_id")?,
      lecture_id,
      assignment_id,
      eval,
      upload_dir: row.try_get("upload_dir")?,
      progress: Progress::Running,
      total_task: total_task as i32,
      completed_task: 0,
      result: None,
      message: None,
      detail: None,
      score: None,
      time_ms: None,
      memory_kb: None,
    });
  }

  tx.commit().await?;

  if !claimed.is_empty() {
    debug!(count = claimed.len(), "claimed queued submissions");
  }
  return Ok(claimed);
}

/// Number of test cases a submission with the given `eval` flag will run.
pub async fn count_applicable_test_cases(
  pool: &PgPool,
  lecture_id: i32,
  assignment_id: i32,
  eval: bool,
) -> Result<i64, sqlx::Error> {
  sqlx::query_scalar(
    r#"SELECT COUNT(*) FROM "TestCases"
       WHERE lecture_id = $1 AND assignment_id = $2 AND (eval = $3 OR eval = FALSE)"#,
  )
  .bind(lecture_id)
  .bind(assignment_id)
  .bind(eval)
  .fetch_one(pool)
  .await
}

/// Fetch a problem with its applicable test cases and arranged files.
///
/// Eval-only test cases are included only when `eval` is true; arranged
/// files are always staged in full.
pub async fn fetch_problem(
  pool: &PgPool,
  lecture_id: i32,
  assignment_id: i32,
  eval: bool,
) -> Result<Option<Problem>, sqlx::Error> {
  let row = sqlx::query(
    r#"SELECT lecture_id, assignment_id, title, description_path, "timeMS", "memoryMB"
       FROM "Problem" WHERE lecture_id = $1 AND assignment_id = $2"#,
  )
  .bind(lecture_id)
  .bind(assignment_id)
  .fetch_optional(pool)
  .await?;

  let row = match row {
    Some(row) => row,
    None => return Ok(None),
  };

  let test_cases = sqlx::query(
    r#"SELECT id, lecture_id, assignment_id, eval, type, score, title, description,
              message_on_fail, command, args, stdin_path, stdout_path, stderr_path, exit_code
       FROM "TestCases"
       WHERE lecture_id = $1 AND assignment_id = $2 AND (eval = $3 OR eval = FALSE)
       ORDER BY id"#,
  )
  .bind(lecture_id)
  .bind(assignment_id)
  .bind(eval)
  .fetch_all(pool)
  .await?
  .into_iter()
  .map(test_case_from_row)
  .collect::<Result<Vec<_>, _>>()?;

  let arranged_files = sqlx::query(
    r#"SELECT id, lecture_id, assignment_id, eval, path FROM "ArrangedFiles"
       WHERE lecture_id = $1 AND assignment_id = $2 ORDER BY id"#,
  )
  .bind(lecture_id)
  .bind(assignment_id)
  .fetch_all(pool)
  .await?
  .into_iter()
  .map(|row| {
    Ok::<_, sqlx::Error>(ArrangedFile {
      id: row.try_get("id")?,
      lecture_id: row.try_get("lecture_id")?,
      assignment_id: row.try_get("assignment_id")?,
      eval: row.try_get("eval")?,
      path: row.try_get("path")?,
    })
  })
  .collect::<Result<Vec<_>, _>>()?;

  return Ok(Some(Problem {
    lecture_id: row.try_get("lecture_id")?,
    assignment_id: row.try_get("assignment_id")?,
    title: row.try_get("title")?,
    description_path: row.try_get("description_path")?,
    time_ms: row.try_get("timeMS")?,
    memory_mb: row.try_get("memoryMB")?,
    test_cases,
    arranged_files,
  }));
}

/// Persist the progress counters of a running submission so observers see
/// the completed/total ratio advance.
pub async fn update_submission_progress(
  pool: &PgPool,
  id: i32,
  progress: Progress,
  completed_task: i32,
  total_task: i32,
  result: Option<SubmissionVerdict>,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    r#"UPDATE "Submission" SET progress = $2, completed_task = $3, total_task = $4, result = $5
       WHERE id = $1"#,
  )
  .bind(id)
  .bind(progress.to_string())
  .bind(completed_task)
  .bind(total_task)
  .bind(result.map(|r| r.to_string()))
  .execute(pool)
  .await?;
  Ok(())
}

/// Write the final state of a submission and all its per-case results in one
/// transaction. The `detail` column is clipped to its budget.
pub async fn finalize_submission(
  pool: &PgPool,
  submission: &Submission,
  judge_results: &[JudgeResult],
) -> Result<(), sqlx::Error> {
  let mut tx = pool.begin().await?;

  sqlx::query(
    r#"UPDATE "Submission"
       SET progress = $2, total_task = $3, completed_task = $4, result = $5,
           message = $6, detail = $7, score = $8, "timeMS" = $9, "memoryKB" = $10
       WHERE id = $1"#,
  )
  .bind(submission.id)
  .bind(submission.progress.to_string())
  .bind(submission.total_task)
  .bind(submission.completed_task)
  .bind(submission.result.map(|r| r.to_string()))
  .bind(&submission.message)
  .bind(submission.detail.as_deref().map(clip_detail))
  .bind(submission.score)
  .bind(submission.time_ms)
  .bind(submission.memory_kb)
  .execute(&mut *tx)
  .await?;

  for result in judge_results {
    sqlx::query(
      r#"INSERT INTO "JudgeResult"
         (submission_id, testcase_id, result, command,
          "timeMS", "memoryKB", exit_code, stdout, stderr)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
    )
    .bind(result.submission_id)
    .bind(result.testcase_id)
    .bind(result.result.to_string())
    .bind(&result.command)
    .bind(result.time_ms)
    .bind(result.memory_kb)
    .bind(result.exit_code)
    .bind(&result.stdout)
    .bind(&result.stderr)
    .execute(&mut *tx)
    .await?;
  }

  tx.commit().await?;
  Ok(())
}

/// Startup crash recovery: demote every `running` submission back to
/// `queued`, reset its progress counter, and discard its partial results.
/// One transaction; idempotent, safe after a crash or a clean shutdown.
pub async fn recover_running(pool: &PgPool) -> Result<u64, sqlx::Error> {
  let mut tx = pool.begin().await?;

  let ids: Vec<i32> =
    sqlx::query_scalar(r#"SELECT id FROM "Submission" WHERE progress = 'running' FOR UPDATE"#)
      .fetch_all(&mut *tx)
      .await?;

  if ids.is_empty() {
    tx.commit().await?;
    return Ok(0);
  }

  sqlx::query(
    r#"UPDATE "Submission" SET progress = 'queued', completed_task = 0 WHERE id = ANY($1)"#,
  )
  .bind(&ids)
  .execute(&mut *tx)
  .await?;

  sqlx::query(r#"DELETE FROM "JudgeResult" WHERE submission_id = ANY($1)"#)
    .bind(&ids)
    .execute(&mut *tx)
    .await?;

  tx.commit().await?;

  info!(count = ids.len(), "recovered interrupted submissions");
  return Ok(ids.len() as u64);
}

/// Batch roll-up after one child submission finalizes: refresh the parent
/// batch's `complete_judge` counter and, once every submission of the
/// student's evaluation status is done, back-fill its aggregate `result`.
pub async fn update_batch_rollup(
  pool: &PgPool,
  evaluation_status_id: i32,
) -> Result<(), sqlx::Error> {
  let mut tx = pool.begin().await?;

  let batch_id: i32 =
    sqlx::query_scalar(r#"SELECT batch_id FROM "EvaluationStatus" WHERE id = $1"#)
      .bind(evaluation_status_id)
      .fetch_one(&mut *tx)
      .await?;

  let pending: i64 = sqlx::query_scalar(
    r#"SELECT COUNT(*) FROM "Submission"
       WHERE evaluation_status_id = $1 AND progress <> 'done'"#,
  )
  .bind(evaluation_status_id)
  .fetch_one(&mut *tx)
  .await?;

  if pending == 0 {
    let verdicts: Vec<Option<String>> =
      sqlx::query_scalar(r#"SELECT result FROM "Submission" WHERE evaluation_status_id = $1"#)
        .bind(evaluation_status_id)
        .fetch_all(&mut *tx)
        .await?;

    let rollup = verdicts
      .into_iter()
      .flatten()
      .filter_map(|s| s.parse::<SubmissionVerdict>().ok())
      .max();

    if let Some(rollup) = rollup {
      sqlx::query(r#"UPDATE "EvaluationStatus" SET result = $2 WHERE id = $1"#)
        .bind(evaluation_status_id)
        .bind(rollup.to_string())
        .execute(&mut *tx)
        .await?;
    }
  }

  let complete_judge: i64 = sqlx::query_scalar(
    r#"SELECT COUNT(*) FROM "Submission" s
       JOIN "EvaluationStatus" e ON s.evaluation_status_id = e.id
       WHERE e.batch_id = $1 AND s.progress = 'done'"#,
  )
  .bind(batch_id)
  .fetch_one(&mut *tx)
  .await?;

  sqlx::query(r#"UPDATE "BatchSubmission" SET complete_judge = $2 WHERE id = $1"#)
    .bind(batch_id)
    .bind(complete_judge as i32)
    .execute(&mut *tx)
    .await?;

  tx.commit().await?;
  Ok(())
}

fn test_case_from_row(row: PgRow) -> Result<TestCase, sqlx::Error> {
  let kind: String = row.try_get("type")?;
  let kind = kind
    .parse::<CaseKind>()
    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

  return Ok(TestCase {
    id: row.try_get("id")?,
    lecture_id: row.try_get("lecture_id")?,
    assignment_id: row.try_get("assignment_id")?,
    eval: row.try_get("eval")?,
    kind,
    score: row.try_get("score")?,
    title: row.try_get("title")?,
    description: row.try_get("description")?,
    message_on_fail: row.try_get("message_on_fail")?,
    command: row.try_get("command")?,
    args: row.try_get("args")?,
    stdin_path: row.try_get("stdin_path")?,
    stdout_path: row.try_get("stdout_path")?,
    stderr_path: row.try_get("stderr_path")?,
    exit_code: row.try_get("exit_code")?,
  });
}

/// Clip a detail string to the column budget, appending an ellipsis when it
/// was longer.
pub fn clip_detail(detail: &str) -> String {
  if detail.chars().count() <= DETAIL_MAX_CHARS {
    return detail.to_string();
  }
  let clipped: String = detail.chars().take(DETAIL_MAX_CHARS).collect();
  return clipped + "...";
}
