//! The cross-process work queue: a periodic filler that claims queued
//! submissions from the database, a bounded in-memory channel, and a
//! dispatcher that pairs channel items with a fixed pool of workers.

use std::{collections::HashMap, sync::Arc};

use bollard::Docker;
use chrono::NaiveDateTime;
use sqlx::PgPool;
use tokio::{
  sync::{mpsc, watch, Semaphore},
  task::{JoinHandle, JoinSet},
  time::MissedTickBehavior,
};
use tracing::{debug, error, info};

use crate::{
  db::{crud, records::Submission},
  pipeline,
  verdict::SubmissionVerdict,
  CONFIG,
};

/// The process-wide scheduler singleton, started once at startup and stopped
/// once at shutdown.
pub struct JobManager {
  shutdown: watch::Sender<bool>,
  filler: JoinHandle<()>,
  dispatcher: JoinHandle<()>,
}

impl JobManager {
  pub fn start(pool: PgPool, docker: Docker) -> Self {
    let (shutdown, _) = watch::channel(false);
    let (queue_tx, queue_rx) = mpsc::channel::<Submission>(CONFIG.judge.queue_capacity);

    let filler = tokio::spawn(fill_queue(pool.clone(), queue_tx, shutdown.subscribe()));
    let dispatcher = tokio::spawn(dispatch(pool, docker, queue_rx, shutdown.subscribe()));

    return Self {
      shutdown,
      filler,
      dispatcher,
    };
  }

  /// Graceful shutdown: the filler stops claiming, the dispatcher stops
  /// pulling from the channel and waits for in-flight pipelines. Items never
  /// dispatched stay `running` in the database and are re-queued by the
  /// recovery pass at next startup.
  pub async fn stop(self) {
    let _ = self.shutdown.send(true);
    let _ = self.filler.await;
    let _ = self.dispatcher.await;
  }
}

/// Scan the submissions table every tick and claim at most the channel's
/// free capacity, so the database itself stays the overflow buffer.
async fn fill_queue(
  pool: PgPool,
  queue: mpsc::Sender<Submission>,
  mut shutdown: watch::Receiver<bool>,
) {
  let mut tick = tokio::time::interval(CONFIG.poll_interval());
  tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = tick.tick() => {}
      _ = shutdown.changed() => break,
    }

    let free = queue.capacity();
    if free == 0 {
      continue;
    }

    match crud::claim_queued(&pool, free as i64).await {
      Ok(claimed) => {
        for submission in claimed {
          // The filler is the only sender and claimed no more rows than the
          // channel had room for, so this never blocks for long.
          if queue.send(submission).await.is_err() {
            return;
          }
        }
      }
      // The claim transaction rolled back; the rows stay queued and the
      // next tick retries.
      Err(err) => error!(error = %err, "failed to claim queued submissions"),
    }
  }
}

/// Pair channel items with free workers. Worker slots are semaphore permits;
/// each spawned job holds one for the duration of its pipeline.
async fn dispatch(
  pool: PgPool,
  docker: Docker,
  mut queue: mpsc::Receiver<Submission>,
  mut shutdown: watch::Receiver<bool>,
) {
  let workers = Arc::new(Semaphore::new(CONFIG.judge.workers));
  // Registry of in-flight jobs, touched only by this task.
  let mut active: HashMap<(i32, NaiveDateTime), ()> = HashMap::new();
  let mut jobs: JoinSet<(i32, NaiveDateTime, SubmissionVerdict)> = JoinSet::new();

  loop {
    tokio::select! {
      received = queue.recv() => {
        let submission = match received {
          Some(submission) => submission,
          None => break,
        };
        let permit = match workers.clone().acquire_owned().await {
          Ok(permit) => permit,
          Err(_) => break,
        };

        let dispatched_at = chrono::Local::now().naive_local();
        active.insert((submission.id, dispatched_at), ());
        debug!(submission = submission.id, in_flight = active.len(), "dispatching job");

        let pool = pool.clone();
        let docker = docker.clone();
        jobs.spawn(async move {
          let id = submission.id;
          let verdict = pipeline::judge_one(&pool, &docker, submission).await;
          drop(permit);
          (id, dispatched_at, verdict)
        });
      }
      Some(done) = jobs.join_next(), if !jobs.is_empty() => {
        reap(&mut active, done);
      }
      _ = shutdown.changed() => break,
    }
  }

  // Cooperative shutdown: nothing new starts, in-flight pipelines finish.
  while let Some(done) = jobs.join_next().await {
    reap(&mut active, done);
  }
}

fn reap(
  active: &mut HashMap<(i32, NaiveDateTime), ()>,
  done: Result<(i32, NaiveDateTime, SubmissionVerdict), tokio::task::JoinError>,
) {
  match done {
    Ok((id, dispatched_at, verdict)) => {
      active.remove(&(id, dispatched_at));
      info!(submission = id, dispatched_at = %dispatched_at, verdict = %verdict, "job finished");
    }
    Err(err) => error!(error = %err, "judge task panicked"),
  }
}
