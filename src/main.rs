#[cfg(test)]
mod test;

pub mod args;
pub mod checker;
pub mod db;
pub mod etc;
pub mod logging;
pub mod pipeline;
pub mod runner;
pub mod sandbox;
pub mod scheduler;
pub mod verdict;

use std::error::Error;

use bollard::Docker;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

pub use crate::{args::ARGS, etc::CONFIG};

#[macro_use]
extern crate lazy_static;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
  let _log_guards = logging::init();

  let pool = PgPoolOptions::new()
    .max_connections(CONFIG.judge.workers as u32 + 2)
    .connect(&CONFIG.db_url)
    .await?;
  let docker = Docker::connect_with_local_defaults()?;

  // Whatever a previous process left `running` is re-queued and its partial
  // results discarded before any worker starts.
  db::crud::recover_running(&pool).await?;

  let manager = scheduler::JobManager::start(pool, docker);
  info!("judge scheduler started");

  tokio::signal::ctrl_c().await?;
  info!("shutdown signal received, draining in-flight jobs");
  manager.stop().await;
  info!("judge scheduler stopped");

  return Ok(());
}
