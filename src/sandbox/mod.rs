mod driver;
mod task;

pub use {
  driver::{Container, ContainerSpec, Error, ExecOutput, Volume, VolumeMount},
  task::{TaskSpec, WatchdogReport},
};
