use std::{
  io,
  os::unix::fs::PermissionsExt,
  path::{Path, PathBuf},
  time,
};

use bollard::{
  container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, KillContainerOptions, LogOutput,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    UploadToContainerOptions,
  },
  exec::{CreateExecOptions, StartExecResults},
  models::{HostConfig, HostConfigLogConfig, ResourcesUlimits},
  volume::CreateVolumeOptions,
  Docker,
};
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("docker api error: {0}")]
  Docker(#[from] bollard::errors::Error),

  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("invalid host path: {0}")]
  BadPath(PathBuf),

  #[error("exec timed out after {timeout:?} ({elapsed_ms} ms observed); container killed")]
  ExecTimeout {
    timeout: time::Duration,
    elapsed_ms: i64,
  },
}

/// Ephemeral named scratch volume shared by the build and run containers of
/// one submission.
pub struct Volume {
  docker: Docker,
  pub name: String,
}

impl Volume {
  pub async fn create(docker: &Docker) -> Result<Self, Error> {
    let name = format!("volume-{}", Uuid::new_v4());
    docker
      .create_volume(CreateVolumeOptions {
        name: name.clone(),
        ..Default::default()
      })
      .await?;
    debug!(volume = %name, "created scratch volume");
    return Ok(Self {
      docker: docker.clone(),
      name,
    });
  }

  pub async fn remove(&self) -> Result<(), Error> {
    self.docker.remove_volume(&self.name, None).await?;
    debug!(volume = %self.name, "removed scratch volume");
    Ok(())
  }
}

/// Mount of a [`Volume`] into a container.
pub struct VolumeMount {
  pub volume: String,
  pub path: String,
  pub read_only: bool,
}

/// Everything needed to create one sandbox container. The container is
/// created stopped; `argv` is typically a long `sleep` that the per-case
/// execs run inside of.
pub struct ContainerSpec {
  pub image: String,
  pub argv: Vec<String>,
  pub user: String,
  pub groups: Vec<String>,
  pub memory_limit_mb: i64,
  pub stack_limit_kb: Option<i64>,
  pub pids_limit: i64,
  pub cgroup_parent: Option<String>,
  pub network_disabled: bool,
  pub workdir: String,
  pub mounts: Vec<VolumeMount>,
}

/// Result of one in-container exec.
pub struct ExecOutput {
  pub exit_code: i64,
  pub stdout: String,
  pub stderr: String,
  pub time_ms: i64,
}

/// Handle to one sandbox container. Never reused across submissions.
pub struct Container {
  docker: Docker,
  pub name: String,
}

impl Container {
  pub async fn create(docker: &Docker, spec: ContainerSpec) -> Result<Self, Error> {
    let name = format!("sandbox-{}", Uuid::new_v4());

    let ulimits: Vec<ResourcesUlimits> = spec
      .stack_limit_kb
      .into_iter()
      .map(|kb| ResourcesUlimits {
        name: Some("stack".to_string()),
        soft: Some(kb),
        hard: Some(kb),
      })
      .collect();

    let host_config = HostConfig {
      memory: Some(spec.memory_limit_mb * 1024 * 1024),
      // memory == memory_swap pins swap at zero, so the watchdog sees memory
      // pressure before the OOM killer does.
      memory_swap: Some(spec.memory_limit_mb * 1024 * 1024),
      pids_limit: Some(spec.pids_limit),
      group_add: Some(spec.groups),
      cgroup_parent: spec.cgroup_parent,
      binds: Some(
        spec
          .mounts
          .iter()
          .map(|m| {
            format!(
              "{}:{}:{}",
              m.volume,
              m.path,
              if m.read_only { "ro" } else { "rw" }
            )
          })
          .collect(),
      ),
      ulimits: if ulimits.is_empty() {
        None
      } else {
        Some(ulimits)
      },
      log_config: Some(HostConfigLogConfig {
        typ: Some("json-file".to_string()),
        config: None,
      }),
      ..Default::default()
    };

    docker
      .create_container(
        Some(CreateContainerOptions {
          name: name.clone(),
          platform: None,
        }),
        Config {
          image: Some(spec.image),
          cmd: Some(spec.argv),
          user: Some(spec.user),
          working_dir: Some(spec.workdir),
          network_disabled: Some(spec.network_disabled),
          host_config: Some(host_config),
          ..Default::default()
        },
      )
      .await?;

    debug!(container = %name, "created sandbox container");
    return Ok(Self {
      docker: docker.clone(),
      name,
    });
  }

  pub async fn start(&self) -> Result<(), Error> {
    self
      .docker
      .start_container(&self.name, None::<StartContainerOptions<String>>)
      .await?;
    debug!(container = %self.name, "started container");
    Ok(())
  }

  pub async fn restart(&self) -> Result<(), Error> {
    self
      .docker
      .restart_container(&self.name, None::<RestartContainerOptions>)
      .await?;
    Ok(())
  }

  pub async fn remove(&self) -> Result<(), Error> {
    self
      .docker
      .remove_container(
        &self.name,
        Some(RemoveContainerOptions {
          force: true,
          ..Default::default()
        }),
      )
      .await?;
    debug!(container = %self.name, "removed container");
    Ok(())
  }

  /// Upload one host file into `container_dir`, owned by `uid:gid`.
  pub async fn upload_file(
    &self,
    src: &Path,
    container_dir: &str,
    uid: u32,
    gid: u32,
  ) -> Result<(), Error> {
    let file_name = src
      .file_name()
      .ok_or_else(|| Error::BadPath(src.to_path_buf()))?;

    let mut builder = tar::Builder::new(Vec::new());
    append_with_owner(&mut builder, src, Path::new(file_name), uid, gid)?;
    self.put_archive(container_dir, builder.into_inner()?).await
  }

  /// Upload a whole host directory tree into `container_root`, every file
  /// owned by `uid:gid`. Relative layout is preserved.
  pub async fn upload_tree(
    &self,
    src_root: &Path,
    container_root: &str,
    uid: u32,
    gid: u32,
  ) -> Result<(), Error> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut stack = vec![src_root.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
          stack.push(path);
        } else if file_type.is_file() {
          let arcname = path
            .strip_prefix(src_root)
            .map_err(|_| Error::BadPath(path.clone()))?
            .to_path_buf();
          append_with_owner(&mut builder, &path, &arcname, uid, gid)?;
        }
      }
    }

    self
      .put_archive(container_root, builder.into_inner()?)
      .await
  }

  /// Download one file out of the container into `host_dir`.
  pub async fn download_file(&self, container_path: &str, host_dir: &Path) -> Result<(), Error> {
    let mut stream = std::pin::pin!(self.docker.download_from_container(
      &self.name,
      Some(DownloadFromContainerOptions {
        path: container_path.to_string(),
      }),
    ));

    let mut archive = Vec::new();
    while let Some(chunk) = stream.next().await {
      archive.extend_from_slice(&chunk?);
    }

    tar::Archive::new(archive.as_slice()).unpack(host_dir)?;
    Ok(())
  }

  /// Run `argv` inside the container and capture its output.
  ///
  /// `timeout` is a host-side wall-clock ceiling; when it elapses the whole
  /// container is killed and `Error::ExecTimeout` is returned with the
  /// observed duration. Safe to call concurrently on distinct containers;
  /// serialization within one container is the caller's business.
  pub async fn exec(
    &self,
    argv: Vec<String>,
    user: &str,
    workdir: &str,
    timeout: time::Duration,
  ) -> Result<ExecOutput, Error> {
    let exec = self
      .docker
      .create_exec(
        &self.name,
        CreateExecOptions {
          cmd: Some(argv),
          user: Some(user.to_string()),
          working_dir: Some(workdir.to_string()),
          attach_stdout: Some(true),
          attach_stderr: Some(true),
          ..Default::default()
        },
      )
      .await?;

    let started = time::Instant::now();
    let mut stdout = String::new();
    let mut stderr = String::new();

    if let StartExecResults::Attached { mut output, .. } =
      self.docker.start_exec(&exec.id, None).await?
    {
      let drain = async {
        while let Some(msg) = output.next().await {
          match msg? {
            LogOutput::StdOut { message } => stdout.push_str(&String::from_utf8_lossy(&message)),
            LogOutput::StdErr { message } => stderr.push_str(&String::from_utf8_lossy(&message)),
            _ => {}
          }
        }
        Ok::<(), bollard::errors::Error>(())
      };

      match tokio::time::timeout(timeout, drain).await {
        Ok(res) => res?,
        Err(_) => {
          info!(container = %self.name, "exec deadline reached, killing container");
          let _ = self
            .docker
            .kill_container(&self.name, None::<KillContainerOptions<String>>)
            .await;
          return Err(Error::ExecTimeout {
            timeout,
            elapsed_ms: started.elapsed().as_millis() as i64,
          });
        }
      }
    }

    let inspect = self.docker.inspect_exec(&exec.id).await?;

    return Ok(ExecOutput {
      exit_code: inspect.exit_code.unwrap_or(-1),
      stdout,
      stderr,
      time_ms: started.elapsed().as_millis() as i64,
    });
  }

  async fn put_archive(&self, container_dir: &str, archive: Vec<u8>) -> Result<(), Error> {
    self
      .docker
      .upload_to_container(
        &self.name,
        Some(UploadToContainerOptions {
          path: container_dir.to_string(),
          ..Default::default()
        }),
        archive.into(),
      )
      .await?;
    Ok(())
  }
}

fn append_with_owner(
  builder: &mut tar::Builder<Vec<u8>>,
  src: &Path,
  arcname: &Path,
  uid: u32,
  gid: u32,
) -> Result<(), io::Error> {
  let data = std::fs::read(src)?;
  let mode = std::fs::metadata(src)?.permissions().mode() & 0o7777;

  let mut header = tar::Header::new_gnu();
  header.set_size(data.len() as u64);
  header.set_mode(mode);
  header.set_uid(uid as u64);
  header.set_gid(gid as u64);
  header.set_mtime(0);
  builder.append_data(&mut header, arcname, data.as_slice())?;
  Ok(())
}
