use std::{
    io::ErrorKind,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use anyhow::Context;
use tempfile::TempPath;
use tokio::process::{Child, Command};
use tracing::{level_filters::LevelFilter, trace};

use crate::workers::{Role, WorkerSpec, LOG_FILE_ENV, LOG_LEVEL_ENV, WORKER_ENV};

/// A worker process tracked by the supervisor.
#[derive(Debug)]
pub struct WorkerHandle {
    pid: u32,
    role: Role,
    description: String,
    child: Option<Child>,
    temp_file: Option<TempPath>,
    exited: bool,
}

impl WorkerHandle {
    pub fn new(pid: u32, role: Role, description: impl Into<String>) -> Self {
        Self {
            pid,
            role,
            description: description.into(),
            child: None,
            temp_file: None,
            exited: false,
        }
    }

    /// Tracks a spawned child; its pid is taken from the process.
    pub fn from_child(child: Child, role: Role, description: impl Into<String>) -> anyhow::Result<Self> {
        let pid = child
            .id()
            .context("Worker exited before its pid could be recorded")?;
        let mut handle = Self::new(pid, role, description);
        handle.child = Some(child);
        Ok(handle)
    }

    /// Hands the temporary file over to this handle; it is deleted with the handle.
    pub fn with_temp_file(mut self, temp: Option<TempPath>) -> Self {
        self.temp_file = temp;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn temp_file(&self) -> Option<&Path> {
        self.temp_file.as_deref()
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    pub(super) fn mark_exited(&mut self) {
        self.exited = true;
    }

    pub(super) fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    pub(super) fn into_temp_file(self) -> Option<TempPath> {
        self.temp_file
    }
}

/// Delivers termination requests to worker processes.
pub trait Signaller {
    fn terminate(&mut self, pid: u32) -> std::io::Result<()>;
}

/// Sends SIGTERM; a process that is already gone is not an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sigterm;

impl Signaller for Sigterm {
    fn terminate(&mut self, pid: u32) -> std::io::Result<()> {
        // kill only delivers a signal and has no memory safety implications
        if unsafe { libc::kill(pid as i32, libc::SIGTERM) } == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }
}

/// Spawns workers by re-executing `binary` with a [`WorkerSpec`] in the environment.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    pub binary: PathBuf,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl WorkerLauncher {
    pub fn spawn(&self, spec: &WorkerSpec) -> anyhow::Result<WorkerHandle> {
        let description = spec.description();
        trace!("Spawn {description} from {:?}", self.binary);

        let mut command = Command::new(&self.binary);
        command
            .env(WORKER_ENV, spec.to_env_value()?)
            .env(LOG_LEVEL_ENV, self.log_level.to_string())
            .env_remove(LOG_FILE_ENV)
            .stdin(Stdio::null());
        if let Some(path) = &self.log_file {
            command.env(LOG_FILE_ENV, path);
        }

        let child = command
            .spawn()
            .with_context(|| format!("Spawn {description}"))?;
        WorkerHandle::from_child(child, spec.role(), description)
    }
}

pub fn describe_exit(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => match status.signal() {
            Some(signal) => format!("exited with signal {signal}"),
            None => format!("exited with status {}", status.code().unwrap_or(-1)),
        },
        Err(e) if e.kind() == ErrorKind::Interrupted => "wait was interrupted".to_string(),
        Err(e) => format!("could not be waited for: {e}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn sigterm_stops_process() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let mut handle = WorkerHandle::from_child(child, Role::CpuSpinner, "sleeper").unwrap();

        Sigterm.terminate(handle.pid()).unwrap();

        let status = handle.child_mut().unwrap().wait().await.unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
        assert_eq!(
            describe_exit(&Ok(status)),
            format!("exited with signal {}", libc::SIGTERM)
        );
    }

    #[tokio::test]
    async fn sigterm_to_reaped_process_is_ok() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        let status = child.wait().await.unwrap();

        assert_eq!(describe_exit(&Ok(status)), "exited with status 0");
        // the pid is gone after the wait; ESRCH is swallowed
        Sigterm.terminate(pid).unwrap();
    }

    #[tokio::test]
    async fn launcher_passes_spec_in_environment() {
        let launcher = WorkerLauncher {
            binary: PathBuf::from("sh"),
            log_level: LevelFilter::DEBUG,
            log_file: None,
        };
        let spec = WorkerSpec::MemStirrer(crate::config::MemoryConfig::default());

        // `sh` without arguments reads its script from stdin, which is null
        let mut handle = launcher.spawn(&spec).unwrap();
        assert_eq!(handle.role(), Role::MemStirrer);
        assert_eq!(handle.description(), "mem stirrer");
        assert!(handle.pid() > 0);

        let status = handle.child_mut().unwrap().wait().await.unwrap();
        assert!(status.success());
    }

    #[test]
    fn temp_file_is_deleted_with_handle() {
        let tmp_dir = tempdir::TempDir::new("handle-test").unwrap();
        let temp = crate::utils::directory::create_temp_file_in(tmp_dir.path()).unwrap();
        let path = temp.to_path_buf();

        let handle = WorkerHandle::new(1, Role::DiskChurner, "disk churn").with_temp_file(Some(temp));
        assert_eq!(handle.temp_file(), Some(path.as_path()));
        assert!(!handle.has_exited());
        assert!(path.exists());

        drop(handle);
        assert!(!path.exists());
    }
}
