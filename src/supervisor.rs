//! Spawns one process per worker, waits for a stop request or a dying
//! worker, and tears the whole group down.

pub mod handle;

use std::{future::Future, io::ErrorKind, path::PathBuf};

use anyhow::Context;
use derive_builder::Builder;
use futures_util::{stream::FuturesUnordered, StreamExt};
use tempfile::TempPath;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};

use crate::{
    config::LoadConfig,
    utils::directory::DiskTarget,
    workers::{disk::DiskChurnerConfig, WorkerSpec},
};

pub use self::handle::{Sigterm, Signaller, WorkerHandle, WorkerLauncher};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    #[default]
    Idle,
    Spawning,
    Running,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Stopped on request
    Terminated,
    /// A worker died on its own and took the rest down with it
    WorkerExited {
        pid: u32,
        description: String,
        status: String,
    },
}

impl ExitReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Terminated => 0,
            Self::WorkerExited { .. } => 1,
        }
    }
}

#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct Supervisor {
    config: LoadConfig,

    /// Executable started for every worker; normally our own binary
    #[builder(setter(into))]
    worker_binary: PathBuf,

    #[builder(default = "LevelFilter::INFO")]
    log_level: LevelFilter,

    #[builder(default)]
    log_file: Option<PathBuf>,

    #[builder(default = "Box::new(Sigterm)")]
    signaller: Box<dyn Signaller + Send>,

    #[builder(setter(skip))]
    state: SupervisorState,

    #[builder(setter(skip))]
    workers: Vec<WorkerHandle>,
}

impl Supervisor {
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Spawns all workers, then supervises them until SIGTERM or SIGINT arrives
    /// or one of them exits.
    pub async fn run(&mut self) -> anyhow::Result<ExitReason> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Install SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("Install SIGINT handler")?;

        let stop = async move {
            tokio::select! {
                _ = sigterm.recv() => debug!("received SIGTERM"),
                _ = sigint.recv() => debug!("received SIGINT"),
            }
        };

        self.run_until(stop).await
    }

    pub async fn run_until(&mut self, stop: impl Future<Output = ()>) -> anyhow::Result<ExitReason> {
        self.spawn_workers()?;
        Ok(self.supervise(stop).await)
    }

    /// Starts CPU spinners, then disk churners, then the memory stirrer.
    /// If any of them fails to start, the ones already running are torn down.
    pub fn spawn_workers(&mut self) -> anyhow::Result<()> {
        self.state = SupervisorState::Spawning;

        if let Err(e) = self.spawn_all() {
            self.shutdown();
            return Err(e);
        }

        if self.workers.is_empty() {
            warn!("no load requested; waiting for termination");
        }
        self.state = SupervisorState::Running;
        Ok(())
    }

    fn spawn_all(&mut self) -> anyhow::Result<()> {
        let launcher = WorkerLauncher {
            binary: self.worker_binary.clone(),
            log_level: self.log_level,
            log_file: self.log_file.clone(),
        };
        let config = self.config.clone();

        let cpu = config.cpu();
        if cpu.is_enabled() {
            info!(
                "spinning {} CPUs ({:?}, {}-{}%)",
                cpu.count, cpu.mode, cpu.low, cpu.high
            );
            for _ in 0..cpu.count {
                let handle = launcher.spawn(&WorkerSpec::CpuSpinner(cpu.clone()))?;
                self.track(handle);
            }
        }

        let disk = config.disk();
        if disk.is_enabled() {
            for path in &disk.paths {
                let target = DiskTarget::resolve(path)?;
                let spec = WorkerSpec::DiskChurner(DiskChurnerConfig::for_path(
                    disk,
                    target.path.clone(),
                ));

                // on failure, dropping the target deletes its temporary file
                let handle = launcher.spawn(&spec)?;
                self.track(handle.with_temp_file(target.temp));
            }
        }

        let memory = config.memory();
        if memory.is_enabled() {
            let handle = launcher.spawn(&WorkerSpec::MemStirrer(memory.clone()))?;
            self.track(handle);
        }

        Ok(())
    }

    pub(crate) fn track(&mut self, handle: WorkerHandle) {
        info!(
            "started {} (pid {})",
            handle.description(),
            handle.pid()
        );
        self.workers.push(handle);
    }

    async fn supervise(&mut self, stop: impl Future<Output = ()>) -> ExitReason {
        let exited = {
            let mut waits: FuturesUnordered<_> = self
                .workers
                .iter_mut()
                .enumerate()
                .filter_map(|(index, worker)| {
                    worker
                        .child_mut()
                        .map(|child| async move { (index, child.wait().await) })
                })
                .collect();

            tokio::select! {
                _ = stop => None,
                Some(exit) = waits.next() => Some(exit),
            }
        };

        let reason = match exited {
            None => {
                info!("termination requested");
                ExitReason::Terminated
            }
            Some((index, status)) => {
                let worker = &mut self.workers[index];
                worker.mark_exited();

                let status = handle::describe_exit(&status);
                error!("{} (pid {}) {status}", worker.description(), worker.pid());
                ExitReason::WorkerExited {
                    pid: worker.pid(),
                    description: worker.description().to_string(),
                    status,
                }
            }
        };

        self.shutdown();
        reason
    }

    /// Signals every live worker once, then deletes the temporary files we created.
    /// Does not wait for the workers to exit. Calling it again does nothing.
    pub fn shutdown(&mut self) {
        if matches!(
            self.state,
            SupervisorState::ShuttingDown | SupervisorState::Terminated
        ) {
            return;
        }
        self.state = SupervisorState::ShuttingDown;

        let workers = std::mem::take(&mut self.workers);
        for worker in workers.iter().filter(|w| !w.has_exited()) {
            info!("killing {} (pid {})", worker.description(), worker.pid());
            if let Err(e) = self.signaller.terminate(worker.pid()) {
                warn!("Couldn't signal pid {}: {e}", worker.pid());
            }
        }

        for temp in workers.into_iter().filter_map(WorkerHandle::into_temp_file) {
            remove_temp_file(temp);
        }

        self.state = SupervisorState::Terminated;
    }
}

fn remove_temp_file(temp: TempPath) {
    debug!("removing {:?}", &*temp);
    let path = temp.to_path_buf();
    match temp.close() {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => error!("Couldn't remove {path:?}: {e}"),
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use tempdir::TempDir;
    use tokio::process::Command;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        config::{CpuConfigBuilder, DiskConfigBuilder, MemoryConfig, MemoryConfigBuilder},
        utils::directory::create_temp_file_in,
        workers::Role,
    };

    const PREFIX: &str = "supervisor-test";

    #[derive(Clone, Default)]
    struct RecordingSignaller(Arc<Mutex<Vec<u32>>>);

    impl RecordingSignaller {
        fn signalled(&self) -> Vec<u32> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Signaller for RecordingSignaller {
        fn terminate(&mut self, pid: u32) -> std::io::Result<()> {
            self.0.lock().unwrap().push(pid);
            Ok(())
        }
    }

    fn idle_config() -> LoadConfig {
        let cpu = CpuConfigBuilder::default().count(0).build().unwrap();
        LoadConfig::new(cpu, MemoryConfig::default(), Default::default()).unwrap()
    }

    fn supervisor(config: LoadConfig, binary: &str, signaller: &RecordingSignaller) -> Supervisor {
        SupervisorBuilder::default()
            .config(config)
            .worker_binary(binary)
            .signaller(Box::new(signaller.clone()))
            .build()
            .unwrap()
    }

    #[traced_test]
    #[test]
    fn shutdown_signals_each_worker_once() {
        let tmp_dir = TempDir::new(PREFIX).unwrap();
        let temp = create_temp_file_in(tmp_dir.path()).unwrap();
        let temp_file = temp.to_path_buf();

        let signaller = RecordingSignaller::default();
        let mut supervisor = supervisor(idle_config(), "true", &signaller);

        for pid in 101..104 {
            supervisor.track(WorkerHandle::new(pid, Role::CpuSpinner, "CPU spinner"));
        }
        supervisor.track(
            WorkerHandle::new(104, Role::DiskChurner, "disk churn")
                .with_temp_file(Some(temp)),
        );

        supervisor.shutdown();
        assert_eq!(signaller.signalled(), vec![101, 102, 103, 104]);
        assert!(supervisor.workers().is_empty());
        assert!(!temp_file.exists());
        assert_eq!(supervisor.state(), SupervisorState::Terminated);
        assert!(logs_contain("killing disk churn (pid 104)"));

        supervisor.shutdown();
        assert_eq!(signaller.signalled().len(), 4);
    }

    #[test]
    fn missing_temp_file_is_fine() {
        let tmp_dir = TempDir::new(PREFIX).unwrap();
        let signaller = RecordingSignaller::default();
        let mut supervisor = supervisor(idle_config(), "true", &signaller);

        let temp = create_temp_file_in(tmp_dir.path()).unwrap();
        std::fs::remove_file(&*temp).unwrap();
        supervisor.track(
            WorkerHandle::new(7, Role::DiskChurner, "disk churn").with_temp_file(Some(temp)),
        );
        supervisor.shutdown();

        assert_eq!(signaller.signalled(), vec![7]);
        assert_eq!(supervisor.state(), SupervisorState::Terminated);
    }

    #[tokio::test]
    async fn spawns_workers_in_order() {
        let tmp_dir = TempDir::new(PREFIX).unwrap();
        let cpu = CpuConfigBuilder::default().count(2).build().unwrap();
        let memory = MemoryConfigBuilder::default().size(4096).build().unwrap();
        let disk = DiskConfigBuilder::default()
            .size(64 * 1024)
            .paths(vec![tmp_dir.path().to_path_buf()])
            .build()
            .unwrap();
        let config = LoadConfig::new(cpu, memory, disk).unwrap();

        let signaller = RecordingSignaller::default();
        let mut supervisor = supervisor(config, "true", &signaller);
        supervisor.spawn_workers().unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);

        let roles: Vec<_> = supervisor.workers().iter().map(|w| w.role()).collect();
        assert_eq!(
            roles,
            vec![
                Role::CpuSpinner,
                Role::CpuSpinner,
                Role::DiskChurner,
                Role::MemStirrer
            ]
        );

        let temp_file = supervisor.workers()[2].temp_file().unwrap().to_path_buf();
        assert_eq!(temp_file.parent().unwrap(), tmp_dir.path());
        assert!(temp_file.exists());

        supervisor.shutdown();
        assert_eq!(signaller.signalled().len(), 4);
        assert!(!temp_file.exists());
    }

    #[tokio::test]
    async fn spawn_failure_cleans_up() {
        let tmp_dir = TempDir::new(PREFIX).unwrap();
        let cpu = CpuConfigBuilder::default().count(0).build().unwrap();
        let disk = DiskConfigBuilder::default()
            .size(64 * 1024)
            .paths(vec![tmp_dir.path().to_path_buf()])
            .build()
            .unwrap();
        let config = LoadConfig::new(cpu, MemoryConfig::default(), disk).unwrap();

        let signaller = RecordingSignaller::default();
        let mut supervisor = supervisor(config, "/nonexistent/lookbusy", &signaller);

        assert!(supervisor.spawn_workers().is_err());
        assert_eq!(supervisor.state(), SupervisorState::Terminated);
        assert!(supervisor.workers().is_empty());
        assert_eq!(std::fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn worker_exit_tears_down_the_rest() {
        let signaller = RecordingSignaller::default();
        let mut supervisor = supervisor(idle_config(), "true", &signaller);

        let failing = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let failing = WorkerHandle::from_child(failing, Role::DiskChurner, "disk churn").unwrap();
        let failing_pid = failing.pid();
        let sleeper = Command::new("sleep").arg("30").spawn().unwrap();
        let sleeper = WorkerHandle::from_child(sleeper, Role::CpuSpinner, "CPU spinner").unwrap();
        let sleeper_pid = sleeper.pid();

        supervisor.track(failing);
        supervisor.track(sleeper);

        let reason = supervisor.supervise(std::future::pending()).await;
        assert_eq!(
            reason,
            ExitReason::WorkerExited {
                pid: failing_pid,
                description: "disk churn".to_string(),
                status: "exited with status 3".to_string(),
            }
        );
        assert_eq!(reason.exit_code(), 1);
        assert_eq!(signaller.signalled(), vec![sleeper_pid]);

        Sigterm.terminate(sleeper_pid).unwrap();
    }

    #[tokio::test]
    async fn stop_request_terminates() {
        let signaller = RecordingSignaller::default();
        let mut supervisor = supervisor(idle_config(), "true", &signaller);

        let sleeper = Command::new("sleep").arg("30").spawn().unwrap();
        let sleeper = WorkerHandle::from_child(sleeper, Role::MemStirrer, "mem stirrer").unwrap();
        let sleeper_pid = sleeper.pid();
        supervisor.track(sleeper);

        let reason = supervisor.supervise(std::future::ready(())).await;
        assert_eq!(reason, ExitReason::Terminated);
        assert_eq!(reason.exit_code(), 0);
        assert_eq!(signaller.signalled(), vec![sleeper_pid]);
        assert_eq!(supervisor.state(), SupervisorState::Terminated);

        Sigterm.terminate(sleeper_pid).unwrap();
    }

    #[tokio::test]
    async fn run_until_without_load() {
        let signaller = RecordingSignaller::default();
        let mut supervisor = supervisor(idle_config(), "true", &signaller);

        let reason = supervisor.run_until(std::future::ready(())).await.unwrap();
        assert_eq!(reason, ExitReason::Terminated);
        assert!(signaller.signalled().is_empty());
    }
}
