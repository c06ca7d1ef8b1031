//! Load-generating worker loops, each run in its own process.
//!
//! The supervisor re-executes its own binary with a [`WorkerSpec`] serialized
//! into [`WORKER_ENV`]; the binary detects this and runs the worker instead
//! of the command line interface.

pub mod cpu;
pub mod cursor;
pub mod curve;
pub mod disk;
pub mod memory;

use std::{convert::Infallible, fmt::Display};

use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::config::{CpuConfig, MemoryConfig};

use self::{cpu::CpuController, disk::DiskChurner, disk::DiskChurnerConfig, memory::MemoryChurner};

/// Environment variable carrying the JSON encoded [`WorkerSpec`]
pub const WORKER_ENV: &str = "LOOKBUSY_WORKER";

/// Environment variable carrying the log level of worker processes
pub const LOG_LEVEL_ENV: &str = "LOOKBUSY_LOG_LEVEL";

/// Environment variable carrying the log file shared by all processes, if any
pub const LOG_FILE_ENV: &str = "LOOKBUSY_LOG_FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    CpuSpinner,
    MemStirrer,
    DiskChurner,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CpuSpinner => "CPU spinner",
            Self::MemStirrer => "mem stirrer",
            Self::DiskChurner => "disk churner",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum WorkerSpec {
    CpuSpinner(CpuConfig),
    MemStirrer(MemoryConfig),
    DiskChurner(DiskChurnerConfig),
}

impl WorkerSpec {
    pub fn role(&self) -> Role {
        match self {
            Self::CpuSpinner(_) => Role::CpuSpinner,
            Self::MemStirrer(_) => Role::MemStirrer,
            Self::DiskChurner(_) => Role::DiskChurner,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::DiskChurner(config) => format!("disk churn: {}", config.path.display()),
            _ => self.role().to_string(),
        }
    }

    pub fn to_env_value(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_env_value(value: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(value)?)
    }

    /// Runs the worker loop; only returns if the worker failed.
    pub fn run(self) -> anyhow::Result<Infallible> {
        let span = info_span!("worker", role = %self.role(), pid = std::process::id());
        let _guard = span.enter();

        match self {
            Self::CpuSpinner(config) => CpuController::try_new(&config)?.run(),
            Self::MemStirrer(config) => MemoryChurner::try_new(&config)?.run(),
            Self::DiskChurner(config) => DiskChurner::try_new(config)?.run(),
        }
    }
}
