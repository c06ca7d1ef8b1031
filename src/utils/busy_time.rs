//! Cumulative busy CPU time as accounted by the Linux kernel in `/proc/stat`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;

const PROC_STAT: &str = "/proc/stat";

#[derive(Debug, Error)]
pub enum BusyTimeError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no aggregate cpu line in {0:?}")]
    MissingCpuLine(PathBuf),

    #[error("malformed aggregate cpu line {0:?}")]
    Malformed(String),

    #[error("cannot determine clock tick frequency")]
    ClockTicks,
}

/// Anything that can report monotonically non-decreasing busy CPU time in microseconds.
pub trait BusyTimeSource {
    fn sample_busy_time(&mut self) -> Result<u64, BusyTimeError>;
}

/// Reads user+nice+system of the aggregate `cpu` line and converts jiffies to microseconds.
#[derive(Debug, Clone)]
pub struct ProcStat {
    path: PathBuf,
    ticks_per_sec: u64,
}

impl ProcStat {
    pub fn try_new() -> Result<Self, BusyTimeError> {
        Self::with_path(PROC_STAT)
    }

    pub fn with_path(path: impl AsRef<Path>) -> Result<Self, BusyTimeError> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            ticks_per_sec: clock_ticks_per_sec()?,
        })
    }

    fn jiffies_to_usec(&self, jiffies: u64) -> u64 {
        (jiffies as u128 * 1_000_000 / self.ticks_per_sec as u128) as u64
    }
}

impl BusyTimeSource for ProcStat {
    fn sample_busy_time(&mut self) -> Result<u64, BusyTimeError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| BusyTimeError::Read {
            path: self.path.clone(),
            source,
        })?;

        let line = content
            .lines()
            .find(|line| line.starts_with("cpu "))
            .ok_or_else(|| BusyTimeError::MissingCpuLine(self.path.clone()))?;

        let jiffies = parse_busy_jiffies(line)?;
        trace!("busy jiffies {jiffies} read from {:?}", self.path);
        Ok(self.jiffies_to_usec(jiffies))
    }
}

/// Sum of the first three counters (user, nice, system) of a `cpu` line.
pub fn parse_busy_jiffies(line: &str) -> Result<u64, BusyTimeError> {
    let mut fields = line.split_whitespace();
    if fields.next() != Some("cpu") {
        return Err(BusyTimeError::Malformed(line.to_string()));
    }

    let mut total = 0u64;
    for _ in 0..3 {
        let value = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(|| BusyTimeError::Malformed(line.to_string()))?;
        total = total.saturating_add(value);
    }

    Ok(total)
}

fn clock_ticks_per_sec() -> Result<u64, BusyTimeError> {
    // sysconf has no side effects and is always safe to call
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks <= 0 {
        return Err(BusyTimeError::ClockTicks);
    }
    Ok(ticks as u64)
}
