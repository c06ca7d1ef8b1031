use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::cpu_count::detect_cpu_count;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("CPU utilization range {low}-{high}% is inverted")]
    InvertedRange { low: u8, high: u8 },

    #[error("CPU utilization of {0}% exceeds 100%")]
    AboveHundredPercent(u8),

    #[error("Fixed CPU usage mode requires a single utilization, but {low}-{high}% was given")]
    RangeInFixedMode { low: u8, high: u8 },

    #[error("CPU curve period must be positive")]
    ZeroPeriod,

    #[error("Peak of CPU usage curve is outside curve period ({peak}s > {period}s)")]
    PeakOutsidePeriod { peak: u64, period: u64 },

    #[error("Disk utilization block size must be at least 4 bytes, got {0}")]
    BlockTooSmall(u64),

    #[error("Disk utilization size must be at least equal to the block size ({size} < {block})")]
    DiskSmallerThanBlock { size: u64, block: u64 },

    #[error("Disk step size must be positive")]
    ZeroStep,

    #[error("Disk load requested but no disk path given")]
    NoDiskPaths,

    #[error("Unrecognized CPU utilization mode {0:?}; choose one of 'fixed' or 'curve'")]
    UnknownCpuMode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuMode {
    #[default]
    Fixed,
    Curve,
}

impl FromStr for CpuMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "curve" => Ok(Self::Curve),
            _ => Err(ConfigError::UnknownCpuMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockReference {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(default)]
#[serde(default)]
pub struct CpuConfig {
    pub mode: CpuMode,
    /// Lower end of the utilization range in percent
    pub low: u8,
    /// Upper end of the utilization range in percent; equals `low` in fixed mode
    pub high: u8,
    /// Number of CPU spinners; 0 disables CPU load
    pub count: usize,
    pub curve_period_secs: u64,
    /// Offset of peak utilization within the curve period
    pub curve_peak_secs: u64,
    pub clock: ClockReference,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            mode: CpuMode::Fixed,
            low: 50,
            high: 50,
            count: detect_cpu_count(),
            curve_period_secs: 24 * 60 * 60,
            curve_peak_secs: 13 * 60 * 60, // 1PM
            clock: ClockReference::Local,
        }
    }
}

impl CpuConfig {
    pub fn is_enabled(&self) -> bool {
        self.count > 0 && self.high > 0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.low > self.high {
            return Err(ConfigError::InvertedRange {
                low: self.low,
                high: self.high,
            });
        }
        if self.high > 100 {
            return Err(ConfigError::AboveHundredPercent(self.high));
        }
        if self.mode == CpuMode::Fixed && self.low != self.high {
            return Err(ConfigError::RangeInFixedMode {
                low: self.low,
                high: self.high,
            });
        }
        if self.curve_period_secs == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.curve_peak_secs > self.curve_period_secs {
            return Err(ConfigError::PeakOutsidePeriod {
                peak: self.curve_peak_secs,
                period: self.curve_period_secs,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(default)]
#[serde(default)]
pub struct MemoryConfig {
    /// Bytes to keep resident; 0 disables memory load
    pub size: u64,
    pub sleep_usec: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            size: 0,
            sleep_usec: 1000,
        }
    }
}

impl MemoryConfig {
    pub fn is_enabled(&self) -> bool {
        self.size > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(default)]
#[serde(default)]
pub struct DiskConfig {
    /// Size of the churned file per path; 0 disables disk load
    pub size: u64,
    pub block_size: u64,
    pub step_size: u64,
    pub sleep_msec: u64,
    /// Files or directories; a temporary file is created inside directories
    pub paths: Vec<PathBuf>,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            size: 0,
            block_size: 32 * 1024,
            step_size: 4 * 1024,
            sleep_msec: 100,
            paths: vec![PathBuf::from("/tmp")],
        }
    }
}

impl DiskConfig {
    pub fn is_enabled(&self) -> bool {
        self.size > 0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_enabled() {
            return Ok(());
        }
        if self.block_size < 4 {
            return Err(ConfigError::BlockTooSmall(self.block_size));
        }
        if self.size < self.block_size {
            return Err(ConfigError::DiskSmallerThanBlock {
                size: self.size,
                block: self.block_size,
            });
        }
        if self.step_size == 0 {
            return Err(ConfigError::ZeroStep);
        }
        if self.paths.is_empty() {
            return Err(ConfigError::NoDiskPaths);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct UncheckedLoadConfig {
    cpu: CpuConfig,
    memory: MemoryConfig,
    disk: DiskConfig,
}

/// Complete, validated description of the load to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedLoadConfig")]
pub struct LoadConfig {
    cpu: CpuConfig,
    memory: MemoryConfig,
    disk: DiskConfig,
}

impl TryFrom<UncheckedLoadConfig> for LoadConfig {
    type Error = ConfigError;

    fn try_from(value: UncheckedLoadConfig) -> Result<Self, Self::Error> {
        Self::new(value.cpu, value.memory, value.disk)
    }
}

impl LoadConfig {
    pub fn new(cpu: CpuConfig, memory: MemoryConfig, disk: DiskConfig) -> Result<Self, ConfigError> {
        cpu.validate()?;
        disk.validate()?;
        Ok(Self { cpu, memory, disk })
    }

    pub fn cpu(&self) -> &CpuConfig {
        &self.cpu
    }

    pub fn memory(&self) -> &MemoryConfig {
        &self.memory
    }

    pub fn disk(&self) -> &DiskConfig {
        &self.disk
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn store_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
