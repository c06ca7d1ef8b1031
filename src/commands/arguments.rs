use std::path::PathBuf;

use anyhow::Context;
use structopt::StructOpt;
use tracing::{level_filters::LevelFilter, warn};

use crate::{
    config::{ClockReference, CpuConfig, CpuMode, DiskConfig, LoadConfig, MemoryConfig},
    utils::{
        cpu_count::detect_cpu_count,
        units::{parse_size, parse_timespan, PercentRange},
    },
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "lookbusy",
    about = "Keeps CPUs, memory and disks busy at a configurable level"
)]
pub struct Arguments {
    #[structopt(flatten)]
    pub common: CommonOpts,

    #[structopt(flatten)]
    pub cpu: CpuOpts,

    #[structopt(flatten)]
    pub memory: MemoryOpts,

    #[structopt(flatten)]
    pub disk: DiskOpts,
}

impl Arguments {
    /// Builds the validated load description, either from `--config` or from the flags.
    pub fn to_load_config(&self) -> anyhow::Result<LoadConfig> {
        if let Some(path) = &self.common.config {
            return LoadConfig::load_from_path(path)
                .with_context(|| format!("Load configuration from {path:?}"));
        }

        Ok(LoadConfig::new(
            self.cpu.to_config(),
            self.memory.to_config(),
            self.disk.to_config(),
        )?)
    }
}

////////////////////

#[derive(Clone, Debug, StructOpt)]
pub struct CommonOpts {
    #[structopt(
        short = "-v",
        long = "verbose",
        parse(from_occurrences),
        help = "More output; repeat for even more"
    )]
    pub verbose: u8,

    #[structopt(short = "-q", long, help = "Only report errors")]
    pub quiet: bool,

    #[structopt(long, help = "Write log to this file instead of stderr")]
    pub log_file: Option<PathBuf>,

    #[structopt(
        long,
        help = "Read the whole load description from a JSON file; the load flags are ignored"
    )]
    pub config: Option<PathBuf>,
}

impl CommonOpts {
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::ERROR;
        }
        match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

////////////////////

#[derive(Clone, Debug, StructOpt)]
pub struct CpuOpts {
    #[structopt(
        short = "-c",
        long,
        help = "Utilization per CPU in percent, or a range L-H for curve mode",
        default_value = "50"
    )]
    pub cpu_util: PercentRange,

    #[structopt(
        short = "-n",
        long,
        help = "Number of CPUs to keep busy; 0 disables CPU load [default: all]"
    )]
    pub ncpus: Option<usize>,

    #[structopt(
        short = "-r",
        long,
        help = "Utilization mode: 'fixed' or 'curve'",
        default_value = "fixed"
    )]
    pub cpu_mode: CpuMode,

    #[structopt(
        short = "-p",
        long,
        help = "Offset of peak utilization within the curve period, e.g. 13h",
        default_value = "13h",
        parse(try_from_str = parse_timespan)
    )]
    pub cpu_curve_peak: u64,

    #[structopt(
        short = "-P",
        long,
        help = "Duration of the utilization curve, e.g. 1d",
        default_value = "1d",
        parse(try_from_str = parse_timespan)
    )]
    pub cpu_curve_period: u64,

    #[structopt(short = "-u", long, help = "Follow the curve in UTC instead of local time")]
    pub utc: bool,
}

impl CpuOpts {
    pub fn to_config(&self) -> CpuConfig {
        let PercentRange { low, mut high } = self.cpu_util;
        if self.cpu_mode == CpuMode::Fixed && low != high {
            warn!("fixed CPU mode does not take a range; using {low}%");
            high = low;
        }

        CpuConfig {
            mode: self.cpu_mode,
            low,
            high,
            count: self.ncpus.unwrap_or_else(detect_cpu_count),
            curve_period_secs: self.cpu_curve_period,
            curve_peak_secs: self.cpu_curve_peak,
            clock: if self.utc {
                ClockReference::Utc
            } else {
                ClockReference::Local
            },
        }
    }
}

////////////////////

#[derive(Clone, Debug, StructOpt)]
pub struct MemoryOpts {
    #[structopt(
        short = "-m",
        long,
        help = "Amount of memory to churn, e.g. 512MB",
        default_value = "0",
        parse(try_from_str = parse_size)
    )]
    pub mem_util: u64,

    #[structopt(
        short = "-M",
        long,
        help = "Microseconds to sleep between page copies",
        default_value = "1000"
    )]
    pub mem_sleep: u64,
}

impl MemoryOpts {
    pub fn to_config(&self) -> MemoryConfig {
        MemoryConfig {
            size: self.mem_util,
            sleep_usec: self.mem_sleep,
        }
    }
}

////////////////////

#[derive(Clone, Debug, StructOpt)]
pub struct DiskOpts {
    #[structopt(
        short = "-d",
        long,
        help = "Size of the file churned on each disk path, e.g. 1GB",
        default_value = "0",
        parse(try_from_str = parse_size)
    )]
    pub disk_util: u64,

    #[structopt(
        short = "-b",
        long,
        help = "Size of blocks read and written",
        default_value = "32KB",
        parse(try_from_str = parse_size)
    )]
    pub disk_block_size: u64,

    #[structopt(
        short = "-D",
        long,
        help = "Milliseconds to sleep between disk iterations",
        default_value = "100"
    )]
    pub disk_sleep: u64,

    #[structopt(
        short = "-f",
        long,
        help = "File or directory to churn; may be repeated [default: /tmp]",
        number_of_values = 1
    )]
    pub disk_path: Vec<PathBuf>,
}

impl DiskOpts {
    pub fn to_config(&self) -> DiskConfig {
        let defaults = DiskConfig::default();
        DiskConfig {
            size: self.disk_util,
            block_size: self.disk_block_size,
            sleep_msec: self.disk_sleep,
            paths: if self.disk_path.is_empty() {
                defaults.paths.clone()
            } else {
                self.disk_path.clone()
            },
            ..defaults
        }
    }
}
