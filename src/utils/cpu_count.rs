use std::path::Path;

use tracing::{debug, warn};

const PROC_CPUINFO: &str = "/proc/cpuinfo";

/// Number of logical processors to keep busy when none was requested explicitly.
pub fn detect_cpu_count() -> usize {
    detect_cpu_count_from(Path::new(PROC_CPUINFO))
}

fn detect_cpu_count_from(path: &Path) -> usize {
    let from_cpuinfo = match std::fs::read_to_string(path) {
        Ok(content) => count_processor_records(&content),
        Err(e) => {
            debug!("Cannot read {path:?}: {e}");
            0
        }
    };

    if from_cpuinfo > 0 {
        return from_cpuinfo;
    }

    let fallback = num_cpus::get();
    warn!("Couldn't count processors in {path:?}; assuming {fallback}. Override with --ncpus");
    fallback
}

/// Counts `processor : N` records of a cpuinfo listing.
pub fn count_processor_records(cpuinfo: &str) -> usize {
    cpuinfo
        .lines()
        .filter(|line| {
            line.split_once(':')
                .is_some_and(|(key, _)| key.trim() == "processor")
        })
        .count()
}
