pub mod busy_time;
pub mod cpu_count;
pub mod directory;
pub mod units;
