pub mod commands;
pub mod config;
pub mod supervisor;
pub mod utils;
pub mod workers;
