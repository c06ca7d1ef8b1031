use std::{fs::OpenOptions, path::Path, path::PathBuf, sync::Mutex};

use anyhow::Context;
use lookbusy::{
    commands::{arguments::Arguments, run::command_run},
    workers::{WorkerSpec, LOG_FILE_ENV, LOG_LEVEL_ENV, WORKER_ENV},
};
use structopt::StructOpt;
use tracing::{error, level_filters::LevelFilter};

fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> anyhow::Result<()> {
    match log_file {
        Some(path) => {
            // appending, since all worker processes share this file
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Open log file {path:?}"))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

/// Entry point of the processes spawned by the supervisor.
fn run_worker(spec: &str) -> anyhow::Result<()> {
    let level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::INFO);
    let log_file = std::env::var_os(LOG_FILE_ENV).map(PathBuf::from);
    init_logging(level, log_file.as_deref())?;

    let spec = WorkerSpec::from_env_value(spec).context("Malformed worker description")?;
    match spec.run() {
        Ok(never) => match never {},
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1)
        }
    }
}

fn main() -> anyhow::Result<()> {
    if let Ok(spec) = std::env::var(WORKER_ENV) {
        return run_worker(&spec);
    }

    let opts = Arguments::from_args();
    init_logging(opts.common.log_level(), opts.common.log_file.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Start async runtime")?;
    let result = runtime.block_on(command_run(&opts));
    drop(runtime);

    let code = match result {
        Ok(reason) => reason.exit_code(),
        Err(e) => {
            error!("{e:#}");
            1
        }
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
