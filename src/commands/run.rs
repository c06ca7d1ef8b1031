use anyhow::Context;
use tracing::{debug, info};

use crate::supervisor::{ExitReason, SupervisorBuilder};

use super::arguments::Arguments;

/// Generates the requested load until we are told to stop or a worker dies.
pub async fn command_run(opts: &Arguments) -> anyhow::Result<ExitReason> {
    let config = opts.to_load_config()?;
    debug!("Load configuration: {config:?}");

    let worker_binary =
        std::env::current_exe().context("Couldn't locate own executable for workers")?;

    let mut supervisor = SupervisorBuilder::default()
        .config(config)
        .worker_binary(worker_binary)
        .log_level(opts.common.log_level())
        .log_file(opts.common.log_file.clone())
        .build()?;

    let reason = supervisor.run().await?;
    match &reason {
        ExitReason::Terminated => info!("all workers stopped"),
        ExitReason::WorkerExited {
            description,
            status,
            ..
        } => info!("stopped all workers after {description} {status}"),
    }

    Ok(reason)
}
