use clap::Parser;
use tracing::info;

use crate::agent::run_agent;
use crate::args::{Cli, Command};
use crate::config::{agent_settings, console_settings, load_config, proxy_settings};
use crate::console::run_console;
use crate::error::AppResult;
use crate::proxy::run_proxy;
use crate::shutdown_handlers::{setup_signal_shutdown_handler, shutdown_channel};

/// Parses the command line, installs logging and runs the chosen role on a
/// multi-threaded runtime until it finishes or a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error when arguments or configuration are invalid, or when the
/// role fails.
pub fn run() -> AppResult<()> {
    let cli = Cli::parse();

    crate::logger::init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(&cli))
}

async fn run_async(cli: &Cli) -> AppResult<()> {
    let config = load_config(cli.config.as_deref())?.unwrap_or_default();

    let (shutdown_tx, _shutdown_rx) = shutdown_channel();
    let signal_handler = setup_signal_shutdown_handler(&shutdown_tx);

    let result = match &cli.command {
        Command::Console(args) => {
            let settings = console_settings(args, config.console.as_ref())?;
            run_console(settings, &shutdown_tx).await
        }
        Command::Agent(args) => {
            let settings = agent_settings(args, config.agent.as_ref())?;
            run_agent(settings, &shutdown_tx).await
        }
        Command::Proxy(args) => {
            let settings = proxy_settings(args, config.proxy.as_ref())?;
            run_proxy(settings, &shutdown_tx).await
        }
    };

    drop(shutdown_tx.send(()));
    signal_handler.abort();
    info!("Stopped");
    result
}
