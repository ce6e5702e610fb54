use anyhow::Result;
use clap::Parser;

use agent_relay::cli::commands::agent::{AgentErrorCommand, AgentStatusCommand, HeartbeatCommand};
use agent_relay::cli::commands::init::InitCommand;
use agent_relay::cli::commands::monitor::MonitorCommand;
use agent_relay::cli::commands::start::StartCommand;
use agent_relay::cli::commands::summary::SummaryCommand;
use agent_relay::cli::commands::{show_how_to_get_started, Command};
use agent_relay::cli::{Cli, Commands};
use agent_relay::{config, init_telemetry, shutdown_telemetry, ShutdownCoordinator, StateStore};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut relay_config = config()?.clone();
    if let Some(state_file) = cli.state_file {
        relay_config.store.state_file = state_file;
    }

    tokio::runtime::Runtime::new()?.block_on(async {
        init_telemetry(&relay_config.observability)?;

        let store = StateStore::new(relay_config.store.clone());
        let monitor_config = relay_config.monitor.clone();
        let shutdown = ShutdownCoordinator::new();

        let result = match cli.command {
            None => show_how_to_get_started(),
            Some(Commands::Init { force }) => InitCommand::new(store, force).execute().await,
            Some(Commands::Start {
                requirements,
                name,
                no_monitor,
            }) => {
                shutdown.install_signal_handlers()?;
                StartCommand::new(store, monitor_config, requirements, name, shutdown.clone())
                    .with_monitor(!no_monitor)
                    .execute()
                    .await
            }
            Some(Commands::Monitor) => {
                shutdown.install_signal_handlers()?;
                MonitorCommand::new(store, monitor_config, shutdown.clone())
                    .execute()
                    .await
            }
            Some(Commands::Summary) => SummaryCommand::new(store).execute().await,
            Some(Commands::Agent {
                agent,
                status,
                output,
            }) => {
                AgentStatusCommand::new(store, agent, status, output)
                    .execute()
                    .await
            }
            Some(Commands::Heartbeat { agent }) => HeartbeatCommand::new(store, agent).execute().await,
            Some(Commands::Error { agent, message }) => {
                AgentErrorCommand::new(store, agent, message).execute().await
            }
        };

        shutdown_telemetry();
        result
    })
}
