use crate::cli::commands::Command;
use crate::shutdown::ShutdownCoordinator;
use crate::state::StateStore;
use crate::workflows::{MonitorConfig, MonitorOutcome, WorkflowMonitor};
use anyhow::{anyhow, Result};

/// Runs the monitor loop, then prints the final summary
pub struct MonitorCommand {
    store: StateStore,
    config: MonitorConfig,
    shutdown: ShutdownCoordinator,
}

impl MonitorCommand {
    pub fn new(store: StateStore, config: MonitorConfig, shutdown: ShutdownCoordinator) -> Self {
        Self {
            store,
            config,
            shutdown,
        }
    }
}

impl Command for MonitorCommand {
    async fn execute(&self) -> Result<()> {
        let mut monitor = WorkflowMonitor::new(self.store.clone(), self.config.clone())
            .with_console_output(true);

        let outcome = monitor.run(self.shutdown.child_token()).await;

        if let Err(e) = monitor.print_summary().await {
            println!("⚠️  Could not read workflow summary: {e}");
        }

        match outcome {
            MonitorOutcome::Completed | MonitorOutcome::Cancelled => Ok(()),
            MonitorOutcome::Failed { agents } => {
                let names: Vec<&str> = agents.iter().map(|a| a.as_str()).collect();
                Err(anyhow!("Workflow failed: {}", names.join(", ")))
            }
        }
    }
}
