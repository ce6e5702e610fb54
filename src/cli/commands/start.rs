use crate::cli::commands::monitor::MonitorCommand;
use crate::cli::commands::Command;
use crate::shutdown::ShutdownCoordinator;
use crate::state::StateStore;
use crate::workflows::MonitorConfig;
use anyhow::{Context, Result};

pub struct StartCommand {
    store: StateStore,
    monitor_config: MonitorConfig,
    requirements: Vec<String>,
    name: String,
    monitor: bool,
    shutdown: ShutdownCoordinator,
}

impl StartCommand {
    pub fn new(
        store: StateStore,
        monitor_config: MonitorConfig,
        requirements: Vec<String>,
        name: String,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            store,
            monitor_config,
            requirements,
            name,
            monitor: true,
            shutdown,
        }
    }

    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }
}

impl Command for StartCommand {
    async fn execute(&self) -> Result<()> {
        let doc = self
            .store
            .start_new_workflow(self.requirements.clone(), self.name.clone())
            .await
            .context("Failed to start workflow")?;

        println!(
            "🚀 Started workflow iteration {} with {} requirements",
            doc.phase.iteration,
            doc.project.requirements.len()
        );

        if !self.monitor {
            return Ok(());
        }

        MonitorCommand::new(
            self.store.clone(),
            self.monitor_config.clone(),
            self.shutdown.clone(),
        )
        .execute()
        .await
    }
}
