// Worker-side commands: a worker process only ever writes its own slot

use crate::cli::commands::Command;
use crate::state::{AgentId, AgentStatus, StateStore};
use anyhow::{Context, Result};
use serde_json::Value;

pub struct AgentStatusCommand {
    store: StateStore,
    agent: AgentId,
    status: AgentStatus,
    output: Option<String>,
}

impl AgentStatusCommand {
    pub fn new(store: StateStore, agent: AgentId, status: AgentStatus, output: Option<String>) -> Self {
        Self {
            store,
            agent,
            status,
            output,
        }
    }

    fn parse_output(&self) -> Result<Option<Value>> {
        self.output
            .as_deref()
            .map(|raw| serde_json::from_str(raw).context("--output must be valid JSON"))
            .transpose()
    }
}

impl Command for AgentStatusCommand {
    async fn execute(&self) -> Result<()> {
        let output = self.parse_output()?;
        self.store
            .update_agent_status(self.agent, self.status, output)
            .await
            .with_context(|| format!("Failed to update {}", self.agent))?;

        println!("{} {}: {}", self.status.symbol(), self.agent, self.status);
        Ok(())
    }
}

pub struct HeartbeatCommand {
    store: StateStore,
    agent: AgentId,
}

impl HeartbeatCommand {
    pub fn new(store: StateStore, agent: AgentId) -> Self {
        Self { store, agent }
    }
}

impl Command for HeartbeatCommand {
    async fn execute(&self) -> Result<()> {
        self.store
            .touch_agent(self.agent)
            .await
            .with_context(|| format!("Failed to refresh {}", self.agent))?;
        Ok(())
    }
}

pub struct AgentErrorCommand {
    store: StateStore,
    agent: AgentId,
    message: String,
}

impl AgentErrorCommand {
    pub fn new(store: StateStore, agent: AgentId, message: String) -> Self {
        Self {
            store,
            agent,
            message,
        }
    }
}

impl Command for AgentErrorCommand {
    async fn execute(&self) -> Result<()> {
        self.store
            .add_error(self.agent, self.message.clone())
            .await
            .with_context(|| format!("Failed to record error for {}", self.agent))?;

        println!("⚠️  Recorded error for {}", self.agent);
        Ok(())
    }
}
