use crate::cli::commands::Command;
use crate::state::StateStore;
use crate::workflows::render_summary;
use anyhow::{Context, Result};

pub struct SummaryCommand {
    store: StateStore,
}

impl SummaryCommand {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl Command for SummaryCommand {
    async fn execute(&self) -> Result<()> {
        let doc = self.store.read().await.context("Failed to read workflow state")?;
        println!("{}", render_summary(&doc));
        Ok(())
    }
}
