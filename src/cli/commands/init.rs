use crate::cli::commands::Command;
use crate::state::StateStore;
use anyhow::{Context, Result};

/// Creates the shared state document. Existing documents are left alone
/// unless `--force` is given.
pub struct InitCommand {
    store: StateStore,
    force: bool,
}

impl InitCommand {
    pub fn new(store: StateStore, force: bool) -> Self {
        Self { store, force }
    }
}

impl Command for InitCommand {
    async fn execute(&self) -> Result<()> {
        let path = self.store.state_path().display().to_string();
        let written = self
            .store
            .initialize(self.force)
            .await
            .with_context(|| format!("Failed to initialize {path}"))?;

        if written {
            println!("✅ Initialized agent state at {path}");
        } else {
            println!("ℹ️  {path} already exists (use --force to reset it)");
        }
        Ok(())
    }
}
