use anyhow::Result;

pub mod agent;
pub mod init;
pub mod monitor;
pub mod start;
pub mod summary;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

pub fn show_how_to_get_started() -> Result<()> {
    println!("🎯 agent-relay - Multi-Agent Pipeline Coordination");
    println!();
    println!("To get started:");
    println!("  ⚙️  agent-relay init                 # Create agent-state.json");
    println!("  🚀 agent-relay start \"req\" ...      # Start a workflow and monitor it");
    println!("  🔍 agent-relay monitor              # Supervise a running workflow");
    println!("  📊 agent-relay summary              # Show workflow summary");
    println!();
    println!("Worker commands:");
    println!("  🤖 agent-relay agent <agent> <status> [--output JSON]");
    println!("  💓 agent-relay heartbeat <agent>");
    println!("  ⚠️  agent-relay error <agent> <message>");
    println!();
    println!("💡 Agents: planner, test_writer, coder, reviewer");
    Ok(())
}
