use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::state::{AgentId, AgentStatus};

pub mod commands;

#[derive(Parser)]
#[command(name = "agent-relay")]
#[command(about = "Coordinate a plan → test → code → review agent pipeline through one shared state file")]
#[command(long_about = "agent-relay keeps a single JSON state document that independent agent \
                       processes read and update under a file lock. The monitor watches that \
                       document, retries stalled agents and moves the pipeline from one phase \
                       to the next. Start with 'agent-relay init'.")]
pub struct Cli {
    /// Override the state document location from configuration
    #[arg(long, global = true, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the shared state document with default values
    Init {
        /// Reset an existing document back to defaults
        #[arg(long, help = "Overwrite an existing state document")]
        force: bool,
    },
    /// Start a new workflow iteration and hand the requirements to the planner
    Start {
        /// Requirements for this iteration, one per argument
        #[arg(required = true, num_args = 1..)]
        requirements: Vec<String>,
        /// Project name recorded in the document
        #[arg(long, default_value = "")]
        name: String,
        /// Return immediately instead of monitoring the workflow
        #[arg(long, help = "Skip the monitor loop after starting")]
        no_monitor: bool,
    },
    /// Supervise the workflow until it completes or fails
    Monitor,
    /// Print project, agent status, recent events and errors
    Summary,
    /// Set an agent's status (used by worker processes)
    Agent {
        agent: AgentId,
        status: AgentStatus,
        /// JSON payload stored as the agent's output
        #[arg(long, value_name = "JSON")]
        output: Option<String>,
    },
    /// Refresh an agent's last_update so it is not treated as stalled
    Heartbeat { agent: AgentId },
    /// Append an error record for an agent
    Error { agent: AgentId, message: String },
}
