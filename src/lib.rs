// agent-relay library - multi-agent pipeline coordination through one shared document
// This exposes the core components for worker processes, testing and integration

pub mod cli;
pub mod config;
pub mod shutdown;
pub mod state;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use config::{config, ObservabilityConfig, RelayConfig};
pub use shutdown::ShutdownCoordinator;
pub use state::{
    AgentId, AgentSlot, AgentStatus, Phase, StateStore, StoreConfig, StoreError, WorkflowDocument,
};
pub use telemetry::{create_monitor_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflows::{
    next_phase, render_summary, responsible_agent, MonitorConfig, MonitorOutcome, TickOutcome,
    TickReport, WorkflowMonitor,
};
