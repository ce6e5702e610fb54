// Workflow supervision modules
// The monitor only ever talks to workers through the shared state document

pub mod monitor;
pub mod summary;
pub mod transitions;

pub use monitor::{
    AgentTimeouts, MonitorConfig, MonitorOutcome, PhaseAdvance, StallAction, StallReport,
    StatusChange, TickOutcome, TickReport, WorkflowMonitor,
};
pub use summary::render_summary;
pub use transitions::{next_phase, next_phase_for_name, responsible_agent};
