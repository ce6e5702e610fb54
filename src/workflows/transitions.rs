// Phase transition table
// Pure and total: the monitor drives the pipeline by composing these two lookups

use crate::state::{AgentId, Phase};

/// Agent that owns `phase`, if any. Idle and complete are owned by nobody.
pub fn responsible_agent(phase: Phase) -> Option<AgentId> {
    match phase {
        Phase::Planning => Some(AgentId::Planner),
        Phase::TestWriting => Some(AgentId::TestWriter),
        Phase::Coding => Some(AgentId::Coder),
        Phase::Review => Some(AgentId::Reviewer),
        Phase::Idle | Phase::Complete => None,
    }
}

/// Phase the pipeline moves to once `completed` finishes its work
pub fn next_phase(completed: AgentId) -> Phase {
    match completed {
        AgentId::Planner => Phase::TestWriting,
        AgentId::TestWriter => Phase::Coding,
        AgentId::Coder => Phase::Review,
        AgentId::Reviewer => Phase::Complete,
    }
}

/// String-keyed lookup for callers that hold raw identifiers.
/// Unrecognized names fall back to idle instead of failing.
pub fn next_phase_for_name(agent: &str) -> Phase {
    agent.parse::<AgentId>().map(next_phase).unwrap_or(Phase::Idle)
}
