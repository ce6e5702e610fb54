use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum number of events kept in the document
pub const MAX_EVENTS: usize = 100;
/// Maximum number of error records kept in the document
pub const MAX_ERRORS: usize = 50;

/// Errors raised when parsing identifiers coming from outside the crate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown agent '{0}' (expected one of: planner, test_writer, coder, reviewer)")]
    UnknownAgent(String),

    #[error("unknown agent status '{0}' (expected one of: idle, pending, in_progress, completed, failed)")]
    UnknownStatus(String),

    #[error("unknown workflow phase '{0}'")]
    UnknownPhase(String),
}

/// The four fixed pipeline roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    Planner,
    TestWriter,
    Coder,
    Reviewer,
}

impl AgentId {
    /// All agents in pipeline order
    pub const ALL: [AgentId; 4] = [
        AgentId::Planner,
        AgentId::TestWriter,
        AgentId::Coder,
        AgentId::Reviewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Planner => "planner",
            AgentId::TestWriter => "test_writer",
            AgentId::Coder => "coder",
            AgentId::Reviewer => "reviewer",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentId::ALL
            .into_iter()
            .find(|agent| agent.as_str() == s)
            .ok_or_else(|| ParseError::UnknownAgent(s.to_string()))
    }
}

/// Lifecycle status of a single agent slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl AgentStatus {
    pub const ALL: [AgentStatus; 5] = [
        AgentStatus::Idle,
        AgentStatus::Pending,
        AgentStatus::InProgress,
        AgentStatus::Completed,
        AgentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Pending => "pending",
            AgentStatus::InProgress => "in_progress",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
        }
    }

    /// Console symbol used by status lines and summaries
    pub fn symbol(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "○",
            AgentStatus::Pending => "⏸",
            AgentStatus::InProgress => "⟳",
            AgentStatus::Completed => "✓",
            AgentStatus::Failed => "✗",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseError::UnknownStatus(s.to_string()))
    }
}

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Idle,
    Planning,
    TestWriting,
    Coding,
    Review,
    Complete,
}

impl Phase {
    /// Stages a workflow walks through after a restart, in order
    pub const PIPELINE: [Phase; 5] = [
        Phase::Planning,
        Phase::TestWriting,
        Phase::Coding,
        Phase::Review,
        Phase::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Planning => "planning",
            Phase::TestWriting => "test-writing",
            Phase::Coding => "coding",
            Phase::Review => "review",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        std::iter::once(Phase::Idle)
            .chain(Phase::PIPELINE)
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| ParseError::UnknownPhase(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Current stage plus the restart counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    #[serde(rename = "current_phase")]
    pub current: Phase,
    #[serde(default = "pipeline_phases")]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub iteration: u64,
}

fn pipeline_phases() -> Vec<Phase> {
    Phase::PIPELINE.to_vec()
}

fn empty_output() -> Value {
    Value::Object(Map::new())
}

/// One agent's slot in the shared document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSlot {
    pub status: AgentStatus,
    /// Worker-defined payload, never interpreted by the coordinator
    #[serde(default = "empty_output")]
    pub output: Value,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for AgentSlot {
    fn default() -> Self {
        Self {
            status: AgentStatus::Idle,
            output: empty_output(),
            last_update: None,
        }
    }
}

impl AgentSlot {
    /// An in-progress agent whose last refresh is older than `timeout`.
    /// Agents that never reported a timestamp are not considered stalled.
    pub fn is_stalled(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.status != AgentStatus::InProgress {
            return false;
        }
        match self.last_update {
            Some(last_update) => now - last_update > timeout,
            None => false,
        }
    }
}

/// Exactly one slot per fixed agent. Unknown identifiers fail to deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Agents {
    pub planner: AgentSlot,
    pub test_writer: AgentSlot,
    pub coder: AgentSlot,
    pub reviewer: AgentSlot,
}

impl Agents {
    pub fn get(&self, agent: AgentId) -> &AgentSlot {
        match agent {
            AgentId::Planner => &self.planner,
            AgentId::TestWriter => &self.test_writer,
            AgentId::Coder => &self.coder,
            AgentId::Reviewer => &self.reviewer,
        }
    }

    pub fn get_mut(&mut self, agent: AgentId) -> &mut AgentSlot {
        match agent {
            AgentId::Planner => &mut self.planner,
            AgentId::TestWriter => &mut self.test_writer,
            AgentId::Coder => &mut self.coder,
            AgentId::Reviewer => &mut self.reviewer,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentId, &AgentSlot)> {
        AgentId::ALL.into_iter().map(move |agent| (agent, self.get(agent)))
    }
}

/// Event payload, stored as `{"type": <name>, ...fields}`.
///
/// Kinds written by other tools are kept as [`EventKind::Other`] and written
/// back unchanged, so one foreign event never makes the document unreadable.
/// A known kind with malformed fields is still rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub enum EventKind {
    AgentStatusChange { agent: AgentId, status: AgentStatus },
    PhaseChange { phase: Phase },
    WorkflowStart { requirements_count: usize },
    Other { name: String, fields: Map<String, Value> },
}

/// Wire form of the kinds this crate understands
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownEventKind {
    AgentStatusChange { agent: AgentId, status: AgentStatus },
    PhaseChange { phase: Phase },
    WorkflowStart { requirements_count: usize },
}

const KNOWN_EVENT_KINDS: [&str; 3] = ["agent_status_change", "phase_change", "workflow_start"];

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            EventKind::AgentStatusChange { .. } => "agent_status_change",
            EventKind::PhaseChange { .. } => "phase_change",
            EventKind::WorkflowStart { .. } => "workflow_start",
            EventKind::Other { name, .. } => name,
        }
    }
}

impl From<KnownEventKind> for EventKind {
    fn from(kind: KnownEventKind) -> Self {
        match kind {
            KnownEventKind::AgentStatusChange { agent, status } => {
                EventKind::AgentStatusChange { agent, status }
            }
            KnownEventKind::PhaseChange { phase } => EventKind::PhaseChange { phase },
            KnownEventKind::WorkflowStart { requirements_count } => {
                EventKind::WorkflowStart { requirements_count }
            }
        }
    }
}

impl TryFrom<Map<String, Value>> for EventKind {
    type Error = serde_json::Error;

    fn try_from(mut fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let name = match fields.get("type") {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(serde::de::Error::missing_field("type")),
        };

        if KNOWN_EVENT_KINDS.contains(&name.as_str()) {
            let known: KnownEventKind = serde_json::from_value(Value::Object(fields))?;
            return Ok(known.into());
        }

        fields.remove("type");
        Ok(EventKind::Other { name, fields })
    }
}

impl From<EventKind> for Map<String, Value> {
    fn from(kind: EventKind) -> Self {
        let name = kind.name().to_string();
        let mut fields = Map::new();
        match kind {
            EventKind::AgentStatusChange { agent, status } => {
                fields.insert("agent".into(), agent.as_str().into());
                fields.insert("status".into(), status.as_str().into());
            }
            EventKind::PhaseChange { phase } => {
                fields.insert("phase".into(), phase.as_str().into());
            }
            EventKind::WorkflowStart { requirements_count } => {
                fields.insert("requirements_count".into(), requirements_count.into());
            }
            EventKind::Other { fields: extra, .. } => fields = extra,
        }
        fields.insert("type".into(), Value::String(name));
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub agent: AgentId,
    #[serde(rename = "error")]
    pub message: String,
}

/// The single shared aggregate every process coordinates through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub project: Project,
    #[serde(rename = "workflow")]
    pub phase: PhaseState,
    pub agents: Agents,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

impl WorkflowDocument {
    /// Fresh document: idle phase, every agent idle
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            project: Project {
                name: String::new(),
                description: String::new(),
                requirements: Vec::new(),
                started_at: now,
            },
            phase: PhaseState {
                current: Phase::Idle,
                phases: pipeline_phases(),
                iteration: 0,
            },
            agents: Agents::default(),
            events: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn agent(&self, agent: AgentId) -> &AgentSlot {
        self.agents.get(agent)
    }

    /// Set an agent's status and timestamp, optionally replacing its output,
    /// and record the change in the event log.
    pub fn set_agent_status(
        &mut self,
        agent: AgentId,
        status: AgentStatus,
        output: Option<Value>,
        now: DateTime<Utc>,
    ) {
        let slot = self.agents.get_mut(agent);
        slot.status = status;
        slot.last_update = Some(now);
        if let Some(output) = output {
            slot.output = output;
        }
        self.push_event(EventKind::AgentStatusChange { agent, status }, now);
    }

    /// Refresh `last_update` without touching status or the event log
    pub fn touch_agent(&mut self, agent: AgentId, now: DateTime<Utc>) {
        self.agents.get_mut(agent).last_update = Some(now);
    }

    pub fn set_phase(&mut self, phase: Phase, now: DateTime<Utc>) {
        self.phase.current = phase;
        self.push_event(EventKind::PhaseChange { phase }, now);
    }

    pub fn push_event(&mut self, kind: EventKind, now: DateTime<Utc>) {
        self.events.push(Event {
            timestamp: now,
            kind,
        });
        retain_recent(&mut self.events, MAX_EVENTS);
    }

    pub fn push_error(&mut self, agent: AgentId, message: impl Into<String>, now: DateTime<Utc>) {
        self.errors.push(ErrorRecord {
            timestamp: now,
            agent,
            message: message.into(),
        });
        retain_recent(&mut self.errors, MAX_ERRORS);
    }

    /// Reset every agent, bump the iteration and hand the new requirements
    /// to the planner.
    pub fn restart(&mut self, requirements: Vec<String>, name: impl Into<String>, now: DateTime<Utc>) {
        let requirements_count = requirements.len();

        self.project.requirements = requirements;
        self.project.name = name.into();
        self.project.started_at = now;
        self.phase.current = Phase::Planning;
        self.phase.iteration += 1;

        self.agents = Agents::default();
        self.agents.planner.status = AgentStatus::Pending;

        self.push_event(EventKind::WorkflowStart { requirements_count }, now);
    }

    pub fn failed_agents(&self) -> Vec<AgentId> {
        self.agents
            .iter()
            .filter(|(_, slot)| slot.status == AgentStatus::Failed)
            .map(|(agent, _)| agent)
            .collect()
    }

    pub fn any_in_progress(&self) -> bool {
        self.agents
            .iter()
            .any(|(_, slot)| slot.status == AgentStatus::InProgress)
    }
}

impl Default for WorkflowDocument {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Keep only the last `cap` entries, preserving arrival order
fn retain_recent<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(0..excess);
    }
}
