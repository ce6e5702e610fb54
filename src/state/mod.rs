//! Shared workflow document and its locked store
//!
//! Every process in the pipeline (workers and the monitor) coordinates only
//! through one JSON document on disk. [`StateStore`] serializes every
//! read-modify-write cycle behind an advisory file lock and persists through
//! a temp file plus rename, so all observers agree on a single ordered
//! sequence of complete documents.

pub mod document;
pub mod store;

pub use document::{
    AgentId, AgentSlot, AgentStatus, Agents, ErrorRecord, Event, EventKind, ParseError, Phase,
    PhaseState, Project, WorkflowDocument, MAX_ERRORS, MAX_EVENTS,
};
pub use store::{StateStore, StoreConfig, StoreError};
