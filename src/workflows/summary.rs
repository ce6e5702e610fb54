use serde_json::Value;
use std::fmt::Write;

use crate::state::{EventKind, WorkflowDocument};

const RECENT_EVENTS: usize = 5;
const RECENT_ERRORS: usize = 3;

/// Human-readable workflow summary: project metadata, per-agent status,
/// the last few events and errors.
pub fn render_summary(doc: &WorkflowDocument) -> String {
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = write_summary(&mut out, doc);
    out
}

fn write_summary(out: &mut String, doc: &WorkflowDocument) -> std::fmt::Result {
    writeln!(out, "📊 Workflow Summary")?;
    writeln!(out, "{}", "=".repeat(50))?;

    let project = &doc.project;
    let name = if project.name.is_empty() {
        "Unnamed"
    } else {
        project.name.as_str()
    };
    writeln!(out, "Project: {name}")?;
    if !project.description.is_empty() {
        writeln!(out, "Description: {}", project.description)?;
    }
    writeln!(out, "Requirements: {}", project.requirements.len())?;
    writeln!(out, "Started: {}", project.started_at.to_rfc3339())?;
    writeln!(
        out,
        "Phase: {} (iteration {})",
        doc.phase.current, doc.phase.iteration
    )?;

    writeln!(out)?;
    writeln!(out, "Agent Status:")?;
    for (agent, slot) in doc.agents.iter() {
        writeln!(out, "  {} {}: {}", slot.status.symbol(), agent, slot.status)?;
    }

    writeln!(out)?;
    writeln!(out, "Recent Events:")?;
    let skip = doc.events.len().saturating_sub(RECENT_EVENTS);
    for event in doc.events.iter().skip(skip) {
        let detail = match &event.kind {
            EventKind::AgentStatusChange { agent, status } => format!("{agent} → {status}"),
            EventKind::PhaseChange { phase } => format!("→ {phase}"),
            EventKind::WorkflowStart { requirements_count } => {
                format!("{requirements_count} requirements")
            }
            EventKind::Other { fields, .. } => Value::Object(fields.clone()).to_string(),
        };
        writeln!(
            out,
            "  [{}] {} {}",
            event.timestamp.to_rfc3339(),
            event.kind.name(),
            detail
        )?;
    }

    if !doc.errors.is_empty() {
        writeln!(out)?;
        writeln!(out, "⚠️  Errors:")?;
        let skip = doc.errors.len().saturating_sub(RECENT_ERRORS);
        for error in doc.errors.iter().skip(skip) {
            writeln!(
                out,
                "  [{}] {}: {}",
                error.timestamp.to_rfc3339(),
                error.agent,
                error.message
            )?;
        }
    }

    Ok(())
}
