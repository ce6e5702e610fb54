use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::summary::render_summary;
use super::transitions::{next_phase, responsible_agent};
use crate::state::{AgentId, AgentStatus, Phase, StateStore, StoreError, WorkflowDocument};
use crate::telemetry::{create_monitor_span, generate_correlation_id};

/// Allowed time in `in_progress` without a refresh, per agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTimeouts {
    pub planner_secs: u64,
    pub test_writer_secs: u64,
    pub coder_secs: u64,
    pub reviewer_secs: u64,
}

impl Default for AgentTimeouts {
    fn default() -> Self {
        Self {
            planner_secs: 300,
            test_writer_secs: 300,
            coder_secs: 600,
            reviewer_secs: 300,
        }
    }
}

impl AgentTimeouts {
    /// Values too large to represent saturate to `TimeDelta::MAX`, which
    /// effectively disables stall detection for that agent.
    pub fn for_agent(&self, agent: AgentId) -> TimeDelta {
        let secs = match agent {
            AgentId::Planner => self.planner_secs,
            AgentId::TestWriter => self.test_writer_secs,
            AgentId::Coder => self.coder_secs,
            AgentId::Reviewer => self.reviewer_secs,
        };
        i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub max_retries: u32,
    pub timeouts: AgentTimeouts,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            error_backoff_secs: 5,
            max_retries: 2,
            timeouts: AgentTimeouts::default(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub agent: AgentId,
    pub previous: Option<AgentStatus>,
    pub current: AgentStatus,
}

/// What the retry policy did with a stalled agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallAction {
    /// Reset to pending so the worker picks the job up again
    Retried { attempt: u32, max_retries: u32 },
    /// Retries exhausted; marked failed with one error record
    Failed { retries: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallReport {
    pub agent: AgentId,
    pub action: StallAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseAdvance {
    pub completed: AgentId,
    pub from: Phase,
    pub to: Phase,
    pub activated: Option<AgentId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Completed,
    Failed { agents: Vec<AgentId> },
}

/// Everything one poll tick observed and changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub status_changes: Vec<StatusChange>,
    pub stalls: Vec<StallReport>,
    pub advance: Option<PhaseAdvance>,
    pub outcome: TickOutcome,
}

impl TickReport {
    fn new() -> Self {
        Self {
            status_changes: Vec::new(),
            stalls: Vec::new(),
            advance: None,
            outcome: TickOutcome::Continue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Completed,
    Failed { agents: Vec<AgentId> },
    Cancelled,
}

/// Polling supervisor for the pipeline.
///
/// The monitor never does agent work. Each tick it reads the shared document,
/// retries or fails stalled agents, and advances the phase when the
/// responsible agent has completed. Retry counters live only in this struct,
/// so a restarted monitor starts counting from zero again.
#[derive(Debug)]
pub struct WorkflowMonitor {
    store: StateStore,
    config: MonitorConfig,
    retries: HashMap<AgentId, u32>,
    last_status: HashMap<AgentId, AgentStatus>,
    observed_iteration: Option<u64>,
    console_output: bool,
}

impl WorkflowMonitor {
    pub fn new(store: StateStore, config: MonitorConfig) -> Self {
        let retries = AgentId::ALL.into_iter().map(|agent| (agent, 0)).collect();
        Self {
            store,
            config,
            retries,
            last_status: HashMap::new(),
            observed_iteration: None,
            console_output: false,
        }
    }

    /// Print status transitions to stdout as they are observed
    pub fn with_console_output(mut self, enabled: bool) -> Self {
        self.console_output = enabled;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn retry_count(&self, agent: AgentId) -> u32 {
        self.retries.get(&agent).copied().unwrap_or(0)
    }

    /// Poll until the workflow completes, fails, or `cancel` fires.
    /// Store errors never end the loop; they are logged and retried after
    /// the backoff interval.
    pub async fn run(&mut self, cancel: CancellationToken) -> MonitorOutcome {
        let correlation_id = generate_correlation_id();
        let span = create_monitor_span(&correlation_id);
        self.run_loop(cancel).instrument(span).await
    }

    async fn run_loop(&mut self, cancel: CancellationToken) -> MonitorOutcome {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            max_retries = self.config.max_retries,
            "Monitoring workflow"
        );
        if self.console_output {
            println!("🔍 Monitoring workflow...");
        }

        loop {
            if cancel.is_cancelled() {
                return self.cancelled();
            }

            let wait = match self.tick().await {
                Ok(report) => match report.outcome {
                    TickOutcome::Completed => {
                        info!("Workflow completed");
                        if self.console_output {
                            println!("✅ Workflow completed successfully!");
                        }
                        return MonitorOutcome::Completed;
                    }
                    TickOutcome::Failed { agents } => {
                        let names: Vec<&str> = agents.iter().map(|a| a.as_str()).collect();
                        error!(agents = ?names, "Workflow failed");
                        if self.console_output {
                            println!(
                                "❌ Workflow failed due to agent failures: {}",
                                names.join(", ")
                            );
                        }
                        return MonitorOutcome::Failed { agents };
                    }
                    TickOutcome::Continue => self.config.poll_interval(),
                },
                Err(e) => {
                    error!(error = %e, "Monitor tick failed, backing off");
                    if self.console_output {
                        println!("❌ Monitor error: {e}");
                    }
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn cancelled(&self) -> MonitorOutcome {
        info!("Monitoring stopped");
        if self.console_output {
            println!("\n⏹️  Monitoring stopped");
        }
        MonitorOutcome::Cancelled
    }

    /// One poll cycle against the current wall-clock time
    pub async fn tick(&mut self) -> Result<TickReport, StoreError> {
        let now = Utc::now();
        let mut report = TickReport::new();
        let mut doc = self.store.read().await?;

        self.observe_iteration(doc.phase.iteration);

        if doc.phase.current == Phase::Complete {
            report.outcome = TickOutcome::Completed;
            return Ok(report);
        }

        report.status_changes = self.record_status_changes(&doc);

        for agent in AgentId::ALL {
            let timeout = self.config.timeouts.for_agent(agent);
            if !doc.agent(agent).is_stalled(now, timeout) {
                continue;
            }
            let (latest, action) = self.handle_stall(agent, now).await?;
            doc = latest;
            if let Some(action) = action {
                report.stalls.push(StallReport { agent, action });
            }
        }

        let (latest, advance) = self.advance_phase(&doc, now).await?;
        if let Some(latest) = latest {
            doc = latest;
        }
        report.advance = advance;

        let failed = doc.failed_agents();
        if !failed.is_empty() && !doc.any_in_progress() {
            report.outcome = TickOutcome::Failed { agents: failed };
        }

        Ok(report)
    }

    /// A new iteration means a fresh workflow; old retry budgets do not carry over
    fn observe_iteration(&mut self, iteration: u64) {
        if let Some(previous) = self.observed_iteration {
            if previous != iteration {
                debug!(previous, iteration, "New workflow iteration, resetting retry counters");
                for count in self.retries.values_mut() {
                    *count = 0;
                }
            }
        }
        self.observed_iteration = Some(iteration);
    }

    fn record_status_changes(&mut self, doc: &WorkflowDocument) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        for (agent, slot) in doc.agents.iter() {
            let previous = self.last_status.get(&agent).copied();
            if previous == Some(slot.status) {
                continue;
            }
            info!(agent = %agent, status = %slot.status, "Agent status changed");
            if self.console_output {
                println!(
                    "[{}] {} {}: {}",
                    chrono::Local::now().format("%H:%M:%S"),
                    slot.status.symbol(),
                    agent,
                    slot.status
                );
            }
            self.last_status.insert(agent, slot.status);
            changes.push(StatusChange {
                agent,
                previous,
                current: slot.status,
            });
        }
        changes
    }

    /// Retry or fail a stalled agent. The stall is re-checked under the lock,
    /// so a heartbeat that lands after our read wins and nothing changes.
    async fn handle_stall(
        &mut self,
        agent: AgentId,
        now: DateTime<Utc>,
    ) -> Result<(WorkflowDocument, Option<StallAction>), StoreError> {
        let timeout = self.config.timeouts.for_agent(agent);
        let max_retries = self.config.max_retries;
        let attempts = self.retry_count(agent);
        let exhausted = attempts >= max_retries;
        let mut applied = false;

        let doc = self
            .store
            .update(|mut doc| {
                if doc.agent(agent).is_stalled(now, timeout) {
                    if exhausted {
                        doc.set_agent_status(agent, AgentStatus::Failed, None, now);
                        doc.push_error(
                            agent,
                            format!("Timed out after {max_retries} retries"),
                            now,
                        );
                    } else {
                        doc.set_agent_status(agent, AgentStatus::Pending, None, now);
                    }
                    applied = true;
                }
                doc
            })
            .await?;

        if !applied {
            debug!(agent = %agent, "Stall cleared before update, skipping");
            return Ok((doc, None));
        }

        let action = if exhausted {
            error!(agent = %agent, retries = max_retries, "Agent failed after exhausting retries");
            if self.console_output {
                println!("❌ Agent {agent} failed after {max_retries} retries");
            }
            StallAction::Failed {
                retries: max_retries,
            }
        } else {
            let attempt = attempts + 1;
            self.retries.insert(agent, attempt);
            warn!(agent = %agent, attempt, max_retries, "Agent timed out, retrying");
            if self.console_output {
                println!("⚠️  Agent {agent} timed out, retrying ({attempt}/{max_retries})");
            }
            StallAction::Retried {
                attempt,
                max_retries,
            }
        };

        Ok((doc, Some(action)))
    }

    /// Move to the next phase when the current phase's agent has completed,
    /// activating the next agent in the same locked cycle.
    async fn advance_phase(
        &self,
        doc: &WorkflowDocument,
        now: DateTime<Utc>,
    ) -> Result<(Option<WorkflowDocument>, Option<PhaseAdvance>), StoreError> {
        let from = doc.phase.current;
        let Some(completed) = responsible_agent(from) else {
            return Ok((None, None));
        };
        if doc.agent(completed).status != AgentStatus::Completed {
            return Ok((None, None));
        }

        let to = next_phase(completed);
        let activated = responsible_agent(to);
        let mut applied = false;

        let latest = self
            .store
            .update(|mut doc| {
                if doc.phase.current == from && doc.agent(completed).status == AgentStatus::Completed
                {
                    doc.set_phase(to, now);
                    if let Some(next_agent) = activated {
                        doc.set_agent_status(next_agent, AgentStatus::Pending, None, now);
                    }
                    applied = true;
                }
                doc
            })
            .await?;

        if !applied {
            return Ok((Some(latest), None));
        }

        info!(
            completed = %completed,
            from = %from,
            to = %to,
            activated = ?activated.map(|a| a.as_str()),
            "Advanced workflow phase"
        );

        Ok((
            Some(latest),
            Some(PhaseAdvance {
                completed,
                from,
                to,
                activated,
            }),
        ))
    }

    /// Read-only rendering of the current document
    pub async fn summary(&self) -> Result<String, StoreError> {
        let doc = self.store.read().await?;
        Ok(render_summary(&doc))
    }

    pub async fn print_summary(&self) -> Result<(), StoreError> {
        println!("{}", self.summary().await?);
        Ok(())
    }
}
