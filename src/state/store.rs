use chrono::Utc;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::document::{AgentId, AgentSlot, AgentStatus, Phase, WorkflowDocument};

/// Errors that can occur while reading or mutating the shared document
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Lock acquisition timed out after {waited_ms}ms: {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Failures a poller can simply retry later
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Serialization(_))
    }
}

/// Location of the shared document and the lock wait policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub state_file: PathBuf,
    pub lock_timeout_ms: u64,
    pub lock_poll_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("agent-state.json"),
            lock_timeout_ms: 5_000,
            lock_poll_interval_ms: 100,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

/// Locked, atomically persisted access to the workflow document.
///
/// Every operation takes an exclusive advisory lock on `<state>.lock` for the
/// whole load-transform-persist cycle. Writes go to `<state>.tmp` and are
/// renamed over the canonical file, so readers never see a partial document.
/// Cloning is cheap; each operation opens its own lock handle, which makes
/// clones in one process contend exactly like separate processes do.
#[derive(Debug, Clone)]
pub struct StateStore {
    config: StoreConfig,
    lock_path: PathBuf,
    temp_path: PathBuf,
}

impl StateStore {
    pub fn new(config: StoreConfig) -> Self {
        let lock_path = sibling(&config.state_file, "lock");
        let temp_path = sibling(&config.state_file, "tmp");
        Self {
            config,
            lock_path,
            temp_path,
        }
    }

    /// Store at `path` with default lock timings
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreConfig {
            state_file: path.into(),
            ..StoreConfig::default()
        })
    }

    pub fn state_path(&self) -> &Path {
        &self.config.state_file
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Locked snapshot of the full document, created with defaults if absent
    pub async fn read(&self) -> Result<WorkflowDocument, StoreError> {
        self.with_lock(|store| store.load_or_init()).await
    }

    /// Apply `transform` to the current document under the lock and persist
    /// the result. Exactly one update runs at a time across every process
    /// sharing the document. `transform` must be a pure function of the
    /// document; capture any timestamps before calling.
    pub async fn update<F>(&self, transform: F) -> Result<WorkflowDocument, StoreError>
    where
        F: FnOnce(WorkflowDocument) -> WorkflowDocument,
    {
        self.with_lock(move |store| {
            let current = store.load_or_init()?;
            let next = transform(current);
            store.persist(&next)?;
            Ok(next)
        })
        .await
    }

    /// Create the default document, or reset it to defaults when `force` is set.
    /// A forced reset keeps the existing iteration counter so it never goes
    /// backwards. Returns true if a document was written.
    pub async fn initialize(&self, force: bool) -> Result<bool, StoreError> {
        self.with_lock(move |store| {
            let exists = store.state_path().exists();
            if exists && !force {
                return Ok(false);
            }

            let mut doc = WorkflowDocument::new(Utc::now());
            if exists {
                match store.load_existing() {
                    Ok(previous) => doc.phase.iteration = previous.phase.iteration,
                    Err(e) => warn!(
                        error = %e,
                        "Existing state document unreadable, iteration restarts at 0"
                    ),
                }
            }
            store.persist(&doc)?;
            info!(iteration = doc.phase.iteration, "State document reset to defaults");
            Ok(true)
        })
        .await
    }

    pub async fn update_agent_status(
        &self,
        agent: AgentId,
        status: AgentStatus,
        output: Option<Value>,
    ) -> Result<WorkflowDocument, StoreError> {
        let now = Utc::now();
        let doc = self
            .update(move |mut doc| {
                doc.set_agent_status(agent, status, output, now);
                doc
            })
            .await?;
        debug!(agent = %agent, status = %status, "Agent status updated");
        Ok(doc)
    }

    /// Worker heartbeat: refresh `last_update` only
    pub async fn touch_agent(&self, agent: AgentId) -> Result<WorkflowDocument, StoreError> {
        let now = Utc::now();
        self.update(move |mut doc| {
            doc.touch_agent(agent, now);
            doc
        })
        .await
    }

    pub async fn add_error(
        &self,
        agent: AgentId,
        message: impl Into<String>,
    ) -> Result<WorkflowDocument, StoreError> {
        let now = Utc::now();
        let message = message.into();
        warn!(agent = %agent, error = %message, "Recording agent error");
        self.update(move |mut doc| {
            doc.push_error(agent, message, now);
            doc
        })
        .await
    }

    /// Mark `agent` failed and record one error in a single locked cycle
    pub async fn fail_agent(
        &self,
        agent: AgentId,
        message: impl Into<String>,
    ) -> Result<WorkflowDocument, StoreError> {
        let now = Utc::now();
        let message = message.into();
        self.update(move |mut doc| {
            doc.set_agent_status(agent, AgentStatus::Failed, None, now);
            doc.push_error(agent, message, now);
            doc
        })
        .await
    }

    pub async fn set_workflow_phase(&self, phase: Phase) -> Result<WorkflowDocument, StoreError> {
        let now = Utc::now();
        let doc = self
            .update(move |mut doc| {
                doc.set_phase(phase, now);
                doc
            })
            .await?;
        info!(phase = %phase, "Workflow phase set");
        Ok(doc)
    }

    pub async fn start_new_workflow(
        &self,
        requirements: Vec<String>,
        name: impl Into<String>,
    ) -> Result<WorkflowDocument, StoreError> {
        let now = Utc::now();
        let name = name.into();
        let doc = self
            .update(move |mut doc| {
                doc.restart(requirements, name, now);
                doc
            })
            .await?;
        info!(
            iteration = doc.phase.iteration,
            requirements = doc.project.requirements.len(),
            "Started new workflow"
        );
        Ok(doc)
    }

    pub async fn get_agent_status(&self, agent: AgentId) -> Result<AgentSlot, StoreError> {
        Ok(self.read().await?.agent(agent).clone())
    }

    pub async fn get_workflow_phase(&self) -> Result<Phase, StoreError> {
        Ok(self.read().await?.phase.current)
    }

    /// Spin on a non-blocking exclusive lock, then run `critical` while it is
    /// held. The critical section is synchronous so it always runs to
    /// completion once the lock is taken.
    ///
    /// File access inside `critical` uses `std::fs`, not `tokio::fs`, so a
    /// started mutation has no await point where a cancelled task could
    /// abandon it.
    async fn with_lock<T, F>(&self, critical: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Self) -> Result<T, StoreError>,
    {
        ensure_parent_dir(&self.config.state_file)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        let mut lock = RwLock::new(lock_file);

        let timeout = self.config.lock_timeout();
        let started = Instant::now();

        loop {
            match lock.try_write() {
                Ok(_guard) => {
                    debug!(
                        lock = %self.lock_path.display(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "State lock acquired"
                    );
                    return critical(self);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }

            if started.elapsed() >= timeout {
                warn!(
                    lock = %self.lock_path.display(),
                    timeout_ms = self.config.lock_timeout_ms,
                    "Timed out waiting for state lock"
                );
                return Err(StoreError::LockTimeout {
                    path: self.lock_path.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            tokio::time::sleep(self.config.lock_poll_interval()).await;
        }
    }

    /// Must be called with the lock held
    fn load_existing(&self) -> Result<WorkflowDocument, StoreError> {
        let contents = fs::read_to_string(&self.config.state_file)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Must be called with the lock held
    fn load_or_init(&self) -> Result<WorkflowDocument, StoreError> {
        match self.load_existing() {
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                info!(
                    file = %self.config.state_file.display(),
                    "No state document found, creating default"
                );
                let doc = WorkflowDocument::new(Utc::now());
                self.persist(&doc)?;
                Ok(doc)
            }
            result => result,
        }
    }

    /// Must be called with the lock held
    fn persist(&self, doc: &WorkflowDocument) -> Result<(), StoreError> {
        self.write_temp(doc)?;
        self.commit_temp()
    }

    fn write_temp(&self, doc: &WorkflowDocument) -> Result<(), StoreError> {
        let serialized = serde_json::to_string_pretty(doc)?;
        let mut file = File::create(&self.temp_path)?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn commit_temp(&self) -> Result<(), StoreError> {
        fs::rename(&self.temp_path, &self.config.state_file)?;
        Ok(())
    }
}

/// `agent-state.json` -> `agent-state.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
