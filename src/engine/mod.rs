//! Workflow engine driving hypothesis-tree generation.
//!
//! A run is a loop of [`Engine::step`] calls over a [`Session`]. Each step
//! dequeues one work item, routes it through the [`Router`], calls the
//! generation service at most twice, and folds the result back into the
//! session. When the queue drains, the completion safety net either queues
//! repairs for orphaned nodes or ends the run.

mod restart;
mod router;
mod safety;


pub use restart::{restart_from, NodeEdit, RestartPlan, RestartRequeue};
pub use router::{DepthPolicy, Route, Router, MISSING_SOURCE};
pub use safety::{find_orphans, OrphanAction};

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{AppResult, EngineError, EngineResult};
use crate::generation::{gather_context, ContextRetrieval, GenerationService};
use crate::queue::{Action, WorkItem, WorkQueue};
use crate::review::{ReviewDecision, ReviewGate, Selection};
use crate::storage::{SessionSnapshot, Storage};
use crate::tree::{Analysis, HypothesisTree, NodeId};

/// Progress event name for root formulation.
pub const NODE_FORMULATE: &str = "formulate_top_hypothesis";
/// Progress event name for decomposition.
pub const NODE_BREAKDOWN: &str = "breakdown_hypothesis";
/// Progress event name for classification.
pub const NODE_CLASSIFY: &str = "classify_hypothesis";
/// Progress event name for analysis identification.
pub const NODE_ANALYZE: &str = "identify_analysis";
/// Progress event name for a completion-check pass.
pub const NODE_COMPLETION: &str = "ensure_completion";
/// Progress event name for the terminal step.
pub const NODE_REPORT: &str = "compile_report";

fn node_name(action: Action) -> &'static str {
    match action {
        Action::Formulate => NODE_FORMULATE,
        Action::Breakdown => NODE_BREAKDOWN,
        Action::Classify => NODE_CLASSIFY,
        Action::Analyze => NODE_ANALYZE,
    }
}

/// Mutable state of a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Persistence key; `None` runs are never saved.
    pub id: Option<String>,
    pub problem_statement: String,
    pub tree: HypothesisTree,
    pub queue: WorkQueue,
    pub analyses: Vec<Analysis>,
    /// Append-only explainability log.
    pub log: Vec<String>,
    pub last_completed_item_id: Option<NodeId>,
    /// Non-empty completion passes taken so far.
    pub completion_passes: usize,
    /// Steps taken in this run.
    pub steps: usize,
    /// Set once the terminal step has run.
    pub finished: bool,
}

impl Session {
    /// Fresh session whose queue holds the formulate item.
    pub fn new(problem_statement: impl Into<String>) -> Self {
        let problem_statement = problem_statement.into();
        let log = vec![format!("Problem statement defined: {}", problem_statement)];
        Self {
            id: None,
            problem_statement,
            tree: HypothesisTree::new(),
            queue: WorkQueue::singleton(WorkItem::formulate()),
            analyses: Vec::new(),
            log,
            last_completed_item_id: None,
            completion_passes: 0,
            steps: 0,
            finished: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Append an entry to the explainability log.
    pub fn record(&mut self, entry: String) {
        debug!(entry = %entry, "Log entry");
        self.log.push(entry);
    }

    /// The analysis recorded for a leaf, if any.
    pub fn analysis_for(&self, id: &NodeId) -> Option<&Analysis> {
        self.analyses.iter().find(|a| &a.hypothesis_id == id)
    }

    /// Tree invariants plus the queue-level ones: a leaf is never queued for
    /// `breakdown` or `classify`, and a node with children is never queued
    /// for `breakdown`.
    pub fn check_invariants(&self) -> EngineResult<()> {
        self.tree.check_invariants()?;
        for item in self.queue.iter() {
            let Ok(node) = self.tree.get(&item.id) else {
                continue;
            };
            let queued_leaf =
                node.is_leaf && matches!(item.action, Action::Breakdown | Action::Classify);
            let redecomposed =
                item.action == Action::Breakdown && !self.tree.children_of(&item.id).is_empty();
            if queued_leaf || redecomposed {
                return Err(EngineError::InvariantViolation {
                    message: format!("{} is queued but node {} does not allow it", item, item.id),
                });
            }
        }
        Ok(())
    }

    /// Persistable copy of the session, if it has an id.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let session_id = self.id.clone()?;
        Some(SessionSnapshot {
            session_id,
            problem_statement: self.problem_statement.clone(),
            tree: self.tree.clone(),
            queue: self.queue.clone(),
            analyses: self.analyses.clone(),
            log: self.log.clone(),
            last_completed_item_id: self.last_completed_item_id.clone(),
            completion_passes: self.completion_passes,
            finished: self.finished,
        })
    }
}

impl From<SessionSnapshot> for Session {
    fn from(snapshot: SessionSnapshot) -> Self {
        let mut tree = snapshot.tree;
        tree.rebuild_children_index();
        Self {
            id: Some(snapshot.session_id),
            problem_statement: snapshot.problem_statement,
            tree,
            queue: snapshot.queue,
            analyses: snapshot.analyses,
            log: snapshot.log,
            last_completed_item_id: snapshot.last_completed_item_id,
            completion_passes: snapshot.completion_passes,
            steps: 0,
            finished: snapshot.finished,
        }
    }
}

/// State published after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Which kind of step ran.
    pub node_name: String,
    pub completed_item_id: Option<NodeId>,
    pub tree_snapshot: HypothesisTree,
    pub analyses: Vec<Analysis>,
    /// Log entries appended during this step.
    pub log_entries: Vec<String>,
}

/// Consumer of progress events.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: &ProgressEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _event: &ProgressEvent) {}
}

/// Sink forwarding events over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn publish(&self, event: &ProgressEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!("Progress receiver dropped");
        }
    }
}

/// Sink writing each event as one JSON line.
///
/// Encode and write failures (a closed pipe, for one) are logged and the
/// event is dropped.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ProgressSink for JsonLinesSink<W> {
    fn publish(&self, event: &ProgressEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode progress event");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!(error = %e, "Failed to write progress event");
        }
    }
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// More work may follow.
    Progress(ProgressEvent),
    /// The tree is complete.
    Finished(ProgressEvent),
}

impl StepOutcome {
    pub fn event(&self) -> &ProgressEvent {
        match self {
            StepOutcome::Progress(e) | StepOutcome::Finished(e) => e,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, StepOutcome::Finished(_))
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Queue drained and no orphans remained.
    Completed,
    /// A reviewer chose to finish; the queue is left intact.
    Stopped,
}

/// Drives sessions against the generation and context collaborators.
pub struct Engine {
    generator: Arc<dyn GenerationService>,
    context: Arc<dyn ContextRetrieval>,
    storage: Option<Arc<dyn Storage>>,
    progress: Arc<dyn ProgressSink>,
    config: EngineConfig,
    router: Router,
}

impl Engine {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        context: Arc<dyn ContextRetrieval>,
        config: EngineConfig,
    ) -> Self {
        let router = Router::from_config(&config);
        Self {
            generator,
            context,
            storage: None,
            progress: Arc::new(NullSink),
            config,
            router,
        }
    }

    /// Save a snapshot after every step of sessions that carry an id.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Run until the tree is complete or the step budget is exhausted.
    pub async fn run(&self, session: &mut Session) -> AppResult<RunOutcome> {
        info!(
            session_id = ?session.id,
            queued = session.queue.len(),
            "Starting run"
        );
        loop {
            if self.step(session).await?.is_finished() {
                info!(
                    nodes = session.tree.len(),
                    analyses = session.analyses.len(),
                    steps = session.steps,
                    "Run completed"
                );
                return Ok(RunOutcome::Completed);
            }
        }
    }

    /// Run with a reviewer gating every step.
    pub async fn run_reviewed(
        &self,
        session: &mut Session,
        gate: &dyn ReviewGate,
    ) -> AppResult<RunOutcome> {
        loop {
            let outcome = self.step(session).await?;
            if outcome.is_finished() {
                return Ok(RunOutcome::Completed);
            }

            if let Some(id) = outcome.event().completed_item_id.clone() {
                if let Ok(node) = session.tree.get(&id) {
                    let node = node.clone();
                    let decision = gate.review(&node, session.analysis_for(&id)).await;
                    self.apply_review(session, &id, decision).await;
                }
            }

            if session.queue.is_empty() {
                continue;
            }

            match gate.select(&session.queue, &session.tree).await {
                Selection::Next(0) => {}
                Selection::Next(index) => {
                    if !session.queue.promote(index) {
                        warn!(index, "Selected queue index out of range; keeping order");
                    }
                }
                Selection::Finish => {
                    session.record("Run finished by reviewer.".to_string());
                    self.persist(session).await;
                    info!(pending = session.queue.len(), "Run stopped by reviewer");
                    return Ok(RunOutcome::Stopped);
                }
            }
        }
    }

    /// Execute one step: dequeue and process an item, or run the completion check.
    pub async fn step(&self, session: &mut Session) -> AppResult<StepOutcome> {
        if session.steps >= self.config.max_steps {
            warn!(limit = self.config.max_steps, "Step limit reached");
            return Err(EngineError::StepLimitExceeded {
                limit: self.config.max_steps,
            }
            .into());
        }
        session.steps += 1;
        let mark = session.log.len();

        let outcome = match session.queue.dequeue_front() {
            Some(item) => {
                debug!(item = %item, "Processing work item");
                let completed = self.execute(session, &item).await;
                session.last_completed_item_id = completed.clone();
                StepOutcome::Progress(self.event(session, node_name(item.action), completed, mark))
            }
            None => self.complete(session, mark),
        };

        self.persist(session).await;
        self.progress.publish(outcome.event());
        Ok(outcome)
    }

    /// Restart `previous` from an edited node.
    ///
    /// Analyses of the pruned subtree and of the restart node are dropped.
    /// A missing target falls back to a fresh session for the same problem.
    pub fn restart_session(&self, previous: Session, restart_id: &NodeId, edit: &NodeEdit) -> Session {
        match restart_from(&previous.tree, restart_id, edit, self.config.restart_requeue) {
            Ok(plan) => {
                let analyses = previous
                    .analyses
                    .into_iter()
                    .filter(|a| {
                        &a.hypothesis_id != restart_id
                            && !restart_id.is_ancestor_of(&a.hypothesis_id)
                    })
                    .collect();
                let mut session = Session {
                    id: previous.id,
                    problem_statement: previous.problem_statement,
                    tree: plan.tree,
                    queue: plan.queue,
                    analyses,
                    log: previous.log,
                    last_completed_item_id: None,
                    completion_passes: 0,
                    steps: 0,
                    finished: false,
                };
                if !edit.is_empty() {
                    session.record(format!("Edited hypothesis ({}) before restart.", restart_id));
                }
                session.record(format!("Restarting analysis from node {}", restart_id));
                session
            }
            Err(e) => {
                warn!(node_id = %restart_id, error = %e, "Restart target missing; starting fresh");
                let mut session = Session::new(previous.problem_statement);
                session.id = previous.id;
                session.record(format!(
                    "Restart node {} not found in tree. Starting a fresh session.",
                    restart_id
                ));
                session
            }
        }
    }

    /// Run the routed action; returns the id of the node it completed.
    async fn execute(&self, session: &mut Session, item: &WorkItem) -> Option<NodeId> {
        match self.router.route(item, session) {
            Route::Formulate => {
                let ctx = gather_context(
                    self.context.as_ref(),
                    session.id.as_deref(),
                    &session.problem_statement,
                )
                .await;
                let result = self
                    .generator
                    .formulate(&session.problem_statement, &ctx.text)
                    .await;
                self.router.apply_formulate(session, result, &ctx.tools_used);
                None
            }
            Route::Breakdown(id) => {
                let text = node_text(session, &id);
                let ctx = gather_context(self.context.as_ref(), session.id.as_deref(), &text).await;
                let result = self.generator.decompose(&text, &ctx.text).await;
                self.router.apply_breakdown(session, &id, result, &ctx.tools_used);
                Some(id)
            }
            Route::Classify(id) => {
                let text = node_text(session, &id);
                let ctx = gather_context(self.context.as_ref(), session.id.as_deref(), &text).await;
                let result = self.generator.classify(&text, &ctx.text).await;
                self.router.apply_classify(session, &id, result, &ctx.tools_used);
                Some(id)
            }
            Route::Analyze(id) => {
                let text = node_text(session, &id);
                let ctx = gather_context(self.context.as_ref(), session.id.as_deref(), &text).await;
                let analysis = self.generator.identify_analysis(&text, &ctx.text).await;
                let source = match &analysis {
                    Ok(plan) => {
                        let source_ctx = gather_context(
                            self.context.as_ref(),
                            session.id.as_deref(),
                            &plan.analysis_required,
                        )
                        .await;
                        Some(
                            self.generator
                                .identify_source(&plan.analysis_required, &source_ctx.text)
                                .await,
                        )
                    }
                    Err(_) => None,
                };
                self.router.apply_analysis(session, &id, analysis, source);
                Some(id)
            }
            Route::ForceLeaf(id) => {
                self.router.apply_force_leaf(session, &id);
                Some(id)
            }
            Route::OverrideBranch(id) => {
                self.router.apply_override_branch(session, &id);
                Some(id)
            }
            Route::Skip { id, reason } => {
                debug!(item = %item, reason, "Skipping work item");
                session.record(format!("Skipped {} for ({}): {}.", item.action, id, reason));
                None
            }
            Route::Missing(id) => {
                warn!(item = %item, "Work item references a node missing from the tree");
                session.record(format!(
                    "Dropped {} for ({}): node not found in tree.",
                    item.action, id
                ));
                None
            }
        }
    }

    /// Queue-drained handling: repair orphans or finish.
    fn complete(&self, session: &mut Session, mark: usize) -> StepOutcome {
        let orphans = find_orphans(
            &session.tree,
            &session.queue,
            self.config.orphan_action,
            self.router.policy(),
        );

        if orphans.is_empty() {
            if !session.finished {
                session.finished = true;
                session.record(format!(
                    "Hypothesis tree complete: {} nodes, {} analyses.",
                    session.tree.len(),
                    session.analyses.len()
                ));
            }
            return StepOutcome::Finished(self.event(session, NODE_REPORT, None, mark));
        }

        let ids: Vec<String> = orphans.iter().map(|i| i.id.to_string()).collect();
        if session.completion_passes >= self.config.max_completion_passes {
            warn!(orphans = ?ids, "Completion passes exhausted; forcing orphans to leaves");
            for item in &orphans {
                self.router.terminate(session, &item.id, true);
            }
            session.record(format!(
                "Completion check gave up after {} passes. Marked as leaves: {}",
                session.completion_passes,
                ids.join(", ")
            ));
        } else {
            session.completion_passes += 1;
            info!(orphans = ?ids, pass = session.completion_passes, "Re-queuing orphaned nodes");
            session.record(format!(
                "Completion check found unfinished nodes: {}. Re-queued.",
                ids.join(", ")
            ));
            session.queue.enqueue_back(orphans);
        }

        StepOutcome::Progress(self.event(session, NODE_COMPLETION, None, mark))
    }

    async fn apply_review(&self, session: &mut Session, id: &NodeId, decision: ReviewDecision) {
        let ReviewDecision::Correct {
            correction,
            new_text,
            new_reasoning,
        } = decision
        else {
            return;
        };

        let original_text = node_text(session, id);
        if !correction.trim().is_empty() {
            let learning = format!(
                "USER CORRECTION for Hypothesis '{}': {}",
                original_text, correction
            );
            if let Err(e) = self.context.record_learning(&learning).await {
                warn!(node_id = %id, error = %e, "Failed to record correction");
            }
        }

        if let Ok(node) = session.tree.get_mut(id) {
            if let Some(text) = new_text {
                node.text = text;
            }
            if let Some(reasoning) = new_reasoning {
                node.reasoning = reasoning;
            }
        }
        session.record(format!("User corrected hypothesis ({}): {}", id, correction));
        self.persist(session).await;
    }

    async fn persist(&self, session: &Session) {
        let Some(storage) = &self.storage else {
            return;
        };
        let Some(snapshot) = session.snapshot() else {
            return;
        };
        if let Err(e) = storage.save_tree(&snapshot).await {
            warn!(
                session_id = %snapshot.session_id,
                error = %e,
                "Failed to persist session snapshot"
            );
        }
    }

    fn event(
        &self,
        session: &Session,
        node_name: &str,
        completed_item_id: Option<NodeId>,
        mark: usize,
    ) -> ProgressEvent {
        ProgressEvent {
            node_name: node_name.to_string(),
            completed_item_id,
            tree_snapshot: session.tree.clone(),
            analyses: session.analyses.clone(),
            log_entries: session.log[mark..].to_vec(),
        }
    }
}

fn node_text(session: &Session, id: &NodeId) -> String {
    session
        .tree
        .get(id)
        .map(|n| n.text.clone())
        .unwrap_or_default()
}
