//! One open flow
//!
//! A session owns the flow's graph, its run gate and its schedule controller.
//! Graph edits, runs and schedule edits for a flow all go through here, and
//! dropping or closing the session tears its timers down.

use crate::flow::graph::{FlowGraph, GraphError, GraphSnapshot};
use crate::flow::storage::FlowStore;
use crate::flow::types::{Edge, FlowDocument, Node, NodeType, Position};
use crate::runtime::engine::{ExecutionEngine, RunReport};
use crate::runtime::notifier::ResultNotifier;
use crate::runtime::scheduler::{
    ArmedSchedule, ScheduleController, ScheduleError, ScheduleStatus, ScheduledRun,
};
use crate::runtime::timeparse::DateParser;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Why a run request did not produce a report
#[derive(Debug, Error)]
pub enum RunError {
    #[error("flow '{0}' is already running")]
    InProgress(String),
    #[error("flow '{0}' is closed")]
    Closed(String),
    #[error(transparent)]
    Integrity(#[from] GraphError),
}

/// Shared services every session needs
#[derive(Clone)]
pub struct SessionDeps {
    pub engine: Arc<ExecutionEngine>,
    pub store: Arc<dyn FlowStore>,
    pub notifier: ResultNotifier,
    pub parser: Arc<dyn DateParser>,
    pub debounce: Duration,
}

/// Runtime state of one flow
pub struct FlowSession {
    flow_id: String,
    graph: RwLock<FlowGraph>,
    run_gate: Mutex<()>,
    schedule: ScheduleController,
    // Set under the run gate; a closed session never runs or saves again.
    closed: AtomicBool,
    deps: SessionDeps,
}

impl std::fmt::Debug for FlowSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowSession")
            .field("flow_id", &self.flow_id)
            .finish_non_exhaustive()
    }
}

impl FlowSession {
    /// Build an empty session without touching storage
    pub fn new(flow_id: impl Into<String>, deps: SessionDeps) -> Arc<Self> {
        let flow_id = flow_id.into();
        Arc::new_cyclic(|weak: &Weak<FlowSession>| {
            let target: Weak<dyn ScheduledRun> = weak.clone();
            Self {
                schedule: ScheduleController::new(
                    flow_id.clone(),
                    Arc::clone(&deps.parser),
                    deps.debounce,
                    target,
                ),
                flow_id,
                graph: RwLock::new(FlowGraph::new()),
                run_gate: Mutex::new(()),
                closed: AtomicBool::new(false),
                deps,
            }
        })
    }

    /// Load a flow from storage and re-arm its committed schedule
    ///
    /// A failed load is logged and treated as an empty flow. Edges that would
    /// break the DAG invariant are dropped. A schedule whose instant has
    /// already passed is discarded without firing.
    pub async fn open(flow_id: impl Into<String>, deps: SessionDeps) -> Arc<Self> {
        let flow_id = flow_id.into();
        match Self::open_existing(flow_id.clone(), deps.clone()).await {
            Some(session) => session,
            None => Self::new(flow_id, deps),
        }
    }

    /// Like [`FlowSession::open`], but `None` when storage has no document
    pub async fn open_existing(flow_id: impl Into<String>, deps: SessionDeps) -> Option<Arc<Self>> {
        let flow_id = flow_id.into();
        let document = match deps.store.load(&flow_id).await {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("⚠️ Could not load flow '{}', starting empty: {}", flow_id, e);
                None
            }
        }?;
        let session = Self::new(flow_id, deps);
        session.restore(document).await;
        Some(session)
    }

    async fn restore(&self, document: FlowDocument) {
        let (graph, rejected) = FlowGraph::from_parts(document.nodes, document.edges);
        for (edge, e) in rejected {
            tracing::warn!(
                "⚠️ Dropped edge {} -> {} from flow '{}': {}",
                edge.source,
                edge.target,
                self.flow_id,
                e
            );
        }
        tracing::info!(
            "📥 Loaded flow '{}' with {} nodes and {} edges",
            self.flow_id,
            graph.nodes().len(),
            graph.edges().len()
        );
        *self.graph.write().await = graph;

        let Some(text) = document.schedule_text.filter(|t| !t.trim().is_empty()) else {
            return;
        };
        let restored = match document.scheduled_at {
            Some(at) => self.schedule.arm(&text, at),
            None => self.schedule.commit_text(&text),
        };
        if let Err(e) = restored {
            tracing::warn!("⚠️ Discarding stale schedule for flow '{}': {}", self.flow_id, e);
            self.schedule.clear();
            if let Err(e) = self.save().await {
                tracing::warn!("⚠️ Dropped schedule of flow '{}' not persisted: {}", self.flow_id, e);
            }
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub async fn add_node(&self, node_type: NodeType, position: Option<Position>) -> Node {
        self.graph.write().await.add_node(node_type, position)
    }

    pub async fn remove_node(&self, node_id: &str) {
        self.graph.write().await.remove_node(node_id);
    }

    /// Add an edge; rejected edges leave the graph unchanged
    pub async fn add_edge(&self, source: &str, target: &str) -> Result<Edge, GraphError> {
        let result = self.graph.write().await.add_edge(source, target);
        if let Err(e) = &result {
            tracing::warn!("🚫 Rejected edge in flow '{}': {}", self.flow_id, e);
        }
        result
    }

    pub async fn remove_edge(&self, source: &str, target: &str) -> bool {
        self.graph.write().await.remove_edge(source, target)
    }

    pub async fn set_command(&self, node_id: &str, command: &str) -> Result<Node, GraphError> {
        self.graph
            .write()
            .await
            .set_command(node_id, command)
            .cloned()
    }

    pub async fn set_note_text(&self, node_id: &str, text: &str) -> Result<Node, GraphError> {
        self.graph
            .write()
            .await
            .set_note_text(node_id, text)
            .cloned()
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        self.graph.read().await.snapshot()
    }

    /// Current execution order of the graph
    pub async fn order(&self) -> Result<Vec<String>, GraphError> {
        ExecutionEngine::compute_order(&self.snapshot().await)
    }

    /// Document as it would be persisted now
    ///
    /// Only the armed schedule is included; text still being edited is not.
    pub async fn document(&self) -> FlowDocument {
        let snapshot = self.snapshot().await;
        let armed = self.schedule.armed();
        FlowDocument {
            nodes: snapshot.nodes,
            edges: snapshot.edges,
            schedule_text: armed.as_ref().map(|a| a.text.clone()),
            scheduled_at: armed.map(|a| a.at),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Persist the current document
    ///
    /// Refused once the session is closed so a stale handle cannot overwrite
    /// what a newer session of the same flow stored.
    pub async fn save(&self) -> Result<()> {
        if self.is_closed() {
            anyhow::bail!("flow '{}' is closed", self.flow_id);
        }
        let document = self.document().await;
        self.deps.store.save(&self.flow_id, &document).await.map_err(|e| {
            tracing::error!("❌ Failed to save flow '{}': {}", self.flow_id, e);
            e
        })
    }

    /// Run the flow now, unless a run is already in progress
    pub async fn run_now(&self) -> Result<RunReport, RunError> {
        let gate = self
            .run_gate
            .try_lock()
            .map_err(|_| RunError::InProgress(self.flow_id.clone()))?;
        if self.is_closed() {
            return Err(RunError::Closed(self.flow_id.clone()));
        }
        self.run_locked(gate).await
    }

    /// Shared run path for manual and scheduled runs
    async fn run_locked(&self, _gate: MutexGuard<'_, ()>) -> Result<RunReport, RunError> {
        let snapshot = self.snapshot().await;
        let report = self.deps.engine.run(&snapshot).await?;

        self.graph.write().await.apply_results(
            report
                .results
                .iter()
                .map(|record| (record.node_id.as_str(), record.result.summary())),
            report.finished_at,
        );

        if let Err(e) = self.save().await {
            tracing::warn!("⚠️ Run results of flow '{}' not persisted: {}", self.flow_id, e);
        }
        let _ = self.deps.notifier.notify(&self.flow_id, report.has_errors);
        Ok(report)
    }

    /// Replace the schedule text being edited (debounced parse)
    pub fn set_schedule_text(&self, text: &str) {
        self.schedule.set_text(text);
    }

    /// Arm the edited schedule text and persist it
    pub async fn commit_schedule(&self) -> Result<ArmedSchedule, ScheduleError> {
        let armed = self.schedule.commit()?;
        if let Err(e) = self.save().await {
            tracing::warn!("⚠️ Schedule of flow '{}' armed but not persisted: {}", self.flow_id, e);
        }
        Ok(armed)
    }

    /// Cancel any schedule and persist the cleared state
    pub async fn clear_schedule(&self) {
        self.schedule.clear();
        if let Err(e) = self.save().await {
            tracing::warn!("⚠️ Cleared schedule of flow '{}' not persisted: {}", self.flow_id, e);
        }
    }

    pub fn schedule_status(&self) -> ScheduleStatus {
        self.schedule.status()
    }

    /// Tear down timers and retire the session
    ///
    /// Waits for an in-flight run to finish (and persist) first. Afterwards
    /// runs are refused and nothing is saved.
    pub async fn close(&self) {
        tracing::info!("📕 Closing flow '{}'", self.flow_id);
        self.schedule.shutdown();
        let _gate = self.run_gate.lock().await;
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScheduledRun for FlowSession {
    /// Scheduled runs wait for an in-flight manual run instead of being dropped.
    async fn run_scheduled(&self) {
        let gate = self.run_gate.lock().await;
        if self.is_closed() {
            tracing::debug!("⏭️ Flow '{}' closed before its scheduled run", self.flow_id);
            return;
        }
        tracing::info!("🚀 Executing scheduled flow '{}'", self.flow_id);
        match self.run_locked(gate).await {
            Ok(report) => tracing::info!(
                "✅ Scheduled run of '{}' finished (errors: {})",
                self.flow_id,
                report.has_errors
            ),
            Err(e) => tracing::error!("❌ Scheduled run of '{}' failed: {}", self.flow_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::storage::MemoryFlowStore;
    use crate::flow::types::NodeKind;
    use crate::runtime::executor::{CommandOutcome, CommandRunner, NodeExecutor};
    use crate::runtime::notifier::NotificationSink;
    use crate::runtime::timeparse::NaturalDateParser;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps for a while so overlapping runs can be observed.
    #[derive(Default)]
    struct SlowRunner {
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner for SlowRunner {
        async fn run(&self, command: &str) -> CommandOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now_running, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            CommandOutcome::ok(format!("{}\n", command), "")
        }
    }

    #[derive(Default)]
    struct CountingSink {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn send(&self, _title: &str, _body: &str) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        deps: SessionDeps,
        runner: Arc<SlowRunner>,
        sink: Arc<CountingSink>,
        store: Arc<MemoryFlowStore>,
    }

    async fn fixture() -> Fixture {
        let runner = Arc::new(SlowRunner::default());
        let sink = Arc::new(CountingSink::default());
        // Paused-clock tests need a store that never waits on another thread.
        let store = Arc::new(MemoryFlowStore::default());
        let deps = SessionDeps {
            engine: Arc::new(ExecutionEngine::new(Arc::new(NodeExecutor::new(runner.clone())))),
            store: store.clone(),
            notifier: ResultNotifier::new(sink.clone()),
            parser: Arc::new(NaturalDateParser),
            debounce: Duration::from_millis(500),
        };
        Fixture {
            deps,
            runner,
            sink,
            store,
        }
    }

    async fn one_command(session: &FlowSession, command: &str) -> Node {
        let node = session.add_node(NodeType::Instruction, None).await;
        session.set_command(&node.id, command).await.unwrap()
    }

    #[tokio::test]
    async fn run_writes_results_back_and_persists() {
        let fx = fixture().await;
        let session = FlowSession::new("build", fx.deps.clone());
        let node = one_command(&session, "make").await;

        let report = session.run_now().await.unwrap();
        assert!(!report.has_errors);

        let snapshot = session.snapshot().await;
        match &snapshot.nodes[0].kind {
            NodeKind::Instruction(data) => {
                assert_eq!(data.result.as_deref(), Some("make\n"));
                assert_eq!(data.last_run, Some(report.finished_at));
            }
            other => panic!("unexpected kind {:?}", other),
        }
        let stored = fx.store.load("build").await.unwrap().unwrap();
        assert_eq!(stored.nodes[0].id, node.id);
        assert_eq!(stored.nodes[0], snapshot.nodes[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_manual_run_is_rejected() {
        let fx = fixture().await;
        let session = FlowSession::new("build", fx.deps.clone());
        one_command(&session, "make").await;

        let background = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run_now().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(session.run_now().await, Err(RunError::InProgress(_))));

        background.await.unwrap().unwrap();
        assert_eq!(fx.runner.calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fx.sink.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fired_schedule_runs_once_and_clears_persisted_schedule() {
        let fx = fixture().await;
        let session = FlowSession::new("nightly", fx.deps.clone());
        one_command(&session, "backup").await;

        session.set_schedule_text("in 2 hours");
        session.commit_schedule().await.unwrap();
        let stored = fx.store.load("nightly").await.unwrap().unwrap();
        assert_eq!(stored.schedule_text.as_deref(), Some("in 2 hours"));
        assert!(stored.scheduled_at.is_some());

        // Re-committing replaces the first timer rather than adding a second.
        session.set_schedule_text("in 3 hours");
        session.commit_schedule().await.unwrap();

        tokio::time::sleep(Duration::from_secs(4 * 3600)).await;
        assert_eq!(fx.runner.calls.load(Ordering::SeqCst), 1);
        assert!(session.schedule_status().armed.is_none());
        let stored = fx.store.load("nightly").await.unwrap().unwrap();
        assert!(stored.schedule_text.is_none());
        assert!(stored.scheduled_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_cancels_the_pending_fire() {
        let fx = fixture().await;
        let session = FlowSession::new("nightly", fx.deps.clone());
        one_command(&session, "backup").await;
        session.set_schedule_text("in 1 hour");
        session.commit_schedule().await.unwrap();
        session.set_schedule_text("in 5 minutes");
        session.close().await;

        tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
        assert_eq!(fx.runner.calls.load(Ordering::SeqCst), 0);
        // The committed schedule, not the unarmed edit, is what stays stored.
        let stored = fx.store.load("nightly").await.unwrap().unwrap();
        assert_eq!(stored.schedule_text.as_deref(), Some("in 1 hour"));
    }

    #[tokio::test]
    async fn open_restores_graph_and_future_schedule() {
        let fx = fixture().await;
        let at = Utc::now() + chrono::Duration::days(1);
        let document = FlowDocument {
            nodes: Vec::new(),
            edges: Vec::new(),
            schedule_text: Some("tomorrow".to_string()),
            scheduled_at: Some(at),
        };
        fx.store.save("restored", &document).await.unwrap();

        let session = FlowSession::open("restored", fx.deps.clone()).await;
        let armed = session.schedule_status().armed.unwrap();
        assert_eq!(armed.at, at);
        assert_eq!(armed.text, "tomorrow");
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_firing_mid_run_waits_for_the_manual_run() {
        let fx = fixture().await;
        let session = FlowSession::new("nightly", fx.deps.clone());
        let first = one_command(&session, "backup").await;
        let second = one_command(&session, "verify").await;
        session.add_edge(&first.id, &second.id).await.unwrap();

        let manual = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run_now().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Fires about a second in, while the two-second manual run holds the gate.
        session.set_schedule_text("in 1 second");
        session.commit_schedule().await.unwrap();

        manual.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fx.runner.calls.load(Ordering::SeqCst), 4);
        assert_eq!(fx.runner.max_running.load(Ordering::SeqCst), 1);
        assert!(session.schedule_status().last_fired.is_some());
        assert_eq!(fx.sink.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_refuses_runs_and_saves() {
        let fx = fixture().await;
        let session = FlowSession::new("build", fx.deps.clone());
        one_command(&session, "make").await;

        let background = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run_now().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Close waits for the in-flight run, which still persists its results.
        session.close().await;
        assert!(background.await.unwrap().is_ok());
        assert!(fx.store.load("build").await.unwrap().is_some());

        assert!(matches!(session.run_now().await, Err(RunError::Closed(_))));
        assert!(session.save().await.is_err());
        assert_eq!(fx.runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_discards_stale_schedule() {
        let fx = fixture().await;
        let document = FlowDocument {
            schedule_text: Some("yesterday's plan".to_string()),
            scheduled_at: Some(Utc::now() - chrono::Duration::hours(1)),
            ..Default::default()
        };
        fx.store.save("stale", &document).await.unwrap();

        let session = FlowSession::open("stale", fx.deps.clone()).await;
        assert!(session.schedule_status().armed.is_none());
        assert_eq!(fx.runner.calls.load(Ordering::SeqCst), 0);

        // The drop is persisted, so the next open starts clean.
        let stored = fx.store.load("stale").await.unwrap().unwrap();
        assert!(stored.schedule_text.is_none());
        assert!(stored.scheduled_at.is_none());
    }

    #[tokio::test]
    async fn open_of_unknown_flow_is_empty() {
        let fx = fixture().await;
        let session = FlowSession::open("fresh", fx.deps.clone()).await;
        assert!(session.snapshot().await.nodes.is_empty());
        assert!(session.schedule_status().armed.is_none());
    }

    #[tokio::test]
    async fn unresolved_schedule_is_not_committed() {
        let fx = fixture().await;
        let session = FlowSession::new("build", fx.deps.clone());
        session.set_schedule_text("asdf");
        assert!(matches!(
            session.commit_schedule().await,
            Err(ScheduleError::Unresolved(_))
        ));
        assert!(fx.store.load("build").await.unwrap().is_none());
    }
}
