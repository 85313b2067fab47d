//! Registry of open flows using ArcSwap
//!
//! Lookups are lock-free. Opening and closing swap the whole map, so a handler
//! holding a session keeps working while the set of open flows changes.
//! Read-only lookups never register a flow that storage does not know.

use crate::runtime::session::{FlowSession, SessionDeps};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

/// All flows that currently have a live session
pub struct FlowRegistry {
    /// Key: flow id, Value: its session
    sessions: ArcSwap<HashMap<String, Arc<FlowSession>>>,

    /// Serializes opens so two requests cannot load the same flow twice
    open_lock: Mutex<()>,

    deps: SessionDeps,
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("open", &self.list_flow_ids())
            .finish_non_exhaustive()
    }
}

impl FlowRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: ArcSwap::new(Arc::new(HashMap::new())),
            open_lock: Mutex::new(()),
            deps,
        }
    }

    /// Session for `flow_id` if it is open (lock-free read)
    pub fn get(&self, flow_id: &str) -> Option<Arc<FlowSession>> {
        self.sessions.load().get(flow_id).cloned()
    }

    /// Session for `flow_id`, loading it from storage on first use
    pub async fn get_or_open(&self, flow_id: &str) -> Arc<FlowSession> {
        if let Some(session) = self.get(flow_id) {
            return session;
        }

        let _guard = self.open_lock.lock().await;
        // Another request may have opened it while we waited.
        if let Some(session) = self.get(flow_id) {
            return session;
        }

        let session = FlowSession::open(flow_id, self.deps.clone()).await;
        self.register(flow_id, &session);
        session
    }

    /// Session for `flow_id` if it is open or stored, without creating one
    ///
    /// Used by read-only requests so that looking at unknown flows does not
    /// grow the registry.
    pub async fn get_existing(&self, flow_id: &str) -> Option<Arc<FlowSession>> {
        if let Some(session) = self.get(flow_id) {
            return Some(session);
        }

        let _guard = self.open_lock.lock().await;
        if let Some(session) = self.get(flow_id) {
            return Some(session);
        }

        let session = FlowSession::open_existing(flow_id, self.deps.clone()).await?;
        self.register(flow_id, &session);
        Some(session)
    }

    /// Caller holds `open_lock`
    fn register(&self, flow_id: &str, session: &Arc<FlowSession>) {
        let mut sessions = (**self.sessions.load()).clone();
        sessions.insert(flow_id.to_string(), Arc::clone(session));
        self.sessions.store(Arc::new(sessions));
        tracing::info!("📂 Opened flow '{}'", flow_id);
    }

    /// Close a flow: tear down its timers and forget the session
    ///
    /// An in-flight run finishes first, so a session opened afterwards never
    /// overlaps it. Returns false if the flow was not open.
    pub async fn close(&self, flow_id: &str) -> bool {
        let Some(session) = self.get(flow_id) else {
            return false;
        };
        session.close().await;

        let _guard = self.open_lock.lock().await;
        let mut sessions = (**self.sessions.load()).clone();
        match sessions.get(flow_id) {
            Some(current) if Arc::ptr_eq(current, &session) => {
                sessions.remove(flow_id);
                self.sessions.store(Arc::new(sessions));
                true
            }
            // A concurrent close already removed it.
            _ => false,
        }
    }

    /// Close every open flow, used on shutdown
    pub async fn close_all(&self) {
        let sessions = {
            let _guard = self.open_lock.lock().await;
            self.sessions.swap(Arc::new(HashMap::new()))
        };
        for session in sessions.values() {
            session.close().await;
        }
    }

    pub fn list_flow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.load().keys().cloned().collect();
        ids.sort();
        ids
    }
}
