//! Per-flow deferred execution
//!
//! Owns the two timers a flow can have: the debounce timer that parses the
//! schedule text once typing pauses, and the fire timer that runs the flow at
//! the committed instant. Re-arming either one always cancels the previous
//! instance first, so a flow never has more than one of each.

use crate::runtime::timeparse::DateParser;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Default pause between the last keystroke and parsing
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Why a schedule could not be committed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("could not understand schedule '{0}'")]
    Unresolved(String),
    #[error("schedule time {0} is not in the future")]
    InPast(DateTime<Utc>),
}

/// Whatever runs when a schedule fires
#[async_trait]
pub trait ScheduledRun: Send + Sync {
    async fn run_scheduled(&self);
}

/// Parse status of the schedule text being edited
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ParseState {
    /// No schedule text
    #[default]
    Idle,
    /// Waiting for the debounce timer
    Pending,
    Resolved { at: DateTime<Utc> },
    Unresolved,
}

/// A schedule with a running fire timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArmedSchedule {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of the controller for callers and the API
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    pub text: String,
    pub parse: ParseState,
    pub armed: Option<ArmedSchedule>,
    pub last_fired: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct ScheduleInner {
    text: String,
    parse_state: Option<ParseState>,
    armed: Option<ArmedSchedule>,
    last_fired: Option<DateTime<Utc>>,
    parse_timer: Option<JoinHandle<()>>,
    fire_timer: Option<JoinHandle<()>>,
    // Bumped on every cancel so a timer that already woke cannot act.
    parse_generation: u64,
    fire_generation: u64,
    closed: bool,
}

impl ScheduleInner {
    fn cancel_parse(&mut self) {
        self.parse_generation += 1;
        if let Some(timer) = self.parse_timer.take() {
            timer.abort();
        }
    }

    fn cancel_fire(&mut self) {
        self.fire_generation += 1;
        if let Some(timer) = self.fire_timer.take() {
            timer.abort();
        }
    }

    fn state(&self) -> ParseState {
        self.parse_state.clone().unwrap_or(ParseState::Idle)
    }
}

/// Schedule state machine for one flow
pub struct ScheduleController {
    flow_id: String,
    parser: Arc<dyn DateParser>,
    debounce: Duration,
    target: Weak<dyn ScheduledRun>,
    inner: Arc<Mutex<ScheduleInner>>,
}

impl std::fmt::Debug for ScheduleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleController")
            .field("flow_id", &self.flow_id)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

/// Current wall clock with the local UTC offset
fn local_now() -> DateTime<FixedOffset> {
    let now = Local::now();
    now.with_timezone(now.offset())
}

fn lock(inner: &Mutex<ScheduleInner>) -> MutexGuard<'_, ScheduleInner> {
    // State is plain data; a panic elsewhere cannot leave it half-written.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn resolve_text(parser: &dyn DateParser, text: &str) -> ParseState {
    if text.trim().is_empty() {
        return ParseState::Idle;
    }
    match parser.parse(text, local_now()) {
        Some(at) => ParseState::Resolved {
            at: at.with_timezone(&Utc),
        },
        None => ParseState::Unresolved,
    }
}

impl ScheduleController {
    pub fn new(
        flow_id: impl Into<String>,
        parser: Arc<dyn DateParser>,
        debounce: Duration,
        target: Weak<dyn ScheduledRun>,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            parser,
            debounce,
            target,
            inner: Arc::new(Mutex::new(ScheduleInner::default())),
        }
    }

    /// Replace the schedule text and restart the debounce timer
    pub fn set_text(&self, text: &str) {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return;
        }
        inner.cancel_parse();
        inner.text = text.to_string();

        if text.trim().is_empty() {
            inner.parse_state = Some(ParseState::Idle);
            return;
        }
        inner.parse_state = Some(ParseState::Pending);

        let generation = inner.parse_generation;
        let shared = Arc::clone(&self.inner);
        let parser = Arc::clone(&self.parser);
        let debounce = self.debounce;
        inner.parse_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let mut inner = lock(&shared);
            if inner.parse_generation != generation {
                return;
            }
            let state = resolve_text(parser.as_ref(), &inner.text);
            tracing::debug!("🗓️ Parsed schedule '{}' -> {:?}", inner.text, state);
            inner.parse_state = Some(state);
            inner.parse_timer = None;
        }));
    }

    /// Parse state of the text being edited
    pub fn parse_state(&self) -> ParseState {
        lock(&self.inner).state()
    }

    /// The armed schedule, if a fire timer is pending
    pub fn armed(&self) -> Option<ArmedSchedule> {
        lock(&self.inner).armed.clone()
    }

    pub fn status(&self) -> ScheduleStatus {
        let inner = lock(&self.inner);
        ScheduleStatus {
            text: inner.text.clone(),
            parse: inner.state(),
            armed: inner.armed.clone(),
            last_fired: inner.last_fired,
        }
    }

    /// Commit the current text
    ///
    /// A parse still waiting on the debounce timer is resolved immediately.
    pub fn commit(&self) -> Result<ArmedSchedule, ScheduleError> {
        let mut inner = lock(&self.inner);
        if inner.state() == ParseState::Pending {
            inner.cancel_parse();
            let state = resolve_text(self.parser.as_ref(), &inner.text);
            inner.parse_state = Some(state);
        }
        match inner.state() {
            ParseState::Resolved { at } => self.arm_locked(&mut inner, at),
            _ => Err(ScheduleError::Unresolved(inner.text.clone())),
        }
    }

    /// Parse `text` right away and arm it, skipping the debounce
    pub fn commit_text(&self, text: &str) -> Result<ArmedSchedule, ScheduleError> {
        let state = resolve_text(self.parser.as_ref(), text);
        let ParseState::Resolved { at } = state else {
            return Err(ScheduleError::Unresolved(text.to_string()));
        };
        self.arm(text, at)
    }

    /// Arm the fire timer for `at`, replacing any armed schedule
    ///
    /// Instants at or before now are rejected as unresolved; an already armed
    /// schedule stays armed.
    pub fn arm(&self, text: &str, at: DateTime<Utc>) -> Result<ArmedSchedule, ScheduleError> {
        let mut inner = lock(&self.inner);
        inner.cancel_parse();
        inner.text = text.to_string();
        self.arm_locked(&mut inner, at)
    }

    fn arm_locked(
        &self,
        inner: &mut ScheduleInner,
        at: DateTime<Utc>,
    ) -> Result<ArmedSchedule, ScheduleError> {
        let text = inner.text.clone();
        if inner.closed {
            return Err(ScheduleError::Unresolved(text));
        }
        let now = Utc::now();
        let delay = match (at - now).to_std() {
            Ok(delay) if at > now => delay,
            _ => {
                tracing::warn!("⚠️ Rejected schedule '{}' for flow '{}': {} is in the past", text, self.flow_id, at);
                inner.parse_state = Some(ParseState::Unresolved);
                return Err(ScheduleError::InPast(at));
            }
        };

        inner.parse_state = Some(ParseState::Resolved { at });
        inner.cancel_fire();
        let armed = ArmedSchedule { text, at };
        inner.armed = Some(armed.clone());

        let generation = inner.fire_generation;
        let shared = Arc::clone(&self.inner);
        let target = self.target.clone();
        let flow_id = self.flow_id.clone();
        inner.fire_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = lock(&shared);
                if inner.fire_generation != generation {
                    return;
                }
                // Detach before running so a later clear() cannot abort the run.
                inner.fire_timer = None;
                inner.armed = None;
                inner.cancel_parse();
                inner.text.clear();
                inner.parse_state = Some(ParseState::Idle);
                inner.last_fired = Some(Utc::now());
            }
            tracing::info!("⏰ Schedule fired for flow '{}'", flow_id);
            match target.upgrade() {
                Some(target) => target.run_scheduled().await,
                None => tracing::debug!("⏭️ Flow '{}' is gone, skipping scheduled run", flow_id),
            }
        }));

        tracing::info!("⏰ Flow '{}' scheduled for {} ('{}')", self.flow_id, armed.at, armed.text);
        Ok(armed)
    }

    /// Cancel everything and return to idle
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.cancel_parse();
        inner.cancel_fire();
        inner.text.clear();
        inner.parse_state = Some(ParseState::Idle);
        if inner.armed.take().is_some() {
            tracing::info!("🧹 Cleared schedule for flow '{}'", self.flow_id);
        }
    }

    /// Cancel both timers without touching the committed schedule
    ///
    /// Used when the flow is closed; the controller ignores later edits.
    pub fn shutdown(&self) {
        let mut inner = lock(&self.inner);
        inner.closed = true;
        inner.cancel_parse();
        inner.cancel_fire();
    }
}

impl Drop for ScheduleController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
