//! Session: one environment instance bound to one client

use chrono::{DateTime, Utc};
use envrt_core::{EnvError, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::capacity::CapacityPermit;
use crate::environment::Environment;

/// Unique session identifier
pub type SessionId = String;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Running,
    Closing,
    Closed,
}

/// Serializable session summary
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub state: LifecycleState,
    pub step_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// A live session
///
/// The environment sits behind an async mutex, so operations on one session
/// run one at a time while distinct sessions proceed in parallel.
pub struct Session<E: Environment> {
    id: SessionId,
    created_at: DateTime<Utc>,
    slot: Mutex<SessionSlot<E>>,
}

impl<E: Environment> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Mutable session state, reachable only through [`Session::acquire`]
pub struct SessionSlot<E> {
    env: E,
    state: LifecycleState,
    step_count: u64,
    last_active_at: DateTime<Utc>,
    last_active: Instant,
    permit: Option<CapacityPermit>,
}

/// Exclusive access to a session's environment
pub type SessionGuard<'a, E> = MutexGuard<'a, SessionSlot<E>>;

impl<E: Environment> Session<E> {
    pub(crate) fn new(id: SessionId, env: E, permit: CapacityPermit) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            slot: Mutex::new(SessionSlot {
                env,
                state: LifecycleState::Created,
                step_count: 0,
                last_active_at: now,
                last_active: Instant::now(),
                permit: Some(permit),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Wait for exclusive access
    ///
    /// Fails with `SessionNotFound` once the session is closing or closed.
    pub async fn acquire(&self) -> Result<SessionGuard<'_, E>> {
        let mut slot = self.slot.lock().await;
        match slot.state {
            LifecycleState::Closing | LifecycleState::Closed => {
                return Err(EnvError::SessionNotFound(self.id.clone()));
            }
            LifecycleState::Created => slot.state = LifecycleState::Running,
            LifecycleState::Running => {}
        }
        slot.touch();
        Ok(slot)
    }

    /// Close the environment and release the capacity slot
    ///
    /// Returns `false` if the session was already closed.
    pub async fn close(&self) -> bool {
        let mut slot = self.slot.lock().await;
        if matches!(slot.state, LifecycleState::Closing | LifecycleState::Closed) {
            return false;
        }
        slot.state = LifecycleState::Closing;
        if let Err(e) = slot.env.close().await {
            tracing::warn!("Environment close failed for session {}: {}", self.id, e);
        }
        slot.permit.take();
        slot.state = LifecycleState::Closed;
        tracing::debug!("Session {} closed", self.id);
        true
    }

    /// Time since the last operation, or `None` while an operation is in flight
    pub fn idle_for(&self) -> Option<Duration> {
        self.slot
            .try_lock()
            .ok()
            .map(|slot| slot.last_active.elapsed())
    }

    pub async fn info(&self) -> SessionInfo {
        let slot = self.slot.lock().await;
        SessionInfo {
            session_id: self.id.clone(),
            state: slot.state,
            step_count: slot.step_count,
            created_at: self.created_at,
            last_active_at: slot.last_active_at,
        }
    }
}

impl<E> SessionSlot<E> {
    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub(crate) fn record_step(&mut self) {
        self.step_count += 1;
    }

    pub(crate) fn reset_steps(&mut self) {
        self.step_count = 0;
    }

    fn touch(&mut self) {
        self.last_active_at = Utc::now();
        self.last_active = Instant::now();
    }
}
