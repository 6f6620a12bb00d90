//! Session manager: creation, lookup, teardown and idle reaping

use envrt_core::{EnvError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::capacity::{CapacityGuard, CapacityPermit, CapacityStatus};
use crate::config::ServerConfig;
use crate::environment::{Environment, EnvironmentFactory, FactoryArgs};
use crate::session::{Session, SessionId, SessionInfo};

type SessionMap<E> = HashMap<SessionId, Arc<Session<E>>>;

/// Environment serving one stateless call; holds a capacity slot until discarded
pub struct ScratchEnv<E> {
    env: E,
    _permit: CapacityPermit,
}

impl<E> ScratchEnv<E> {
    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }
}

/// Owns every live session
pub struct SessionManager<F: EnvironmentFactory> {
    factory: F,
    capacity: CapacityGuard,
    sessions: RwLock<SessionMap<F::Env>>,
    idle_timeout: Option<Duration>,
}

impl<F: EnvironmentFactory> SessionManager<F> {
    pub fn new(factory: F, config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            factory,
            capacity: CapacityGuard::new(config.max_sessions)?,
            sessions: RwLock::new(HashMap::new()),
            idle_timeout: config.idle_timeout,
        })
    }

    /// Admit, build and register a new session
    pub async fn create(&self, args: FactoryArgs) -> Result<Arc<Session<F::Env>>> {
        self.create_with_id(uuid::Uuid::new_v4().to_string(), args)
            .await
    }

    pub(crate) async fn create_with_id(
        &self,
        id: SessionId,
        args: FactoryArgs,
    ) -> Result<Arc<Session<F::Env>>> {
        // Reject before paying for environment construction
        let permit = self.capacity.try_admit()?;

        let env = match self.factory.create(args).await {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!("Environment factory failed: {}", e);
                return Err(EnvError::EnvironmentFactory(e.to_string()));
            }
        };

        let session = Arc::new(Session::new(id.clone(), env, permit));
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            drop(sessions);
            session.close().await;
            return Err(EnvError::SessionCreation(format!(
                "session id already in use: {}",
                id
            )));
        }
        sessions.insert(id.clone(), session.clone());
        drop(sessions);

        tracing::info!(
            "Session {} created ({}/{})",
            id,
            self.capacity.current(),
            self.capacity.max_sessions()
        );
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Session<F::Env>>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EnvError::SessionNotFound(id.to_string()))
    }

    /// Close and forget a session; `false` if it was already gone
    pub async fn destroy(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                let closed = session.close().await;
                tracing::info!("Session {} destroyed", id);
                closed
            }
            None => false,
        }
    }

    /// Close every session
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        let count = drained.len();
        futures::future::join_all(drained.iter().map(|(_, session)| session.close())).await;
        tracing::info!("Session manager shut down, closed {} session(s)", count);
    }

    /// Destroy sessions idle past the configured timeout
    ///
    /// Sessions with an operation in flight are never reaped.
    pub async fn reap_idle(&self) -> usize {
        let Some(limit) = self.idle_timeout else {
            return 0;
        };
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, session)| session.idle_for().is_some_and(|idle| idle >= limit))
            .map(|(id, _)| id.clone())
            .collect();

        let mut reaped = 0;
        for id in expired {
            tracing::info!("Reaping idle session {}", id);
            if self.destroy(&id).await {
                reaped += 1;
            }
        }
        reaped
    }

    /// Periodically reap idle sessions until the handle is aborted
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.reap_idle().await;
            }
        })
    }

    pub fn capacity(&self) -> CapacityStatus {
        self.capacity.status()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Summaries of every live session, oldest first
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        infos
    }

    /// Build an environment outside any session, for stateless calls
    ///
    /// Admitted like a session, so it fails with
    /// [`EnvError::SessionCapacity`] when every slot is taken.
    pub async fn scratch(&self, args: FactoryArgs) -> Result<ScratchEnv<F::Env>> {
        let permit = self.capacity.try_admit()?;
        let env = self
            .factory
            .create(args)
            .await
            .map_err(|e| EnvError::EnvironmentFactory(e.to_string()))?;
        Ok(ScratchEnv {
            env,
            _permit: permit,
        })
    }

    /// Close a scratch environment and release its slot
    pub async fn discard(&self, scratch: ScratchEnv<F::Env>) {
        let ScratchEnv { mut env, _permit } = scratch;
        if let Err(e) = env.close().await {
            tracing::warn!("Scratch environment close failed: {}", e);
        }
    }
}
