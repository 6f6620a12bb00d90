//! Admission control for concurrent sessions

use envrt_core::{EnvError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Bounds the number of concurrently admitted sessions
///
/// Admission never queues: when every slot is taken the request is rejected
/// immediately with [`EnvError::SessionCapacity`].
#[derive(Debug, Clone)]
pub struct CapacityGuard {
    slots: Arc<Semaphore>,
    max_sessions: usize,
}

/// Admitted slot, released when dropped
#[derive(Debug)]
pub struct CapacityPermit {
    _permit: OwnedSemaphorePermit,
}

/// Point-in-time capacity report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityStatus {
    pub current_sessions: usize,
    pub max_sessions: usize,
    pub accepting: bool,
}

impl CapacityGuard {
    /// Create a guard admitting at most `max_sessions` sessions
    pub fn new(max_sessions: usize) -> Result<Self> {
        if max_sessions == 0 {
            return Err(EnvError::ConcurrencyConfiguration(
                "max_sessions must be at least 1".into(),
            ));
        }
        if max_sessions > Semaphore::MAX_PERMITS {
            return Err(EnvError::ConcurrencyConfiguration(format!(
                "max_sessions must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        })
    }

    /// Take a slot or fail without waiting
    pub fn try_admit(&self) -> Result<CapacityPermit> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => Ok(CapacityPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                Err(EnvError::SessionCapacity {
                    current: self.current(),
                    max: self.max_sessions,
                })
            }
        }
    }

    /// Return a slot
    pub fn release(&self, permit: CapacityPermit) {
        drop(permit);
    }

    pub fn current(&self) -> usize {
        self.max_sessions - self.slots.available_permits()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn status(&self) -> CapacityStatus {
        let current = self.current();
        CapacityStatus {
            current_sessions: current,
            max_sessions: self.max_sessions,
            accepting: current < self.max_sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        let err = CapacityGuard::new(0).unwrap_err();
        assert!(matches!(err, EnvError::ConcurrencyConfiguration(_)));
    }

    #[test]
    fn test_admits_up_to_max_then_rejects() {
        let guard = CapacityGuard::new(3).unwrap();
        let permits: Vec<_> = (0..3).map(|_| guard.try_admit().unwrap()).collect();
        assert_eq!(guard.current(), 3);
        assert!(!guard.status().accepting);

        match guard.try_admit() {
            Err(EnvError::SessionCapacity { current, max }) => {
                assert_eq!(current, 3);
                assert_eq!(max, 3);
            }
            other => panic!("expected capacity error, got {:?}", other),
        }
        drop(permits);
    }

    #[test]
    fn test_release_frees_a_slot() {
        let guard = CapacityGuard::new(1).unwrap();
        let permit = guard.try_admit().unwrap();
        assert!(guard.try_admit().is_err());
        guard.release(permit);
        assert_eq!(guard.current(), 0);
        assert!(guard.try_admit().is_ok());
    }

    #[test]
    fn test_clones_share_slots() {
        let guard = CapacityGuard::new(1).unwrap();
        let other = guard.clone();
        let _permit = guard.try_admit().unwrap();
        assert!(other.try_admit().is_err());
    }
}
