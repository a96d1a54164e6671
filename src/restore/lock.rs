// nvrbackup/src/restore/lock.rs
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

/// Where the single restore slot currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RestoreState {
    #[default]
    Idle,
    Locked,
    Applying,
    Failed,
}

/// In-memory mutual exclusion for restores. Never persisted, so a restart always
/// comes back `Idle`.
#[derive(Debug, Default)]
pub struct RestoreLock {
    state: Mutex<RestoreState>,
}

impl RestoreLock {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn state(&self) -> RestoreState {
        *self.guard()
    }

    /// Takes the slot if it is idle. Never waits.
    pub fn try_acquire(&self) -> Option<RestoreGuard<'_>> {
        let mut state = self.guard();
        if *state != RestoreState::Idle {
            return None;
        }
        *state = RestoreState::Locked;
        Some(RestoreGuard { lock: self })
    }

    fn set(&self, next: RestoreState) {
        *self.guard() = next;
    }

    fn guard(&self) -> MutexGuard<'_, RestoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holding this means holding the restore slot. Dropping it releases the slot,
/// whatever path the restore took.
#[derive(Debug)]
pub struct RestoreGuard<'a> {
    lock: &'a RestoreLock,
}

impl RestoreGuard<'_> {
    pub fn applying(&self) {
        self.lock.set(RestoreState::Applying);
    }

    pub fn failed(&self) {
        self.lock.set(RestoreState::Failed);
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.lock.set(RestoreState::Idle);
    }
}
