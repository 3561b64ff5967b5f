//! Component lifecycle: an explicit state plus a narrow capability contract

use crate::errors::{JanuscopeError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "UNINITIALIZED"),
            LifecycleState::Initialized => write!(f, "INITIALIZED"),
            LifecycleState::Running => write!(f, "RUNNING"),
            LifecycleState::Stopped => write!(f, "STOPPED"),
            LifecycleState::Failed => write!(f, "FAILED"),
        }
    }
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn name(&self) -> &str;
    fn state(&self) -> LifecycleState;
    async fn initialize(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    fn is_healthy(&self) -> bool;
}

/// State holder embedded by components that implement [`Lifecycle`]
#[derive(Debug)]
pub struct LifecycleCell {
    component: String,
    state: RwLock<LifecycleState>,
}

impl LifecycleCell {
    /// Create a cell in the `Uninitialized` state
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            state: RwLock::new(LifecycleState::Uninitialized),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn get(&self) -> LifecycleState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(LifecycleState::Failed)
    }

    /// Move to `next` if the current state is one of `allowed`
    pub fn transition(&self, allowed: &[LifecycleState], next: LifecycleState) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| JanuscopeError::Lifecycle(format!("{} state lock poisoned", self.component)))?;

        if !allowed.contains(&*state) {
            return Err(JanuscopeError::Lifecycle(format!(
                "{} cannot move from {} to {}",
                self.component, *state, next
            )));
        }

        *state = next;
        Ok(())
    }

    /// Move to `Failed` from any state
    pub fn fail(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = LifecycleState::Failed;
        }
    }

    /// Error unless the component is `Running`
    pub fn ensure_running(&self) -> Result<()> {
        match self.get() {
            LifecycleState::Running => Ok(()),
            other => Err(JanuscopeError::Lifecycle(format!(
                "{} is {}, not RUNNING",
                self.component, other
            ))),
        }
    }
}
