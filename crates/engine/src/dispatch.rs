use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use steward_core::{CardId, DispatchError};

/// Opaque reference handed back by the downstream system once an action ran,
/// e.g. a message id or a job id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalRef(pub String);

impl std::fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Boundary to whatever actually performs actions. The engine guarantees it
/// calls this at most once per card transition it won; implementations own
/// everything downstream of that.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        action_type: &str,
        card_id: &CardId,
        payload: &serde_json::Value,
    ) -> Result<ExternalRef, DispatchError>;
}

/// Scriptable dispatcher for tests. Succeeds with generated refs unless a
/// failure has been queued; every call is recorded so tests can assert the
/// at-most-once property.
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<(String, String)>>,
    failures: Mutex<VecDeque<DispatchError>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a failure for the next dispatch call.
    pub fn fail_next(&self, error: DispatchError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, card_id: &CardId) -> usize {
        self.calls.lock().unwrap().iter().filter(|(id, _)| *id == card_id.0).count()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        action_type: &str,
        card_id: &CardId,
        _payload: &serde_json::Value,
    ) -> Result<ExternalRef, DispatchError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((card_id.0.clone(), action_type.to_string()));
            calls.len()
        };

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(ExternalRef(format!("ref-{call_number}")))
    }
}
