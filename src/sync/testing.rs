//! Scripted server fake shared by sync tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use super::api::SyncApi;
use crate::error::SyncError;
use crate::model::OperationKind;

/// Replays queued responses in order, then succeeds.
#[derive(Debug, Clone, Default)]
pub struct ScriptedApi {
    script: Arc<Mutex<VecDeque<Result<(), SyncError>>>>,
    calls: Arc<Mutex<Vec<(OperationKind, serde_json::Value)>>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedApi {
    pub fn new(script: impl IntoIterator<Item = Result<(), SyncError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Every dispatch waits for a permit on the returned semaphore.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> Vec<(OperationKind, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl SyncApi for ScriptedApi {
    async fn dispatch(
        &self,
        operation: OperationKind,
        payload: &serde_json::Value,
    ) -> Result<(), SyncError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.calls.lock().unwrap().push((operation, payload.clone()));
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}
