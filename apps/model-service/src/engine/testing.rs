//! In-memory engine backend for tests. Records every lifecycle call in order
//! and answers generation requests from a script.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{
    Engine, EngineBackend, EngineError, EngineParams, GenerationRequest, MemoryHeadroom,
};
use crate::catalog::DEFAULT_MAX_MODEL_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Construct(String),
    Release(String),
    Reclaim,
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Error(String),
}

#[derive(Default)]
struct Shared {
    events: Mutex<Vec<EngineEvent>>,
    reply: Mutex<Option<ScriptedReply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    generate_calls: AtomicUsize,
    fail_release: AtomicBool,
    fail_reclaim: AtomicBool,
}

impl Shared {
    fn record(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct ScriptedBackend {
    shared: Arc<Shared>,
    failing: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every construction of `model` fail.
    pub fn fail_model(&self, model: &str) {
        self.failing.lock().unwrap().insert(model.to_string());
    }

    /// Makes every engine release report an error (after recording it).
    pub fn fail_release(&self) {
        self.shared.fail_release.store(true, Ordering::SeqCst);
    }

    /// Makes every memory reclamation report an error (after recording it).
    pub fn fail_reclaim(&self) {
        self.shared.fail_reclaim.store(true, Ordering::SeqCst);
    }

    pub fn reply_with(&self, reply: ScriptedReply) {
        *self.shared.reply.lock().unwrap() = Some(reply);
    }

    /// Blocks every subsequent construction until the returned semaphore gets a permit.
    pub fn hold_construction(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.shared.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.shared.events.lock().unwrap().clear();
    }

    pub fn generate_calls(&self) -> usize {
        self.shared.generate_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.shared.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl EngineBackend for ScriptedBackend {
    async fn construct(&self, params: &EngineParams) -> Result<Box<dyn Engine>, EngineError> {
        let model = params
            .model()
            .ok_or(EngineError::MissingParam("model"))?
            .to_string();
        self.shared.record(EngineEvent::Construct(model.clone()));

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?;
            permit.forget();
        }

        if self.failing.lock().unwrap().contains(&model) {
            return Err(EngineError::Other(format!("scripted failure for {model}")));
        }

        Ok(Box::new(ScriptedEngine {
            model,
            max_model_len: params.max_model_len().unwrap_or(DEFAULT_MAX_MODEL_LEN),
            shared: self.shared.clone(),
        }))
    }

    async fn reclaim_memory(&self) -> Result<MemoryHeadroom, EngineError> {
        self.shared.record(EngineEvent::Reclaim);
        if self.shared.fail_reclaim.load(Ordering::SeqCst) {
            return Err(EngineError::Other("scripted reclaim failure".to_string()));
        }
        Ok(MemoryHeadroom {
            free_mib: Some(24_000),
            total_mib: Some(24_576),
        })
    }
}

struct ScriptedEngine {
    model: String,
    max_model_len: u32,
    shared: Arc<Shared>,
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn max_model_len(&self) -> u32 {
        self.max_model_len
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError> {
        self.shared.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.requests.lock().unwrap().push(request.clone());

        let reply = self.shared.reply.lock().unwrap().clone();
        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Error(message)) => Err(EngineError::Other(message)),
            None => Err(EngineError::EmptyContent),
        }
    }

    async fn release(self: Box<Self>) -> Result<(), EngineError> {
        self.shared.record(EngineEvent::Release(self.model.clone()));
        if self.shared.fail_release.load(Ordering::SeqCst) {
            return Err(EngineError::Other(format!("scripted release failure for {}", self.model)));
        }
        Ok(())
    }
}
