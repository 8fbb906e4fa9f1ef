//! Model Lifecycle Manager: sole owner of the live engine.
//!
//! Lifecycle: `Idle → Loading → Idle | Error`, with `recover()` taking
//! `Error → Loading` again. Mutation happens only inside `load`, under the
//! swap gate and the engine write lock:
//!
//! - the swap gate (`AtomicBool`, compare-and-swap) admits one load at a time
//!   and makes `inference` refuse work while a swap is underway;
//! - the engine lives in a `RwLock` slot: inference holds a read lock for the
//!   duration of the call, `load` takes the write lock, so construction never
//!   overlaps an in-flight generation or the previous engine's cleanup;
//! - status is published through a `watch` channel, so `get_status` never
//!   waits behind a load.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analysis::{analyze, InferenceRequest, InferenceResult};
use crate::catalog::{AvailableModels, Catalog, InferenceMode, ModelDescriptor};
use crate::engine::{Engine, EngineBackend, EngineError, MemoryHeadroom, PageImage};
use crate::families::handler_for;

pub mod status;

pub use status::{LifecycleStatus, ModelStatus};

/// Rough wall-clock time of a swap, reported to callers of `/swap`.
pub const SWAP_ETA_SECONDS: u64 = 45;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Model '{0}' not found in configuration")]
    ModelNotFound(String),

    #[error("Failed to load model {model}: {source}")]
    LoadFailed {
        model: String,
        #[source]
        source: EngineError,
    },

    #[error("Model is swapping, please try again later")]
    SwapInProgress,

    #[error("No model loaded")]
    NoModelLoaded,
}

impl ManagerError {
    /// Busy conditions are retryable and not defects.
    pub fn is_busy(&self) -> bool {
        matches!(self, ManagerError::SwapInProgress | ManagerError::NoModelLoaded)
    }
}

struct LoadedModel {
    descriptor: ModelDescriptor,
    engine: Box<dyn Engine>,
}

/// Holds the swap gate. Dropping it reopens the gate on every exit path,
/// including a load future that is dropped part-way through.
pub struct SwapGuard {
    gate: Arc<AtomicBool>,
    released: Arc<Notify>,
    status: Arc<watch::Sender<ModelStatus>>,
}

impl Drop for SwapGuard {
    fn drop(&mut self) {
        // A load abandoned after cleanup never reached Idle or Error.
        self.status.send_if_modified(|s| {
            if s.status == LifecycleStatus::Loading {
                s.status = LifecycleStatus::Error;
                s.current_model = None;
                true
            } else {
                false
            }
        });
        self.gate.store(false, Ordering::Release);
        self.released.notify_waiters();
    }
}

pub struct ModelManager {
    catalog: Arc<Catalog>,
    backend: Arc<dyn EngineBackend>,
    loaded: RwLock<Option<LoadedModel>>,
    swapping: Arc<AtomicBool>,
    gate_released: Arc<Notify>,
    status: Arc<watch::Sender<ModelStatus>>,
}

impl ModelManager {
    pub fn new(catalog: Arc<Catalog>, backend: Arc<dyn EngineBackend>) -> Self {
        let (status, _) = watch::channel(ModelStatus::default());
        Self {
            catalog,
            backend,
            loaded: RwLock::new(None),
            swapping: Arc::new(AtomicBool::new(false)),
            gate_released: Arc::new(Notify::new()),
            status: Arc::new(status),
        }
    }

    pub fn get_status(&self) -> ModelStatus {
        self.status.borrow().clone()
    }

    pub fn is_swapping(&self) -> bool {
        self.swapping.load(Ordering::Acquire)
    }

    pub fn available_models(&self) -> AvailableModels {
        let status = self.get_status();
        self.catalog
            .available_models(status.inference_mode, status.current_model)
    }

    /// Reserves the swap gate, or fails if another load holds it.
    pub fn try_begin_swap(&self) -> Result<SwapGuard, ManagerError> {
        self.swapping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ManagerError::SwapInProgress)?;
        Ok(SwapGuard {
            gate: self.swapping.clone(),
            released: self.gate_released.clone(),
            status: self.status.clone(),
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Loading
    // ────────────────────────────────────────────────────────────────────────

    /// Loads the catalog default at startup. Failures only show up in status.
    pub async fn initialize_default(&self) {
        let default_model = self.catalog.default_model.clone();
        match self.load(&default_model).await {
            Ok(()) => info!("Default model {default_model} loaded successfully"),
            Err(e) => error!("Failed to initialize default model: {e}"),
        }
    }

    /// Replaces the current engine with `name`.
    ///
    /// Returns `SwapInProgress` without touching anything if another load is
    /// running. `ModelNotFound` and `LoadFailed` leave `status = Error` with no
    /// current model; the caller decides whether to `recover()`.
    pub async fn load(&self, name: &str) -> Result<(), ManagerError> {
        let guard = self.try_begin_swap()?;
        let mode = self.get_status().inference_mode;
        self.load_with(&guard, name, mode).await
    }

    async fn load_with(
        &self,
        _guard: &SwapGuard,
        name: &str,
        mode: InferenceMode,
    ) -> Result<(), ManagerError> {
        let mut slot = self.loaded.write().await;
        // the held engine is about to be released, so its name goes with it
        self.status.send_modify(|s| {
            s.status = LifecycleStatus::Loading;
            s.current_model = None;
        });

        let descriptor = match self.catalog.resolve(name) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!("Failed to load model {name}: {e}");
                // the old engine would otherwise be held with no name attached
                self.cleanup(&mut slot).await;
                self.publish_failure();
                return Err(ManagerError::ModelNotFound(name.to_string()));
            }
        };

        self.cleanup(&mut slot).await;

        let handler = handler_for(&descriptor.name);
        let params = handler.produce_config(&descriptor);
        info!(
            "Loading {} model {} ({} category) using {} (max_model_len={})",
            handler.family(),
            name,
            descriptor.category,
            handler.handler_name(),
            descriptor.max_model_len()
        );
        info!(
            "Engine config: {}",
            serde_json::to_string(&params).unwrap_or_default()
        );

        match self.backend.construct(&params).await {
            Ok(engine) => {
                *slot = Some(LoadedModel { descriptor, engine });
                self.status.send_modify(|s| {
                    s.current_model = Some(name.to_string());
                    s.inference_mode = mode;
                    s.status = LifecycleStatus::Idle;
                });
                info!("Model {name} loaded successfully!");
                Ok(())
            }
            Err(e) => {
                error!("Failed to load model {name}: {e}");
                self.publish_failure();
                Err(ManagerError::LoadFailed {
                    model: name.to_string(),
                    source: e,
                })
            }
        }
    }

    fn publish_failure(&self) {
        self.status.send_modify(|s| {
            s.status = LifecycleStatus::Error;
            s.current_model = None;
        });
    }

    /// Releases the held engine (if any), then reclaims accelerator memory.
    /// Never fails: problems are logged so the next load can still proceed.
    async fn cleanup(&self, slot: &mut Option<LoadedModel>) {
        if let Some(previous) = slot.take() {
            info!("Cleaning up previous model {}...", previous.descriptor.name);
            if let Err(e) = previous.engine.release().await {
                warn!("Error during model cleanup: {e}");
            }
        }

        match self.backend.reclaim_memory().await {
            Ok(MemoryHeadroom {
                free_mib: Some(free),
                total_mib: Some(total),
            }) => info!("Accelerator memory after cleanup: {free} MiB free of {total} MiB"),
            Ok(_) => debug!("Accelerator memory headroom not observable"),
            Err(e) => warn!("Memory reclamation failed: {e}"),
        }
    }

    /// Reloads the catalog default, even if it is already the current model.
    /// Single-shot: a failure is logged and leaves `status = Error`.
    pub async fn recover(&self) {
        match self.try_begin_swap() {
            Ok(guard) => self.recover_with(&guard).await,
            Err(e) => warn!("Model recovery skipped: {e}"),
        }
    }

    async fn recover_with(&self, guard: &SwapGuard) {
        info!("Attempting model recovery...");
        let default_model = self.catalog.default_model.clone();
        let status = self.get_status();

        if status.current_model.as_deref() == Some(default_model.as_str()) {
            warn!("Current model is already the default model: {default_model}, restarting it");
        } else {
            info!("Attempting to reload default model: {default_model}");
        }

        if let Err(e) = self
            .load_with(guard, &default_model, status.inference_mode)
            .await
        {
            error!("Model recovery failed: {e}");
        }
    }

    /// Starts a swap in the background and returns once the gate is held.
    ///
    /// If the target fails to load, the same task recovers to the default
    /// model before releasing the gate.
    pub fn spawn_swap(
        self: &Arc<Self>,
        model_name: String,
        mode: InferenceMode,
    ) -> Result<JoinHandle<()>, ManagerError> {
        if self.catalog.find(&model_name).is_none() {
            return Err(ManagerError::ModelNotFound(model_name));
        }
        let guard = self.try_begin_swap()?;
        let manager = Arc::clone(self);

        Ok(tokio::spawn(async move {
            match manager.load_with(&guard, &model_name, mode).await {
                Ok(()) => info!("Model swap to {model_name} completed successfully"),
                Err(e) => {
                    error!("Model swap to {model_name} failed: {e}");
                    manager.recover_with(&guard).await;
                }
            }
            drop(guard);
        }))
    }

    // ────────────────────────────────────────────────────────────────────────
    // Inference
    // ────────────────────────────────────────────────────────────────────────

    /// Screens one résumé with the current model.
    ///
    /// Errors only for busy conditions (no engine call is made). Every
    /// inference-time failure comes back as an `InferenceResult` with
    /// `outcome = Failed`.
    pub async fn inference(
        &self,
        images: Vec<PageImage>,
        job_description: String,
    ) -> Result<InferenceResult, ManagerError> {
        if self.is_swapping() {
            return Err(ManagerError::SwapInProgress);
        }
        let slot = self
            .loaded
            .try_read()
            .map_err(|_| ManagerError::SwapInProgress)?;
        if self.is_swapping() {
            return Err(ManagerError::SwapInProgress);
        }
        let loaded = slot.as_ref().ok_or(ManagerError::NoModelLoaded)?;

        let span = info_span!(
            "inference",
            request_id = %Uuid::new_v4(),
            model = %loaded.descriptor.name,
            family = %loaded.descriptor.family
        );
        let request = InferenceRequest {
            images,
            job_description,
        };
        let analysis = analyze(
            loaded.engine.as_ref(),
            loaded.descriptor.sampling(),
            request,
        )
        .instrument(span)
        .await;

        Ok(analysis.into_result())
    }

    /// Final cleanup at process exit.
    ///
    /// Takes the swap gate so no new load can start. A load already running
    /// is waited for, and its engine is released here once it finishes.
    pub async fn shutdown(&self) {
        let _guard = loop {
            let released = self.gate_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            match self.try_begin_swap() {
                Ok(guard) => break guard,
                Err(_) => {
                    info!("Waiting for the running model load before shutting down...");
                    released.await;
                }
            }
        };

        let mut slot = self.loaded.write().await;
        self.cleanup(&mut slot).await;
        self.status.send_modify(|s| {
            s.current_model = None;
            s.status = LifecycleStatus::Idle;
        });
        info!("Model manager shut down");
    }
}
