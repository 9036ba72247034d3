use crossbeam_channel::RecvTimeoutError;
use prerender_common::{RenderContext, RenderError, RenderEvent, RenderResult, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use crate::config::RendererConfig;
use crate::runtime::bindings::CallbackRegistry;
use crate::runtime::artifact::CompiledScript;
use crate::runtime::pool::WorkerPool;
use crate::runtime::worker::WorkerSpec;
use crate::stats::{RenderCounters, RendererStats};
use crate::watcher::{FileStamp, SourceWatcher};

/// Supervisor of a pool of isolated script-execution workers.
///
/// A renderer compiles its script once, starts `workers` execution workers
/// that share the compiled artifact and the callback registry, and routes each
/// [`render`](Renderer::render) call to whichever worker is idle. With
/// `reload_on_change` it rebuilds the whole generation when the backing file
/// changes.
///
/// # Thread Safety
///
/// `render` takes `&self` and may be called from any number of threads at
/// once. Each worker owns its Boa engine exclusively, so scripts run in
/// parallel without locking around evaluation. Callers share only the request
/// queue and their own private reply channel.
///
/// # Example
///
/// ```no_run
/// use prerender_runtime::{CallbackRegistry, RenderContext, Renderer, RendererConfig};
///
/// let renderer = Renderer::new(
///     "const entry = () => 'hello, ' + params",
///     RendererConfig::default(),
///     CallbackRegistry::new(),
/// )?;
///
/// let result = renderer.render(&RenderContext::background(), "blah")?;
/// assert_eq!(result.output(), "hello, blah");
///
/// renderer.shutdown();
/// # Ok::<(), prerender_runtime::RenderError>(())
/// ```
pub struct Renderer {
    config: RendererConfig,
    callbacks: Arc<CallbackRegistry>,
    entry: Arc<str>,
    /// The generation serving requests; `None` after shutdown or a failed reload
    pool: RwLock<Option<WorkerPool>>,
    watcher: Mutex<Option<SourceWatcher>>,
    generations: AtomicU64,
    worker_ids: AtomicU64,
    closed: AtomicBool,
    counters: RenderCounters,
}

impl Renderer {
    /// Creates a renderer from in-memory source.
    ///
    /// The source is compiled once and `config.workers` workers are started
    /// before this returns.
    ///
    /// # Errors
    ///
    /// - `RenderError::Config` if reloading is requested without a source path
    ///   or a callback name is invalid
    /// - `RenderError::Compile` if the source does not parse
    /// - `RenderError::Io` if the watched source path cannot be stat'ed
    /// - `RenderError::WorkerSpawn` if a worker thread cannot be started
    pub fn new(source: &str, config: RendererConfig, callbacks: CallbackRegistry) -> Result<Self> {
        let config = config.normalized();
        config.validate()?;

        let watcher = match (config.reload_on_change, config.watched_path()) {
            (true, Some(path)) => Some(SourceWatcher::new(path, FileStamp::read(path)?)),
            _ => None,
        };

        Self::build(source, config, callbacks, watcher)
    }

    /// Creates a renderer from a script file.
    ///
    /// The file's size and modification time are recorded so that, with
    /// `reload_on_change`, later edits are picked up before the next render.
    pub fn from_file(path: impl AsRef<Path>, config: RendererConfig, callbacks: CallbackRegistry) -> Result<Self> {
        let path = path.as_ref();
        let config = config.with_source_path(path).normalized();
        config.validate()?;

        // Stat before reading: an edit in between shows up as a change later
        let stamp = FileStamp::read(path)?;
        let source = std::fs::read_to_string(path)?;
        tracing::info!(path = %path.display(), bytes = source.len(), "Script source loaded");

        let watcher = config.reload_on_change.then(|| SourceWatcher::new(path, stamp));
        Self::build(&source, config, callbacks, watcher)
    }

    fn build(
        source: &str,
        config: RendererConfig,
        callbacks: CallbackRegistry,
        watcher: Option<SourceWatcher>,
    ) -> Result<Self> {
        callbacks.validate()?;

        let mut renderer = Self {
            entry: Arc::from(config.entry.as_str()),
            config,
            callbacks: Arc::new(callbacks),
            pool: RwLock::new(None),
            watcher: Mutex::new(watcher),
            generations: AtomicU64::new(0),
            worker_ids: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            counters: RenderCounters::new(),
        };

        let pool = renderer.start_generation(source)?;
        *renderer.pool.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(pool);
        Ok(renderer)
    }

    fn start_generation(&self, source: &str) -> Result<WorkerPool> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let artifact = CompiledScript::compile(source, &self.config.script_name, generation)?;

        let spec = WorkerSpec {
            generation,
            artifact,
            callbacks: Arc::clone(&self.callbacks),
            entry: Arc::clone(&self.entry),
        };

        WorkerPool::start(spec, self.config.workers, self.config.queue_capacity, &self.worker_ids)
    }

    /// Renders the script once with `params` bound as the global `params`.
    ///
    /// Blocks until a worker has evaluated the entry expression. Script
    /// failures come back in-band through [`RenderResult::error`]; the outer
    /// `Err` is reserved for failures of the renderer itself.
    ///
    /// If `context` has a deadline, waiting stops when it passes and the
    /// result is a `RenderError::Timeout` failure. The worker still finishes
    /// the request and its result is discarded. A context whose deadline has
    /// already passed is failed the same way without being dispatched.
    ///
    /// # Errors
    ///
    /// - `RenderError::ShutDown` if [`shutdown`](Renderer::shutdown) was called
    /// - `RenderError::Io` / `RenderError::Compile` if a reload was triggered
    ///   and failed
    /// - `RenderError::PoolUnavailable` if no generation is serving
    ///
    /// # Panics
    ///
    /// Panics if the worker handling the request dies before replying, which
    /// only happens when a host callback breaks its contract.
    pub fn render(&self, context: &RenderContext, params: impl Into<Value>) -> Result<RenderResult> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RenderError::ShutDown);
        }

        if self.config.reload_on_change {
            self.reload_if_changed()?;
        }

        let started = Instant::now();
        if context.is_expired() {
            // Nothing to wait for; don't occupy a worker
            let result = timed_out(context, started);
            self.counters.record(&result);
            return Ok(result);
        }

        let guard = read(&self.pool);
        let pool = guard.as_ref().ok_or(RenderError::PoolUnavailable)?;
        let (event, reply) = RenderEvent::request(context.clone(), params.into());

        let result = match context.deadline() {
            None => {
                pool.dispatch(event)?;
                match reply.recv() {
                    Ok(result) => result,
                    Err(_) => worker_lost(pool.generation()),
                }
            }
            Some(deadline) => {
                tracing::trace!(request_id = context.id(), remaining_ms = ?context.remaining_ms(), "Dispatching with deadline");
                if !pool.dispatch_until(event, deadline)? {
                    timed_out(context, started)
                } else {
                    match reply.recv_deadline(deadline) {
                        Ok(result) => result,
                        Err(RecvTimeoutError::Timeout) => timed_out(context, started),
                        Err(RecvTimeoutError::Disconnected) => worker_lost(pool.generation()),
                    }
                }
            }
        };
        drop(guard);

        self.counters.record(&result);
        Ok(result)
    }

    /// Runs [`render`](Renderer::render) on tokio's blocking pool.
    pub async fn render_async(self: Arc<Self>, context: RenderContext, params: Value) -> Result<RenderResult> {
        match tokio::task::spawn_blocking(move || self.render(&context, params)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(RenderError::TaskFailed(e.to_string())),
        }
    }

    /// Rebuilds the generation if the watched file changed since last recorded.
    ///
    /// Runs on the calling thread. Renders arriving meanwhile wait for the new
    /// generation. If rebuilding fails the old generation is already gone and
    /// the error goes to the caller; the stamp is left stale so the next render
    /// tries again.
    fn reload_if_changed(&self) -> Result<()> {
        let mut watcher = lock(&self.watcher);
        let Some(watcher) = watcher.as_mut() else {
            return Ok(());
        };
        let Some(stamp) = watcher.changed()? else {
            return Ok(());
        };

        tracing::info!(path = %watcher.path().display(), "Script source changed, reloading");
        let source = watcher.load()?;

        let mut pool = write(&self.pool);
        if let Some(old) = pool.take() {
            old.shutdown();
        }

        match self.start_generation(&source) {
            Ok(fresh) => {
                let generation = fresh.generation();
                *pool = Some(fresh);
                watcher.record(stamp);
                self.counters.record_reload();
                tracing::info!(generation, "Reload complete");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Reload failed, no generation is serving");
                Err(e)
            }
        }
    }

    /// Stops every worker of the current generation and waits for each to
    /// dispose its engine. Later renders fail with `RenderError::ShutDown`.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        self.shutdown_counted();
    }

    /// Shutdown, returning how many workers acknowledged.
    pub(crate) fn shutdown_counted(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let pool = write(&self.pool).take();
        match pool {
            Some(pool) => {
                let generation = pool.generation();
                let acks = pool.shutdown();
                tracing::info!(generation, acks, "Renderer shut down");
                acks
            }
            None => 0,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Generation currently serving, or 0 when none is.
    pub fn generation(&self) -> u64 {
        read(&self.pool).as_ref().map_or(0, WorkerPool::generation)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn stats(&self) -> RendererStats {
        let pool = read(&self.pool);
        let (generation, workers) = pool
            .as_ref()
            .map_or((0, 0), |p| (p.generation(), p.size()));
        self.counters.snapshot(generation, workers)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timed_out(context: &RenderContext, started: Instant) -> RenderResult {
    tracing::debug!(request_id = context.id(), "Stopped waiting for render result");
    RenderResult::failure(RenderError::Timeout(started.elapsed().as_millis() as u64))
}

fn worker_lost(generation: u64) -> ! {
    panic!(
        "render worker of generation {} terminated before replying; a host callback broke its contract",
        generation
    );
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}
