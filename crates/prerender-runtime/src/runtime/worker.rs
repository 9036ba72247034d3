//! Execution worker
//!
//! Each worker is an OS thread that owns one Boa `Context` for its whole life
//! and pulls [`RenderEvent`]s off the generation's shared queue. Boa contexts
//! are `!Send`, so the engine is created on the worker thread and never leaves
//! it.
//!
//! # Per-request isolation
//!
//! Every request runs in a brand-new realm created inside the worker's engine:
//! fresh global object, fresh global lexical environment. Nothing a script
//! defines or mutates at global scope survives into the next request, while
//! the engine instance itself is reused.

use boa_engine::{Context, Source, js_string};
use crossbeam_channel::{Receiver, Sender, bounded};
use prerender_common::{RenderContext, RenderError, RenderEvent, RenderResult, Result, ShutdownAck, WorkerId};
use serde_json::Value;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::runtime::artifact::CompiledScript;
use crate::runtime::bindings::{CallbackRegistry, EnvironmentTemplate, PARAMS_GLOBAL};
use crate::runtime::conversions::json_to_js_value;

/// Boa's parser and interpreter recurse; give them room.
const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Everything a worker needs from its generation, shared read-only.
#[derive(Clone)]
pub(crate) struct WorkerSpec {
    pub generation: u64,
    pub artifact: CompiledScript,
    pub callbacks: Arc<CallbackRegistry>,
    pub entry: Arc<str>,
}

/// Supervisor-side handle on a running worker thread.
pub(crate) struct WorkerHandle {
    id: WorkerId,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Waits for the thread to exit. Returns `false` if it panicked.
    pub(crate) fn join(self) -> bool {
        match self.thread.join() {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(worker = self.id, "Worker thread panicked");
                false
            }
        }
    }
}

/// Starts a worker and blocks until its engine is ready to take requests.
///
/// # Errors
///
/// Returns `RenderError::WorkerSpawn` if the thread cannot be created or dies
/// before reporting ready.
pub(crate) fn spawn(id: WorkerId, spec: WorkerSpec, queue: Receiver<RenderEvent>) -> Result<WorkerHandle> {
    let (ready_tx, ready_rx) = bounded::<()>(1);

    let thread = thread::Builder::new()
        .name(format!("prerender-worker-{}", id))
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || {
            let worker = ExecutionWorker::new(id, spec);
            // The supervisor is blocked on this; it only fails if it gave up.
            let _ = ready_tx.send(());
            worker.run(queue);
        })
        .map_err(|e| RenderError::WorkerSpawn(format!("worker {}: {}", id, e)))?;

    if ready_rx.recv().is_err() {
        let _ = thread.join();
        return Err(RenderError::WorkerSpawn(format!(
            "worker {} exited before its engine was ready",
            id
        )));
    }

    Ok(WorkerHandle { id, thread })
}

struct ExecutionWorker {
    id: WorkerId,
    engine: Context,
    template: EnvironmentTemplate,
    spec: WorkerSpec,
}

impl ExecutionWorker {
    fn new(id: WorkerId, spec: WorkerSpec) -> Self {
        let template = EnvironmentTemplate::new(&spec.callbacks);
        tracing::debug!(
            worker = id,
            generation = spec.generation,
            callbacks = template.len(),
            "Worker engine created"
        );

        Self {
            id,
            engine: Context::default(),
            template,
            spec,
        }
    }

    fn run(mut self, queue: Receiver<RenderEvent>) {
        let ack = loop {
            match queue.recv() {
                Ok(RenderEvent::Request { context, params, reply }) => {
                    tracing::debug!(worker = self.id, request_id = context.id(), "Render request");
                    let result = self.render(&context, &params);
                    self.respond(&context, result, &reply);
                }
                Ok(RenderEvent::Shutdown { reply }) => break Some(reply),
                // Every sender is gone: the pool was dropped without a shutdown
                Err(_) => break None,
            }
        };
        // Stop holding the queue open before acking so later sends see it closed
        drop(queue);

        let id = self.id;
        let generation = self.spec.generation;
        drop(self);
        tracing::debug!(worker = id, generation, "Worker engine disposed");

        if let Some(reply) = ack {
            let _ = reply.send(ShutdownAck { worker: id });
        }
    }

    fn respond(&self, context: &RenderContext, result: RenderResult, reply: &Sender<RenderResult>) {
        if let Some(err) = result.error() {
            tracing::debug!(worker = self.id, request_id = context.id(), error = %err, "Render failed");
        }
        if reply.send(result).is_err() {
            // The caller stopped waiting (deadline); nobody reads this result
            tracing::debug!(worker = self.id, request_id = context.id(), "Result dropped, caller gone");
        }
    }

    /// Runs one request inside a fresh realm and restores the base realm after.
    fn render(&mut self, request: &RenderContext, params: &Value) -> RenderResult {
        let realm = match self.engine.create_realm() {
            Ok(realm) => realm,
            Err(e) => return RenderResult::failure(RenderError::Script(format!("failed to create realm: {}", e))),
        };

        let base = self.engine.enter_realm(realm);
        let result = self.evaluate(request, params);
        let _request_realm = self.engine.enter_realm(base);

        match result {
            Ok(output) => RenderResult::success(output),
            Err(err) => RenderResult::failure(err),
        }
    }

    fn evaluate(&mut self, request: &RenderContext, params: &Value) -> Result<String> {
        let ctx = &mut self.engine;

        self.template.instantiate(ctx, request)?;

        let script = self
            .spec
            .artifact
            .instantiate(ctx)
            .map_err(|e| RenderError::Script(e.to_string()))?;
        script.evaluate(ctx).map_err(|e| RenderError::Script(e.to_string()))?;

        // Plain assignment: a script's own `var params` keeps its binding and
        // takes the request's value
        let value = json_to_js_value(params, ctx)?;
        let global = ctx.global_object();
        global
            .set(js_string!(PARAMS_GLOBAL), value, true, ctx)
            .map_err(|e| RenderError::ParamsBinding(e.to_string()))?;

        let output = ctx
            .eval(Source::from_bytes(self.spec.entry.as_bytes()))
            .map_err(|e| RenderError::Script(e.to_string()))?;

        output
            .to_string(ctx)
            .map(|s| s.to_std_string_escaped())
            .map_err(|e| RenderError::Script(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use serde_json::json;

    fn spec(source: &str, callbacks: CallbackRegistry) -> WorkerSpec {
        WorkerSpec {
            generation: 1,
            artifact: CompiledScript::compile(source, "app.js", 1).unwrap(),
            callbacks: Arc::new(callbacks),
            entry: Arc::from("entry()"),
        }
    }

    fn request(queue: &Sender<RenderEvent>, params: Value) -> RenderResult {
        let (event, reply) = RenderEvent::request(RenderContext::new(), params);
        queue.send(event).unwrap();
        reply.recv().unwrap()
    }

    #[test]
    fn test_worker_renders_and_acknowledges_shutdown() {
        let (tx, rx) = unbounded();
        let handle = spawn(7, spec("const entry = () => 'hello, ' + params", CallbackRegistry::new()), rx).unwrap();
        assert_eq!(handle.id(), 7);

        let result = request(&tx, json!("blah"));
        assert_eq!(result.output(), "hello, blah");
        assert!(result.error().is_none());

        let (event, ack) = RenderEvent::shutdown();
        tx.send(event).unwrap();
        assert_eq!(ack.recv().unwrap(), ShutdownAck { worker: 7 });
        assert!(handle.join());
    }

    #[test]
    fn test_globals_do_not_leak_between_requests() {
        let source = r#"
            var counter = (typeof counter === 'undefined') ? 0 : counter;
            counter += 1;
            globalThis.leaked = (globalThis.leaked || 0) + 1;
            const entry = () => counter + '/' + leaked;
        "#;
        let (tx, rx) = unbounded();
        let handle = spawn(1, spec(source, CallbackRegistry::new()), rx).unwrap();

        for _ in 0..5 {
            assert_eq!(request(&tx, json!(null)).output(), "1/1");
        }

        drop(tx);
        assert!(handle.join());
    }

    #[test]
    fn test_params_overrides_script_declarations() {
        let (tx, rx) = unbounded();
        let source = "var params = 'default'; const entry = () => 'hello, ' + params";
        let handle = spawn(1, spec(source, CallbackRegistry::new()), rx).unwrap();

        for _ in 0..2 {
            let result = request(&tx, json!("blah"));
            assert!(result.error().is_none(), "unexpected error: {:?}", result.error());
            assert_eq!(result.output(), "hello, blah");
        }

        drop(tx);
        assert!(handle.join());
    }

    #[test]
    fn test_params_overrides_function_declaration() {
        let (tx, rx) = unbounded();
        let source = "function params() { return 'fn' } const entry = () => typeof params + ':' + params.n";
        let handle = spawn(1, spec(source, CallbackRegistry::new()), rx).unwrap();

        assert_eq!(request(&tx, json!({"n": 3})).output(), "object:3");

        drop(tx);
        assert!(handle.join());
    }

    #[test]
    fn test_read_only_params_is_binding_error() {
        let (tx, rx) = unbounded();
        let source = "Object.defineProperty(globalThis, 'params', { value: 1, writable: false }); const entry = () => params";
        let handle = spawn(1, spec(source, CallbackRegistry::new()), rx).unwrap();

        let result = request(&tx, json!("x"));
        assert!(matches!(result.error(), Some(RenderError::ParamsBinding(_))));
        assert!(result.output().is_empty());

        drop(tx);
        assert!(handle.join());
    }

    #[test]
    fn test_top_level_error_skips_entry() {
        let (tx, rx) = unbounded();
        let source = "throw new Error('top level'); const entry = () => 'never';";
        let handle = spawn(1, spec(source, CallbackRegistry::new()), rx).unwrap();

        let result = request(&tx, json!("x"));
        assert!(matches!(result.error(), Some(RenderError::Script(_))));
        assert_eq!(result.output(), "");

        // The worker keeps serving after an in-band failure
        let result = request(&tx, json!("x"));
        assert!(result.error().is_some());

        drop(tx);
        assert!(handle.join());
    }

    #[test]
    fn test_structured_params_are_native_values() {
        let (tx, rx) = unbounded();
        let source = "const entry = () => params.items.length + ':' + params.name";
        let handle = spawn(1, spec(source, CallbackRegistry::new()), rx).unwrap();

        let result = request(&tx, json!({"items": [1, 2, 3], "name": "list"}));
        assert_eq!(result.output(), "3:list");

        drop(tx);
        assert!(handle.join());
    }

    #[test]
    fn test_worker_exits_when_queue_closes() {
        let (tx, rx) = unbounded::<RenderEvent>();
        let handle = spawn(1, spec("const entry = () => 1", CallbackRegistry::new()), rx).unwrap();
        drop(tx);
        assert!(handle.join());
    }
}
