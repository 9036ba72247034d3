//! Host callback bridge
//!
//! Host functions registered on a [`CallbackRegistry`] become ordinary
//! callable globals inside every request's script environment.
//!
//! # How a call flows
//!
//! 1. At worker creation the registry snapshot is turned into an
//!    [`EnvironmentTemplate`]: the list of names and host functions every
//!    fresh request realm gets.
//! 2. When a request starts, the template is instantiated into the request's
//!    realm. Each native wrapper captures that request's [`RenderContext`], so
//!    a callback only ever sees the context of the request running it.
//! 3. When script code calls the global, the wrapper hands the raw argument
//!    values to the host function, converts the returned JSON value into a
//!    `JsValue`, and returns it synchronously to the calling frame.
//!
//! # Contract violations
//!
//! A host function that panics, or returns something the engine cannot
//! represent, is a bug in host code rather than bad data. The wrapper panics
//! with the callback's name, taking the worker down with it.

use boa_engine::{Context, JsResult, JsString, NativeFunction, value::JsValue};
use boa_gc::{Finalize, Trace};
use prerender_common::{RenderContext, RenderError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::runtime::conversions::{js_value_to_json, json_to_js_value};

/// Name under which the request payload is bound; callbacks may not take it.
pub const PARAMS_GLOBAL: &str = "params";

/// A host-implemented function callable from script code.
pub type HostFn = Arc<dyn Fn(&RenderContext, &mut CallbackArgs<'_>) -> Value + Send + Sync>;

/// Arguments a script passed to a host callback.
///
/// The raw engine values are available through [`CallbackArgs::raw`]; the
/// helpers cover the common cases of reading a string or a JSON value.
pub struct CallbackArgs<'a> {
    values: &'a [JsValue],
    context: &'a mut Context,
}

impl<'a> CallbackArgs<'a> {
    pub(crate) fn new(values: &'a [JsValue], context: &'a mut Context) -> Self {
        Self { values, context }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self) -> &[JsValue] {
        self.values
    }

    pub fn get(&self, index: usize) -> Option<&JsValue> {
        self.values.get(index)
    }

    /// The argument at `index` if it is a JavaScript string.
    pub fn string(&self, index: usize) -> Option<String> {
        self.values
            .get(index)
            .and_then(|v| v.as_string())
            .map(|s| s.to_std_string_escaped())
    }

    /// The argument at `index` converted to JSON; missing arguments read as `null`.
    pub fn json(&mut self, index: usize) -> Result<Value> {
        match self.values.get(index) {
            Some(value) => js_value_to_json(value, self.context),
            None => Ok(Value::Null),
        }
    }
}

/// Name → host function table, frozen once a renderer is constructed.
///
/// # Example
///
/// ```
/// use prerender_runtime::CallbackRegistry;
/// use serde_json::json;
///
/// let callbacks = CallbackRegistry::new()
///     .register("greet", |_ctx, args| {
///         json!(format!("hi {}", args.string(0).unwrap_or_default()))
///     });
/// assert!(callbacks.contains("greet"));
/// ```
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    entries: BTreeMap<String, HostFn>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback; registering a name twice replaces the earlier function.
    pub fn register<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&RenderContext, &mut CallbackArgs<'_>) -> Value + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(callback));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Rejects names that could never be called or would shadow `params`.
    pub fn validate(&self) -> Result<()> {
        for name in self.entries.keys() {
            if name.trim().is_empty() {
                return Err(RenderError::Config("callback name must not be empty".into()));
            }
            if name == PARAMS_GLOBAL {
                return Err(RenderError::Config(format!(
                    "callback name '{}' is reserved for the request payload",
                    PARAMS_GLOBAL
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The set of globals a worker installs into every request realm.
pub(crate) struct EnvironmentTemplate {
    callbacks: Vec<(JsString, Arc<str>, HostFn)>,
}

impl EnvironmentTemplate {
    pub(crate) fn new(registry: &CallbackRegistry) -> Self {
        let callbacks = registry
            .entries
            .iter()
            .map(|(name, host)| (JsString::from(name.as_str()), Arc::from(name.as_str()), Arc::clone(host)))
            .collect();
        Self { callbacks }
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Installs every callback into the context's current realm, bound to `request`.
    pub(crate) fn instantiate(&self, ctx: &mut Context, request: &RenderContext) -> Result<()> {
        for (js_name, name, host) in &self.callbacks {
            let captures = BridgeCaptures {
                name: Arc::clone(name),
                host: Arc::clone(host),
                request: request.clone(),
            };
            let function = NativeFunction::from_copy_closure_with_captures(call_host, captures);

            ctx.register_global_callable(js_name.clone(), 0, function)
                .map_err(|e| RenderError::Script(format!("failed to install callback '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

#[derive(Trace, Finalize)]
struct BridgeCaptures {
    #[unsafe_ignore_trace]
    name: Arc<str>,
    #[unsafe_ignore_trace]
    host: HostFn,
    #[unsafe_ignore_trace]
    request: RenderContext,
}

fn call_host(
    _this: &JsValue,
    args: &[JsValue],
    captures: &BridgeCaptures,
    context: &mut Context,
) -> JsResult<JsValue> {
    let returned = {
        let mut call_args = CallbackArgs::new(args, context);
        (captures.host)(&captures.request, &mut call_args)
    };

    match json_to_js_value(&returned, context) {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::error!(callback = %captures.name, "callback returned an unrepresentable value");
            panic!(
                "callback {} returned value {}, cannot be converted to a script value - {}",
                captures.name, returned, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::{Source, js_string};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn eval_string(ctx: &mut Context, code: &str) -> String {
        ctx.eval(Source::from_bytes(code))
            .unwrap()
            .to_string(ctx)
            .unwrap()
            .to_std_string_escaped()
    }

    #[test]
    fn test_registry_validation() {
        let ok = CallbackRegistry::new().register("cb", |_, _| json!(null));
        assert!(ok.validate().is_ok());

        let reserved = CallbackRegistry::new().register("params", |_, _| json!(null));
        assert!(matches!(reserved.validate(), Err(RenderError::Config(_))));

        let empty = CallbackRegistry::new().register(" ", |_, _| json!(null));
        assert!(matches!(empty.validate(), Err(RenderError::Config(_))));
    }

    #[test]
    fn test_registry_replaces_duplicate_names() {
        let registry = CallbackRegistry::new()
            .register("cb", |_, _| json!(1))
            .register("cb", |_, _| json!(2));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["cb"]);
    }

    #[test]
    fn test_callback_is_installed_as_global_function() {
        let registry = CallbackRegistry::new().register("cb", |_, args| {
            if args.string(0).as_deref() == Some("x") {
                json!("works!")
            } else {
                json!("fails")
            }
        });
        let template = EnvironmentTemplate::new(&registry);
        assert_eq!(template.len(), 1);

        let mut ctx = Context::default();
        template.instantiate(&mut ctx, &RenderContext::new()).unwrap();

        assert_eq!(eval_string(&mut ctx, "typeof cb"), "function");
        assert_eq!(eval_string(&mut ctx, "cb('x')"), "works!");
        assert_eq!(eval_string(&mut ctx, "cb(42)"), "fails");
    }

    #[test]
    fn test_callback_sees_request_context() {
        let registry = CallbackRegistry::new()
            .register("locale", |ctx, _| ctx.value("locale").cloned().unwrap_or(Value::Null));
        let template = EnvironmentTemplate::new(&registry);

        let mut ctx = Context::default();
        let request = RenderContext::new().with_value("locale", "fr");
        template.instantiate(&mut ctx, &request).unwrap();

        assert_eq!(eval_string(&mut ctx, "locale()"), "fr");
    }

    #[test]
    fn test_callback_receives_json_arguments() {
        let registry = CallbackRegistry::new().register("sum", |_, args| {
            let list = args.json(0).unwrap();
            let total: i64 = list
                .as_array()
                .map(|items| items.iter().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            json!({ "total": total, "missing": args.json(5).unwrap() })
        });
        let template = EnvironmentTemplate::new(&registry);

        let mut ctx = Context::default();
        template.instantiate(&mut ctx, &RenderContext::new()).unwrap();

        assert_eq!(eval_string(&mut ctx, "const r = sum([1, 2, 3]); r.total + ':' + r.missing"), "6:null");
    }

    #[test]
    fn test_callback_invoked_once_per_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = CallbackRegistry::new().register("tick", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            json!(true)
        });
        let template = EnvironmentTemplate::new(&registry);

        let mut ctx = Context::default();
        template.instantiate(&mut ctx, &RenderContext::new()).unwrap();
        ctx.eval(Source::from_bytes("tick(); tick();")).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_raw_arguments_are_passed_through() {
        let registry = CallbackRegistry::new().register("count", |_, args| {
            let numbers = args.raw().iter().filter(|v| v.is_number()).count();
            json!(numbers)
        });
        let template = EnvironmentTemplate::new(&registry);

        let mut ctx = Context::default();
        template.instantiate(&mut ctx, &RenderContext::new()).unwrap();

        let value = ctx.eval(Source::from_bytes("count(1, 'a', 2.5, null)")).unwrap();
        assert_eq!(value.as_number(), Some(2.0));
        assert!(ctx.global_object().get(js_string!("count"), &mut ctx).unwrap().is_callable());
    }
}
