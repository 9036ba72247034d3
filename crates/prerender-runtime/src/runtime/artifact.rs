//! Compiled script artifact
//!
//! A [`CompiledScript`] is produced once per source version and shared
//! read-only by every worker of a generation. It is never patched: a reload
//! builds a new one and the old one is dropped with its generation.
//!
//! Boa's compiled `Script` values are tied to the interner and realm of the
//! context that parsed them, so they cannot be moved into another engine
//! instance. The artifact therefore caches no bytecode: it keeps the source
//! text that was validated by a full parse in a throwaway context, and every
//! request parses and compiles it again inside the worker's own engine.
//! "Compiled" here means "known to compile", not "compiled once".

use boa_engine::{Context, JsResult, Script, Source};
use prerender_common::{RenderError, Result};
use std::path::Path;
use std::sync::Arc;

/// Source text that is known to parse, shared by one generation.
///
/// Holds no bytecode. Each [`instantiate`](CompiledScript::instantiate) call
/// re-parses the source in the caller's realm.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    inner: Arc<ScriptInner>,
}

#[derive(Debug)]
struct ScriptInner {
    name: String,
    source: String,
    generation: u64,
}

impl CompiledScript {
    /// Parses `source` in a throwaway context and packages it for sharing.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::Compile` if the source fails to parse.
    pub fn compile(source: impl Into<String>, name: &str, generation: u64) -> Result<Self> {
        let source = source.into();

        let mut scratch = Context::default();
        Script::parse(
            Source::from_bytes(source.as_bytes()).with_path(Path::new(name)),
            None,
            &mut scratch,
        )
        .map_err(|e| RenderError::Compile(format!("{}: {}", name, e)))?;

        tracing::debug!(script = name, generation, bytes = source.len(), "Script compiled");

        Ok(Self {
            inner: Arc::new(ScriptInner {
                name: name.to_string(),
                source,
                generation,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Parses and compiles the shared source from scratch inside `ctx`'s
    /// current realm.
    pub(crate) fn instantiate(&self, ctx: &mut Context) -> JsResult<Script> {
        Script::parse(
            Source::from_bytes(self.inner.source.as_bytes()).with_path(Path::new(&self.inner.name)),
            None,
            ctx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_valid_source() {
        let script = CompiledScript::compile("const entry = () => 'ok';", "app.js", 1).unwrap();
        assert_eq!(script.name(), "app.js");
        assert_eq!(script.generation(), 1);
        assert!(script.source().contains("entry"));
    }

    #[test]
    fn test_compile_syntax_error() {
        let err = CompiledScript::compile("this is not valid javascript ))", "broken.js", 1).unwrap_err();
        match err {
            RenderError::Compile(msg) => assert!(msg.starts_with("broken.js")),
            other => panic!("Expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_runtime_errors_are_not_compile_errors() {
        // Referencing an undefined name only fails once evaluated
        assert!(CompiledScript::compile("undefinedThing.call()", "app.js", 1).is_ok());
    }

    #[test]
    fn test_clones_share_the_same_source() {
        let a = CompiledScript::compile("1 + 1", "app.js", 3).unwrap();
        let b = a.clone();
        assert!(std::ptr::eq(a.source(), b.source()));
    }

    #[test]
    fn test_instantiate_in_another_context() {
        let script = CompiledScript::compile("const entry = () => 40 + 2; entry()", "app.js", 1).unwrap();
        let mut ctx = Context::default();
        let value = script.instantiate(&mut ctx).unwrap().evaluate(&mut ctx).unwrap();
        assert_eq!(value.as_number(), Some(42.0));
    }
}
