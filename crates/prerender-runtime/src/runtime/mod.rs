pub mod artifact;
pub mod bindings;
pub mod conversions;

pub(crate) mod pool;
pub(crate) mod worker;

#[cfg(test)]
mod tests;

pub use artifact::CompiledScript;
pub use bindings::{CallbackArgs, CallbackRegistry, HostFn, PARAMS_GLOBAL};
