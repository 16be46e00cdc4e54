//! Native method registry
//!
//! Hosts register callbacks by name in a [`NativeRegistry`]. When a process
//! loads a program, each of the program's external method names is resolved
//! once into [`ResolvedNatives`], so dispatch to a native is an indexed call
//! with no hash lookup.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::vm::{Interpreter, ObjectRef, VmError, VmResult};

/// Native method callback
///
/// Receives the interpreter (positioned at the native's frame) and the
/// receiver. It must finish with [`Interpreter::ret`],
/// [`Interpreter::tail_call`] or an effect operation.
pub type NativeFn = Arc<dyn Fn(&mut Interpreter<'_>, ObjectRef) -> VmResult<()> + Send + Sync>;

/// Name to callback map, shared between processes
#[derive(Clone, Default)]
pub struct NativeRegistry {
    handlers: FxHashMap<String, NativeFn>,
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("NativeRegistry").field("names", &names).finish()
    }
}

impl NativeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native method by name, replacing any previous one
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&mut Interpreter<'_>, ObjectRef) -> VmResult<()> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Get a handler by name (used at load time)
    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.handlers.get(name).cloned()
    }

    /// Check if a handler is registered
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Get the number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Resolved native table for a loaded program, indexed by external entry
/// point
pub struct ResolvedNatives {
    names: Vec<String>,
    handlers: Vec<NativeFn>,
}

impl fmt::Debug for ResolvedNatives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedNatives")
            .field("names", &self.names)
            .finish()
    }
}

impl ResolvedNatives {
    /// Resolve each of `names` against `registry`.
    ///
    /// Fails with [`VmError::UnknownNative`] on the first missing name.
    pub fn link(names: &[String], registry: &NativeRegistry) -> VmResult<Self> {
        let handlers = names
            .iter()
            .map(|name| {
                registry
                    .get(name)
                    .ok_or_else(|| VmError::UnknownNative(name.clone()))
            })
            .collect::<VmResult<Vec<_>>>()?;
        Ok(Self {
            names: names.to_vec(),
            handlers,
        })
    }

    /// Handler at external entry point `index`
    pub fn get(&self, index: u32) -> VmResult<&NativeFn> {
        self.handlers
            .get(index as usize)
            .ok_or(VmError::InvalidNative(index))
    }

    /// Name registered for entry point `index`
    pub fn name(&self, index: u32) -> &str {
        self.names
            .get(index as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    /// Get the number of resolved handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if there are no resolved handlers
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
