//! Per-connection procedure registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::callback::ResultCallback;
use crate::errors::Fault;
use crate::params::Params;

/// Member-name prefix that marks a module member as synchronous.
///
/// The marker is stripped from the published name: member `sync_add` of a
/// module exposed under `m` is published as `m.add`.
pub const SYNC_MARKER: &str = "sync_";

/// A procedure whose result is ready when the call returns.
pub trait SyncProcedure: Send + Sync {
    /// Invoke with positional arguments.
    fn call(&self, params: Params) -> Result<Value, Fault>;
}

impl<F> SyncProcedure for F
where
    F: Fn(Params) -> Result<Value, Fault> + Send + Sync,
{
    fn call(&self, params: Params) -> Result<Value, Fault> {
        self(params)
    }
}

/// A procedure that replies later through a trailing [`ResultCallback`].
pub trait AsyncProcedure: Send + Sync {
    /// Invoke with positional arguments and the callback that answers the request.
    fn call(&self, params: Params, reply: ResultCallback);
}

impl<F> AsyncProcedure for F
where
    F: Fn(Params, ResultCallback) + Send + Sync,
{
    fn call(&self, params: Params, reply: ResultCallback) {
        self(params, reply);
    }
}

/// Invocation mode, fixed at registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Result returned directly.
    Sync,
    /// Result delivered through a trailing callback.
    Async,
}

/// Callable stored in a registry entry.
#[derive(Clone)]
pub enum Invoker {
    /// Sync procedure.
    Sync(Arc<dyn SyncProcedure>),
    /// Async procedure.
    Async(Arc<dyn AsyncProcedure>),
}

impl Invoker {
    /// Wrap a Sync procedure.
    pub fn sync(procedure: impl SyncProcedure + 'static) -> Self {
        Self::Sync(Arc::new(procedure))
    }

    /// Wrap an Async procedure.
    pub fn asynchronous(procedure: impl AsyncProcedure + 'static) -> Self {
        Self::Async(Arc::new(procedure))
    }

    /// Mode of the wrapped procedure.
    pub fn mode(&self) -> Mode {
        match self {
            Self::Sync(_) => Mode::Sync,
            Self::Async(_) => Mode::Async,
        }
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Invoker::Sync(..)"),
            Self::Async(_) => f.write_str("Invoker::Async(..)"),
        }
    }
}

/// An object whose callable members are exposed in bulk.
///
/// `members` lists the declared member names. Names beginning with
/// [`SYNC_MARKER`] are dispatched to [`Module::call`]; all others to
/// [`Module::call_async`]. Both receive the declared name, marker included.
pub trait Module: Send + Sync + 'static {
    /// Declared member names.
    fn members(&self) -> &[&str];

    /// Invoke a synchronous member.
    fn call(&self, member: &str, params: Params) -> Result<Value, Fault> {
        let _ = params;
        Err(Fault::new(format!("member '{member}' is not callable")))
    }

    /// Invoke an asynchronous member.
    fn call_async(&self, member: &str, params: Params, reply: ResultCallback) {
        let _ = params;
        let _ = reply.fail(format!("member '{member}' is not callable"));
    }
}

/// One registered procedure.
#[derive(Clone)]
pub struct Entry {
    name: String,
    invoker: Invoker,
    receiver: Option<Arc<dyn Module>>,
}

impl Entry {
    /// Published name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invocation mode.
    pub fn mode(&self) -> Mode {
        self.invoker.mode()
    }

    /// The callable.
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Owning module, `None` for free functions.
    pub fn receiver(&self) -> Option<&Arc<dyn Module>> {
        self.receiver.as_ref()
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("receiver", &self.receiver.is_some())
            .finish()
    }
}

/// Map from published procedure name to entry, owned by one connection.
///
/// Registering an existing name replaces the previous entry.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, Entry>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a free function under `name` with an explicit mode.
    pub fn expose(&mut self, name: &str, invoker: Invoker) {
        debug!(name, mode = ?invoker.mode(), "exposing");
        self.insert(name, invoker, None);
    }

    /// Register a Sync free function.
    pub fn expose_sync(&mut self, name: &str, procedure: impl SyncProcedure + 'static) {
        self.expose(name, Invoker::sync(procedure));
    }

    /// Register an Async free function.
    pub fn expose_async(&mut self, name: &str, procedure: impl AsyncProcedure + 'static) {
        self.expose(name, Invoker::asynchronous(procedure));
    }

    /// Register every member of `module` under `"<prefix>.<member>"`.
    ///
    /// Returns the published names, in declaration order.
    pub fn expose_module<M: Module>(&mut self, prefix: &str, module: Arc<M>) -> Vec<String> {
        let receiver: Arc<dyn Module> = module;
        let mut published = Vec::new();

        for &declared in receiver.members() {
            let (member, mode) = match declared.strip_prefix(SYNC_MARKER) {
                Some(stripped) => (stripped, Mode::Sync),
                None => (declared, Mode::Async),
            };
            if member.is_empty() {
                warn!(prefix, declared, "skipping module member with empty name");
                continue;
            }

            let target = receiver.clone();
            let declared = declared.to_owned();
            let invoker = match mode {
                Mode::Sync => {
                    Invoker::sync(move |params: Params| target.call(&declared, params))
                }
                Mode::Async => {
                    Invoker::asynchronous(move |params: Params, reply: ResultCallback| {
                        target.call_async(&declared, params, reply);
                    })
                }
            };

            let name = format!("{prefix}.{member}");
            self.insert(&name, invoker, Some(receiver.clone()));
            published.push(name);
        }

        info!(
            module = prefix,
            funcs = %published.join(", "),
            "exposing module"
        );
        published
    }

    fn insert(&mut self, name: &str, invoker: Invoker, receiver: Option<Arc<dyn Module>>) {
        if name.is_empty() {
            warn!("ignoring procedure registered with an empty name");
            return;
        }
        let entry = Entry {
            name: name.to_owned(),
            invoker,
            receiver,
        };
        if self.entries.insert(name.to_owned(), entry).is_some() {
            debug!(name, "replaced existing procedure");
        }
    }

    /// Look up a procedure by published name.
    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Whether a procedure is registered.
    pub fn has_method(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All published names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}
