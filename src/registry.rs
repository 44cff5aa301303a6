//! String-keyed handler tables.
//!
//! One registry per (argument, result) shape. Build them at startup, register
//! everything, then hand an `Arc` to the listener; lookups never block each other.

use crate::error::{LinkError, Result};
use crate::web::WebForm;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type Handler<A, R> = Arc<dyn Fn(&A) -> anyhow::Result<R> + Send + Sync>;

pub struct HandlerRegistry<A: ?Sized, R> {
    handlers: RwLock<BTreeMap<String, Handler<A, R>>>,
}

/// Raw command handlers: argument substring in, payload out.
pub type CommandRegistry = HandlerRegistry<str, String>;

/// Web-form handlers: submitted form in, page body out.
pub type WebRegistry = HandlerRegistry<WebForm, String>;

/// The pair of tables a listener dispatches into.
#[derive(Debug, Clone, Default)]
pub struct Handlers {
    pub commands: Arc<CommandRegistry>,
    pub web: Arc<WebRegistry>,
}

impl Handlers {
    pub fn new(commands: Arc<CommandRegistry>, web: Arc<WebRegistry>) -> Self {
        Self { commands, web }
    }
}

impl<A: ?Sized, R> HandlerRegistry<A, R> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert `handler` under `key` unless the key is taken. Returns whether it was inserted;
    /// the first registration always wins.
    pub fn register<F>(&self, key: &str, handler: F) -> bool
    where
        F: Fn(&A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(key) {
            return false;
        }
        handlers.insert(key.to_string(), Arc::new(handler));
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Look up and run the handler for `key`.
    pub fn dispatch(&self, key: &str, args: &A) -> Result<R> {
        // Clone the handle out so a slow handler does not hold the table lock.
        let handler = self
            .handlers
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| LinkError::Dispatch(format!("function with key {} not yet registered", key)))?;
        handler(args).map_err(|e| LinkError::Dispatch(format!("{}: {:#}", key, e)))
    }
}

impl<A: ?Sized, R> Default for HandlerRegistry<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized, R> fmt::Debug for HandlerRegistry<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
