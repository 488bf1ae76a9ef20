//! Task Registry
//!
//! Maps task kind identifiers (the `kind` field of a `TaskDef`) to factory
//! closures. The embedding process registers every kind it ships at startup;
//! starting a task whose kind was never registered fails that task's start.

use std::collections::HashMap;

use tracing::warn;

use daf_core::{DafError, Result};

use crate::tasks::Task;

type TaskCtor = Box<dyn Fn() -> Box<dyn Task> + Send + Sync>;

#[derive(Default)]
pub struct TaskRegistry {
    ctors: HashMap<String, TaskCtor>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a task kind; re-registering a kind
    /// replaces the previous constructor
    pub fn register<F>(&mut self, kind: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.ctors.insert(kind.clone(), Box::new(ctor)).is_some() {
            warn!("task kind {} re-registered", kind);
        }
    }

    /// Build a fresh instance of the given kind
    pub fn create(&self, kind: &str) -> Result<Box<dyn Task>> {
        match self.ctors.get(kind) {
            Some(ctor) => Ok(ctor()),
            None => Err(DafError::UnknownTaskKind(kind.to_string())),
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.ctors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.ctors.keys().map(String::as_str).collect()
    }
}
