//! Lifecycle of the registered managed object sources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::core::engine::EngineCore;
use crate::core::object::source::{ExecuteContext, ExecuteState};
use crate::core::object::{ManagedObjectSource, SourceMetaData};

pub(crate) struct SourceEntry {
    pub name: String,
    pub source: Arc<dyn ManagedObjectSource>,
    pub metadata: SourceMetaData,
    pub execute: Arc<ExecuteState>,
    /// Startup function indices.
    pub startup: Vec<usize>,
}

/// Initialised sources in registration order.
#[derive(Default)]
pub(crate) struct SourceRegistry {
    entries: Vec<SourceEntry>,
}

impl SourceRegistry {
    pub fn push(&mut self, entry: SourceEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    /// Start every source, in registration order.
    pub fn start_all(&self, core: &Arc<EngineCore>) {
        for entry in &self.entries {
            let _ = entry.execute.core.set(Arc::downgrade(core));
            entry.execute.stopped.store(false, Ordering::Release);
            debug!(source = %entry.name, "starting managed object source");
            entry.source.start(ExecuteContext::new(Arc::clone(&entry.execute)));
        }
        info!(sources = self.entries.len(), "managed object sources started");
    }

    /// Stop every source; inbound flows are refused once `stop` returns.
    pub fn stop_all(&self) {
        for entry in &self.entries {
            debug!(source = %entry.name, "stopping managed object source");
            entry.source.stop();
            entry.execute.stopped.store(true, Ordering::Release);
        }
    }

    /// Startup functions of all sources, in registration order.
    pub fn startup_functions(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().flat_map(|e| e.startup.iter().copied())
    }
}

impl ExecuteState {
    pub(crate) fn new(source: impl Into<String>, flows: Vec<usize>) -> Self {
        Self {
            source: source.into(),
            flows,
            core: OnceLock::new(),
            stopped: AtomicBool::new(true),
        }
    }
}
