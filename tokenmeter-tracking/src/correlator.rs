use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

/// Request snapshot taken when a run starts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunPayload {
    pub prompts: Vec<String>,
    pub options: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunContext {
    pub run_id: String,
    /// Position among the runs this correlator has seen.
    pub ordinal: usize,
    /// `None` when the context was synthesized for an unknown run id.
    pub payload: Option<RunPayload>,
}

impl RunContext {
    pub fn is_synthesized(&self) -> bool {
        self.payload.is_none()
    }
}

/// Tracks one open run per run id across start → (end | error).
///
/// Runs that never see an end or error stay in the map for the lifetime of
/// the correlator; `open_runs` reports how many are pending.
#[derive(Default)]
pub struct RunCorrelator {
    runs: DashMap<String, RunContext>,
    created: AtomicUsize,
}

impl RunCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a run. A second start for a run id that is still open replaces
    /// the stored payload and keeps the original ordinal.
    pub fn on_start(&self, run_id: &str, payload: RunPayload) -> RunContext {
        match self.runs.entry(run_id.to_string()) {
            Entry::Occupied(mut entry) => {
                tracing::debug!(run_id, "run restarted before completing; replacing context");
                let context = entry.get_mut();
                context.payload = Some(payload);
                context.clone()
            }
            Entry::Vacant(entry) => {
                let context = RunContext {
                    run_id: run_id.to_string(),
                    ordinal: self.created.fetch_add(1, Ordering::Relaxed),
                    payload: Some(payload),
                };
                entry.insert(context.clone());
                context
            }
        }
    }

    pub fn on_end(&self, run_id: &str) -> RunContext {
        self.take(run_id)
    }

    pub fn on_error(&self, run_id: &str) -> RunContext {
        self.take(run_id)
    }

    pub fn get(&self, run_id: &str) -> Option<RunContext> {
        self.runs.get(run_id).map(|entry| entry.clone())
    }

    pub fn open_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Forgets every open run. Completions that arrive afterwards are
    /// resolved through synthesized contexts.
    pub fn clear(&self) {
        self.runs.clear();
    }

    fn take(&self, run_id: &str) -> RunContext {
        if let Some((_, context)) = self.runs.remove(run_id) {
            return context;
        }
        let ordinal = self.runs.len();
        tracing::debug!(run_id, ordinal, "no start recorded for run; synthesizing context");
        RunContext {
            run_id: run_id.to_string(),
            ordinal,
            payload: None,
        }
    }
}
