use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{UsageSample, UsageTotals};

pub const DEFAULT_MAX_HISTORY: usize = 100;

const SESSION_SUFFIX_LEN: usize = 6;

/// Workflow and node a session belongs to. Both are opaque to the aggregator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerContext {
    pub workflow_id: String,
    pub node_id: String,
}

impl OwnerContext {
    pub fn new(workflow_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            node_id: node_id.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Samples ever recorded, including ones trimmed from `history`.
    pub sample_count: u64,
}

/// Accumulated usage for one logical unit of work.
///
/// `totals` cover every sample ever recorded; `history` keeps only the most
/// recent ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAggregate {
    pub session_id: String,
    pub owner: OwnerContext,
    pub history: VecDeque<UsageSample>,
    pub totals: UsageTotals,
    pub metadata: SessionMetadata,
}

impl SessionAggregate {
    fn new(session_id: String, owner: OwnerContext) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            owner,
            history: VecDeque::new(),
            totals: UsageTotals::default(),
            metadata: SessionMetadata {
                started_at: now,
                last_updated_at: now,
                sample_count: 0,
            },
        }
    }

    fn record(&mut self, sample: UsageSample, max_history: usize) {
        self.totals.add(&sample);
        self.history.push_back(sample);
        while self.history.len() > max_history {
            self.history.pop_front();
        }
        self.metadata.last_updated_at = Utc::now();
        self.metadata.sample_count = self.metadata.sample_count.saturating_add(1);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_sessions: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
}

impl UsageSummary {
    pub fn from_totals(total_sessions: usize, totals: &UsageTotals) -> Self {
        Self {
            total_sessions,
            total_input_tokens: totals.input_tokens,
            total_output_tokens: totals.output_tokens,
            total_tokens: totals.total_tokens,
        }
    }

    pub fn totals(&self) -> UsageTotals {
        UsageTotals {
            input_tokens: self.total_input_tokens,
            output_tokens: self.total_output_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub execution_count: u64,
    pub avg_input_tokens: f64,
    pub avg_output_tokens: f64,
    pub avg_total_tokens: f64,
    pub total_duration_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub session: SessionAggregate,
    pub summary: SessionStats,
}

/// Session-keyed usage store for one owner.
pub struct UsageAggregator {
    owner: OwnerContext,
    max_history: usize,
    sessions: DashMap<String, SessionAggregate>,
}

impl UsageAggregator {
    pub fn new(owner: OwnerContext) -> Self {
        Self::with_max_history(owner, DEFAULT_MAX_HISTORY)
    }

    pub fn with_max_history(owner: OwnerContext, max_history: usize) -> Self {
        Self {
            owner,
            max_history,
            sessions: DashMap::new(),
        }
    }

    pub fn owner(&self) -> &OwnerContext {
        &self.owner
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Appends a sample to the session, creating the session on first use,
    /// and returns the updated aggregate.
    pub fn record_usage(&self, session_id: &str, sample: UsageSample) -> SessionAggregate {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionAggregate::new(session_id.to_string(), self.owner.clone()));
        entry.record(sample, self.max_history);
        entry.clone()
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionAggregate> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn clear_all(&self) {
        self.sessions.clear();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn all_sessions(&self) -> Vec<SessionAggregate> {
        self.sessions.iter().map(|entry| entry.clone()).collect()
    }

    pub fn summary(&self) -> UsageSummary {
        let mut totals = UsageTotals::default();
        let mut sessions = 0;
        for entry in self.sessions.iter() {
            totals.merge(&entry.totals);
            sessions += 1;
        }
        UsageSummary::from_totals(sessions, &totals)
    }

    pub fn report(&self, session_id: &str) -> Option<UsageReport> {
        let session = self.get_session(session_id)?;
        let count = session.metadata.sample_count;
        let average = |sum: u64| {
            if count == 0 {
                0.0
            } else {
                sum as f64 / count as f64
            }
        };
        let summary = SessionStats {
            execution_count: count,
            avg_input_tokens: average(session.totals.input_tokens),
            avg_output_tokens: average(session.totals.output_tokens),
            avg_total_tokens: average(session.totals.total_tokens),
            total_duration_ms: (session.metadata.last_updated_at - session.metadata.started_at)
                .num_milliseconds(),
        };
        Some(UsageReport { session, summary })
    }

    /// One session when `session_id` is given, every session otherwise.
    pub fn export_sessions(&self, session_id: Option<&str>) -> Vec<SessionAggregate> {
        match session_id {
            Some(id) => self.get_session(id).into_iter().collect(),
            None => self.all_sessions(),
        }
    }

    /// Inserts sessions as-is, replacing any with the same id.
    pub fn import_sessions<I>(&self, sessions: I)
    where
        I: IntoIterator<Item = SessionAggregate>,
    {
        for session in sessions {
            self.sessions.insert(session.session_id.clone(), session);
        }
    }

    pub fn generate_session_id(&self, execution_id: Option<&str>) -> String {
        generate_session_id(&self.owner.workflow_id, &self.owner.node_id, execution_id)
    }
}

/// `{workflow}-{node}-{micros}-{random}[-{execution}]`. Unique enough for
/// grouping; callers that need a hard guarantee supply their own ids.
pub fn generate_session_id(workflow_id: &str, node_id: &str, execution_id: Option<&str>) -> String {
    let timestamp = Utc::now().timestamp_micros();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_SUFFIX_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    let base = format!("{workflow_id}-{node_id}-{timestamp}-{suffix}");
    match execution_id {
        Some(execution_id) if !execution_id.is_empty() => format!("{base}-{execution_id}"),
        _ => base,
    }
}
