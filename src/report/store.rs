//! Report State Store
//!
//! Persistence boundary for report state. Every mutation is a
//! read-modify-write executed under an exclusive lock on the session row,
//! so concurrent operations on one report are serialized by the store.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::{DossierError, PreconditionError, Result, SessionId, UserId};

use super::analysis::AnalysisSnapshot;
use super::types::ReportState;

/// Everything stored for one (session, user) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub analysis: AnalysisSnapshot,
    pub report: Option<ReportState>,
}

impl SessionRecord {
    pub fn new(analysis: AnalysisSnapshot) -> Self {
        Self {
            analysis,
            report: None,
        }
    }

    pub fn report(&self) -> Result<&ReportState> {
        self.report
            .as_ref()
            .ok_or_else(|| PreconditionError::not_found("Report").into())
    }

    pub fn report_mut(&mut self) -> Result<&mut ReportState> {
        self.report
            .as_mut()
            .ok_or_else(|| PreconditionError::not_found("Report").into())
    }
}

/// Mutation applied inside an exclusive update
pub type RecordMutation<'a> = dyn FnMut(&mut SessionRecord) -> Result<()> + 'a;

pub trait ReportStore: Send + Sync {
    fn load(&self, session: &SessionId, user: &UserId) -> Result<Option<SessionRecord>>;

    fn save(&self, session: &SessionId, user: &UserId, record: &SessionRecord) -> Result<()>;

    /// Insert or replace the analysis snapshot, keeping any report state
    fn put_analysis(
        &self,
        session: &SessionId,
        user: &UserId,
        analysis: AnalysisSnapshot,
    ) -> Result<()>;

    /// Exclusive read-modify-write of an existing record
    ///
    /// A missing record fails with a not-found precondition. If `mutate`
    /// returns an error nothing is written.
    fn update_exclusive(
        &self,
        session: &SessionId,
        user: &UserId,
        mutate: &mut RecordMutation<'_>,
    ) -> Result<SessionRecord>;
}

pub type SharedStore = Arc<dyn ReportStore>;

/// Run a one-shot closure under [`ReportStore::update_exclusive`] and return its value
pub fn update_with<T>(
    store: &dyn ReportStore,
    session: &SessionId,
    user: &UserId,
    f: impl FnOnce(&mut SessionRecord) -> Result<T>,
) -> Result<T> {
    let mut f = Some(f);
    let mut output = None;
    store.update_exclusive(session, user, &mut |record: &mut SessionRecord| -> Result<()> {
        let f = f
            .take()
            .ok_or_else(|| DossierError::Storage("update closure invoked twice".to_string()))?;
        output = Some(f(record)?);
        Ok(())
    })?;
    output.ok_or_else(|| DossierError::Storage("update produced no result".to_string()))
}

pub(crate) fn session_not_found(session: &SessionId) -> DossierError {
    PreconditionError::not_found(format!("Research session '{}'", session)).into()
}

// =============================================================================
// In-memory Store
// =============================================================================

/// `DashMap`-backed store; the shard entry lock is held for the whole update
#[derive(Default)]
pub struct MemoryReportStore {
    records: DashMap<(SessionId, UserId), SessionRecord>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ReportStore for MemoryReportStore {
    fn load(&self, session: &SessionId, user: &UserId) -> Result<Option<SessionRecord>> {
        Ok(self
            .records
            .get(&(session.clone(), user.clone()))
            .map(|entry| entry.value().clone()))
    }

    fn save(&self, session: &SessionId, user: &UserId, record: &SessionRecord) -> Result<()> {
        self.records
            .insert((session.clone(), user.clone()), record.clone());
        Ok(())
    }

    fn put_analysis(
        &self,
        session: &SessionId,
        user: &UserId,
        analysis: AnalysisSnapshot,
    ) -> Result<()> {
        self.records
            .entry((session.clone(), user.clone()))
            .and_modify(|record| record.analysis = analysis.clone())
            .or_insert_with(|| SessionRecord::new(analysis));
        Ok(())
    }

    fn update_exclusive(
        &self,
        session: &SessionId,
        user: &UserId,
        mutate: &mut RecordMutation<'_>,
    ) -> Result<SessionRecord> {
        let mut entry = self
            .records
            .get_mut(&(session.clone(), user.clone()))
            .ok_or_else(|| session_not_found(session))?;

        let mut working = entry.value().clone();
        mutate(&mut working)?;
        *entry.value_mut() = working.clone();
        Ok(working)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (SessionId, UserId) {
        (SessionId::from("s1"), UserId::from("u1"))
    }

    #[test]
    fn test_put_analysis_keeps_report() {
        let store = MemoryReportStore::new();
        let (session, user) = ids();
        store
            .put_analysis(&session, &user, AnalysisSnapshot::new("first"))
            .unwrap();
        update_with(&store, &session, &user, |record| {
            record.report = Some(ReportState::planned(vec![], 3, String::new()));
            Ok(())
        })
        .unwrap();

        store
            .put_analysis(&session, &user, AnalysisSnapshot::new("second"))
            .unwrap();
        let record = store.load(&session, &user).unwrap().unwrap();
        assert_eq!(record.analysis.topic, "second");
        assert!(record.report.is_some());
    }

    #[test]
    fn test_failed_mutation_writes_nothing() {
        let store = MemoryReportStore::new();
        let (session, user) = ids();
        store
            .put_analysis(&session, &user, AnalysisSnapshot::new("topic"))
            .unwrap();

        let result: Result<()> = update_with(&store, &session, &user, |record| {
            record.analysis.topic = "mutated".into();
            Err(PreconditionError::locked("busy").into())
        });
        assert!(result.is_err());
        assert_eq!(
            store.load(&session, &user).unwrap().unwrap().analysis.topic,
            "topic"
        );
    }

    #[test]
    fn test_update_missing_session_is_not_found() {
        let store = MemoryReportStore::new();
        let (session, user) = ids();
        let err = update_with(&store, &session, &user, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err.precondition(),
            Some(PreconditionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_records_are_scoped_per_user() {
        let store = MemoryReportStore::new();
        let session = SessionId::from("s1");
        store
            .put_analysis(&session, &UserId::from("a"), AnalysisSnapshot::new("a"))
            .unwrap();
        assert!(store.load(&session, &UserId::from("b")).unwrap().is_none());
        assert_eq!(store.len(), 1);
    }
}
