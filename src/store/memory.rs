//! Process-local store backing both collaborator traits.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{FinalizedGeneration, GenerationStore, SessionStateSource};
use crate::error::Result;
use crate::types::SessionId;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: DashMap<SessionId, Vec<FinalizedGeneration>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generations(&self, session_id: &str) -> Vec<FinalizedGeneration> {
        self.sessions
            .get(session_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Total number of stored generations across sessions.
    pub fn len(&self) -> usize {
        self.sessions.iter().map(|entry| entry.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GenerationStore for InMemoryStore {
    /// Re-persisting a generation id replaces the earlier record.
    async fn persist(&self, record: FinalizedGeneration) -> Result<()> {
        tracing::debug!(
            session_id = %record.session_id,
            generation_id = %record.generation_id,
            state = %record.state,
            "persisting generation"
        );
        let mut records = self.sessions.entry(record.session_id.clone()).or_default();
        match records
            .iter_mut()
            .find(|r| r.generation_id == record.generation_id)
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStateSource for InMemoryStore {
    async fn load_session(&self, session_id: &str) -> Result<Vec<FinalizedGeneration>> {
        Ok(self.generations(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationState;
    use crate::types::Usage;

    fn record(session: &str, generation: &str, content: &str) -> FinalizedGeneration {
        FinalizedGeneration {
            session_id: session.into(),
            generation_id: generation.into(),
            state: GenerationState::Completed,
            timeline: Vec::new(),
            content: content.into(),
            usage: Usage::new(1, 1),
            generation_time_ms: 10,
            error: None,
            finished_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_are_grouped_by_session_in_order() {
        let store = InMemoryStore::new();
        store.persist(record("a", "g1", "one")).await.expect("persist");
        store.persist(record("b", "g2", "two")).await.expect("persist");
        store.persist(record("a", "g3", "three")).await.expect("persist");

        let a = store.load_session("a").await.expect("load");
        let ids: Vec<&str> = a.iter().map(|r| r.generation_id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g3"]);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn persisting_same_generation_replaces_record() {
        let store = InMemoryStore::new();
        store.persist(record("a", "g1", "draft")).await.expect("persist");
        store.persist(record("a", "g1", "final")).await.expect("persist");
        let a = store.load_session("a").await.expect("load");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "final");
    }
}
