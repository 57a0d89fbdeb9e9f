//! Slot table — name-keyed records behind a single write serialization
//! point.
//!
//! All mutation goes through [`SlotTable::update`] or
//! [`SlotTable::with_write`], so there is one writer at a time and a
//! mutation is never observable half-applied. Updates are field-level
//! merges; `name`, `index`, and `ports` are never changed after insert.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::slot::Slot;

#[derive(Default)]
pub struct SlotTable {
    slots: RwLock<HashMap<String, Slot>>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, slot: Slot) {
        self.slots.write().await.insert(slot.name.clone(), slot);
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn get(&self, name: &str) -> Option<Slot> {
        self.slots.read().await.get(name).cloned()
    }

    /// Snapshot of every slot, in index order.
    pub async fn snapshot(&self) -> Vec<Slot> {
        let slots = self.slots.read().await;
        let mut all: Vec<Slot> = slots.values().cloned().collect();
        all.sort_by_key(|slot| slot.index);
        all
    }

    /// Names of every slot, in index order.
    pub async fn names(&self) -> Vec<String> {
        self.snapshot().await.into_iter().map(|s| s.name).collect()
    }

    /// Linear scan by the agent-assigned id label. N is small and fixed.
    pub async fn find_by_agent_id(&self, id: &str) -> Option<Slot> {
        let slots = self.slots.read().await;
        slots
            .values()
            .find(|slot| slot.agent_id() == Some(id))
            .cloned()
    }

    /// Linear scan by the leasing session's id.
    pub async fn find_by_session(&self, session_id: &str) -> Option<Slot> {
        let slots = self.slots.read().await;
        slots
            .values()
            .find(|slot| slot.session.session_id.as_deref() == Some(session_id))
            .cloned()
    }

    /// Mutate one slot under the write lock. Returns `None` when the slot
    /// does not exist.
    pub async fn update<F, T>(&self, name: &str, mutate: F) -> Option<T>
    where
        F: FnOnce(&mut Slot) -> T,
    {
        let mut slots = self.slots.write().await;
        slots.get_mut(name).map(mutate)
    }

    /// Run an arbitrary closure over the whole map under the write lock.
    /// Used where a scan and a mutation must be atomic (reservation).
    pub async fn with_write<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut HashMap<String, Slot>) -> T,
    {
        let mut slots = self.slots.write().await;
        f(&mut slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::pool::slot::{SlotState, LABEL_ID};

    async fn seeded_table() -> SlotTable {
        let settings = PoolSettings {
            browser_prefix: "bx".to_string(),
            ..PoolSettings::default()
        };
        let table = SlotTable::new();
        let mut a = Slot::new(&settings, 0);
        a.labels.insert(LABEL_ID.to_string(), "A1".to_string());
        let mut b = Slot::new(&settings, 1);
        b.session.session_id = Some("sess-9".to_string());
        // Insert out of order to exercise snapshot sorting.
        table.insert(b).await;
        table.insert(a).await;
        table
    }

    #[tokio::test]
    async fn test_snapshot_in_index_order() {
        let table = seeded_table().await;
        let names = table.names().await;
        assert_eq!(names, vec!["bx-10222", "bx-10223"]);
    }

    #[tokio::test]
    async fn test_secondary_lookups() {
        let table = seeded_table().await;
        let by_id = table.find_by_agent_id("A1").await.unwrap();
        assert_eq!(by_id.name, "bx-10222");
        let by_session = table.find_by_session("sess-9").await.unwrap();
        assert_eq!(by_session.name, "bx-10223");
        assert!(table.find_by_agent_id("nope").await.is_none());
        assert!(table.find_by_session("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let table = seeded_table().await;
        let updated = table
            .update("bx-10222", |slot| {
                slot.state = SlotState::Ready;
                slot.debug = true;
                slot.state
            })
            .await;
        assert_eq!(updated, Some(SlotState::Ready));
        let slot = table.get("bx-10222").await.unwrap();
        assert!(slot.debug);
        // Identity fields untouched by the merge.
        assert_eq!(slot.index, 0);
        assert_eq!(slot.ports.app, 7070);
    }

    #[tokio::test]
    async fn test_update_unknown_slot() {
        let table = seeded_table().await;
        assert!(table.update("missing", |_| ()).await.is_none());
    }
}
