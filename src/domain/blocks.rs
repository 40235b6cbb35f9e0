//! Personal-space blocks and their analytics.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::domain::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "block_kind", rename_all = "snake_case")]
pub enum BlockKind {
    Note,
    Task,
    Kanban,
    Goal,
    Reminder,
    Tracker,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Task => "task",
            Self::Kanban => "kanban",
            Self::Goal => "goal",
            Self::Reminder => "reminder",
            Self::Tracker => "tracker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: Uuid,
    pub user_id: i64,
    pub kind: BlockKind,
    pub content: Value,
    pub position: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Block {
    /// A task block whose content carries `"completed": true`.
    pub fn is_completed_task(&self) -> bool {
        self.kind == BlockKind::Task
            && self
                .content
                .get("completed")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAnalytics {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub tasks_completed: u64,
    /// Blocks updated within the trailing window.
    pub recently_touched: u64,
    pub recent_days: u32,
}

impl BlockAnalytics {
    pub fn from_blocks(blocks: &[Block], now: OffsetDateTime, recent_days: u32) -> Self {
        let since = now - Duration::days(i64::from(recent_days));
        let mut analytics = Self {
            recent_days,
            ..Self::default()
        };
        for block in blocks {
            analytics.total += 1;
            *analytics
                .by_kind
                .entry(block.kind.as_str().to_string())
                .or_default() += 1;
            if block.is_completed_task() {
                analytics.tasks_completed += 1;
            }
            if block.updated_at >= since {
                analytics.recently_touched += 1;
            }
        }
        analytics
    }
}

/// New order of a user's blocks: position `i` goes to `ids[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOrder {
    ids: Vec<Uuid>,
}

impl BlockOrder {
    pub fn new(ids: Vec<Uuid>) -> Result<Self, DomainError> {
        if ids.is_empty() {
            return Err(DomainError::validation("block order must not be empty"));
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(duplicate) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(DomainError::validation(format!(
                "block `{duplicate}` appears more than once in the order"
            )));
        }
        Ok(Self { ids })
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }

    /// `(id, position)` pairs in order.
    pub fn positions(&self) -> impl Iterator<Item = (Uuid, i32)> + '_ {
        self.ids
            .iter()
            .zip(0_i32..)
            .map(|(id, position)| (*id, position))
    }
}

/// Replacement content for one block in a bulk update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockUpdate {
    pub id: Uuid,
    pub content: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn block(kind: BlockKind, content: Value, updated_at: OffsetDateTime) -> Block {
        Block {
            id: Uuid::new_v4(),
            user_id: 42,
            kind,
            content,
            position: 0,
            updated_at,
        }
    }

    #[test]
    fn analytics_counts_kinds_tasks_and_recent_activity() {
        let now = datetime!(2024-07-15 10:00 UTC);
        let blocks = vec![
            block(BlockKind::Task, json!({"completed": true}), now - Duration::days(1)),
            block(BlockKind::Task, json!({"completed": false}), now - Duration::days(20)),
            block(BlockKind::Note, json!({"text": "hi"}), now - Duration::days(3)),
            block(BlockKind::Goal, json!({"completed": true}), now - Duration::days(8)),
        ];

        let analytics = BlockAnalytics::from_blocks(&blocks, now, 7);
        assert_eq!(analytics.total, 4);
        assert_eq!(analytics.by_kind.get("task"), Some(&2));
        assert_eq!(analytics.by_kind.get("note"), Some(&1));
        assert_eq!(analytics.tasks_completed, 1);
        assert_eq!(analytics.recently_touched, 2);
    }

    #[test]
    fn order_rejects_duplicates_and_empty_lists() {
        let id = Uuid::new_v4();
        assert!(BlockOrder::new(Vec::new()).is_err());
        assert!(BlockOrder::new(vec![id, Uuid::new_v4(), id]).is_err());

        let other = Uuid::new_v4();
        let order = BlockOrder::new(vec![other, id]).expect("valid order");
        let positions: Vec<_> = order.positions().collect();
        assert_eq!(positions, vec![(other, 0), (id, 1)]);
    }
}
