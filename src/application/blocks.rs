//! Personal-space block reads and bulk writes.
//!
//! Reads go through the query cache tagged with the owner's block tag and
//! the class-wide `blocks_all` tag. Bulk writes commit in one transaction
//! and invalidate both tags only after the commit succeeds.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::repos::{BlocksRepo, RepoError};
use crate::cache::{CacheError, QueryCache, QuerySpec, SharedClock, Tag};
use crate::domain::blocks::{Block, BlockAnalytics, BlockOrder, BlockUpdate};
use crate::domain::error::DomainError;

const DEFAULT_RECENT_DAYS: u32 = 7;

#[derive(Debug, Error)]
pub enum BlocksError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub fn user_blocks_tag(user_id: i64) -> Tag {
    Tag::scoped("user", user_id, "blocks")
}

pub fn all_blocks_tag() -> Tag {
    Tag::class_wide("blocks")
}

#[derive(Clone)]
pub struct BlocksService {
    repo: Arc<dyn BlocksRepo>,
    cache: Arc<QueryCache>,
    clock: SharedClock,
    recent_days: u32,
    ttl: Option<Duration>,
}

impl BlocksService {
    pub fn new(repo: Arc<dyn BlocksRepo>, cache: Arc<QueryCache>, clock: SharedClock) -> Self {
        Self {
            repo,
            cache,
            clock,
            recent_days: DEFAULT_RECENT_DAYS,
            ttl: None,
        }
    }

    /// Trailing window, in days, counted as recent activity.
    pub fn with_recent_days(mut self, days: u32) -> Self {
        self.recent_days = days;
        self
    }

    /// Overrides the query cache's default TTL for block reads.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn spec(&self, name: &'static str, user_id: i64) -> QuerySpec {
        let spec = QuerySpec::new(name).with_tags([user_blocks_tag(user_id), all_blocks_tag()]);
        match self.ttl {
            Some(ttl) => spec.with_ttl(ttl),
            None => spec,
        }
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<Block>, BlocksError> {
        let spec = self.spec("blocks.list", user_id);
        let key = spec.key().arg(&user_id).build()?;
        self.cache
            .cached(&spec, key, || async {
                Ok::<_, BlocksError>(self.repo.list_blocks(user_id).await?)
            })
            .await
    }

    pub async fn analytics(&self, user_id: i64) -> Result<BlockAnalytics, BlocksError> {
        let spec = self.spec("blocks.analytics", user_id);
        let key = spec
            .key()
            .arg(&user_id)
            .kwarg("recent_days", &self.recent_days)
            .build()?;
        self.cache
            .cached(&spec, key, || async {
                let blocks = self.repo.list_blocks(user_id).await?;
                Ok::<_, BlocksError>(BlockAnalytics::from_blocks(
                    &blocks,
                    self.clock.now(),
                    self.recent_days,
                ))
            })
            .await
    }

    /// Moves the user's blocks into the given order.
    pub async fn reorder(&self, user_id: i64, ids: Vec<Uuid>) -> Result<u64, BlocksError> {
        let order = BlockOrder::new(ids)?;
        let result = self.repo.reorder_blocks(user_id, &order).await;
        self.finish_write("reorder", user_id, result)
    }

    /// Replaces the content of several blocks at once.
    pub async fn update_many(
        &self,
        user_id: i64,
        updates: Vec<BlockUpdate>,
    ) -> Result<u64, BlocksError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut seen = HashSet::with_capacity(updates.len());
        if let Some(update) = updates.iter().find(|update| !seen.insert(update.id)) {
            return Err(DomainError::validation(format!(
                "block `{}` is updated more than once",
                update.id
            ))
            .into());
        }
        let result = self.repo.update_blocks(user_id, &updates).await;
        self.finish_write("update_many", user_id, result)
    }

    fn finish_write(
        &self,
        operation: &'static str,
        user_id: i64,
        result: Result<u64, RepoError>,
    ) -> Result<u64, BlocksError> {
        match result {
            Ok(affected) => {
                let invalidated = self
                    .cache
                    .invalidate_tags([&user_blocks_tag(user_id), &all_blocks_tag()]);
                info!(operation, user_id, affected, invalidated, "Block bulk write committed");
                Ok(affected)
            }
            Err(err) => {
                warn!(operation, user_id, error = %err, "Block bulk write rolled back");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::cache::{CacheConfig, ManualClock};
    use crate::domain::blocks::BlockKind;

    #[derive(Default)]
    struct MemoryBlocks {
        blocks: Mutex<Vec<Block>>,
        reads: AtomicUsize,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl BlocksRepo for MemoryBlocks {
        async fn list_blocks(&self, user_id: i64) -> Result<Vec<Block>, RepoError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .blocks
                .lock()
                .unwrap()
                .iter()
                .filter(|block| block.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn reorder_blocks(&self, user_id: i64, order: &BlockOrder) -> Result<u64, RepoError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(RepoError::Timeout);
            }
            let mut blocks = self.blocks.lock().unwrap();
            for (id, position) in order.positions() {
                let block = blocks
                    .iter_mut()
                    .find(|block| block.id == id && block.user_id == user_id)
                    .ok_or(RepoError::NotFound)?;
                block.position = position;
            }
            Ok(order.ids().len() as u64)
        }

        async fn update_blocks(
            &self,
            user_id: i64,
            updates: &[BlockUpdate],
        ) -> Result<u64, RepoError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(RepoError::Timeout);
            }
            let mut blocks = self.blocks.lock().unwrap();
            for update in updates {
                let block = blocks
                    .iter_mut()
                    .find(|block| block.id == update.id && block.user_id == user_id)
                    .ok_or(RepoError::NotFound)?;
                block.content = update.content.clone();
            }
            Ok(updates.len() as u64)
        }
    }

    fn fixture() -> (BlocksService, Arc<MemoryBlocks>, Arc<QueryCache>, Vec<Uuid>) {
        let clock = ManualClock::new(datetime!(2024-08-01 12:00 UTC));
        let shared: SharedClock = Arc::new(clock);
        let cache = Arc::new(QueryCache::new(&CacheConfig::default(), shared.clone()));
        let repo = Arc::new(MemoryBlocks::default());
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        {
            let mut blocks = repo.blocks.lock().unwrap();
            for (position, id) in ids.iter().enumerate() {
                blocks.push(Block {
                    id: *id,
                    user_id: 42,
                    kind: BlockKind::Task,
                    content: json!({"completed": position == 0}),
                    position: position as i32,
                    updated_at: datetime!(2024-07-31 09:00 UTC),
                });
            }
        }
        let service = BlocksService::new(repo.clone(), cache.clone(), shared);
        (service, repo, cache, ids)
    }

    #[tokio::test]
    async fn analytics_are_cached_until_a_write_commits() {
        let (service, repo, _, ids) = fixture();

        let first = service.analytics(42).await.expect("analytics");
        assert_eq!(first.tasks_completed, 1);
        service.analytics(42).await.expect("analytics");
        assert_eq!(repo.reads.load(Ordering::SeqCst), 1);

        let updates = vec![BlockUpdate {
            id: ids[1],
            content: json!({"completed": true}),
        }];
        assert_eq!(service.update_many(42, updates).await.expect("update"), 1);

        let after = service.analytics(42).await.expect("analytics");
        assert_eq!(after.tasks_completed, 2);
        assert_eq!(repo.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_write_keeps_cached_results() {
        let (service, repo, cache, ids) = fixture();
        service.list(42).await.expect("list");
        let cached = cache.len();

        repo.fail_writes.store(true, Ordering::SeqCst);
        let err = service.reorder(42, ids.into_iter().rev().collect()).await;
        assert!(matches!(err, Err(BlocksError::Repo(RepoError::Timeout))));
        assert_eq!(cache.len(), cached);

        service.list(42).await.expect("list");
        assert_eq!(repo.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn writes_invalidate_only_the_owner_and_class_tags() {
        let (service, _, cache, ids) = fixture();
        service.list(42).await.expect("list");
        service.list(7).await.expect("list");
        assert_eq!(cache.len(), 2);

        service
            .reorder(42, ids.into_iter().rev().collect())
            .await
            .expect("reorder");
        // user 7's entry also carries `blocks_all`.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn duplicate_updates_are_rejected_before_storage() {
        let (service, _, _, ids) = fixture();
        let update = BlockUpdate {
            id: ids[0],
            content: json!({}),
        };
        let err = service
            .update_many(42, vec![update.clone(), update])
            .await
            .expect_err("duplicate");
        assert!(matches!(err, BlocksError::Domain(DomainError::Validation { .. })));
    }
}
