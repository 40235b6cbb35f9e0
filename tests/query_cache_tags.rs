use std::convert::Infallible;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use crunevo::{
    application::{
        blocks::{BlocksError, BlocksService, all_blocks_tag, user_blocks_tag},
        repos::{BlocksRepo, RepoError},
    },
    cache::{CacheConfig, ManualClock, QueryCache, QuerySpec, Tag},
    domain::blocks::{Block, BlockKind, BlockOrder, BlockUpdate},
};
use serde_json::json;
use time::{Duration, macros::datetime};
use uuid::Uuid;

fn tag(value: &str) -> Tag {
    Tag::new(value).expect("tag")
}

async fn fill(cache: &QueryCache, name: &'static str, tags: &[&str]) {
    let spec = QuerySpec::new(name).with_tags(tags.iter().map(|value| tag(value)));
    let key = spec.key().build().expect("key");
    cache
        .cached(&spec, key, || async { Ok::<_, Infallible>(vec![name.to_string()]) })
        .await
        .expect("infallible");
}

async fn is_cached(cache: &QueryCache, name: &'static str) -> bool {
    let spec = QuerySpec::new(name);
    let key = spec.key().build().expect("key");
    let computed = AtomicBool::new(false);
    cache
        .cached(&spec, key, || async {
            computed.store(true, Ordering::SeqCst);
            Ok::<_, Infallible>(vec![name.to_string()])
        })
        .await
        .expect("infallible");
    !computed.load(Ordering::SeqCst)
}

#[tokio::test]
async fn invalidating_a_tag_removes_every_entry_that_carries_it() {
    let clock = ManualClock::new(datetime!(2024-05-20 10:00 UTC));
    let cache = QueryCache::new(&CacheConfig::default(), Arc::new(clock));

    fill(&cache, "both", &["A", "B"]).await;
    fill(&cache, "only_b", &["B"]).await;
    fill(&cache, "only_a", &["A"]).await;

    let removed = cache.invalidate_tags([&tag("B")]);
    assert_eq!(removed, 2);

    assert!(!is_cached(&cache, "both").await);
    assert!(!is_cached(&cache, "only_b").await);
    assert!(is_cached(&cache, "only_a").await);
}

#[tokio::test]
async fn failed_computations_are_not_cached() {
    let clock = ManualClock::new(datetime!(2024-05-20 10:00 UTC));
    let cache = QueryCache::new(&CacheConfig::default(), Arc::new(clock));
    let spec = QuerySpec::new("flaky");
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
        let key = spec.key().arg("x").build().expect("key");
        let result = cache
            .cached(&spec, key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Vec<u8>, _>("database unavailable")
            })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.is_empty());
}

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
            .expect("lock")
            .iter()
            .filter(|block| block.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn reorder_blocks(&self, _user_id: i64, order: &BlockOrder) -> Result<u64, RepoError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
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
        let mut blocks = self.blocks.lock().expect("lock");
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

fn task(user_id: i64, completed: bool) -> Block {
    Block {
        id: Uuid::new_v4(),
        user_id,
        kind: BlockKind::Task,
        content: json!({ "title": "Repasar álgebra", "completed": completed }),
        position: 0,
        updated_at: datetime!(2024-05-19 18:00 UTC),
    }
}

fn service(repo: Arc<MemoryBlocks>) -> BlocksService {
    let clock = ManualClock::new(datetime!(2024-05-20 10:00 UTC));
    let cache = Arc::new(QueryCache::new(&CacheConfig::default(), Arc::new(clock.clone())));
    BlocksService::new(repo, cache, Arc::new(clock)).with_ttl(Duration::minutes(5))
}

#[tokio::test]
async fn committed_bulk_update_refreshes_analytics() {
    let first = task(1, false);
    let repo = Arc::new(MemoryBlocks {
        blocks: Mutex::new(vec![first.clone(), task(1, false), task(2, true)]),
        ..MemoryBlocks::default()
    });
    let service = service(repo.clone());

    assert_eq!(service.analytics(1).await.expect("analytics").tasks_completed, 0);
    assert_eq!(service.analytics(1).await.expect("analytics").tasks_completed, 0);
    assert_eq!(repo.reads.load(Ordering::SeqCst), 1);

    let updated = service
        .update_many(
            1,
            vec![BlockUpdate {
                id: first.id,
                content: json!({ "title": "Repasar álgebra", "completed": true }),
            }],
        )
        .await
        .expect("update");
    assert_eq!(updated, 1);

    assert_eq!(service.analytics(1).await.expect("analytics").tasks_completed, 1);
    assert_eq!(repo.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_bulk_write_keeps_cached_reads() {
    let block = task(1, false);
    let repo = Arc::new(MemoryBlocks {
        blocks: Mutex::new(vec![block.clone()]),
        ..MemoryBlocks::default()
    });
    let service = service(repo.clone());

    service.list(1).await.expect("list");
    repo.fail_writes.store(true, Ordering::SeqCst);

    let err = service
        .reorder(1, vec![block.id])
        .await
        .expect_err("write fails");
    assert!(matches!(err, BlocksError::Repo(RepoError::Timeout)));

    service.list(1).await.expect("list");
    assert_eq!(repo.reads.load(Ordering::SeqCst), 1);
}

#[test]
fn block_tags_follow_naming_scheme() {
    assert_eq!(user_blocks_tag(42).as_str(), "user_42_blocks");
    assert_eq!(all_blocks_tag().as_str(), "blocks_all");
}
