use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{FeedItemsRepo, RepoError, ScoreUpdate},
    domain::{
        feed::{FeedItem, FeedItemKind},
        scoring::EngagementCounters,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct FeedItemRow {
    id: Uuid,
    kind: FeedItemKind,
    likes: i64,
    downloads: i64,
    comments: i64,
    created_at: OffsetDateTime,
}

impl TryFrom<FeedItemRow> for FeedItem {
    type Error = RepoError;

    fn try_from(row: FeedItemRow) -> Result<Self, Self::Error> {
        let counters = EngagementCounters::from_stored(row.likes, row.downloads, row.comments)?;
        Ok(Self {
            id: row.id,
            kind: row.kind,
            counters,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl FeedItemsRepo for PostgresRepositories {
    async fn list_items_since(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<FeedItem>, RepoError> {
        let rows = sqlx::query_as::<_, FeedItemRow>(
            r#"
            SELECT id, kind, likes, downloads, comments, created_at
            FROM feed_items
            WHERE created_at >= $1
            ORDER BY created_at DESC, id
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(FeedItem::try_from).collect()
    }

    async fn list_ranking_candidates(
        &self,
        since: OffsetDateTime,
        top: u32,
    ) -> Result<Vec<FeedItem>, RepoError> {
        let rows = sqlx::query_as::<_, FeedItemRow>(
            r#"
            (
                SELECT id, kind, likes, downloads, comments, created_at
                FROM feed_items
                WHERE created_at >= $1 AND scored_at IS NOT NULL
                ORDER BY score DESC, id
                LIMIT $2
            )
            UNION ALL
            (
                SELECT id, kind, likes, downloads, comments, created_at
                FROM feed_items
                WHERE created_at >= $1 AND scored_at IS NULL
            )
            "#,
        )
        .bind(since)
        .bind(i64::from(top))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(FeedItem::try_from).collect()
    }

    async fn store_scores(
        &self,
        updates: &[ScoreUpdate],
        scored_at: OffsetDateTime,
    ) -> Result<u64, RepoError> {
        if updates.is_empty() {
            return Ok(0);
        }

        let (ids, scores): (Vec<Uuid>, Vec<f64>) =
            updates.iter().map(|update| (update.id, update.score)).unzip();

        let result = sqlx::query(
            r#"
            UPDATE feed_items AS f
            SET score = u.score, scored_at = $3
            FROM UNNEST($1::uuid[], $2::float8[]) AS u(id, score)
            WHERE f.id = u.id
            "#,
        )
        .bind(ids)
        .bind(scores)
        .bind(scored_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn prune_before(&self, cutoff: OffsetDateTime) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM feed_items WHERE created_at < $1")
            .bind(cutoff)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}
