use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::{
    application::repos::{BlocksRepo, RepoError},
    domain::blocks::{Block, BlockKind, BlockOrder, BlockUpdate},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct BlockRow {
    id: Uuid,
    user_id: i64,
    kind: BlockKind,
    content: Value,
    position: i32,
    updated_at: OffsetDateTime,
}

impl From<BlockRow> for Block {
    fn from(row: BlockRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            content: row.content,
            position: row.position,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl BlocksRepo for PostgresRepositories {
    async fn list_blocks(&self, user_id: i64) -> Result<Vec<Block>, RepoError> {
        let rows = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT id, user_id, kind, content, position, updated_at
            FROM blocks
            WHERE user_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Block::from).collect())
    }

    async fn reorder_blocks(&self, user_id: i64, order: &BlockOrder) -> Result<u64, RepoError> {
        let (ids, positions): (Vec<Uuid>, Vec<i32>) = order.positions().unzip();
        let expected = ids.len() as u64;

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let result = sqlx::query(
            r#"
            UPDATE blocks AS b
            SET position = u.position, updated_at = now()
            FROM UNNEST($2::uuid[], $3::int4[]) AS u(id, position)
            WHERE b.id = u.id AND b.user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(ids)
        .bind(positions)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() != expected {
            warn!(
                user_id,
                expected,
                affected = result.rows_affected(),
                "Block reorder referenced unknown blocks; rolling back"
            );
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(RepoError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(expected)
    }

    async fn update_blocks(
        &self,
        user_id: i64,
        updates: &[BlockUpdate],
    ) -> Result<u64, RepoError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let expected = updates.len() as u64;

        let mut qb = QueryBuilder::<Postgres>::new(
            "UPDATE blocks AS b SET content = v.content, updated_at = now() FROM (",
        );
        qb.push_values(updates, |mut row, update| {
            row.push_bind(update.id).push_bind(&update.content);
        });
        qb.push(") AS v(id, content) WHERE b.id = v.id AND b.user_id = ");
        qb.push_bind(user_id);

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let result = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() != expected {
            warn!(
                user_id,
                expected,
                affected = result.rows_affected(),
                "Bulk block update referenced unknown blocks; rolling back"
            );
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(RepoError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(expected)
    }
}
