use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::{
        repos::{RepoError, SearchRepo},
        search::SearchHit,
    },
    domain::feed::FeedItemKind,
};

use super::{PostgresRepositories, map_sqlx_error};

const SNIPPET_CHARS: i32 = 200;

#[derive(sqlx::FromRow)]
struct SearchRow {
    id: Uuid,
    kind: FeedItemKind,
    title: String,
    snippet: String,
    created_at: OffsetDateTime,
    rank: Option<f64>,
}

impl From<SearchRow> for SearchHit {
    fn from(row: SearchRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            title: row.title,
            snippet: row.snippet,
            created_at: row.created_at,
            rank: row.rank,
        }
    }
}

/// Escapes `LIKE` metacharacters so the query matches literally.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl SearchRepo for PostgresRepositories {
    async fn search_ranked(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>, RepoError> {
        let rows = sqlx::query_as::<_, SearchRow>(
            r#"
            SELECT
                id,
                kind,
                title,
                LEFT(body, $3) AS snippet,
                created_at,
                ts_rank(search_vector, plainto_tsquery('spanish', $1))::float8 AS rank
            FROM feed_items
            WHERE search_vector @@ plainto_tsquery('spanish', $1)
            ORDER BY rank DESC, created_at DESC
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(i64::from(limit))
        .bind(SNIPPET_CHARS)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(SearchHit::from).collect())
    }

    async fn search_substring(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchHit>, RepoError> {
        let rows = sqlx::query_as::<_, SearchRow>(
            r#"
            SELECT
                id,
                kind,
                title,
                LEFT(body, $3) AS snippet,
                created_at,
                NULL::float8 AS rank
            FROM feed_items
            WHERE title ILIKE $1 OR body ILIKE $1
            ORDER BY created_at DESC, id
            LIMIT $2
            "#,
        )
        .bind(like_pattern(query))
        .bind(i64::from(limit))
        .bind(SNIPPET_CHARS)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(SearchHit::from).collect())
    }
}
