//! Postgres-backed [`EventStore`] alternative to the file-partitioned
//! [`crate::naive::NaiveEventStore`].
//!
//! Schema is a single `events` table keyed by id, with `timestamp`/`source`/
//! `content` indexed and `tags` stored as a comma-joined `TEXT` column (the
//! same join format the wire codec uses for its `tags:` header line).
//! `search` pushes the `start`/`end` range down to SQL, paged 128 rows at a
//! time ordered by timestamp, and evaluates `tags`/`content` regex criteria
//! in-process against each page — the same [`Criteria::matches`] predicate
//! the naive store and the live matcher use, so results are identical
//! regardless of which store answered the query.

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::TryStreamExt;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use theia_model::Event;

use crate::error::{Result, StoreError};
use crate::store::{EventStore, SearchOrder, SearchRequest};

const PAGE_SIZE: i64 = 128;

#[derive(Debug, FromRow)]
struct EventRow {
    id: String,
    source: String,
    timestamp: f64,
    tags: String,
    content: String,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> std::result::Result<Self, Self::Error> {
        let tags = if row.tags.is_empty() {
            Vec::new()
        } else {
            row.tags.split(',').map(str::to_string).collect()
        };
        Event::new(row.id, row.source, row.timestamp, tags, row.content)
            .map_err(|e| StoreError::InvalidRequest(e.to_string()))
    }
}

/// Postgres-backed alternative to [`crate::naive::NaiveEventStore`]: unlike
/// the naive store, `get`/`delete` are fully supported via the primary key.
pub struct RelationalEventStore {
    pool: PgPool,
}

impl RelationalEventStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the `events` table and its indexes if they don't already
    /// exist. The only migration this backend performs (§4.6: schema
    /// evolution is out of scope).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                timestamp DOUBLE PRECISION NOT NULL,
                tags TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS events_timestamp_idx ON events (timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS events_source_idx ON events (source)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS events_content_idx ON events (content)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn tags_column(event: &Event) -> String {
        event.tags().join(",")
    }
}

#[async_trait]
impl EventStore for RelationalEventStore {
    async fn save(&self, event: Event) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (id, source, timestamp, tags, content) VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET source = $2, timestamp = $3, tags = $4, content = $5",
        )
        .bind(event.id())
        .bind(event.source())
        .bind(event.timestamp())
        .bind(Self::tags_column(&event))
        .bind(event.content())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT id, source, timestamp, tags, content FROM events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Event::try_from).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(true)
    }

    fn search(&self, request: SearchRequest) -> BoxStream<'static, Result<Event>> {
        let pool = self.pool.clone();
        Box::pin(try_stream! {
            let order_sql = if request.order == SearchOrder::Desc { "DESC" } else { "ASC" };
            let sql = format!(
                "SELECT id, source, timestamp, tags, content FROM events \
                 WHERE ($1::double precision IS NULL OR timestamp >= $1) \
                   AND ($2::double precision IS NULL OR timestamp <= $2) \
                 ORDER BY timestamp {order_sql} \
                 LIMIT $3 OFFSET $4"
            );

            let mut offset: i64 = 0;
            loop {
                let mut rows = sqlx::query_as::<_, EventRow>(&sql)
                    .bind(request.criteria.start())
                    .bind(request.criteria.end())
                    .bind(PAGE_SIZE)
                    .bind(offset)
                    .fetch(&pool);

                let mut page_len = 0i64;
                while let Some(row) = rows.try_next().await? {
                    page_len += 1;
                    let event = Event::try_from(row)?;
                    if request.criteria.matches(&event) {
                        yield event;
                    }
                }

                if page_len < PAGE_SIZE {
                    break;
                }
                offset += PAGE_SIZE;
            }
        })
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
