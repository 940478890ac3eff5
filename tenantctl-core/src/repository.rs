//! Typed data access for tenant tables
//!
//! Obtained from a tenant connection via
//! [`PgTenantConnection::repository`](crate::postgres::PgTenantConnection::repository).
//! Queries are schema-qualified, so they do not depend on `search_path`.

use std::marker::PhantomData;

use sqlx::postgres::PgRow;
use sqlx::{Encode, FromRow, PgPool, Postgres, Type};

use crate::error::DbResult;
use crate::model::Entity;
use crate::sql::{qualified, quote_ident};

pub struct Repository<'a, E> {
    pool: &'a PgPool,
    schema: &'a str,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> Repository<'a, E> {
    pub fn new(pool: &'a PgPool, schema: &'a str) -> Self {
        Self {
            pool,
            schema,
            _entity: PhantomData,
        }
    }

    pub fn schema(&self) -> &str {
        self.schema
    }

    fn table(&self) -> String {
        qualified(self.schema, E::TABLE)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", self.table()))
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Rows ordered by primary key.
    pub async fn fetch_page(&self, limit: i64, offset: i64) -> DbResult<Vec<E>>
    where
        E: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} LIMIT $1 OFFSET $2",
            self.table(),
            quote_ident(E::PRIMARY_KEY)
        );
        let rows = sqlx::query_as::<_, E>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn find_by_id<T>(&self, id: T) -> DbResult<Option<E>>
    where
        E: for<'r> FromRow<'r, PgRow> + Send + Unpin,
        T: for<'q> Encode<'q, Postgres> + Type<Postgres> + Send + 'static,
    {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1",
            self.table(),
            quote_ident(E::PRIMARY_KEY)
        );
        let row = sqlx::query_as::<_, E>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }
}
