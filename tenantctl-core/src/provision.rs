//! Schema provisioning

use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::DbResult;

/// Make sure `schema` exists, creating it if needed.
///
/// Returns `true` when this call created the schema. Creation goes through
/// `CREATE SCHEMA IF NOT EXISTS`, so a concurrent provisioner in another
/// process cannot make it fail.
pub async fn ensure_schema_exists<C>(catalog: &C, schema: &str) -> DbResult<bool>
where
    C: Catalog + ?Sized,
{
    if catalog.schema_exists(schema).await? {
        debug!(schema = %schema, "schema already exists");
        return Ok(false);
    }

    catalog.create_schema(schema).await?;
    info!(schema = %schema, "created tenant schema");
    Ok(true)
}
