//! Obsolete index detection and removal
//!
//! An index is obsolete when it sits on a table the [`DataModel`] manages
//! but the model no longer declares it. A model with no tables never drops
//! anything. Failures are logged and never propagated: index hygiene must
//! not block connection setup.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::DbResult;
use crate::model::DataModel;

#[derive(Debug, Clone)]
pub struct IndexSynchronizer {
    model: Arc<DataModel>,
}

impl IndexSynchronizer {
    pub fn new(model: Arc<DataModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &DataModel {
        &self.model
    }

    /// Index names on managed tables in `schema` that the model does not declare.
    pub async fn obsolete_indexes<C>(&self, catalog: &C, schema: &str) -> DbResult<Vec<String>>
    where
        C: Catalog + ?Sized,
    {
        if self.model.is_empty() {
            return Ok(Vec::new());
        }
        let present = catalog.list_indexes(schema).await?;
        Ok(self
            .model
            .obsolete(&present)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Drop every obsolete index in `schema`, returning the names dropped.
    pub async fn drop_obsolete<C>(&self, catalog: &C, schema: &str) -> Vec<String>
    where
        C: Catalog + ?Sized,
    {
        if self.model.is_empty() {
            debug!(schema = %schema, "data model manages no tables, skipping index cleanup");
            return Vec::new();
        }

        let obsolete = match self.obsolete_indexes(catalog, schema).await {
            Ok(names) => names,
            Err(e) => {
                warn!(schema = %schema, error = %e, "failed to inspect indexes");
                return Vec::new();
            }
        };

        if obsolete.is_empty() {
            debug!(schema = %schema, "no obsolete indexes");
            return Vec::new();
        }

        let mut dropped = Vec::with_capacity(obsolete.len());
        for index in obsolete {
            match catalog.drop_index(schema, &index).await {
                Ok(()) => {
                    info!(schema = %schema, index = %index, "dropped obsolete index");
                    dropped.push(index);
                }
                Err(e) => {
                    warn!(schema = %schema, index = %index, error = %e, "failed to drop obsolete index");
                }
            }
        }
        dropped
    }
}
