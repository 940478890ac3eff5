//! Data-model declarations
//!
//! Business modules describe their tables by implementing [`Entity`]. The
//! [`DataModel`] collects the tables it manages and the index names they
//! declare. Only indexes on managed tables can be obsolete; tables the model
//! does not register are left alone.

use std::collections::BTreeSet;

use crate::catalog::SchemaIndex;

/// A table in every tenant schema.
pub trait Entity {
    /// Unqualified table name
    const TABLE: &'static str;

    /// Primary-key column used by [`Repository::find_by_id`](crate::Repository::find_by_id)
    const PRIMARY_KEY: &'static str = "id";

    /// Names of the secondary indexes this table declares
    const INDEXES: &'static [&'static str] = &[];
}

/// Managed tables and the index names the current data model declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataModel {
    tables: BTreeSet<String>,
    indexes: BTreeSet<String>,
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity's table and declared indexes.
    pub fn entity<E: Entity>(mut self) -> Self {
        self.tables.insert(E::TABLE.to_string());
        self.indexes
            .extend(E::INDEXES.iter().map(|name| name.to_string()));
        self
    }

    /// Manage additional tables (e.g. from `[model].tables`).
    pub fn with_tables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare additional index names (e.g. from `[model].indexes`).
    pub fn with_indexes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn declares(&self, index: &str) -> bool {
        self.indexes.contains(index)
    }

    pub fn declared_indexes(&self) -> &BTreeSet<String> {
        &self.indexes
    }

    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    pub fn manages(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    /// True when no table is registered, so nothing can be obsolete.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Indexes on managed tables that the model does not declare, in input order.
    pub fn obsolete<'a>(&self, present: &'a [SchemaIndex]) -> Vec<&'a str> {
        present
            .iter()
            .filter(|index| self.manages(&index.table) && !self.declares(&index.name))
            .map(|index| index.name.as_str())
            .collect()
    }
}
