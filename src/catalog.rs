//! Catalog reader: turns one catalog query into the ordered list of table identifiers the
//! connector works with. Stateless; the monitor calls it serially.

use std::collections::HashSet;

use tracing::debug;

use crate::connection::{CatalogEntry, SourceConnection};
use crate::error::ConnectorResult;

/// Which tables of the catalog the connector is interested in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFilter {
    /// SQL `LIKE` pattern over schema names.
    pub schema_pattern: Option<String>,
    /// Only these tables, when set.
    pub whitelist: Option<Vec<String>>,
    /// Never these tables, when set.
    pub blacklist: Option<Vec<String>>,
}

impl TableFilter {
    pub fn accepts(&self, table: &str) -> bool {
        if let Some(w) = &self.whitelist {
            return w.iter().any(|t| t == table);
        }
        if let Some(b) = &self.blacklist {
            return !b.iter().any(|t| t == table);
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogReader {
    filter: TableFilter,
}

impl CatalogReader {
    pub fn new(filter: TableFilter) -> Self { Self { filter } }

    /// Current table identifiers, in catalog order. Fails with a discovery error when the
    /// query cannot run.
    pub async fn list_tables(&self, conn: &dyn SourceConnection) -> ConnectorResult<Vec<String>> {
        let entries = conn.catalog_entries(self.filter.schema_pattern.as_deref()).await?;
        let total = entries.len();
        let tables = self.select(entries);
        debug!(target: "tablescout::catalog", "catalog of {} listed {} entries, {} selected", conn.describe(), total, tables.len());
        Ok(tables)
    }

    /// Apply the filter and keep the first occurrence of each name so identifiers stay
    /// unique when the same table exists in several schemas.
    fn select(&self, entries: Vec<CatalogEntry>) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::with_capacity(entries.len());
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            if !self.filter.accepts(&e.table) { continue; }
            if seen.insert(e.table.clone()) {
                out.push(e.table);
            }
        }
        out
    }
}
