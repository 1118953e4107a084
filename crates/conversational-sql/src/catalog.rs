//! Schema introspection seam and the per-request schema snapshot

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub sample_values: Vec<String>,
}

/// Live table/column introspection.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn list_tables(&self) -> anyhow::Result<Vec<String>>;
    async fn describe(&self, table: &str) -> anyhow::Result<Vec<ColumnDescriptor>>;
}

/// Immutable snapshot of the catalog: table name to its columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaView {
    tables: BTreeMap<String, Vec<ColumnDescriptor>>,
}

impl SchemaView {
    pub fn new(tables: BTreeMap<String, Vec<ColumnDescriptor>>) -> Self {
        Self { tables }
    }

    /// Walk the catalog once; the whole walk is bounded by `timeout`.
    pub async fn introspect(catalog: &dyn SchemaCatalog, timeout: Duration) -> anyhow::Result<Self> {
        let walk = async {
            let mut tables = BTreeMap::new();
            for table in catalog.list_tables().await.context("Failed to list tables")? {
                let columns = catalog
                    .describe(&table)
                    .await
                    .with_context(|| format!("Failed to describe table {}", table))?;
                debug!("Table '{}': {} columns", table, columns.len());
                tables.insert(table, columns);
            }
            Ok::<_, anyhow::Error>(tables)
        };

        let tables = tokio::time::timeout(timeout, walk)
            .await
            .map_err(|_| anyhow::anyhow!("Schema introspection timed out after {:?}", timeout))??;

        info!("Introspected schema with {} tables", tables.len());
        Ok(Self { tables })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Table names a generated query may reference
    pub fn allowed_tables(&self) -> BTreeSet<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn columns(&self, table: &str) -> Option<&[ColumnDescriptor]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Compact, token-friendly rendering used inside the SQL system prompt.
    pub fn render_for_prompt(&self) -> String {
        if self.tables.is_empty() {
            return "No tables available.".to_string();
        }

        self.tables
            .iter()
            .map(|(table, columns)| {
                let cols = columns
                    .iter()
                    .map(render_column)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("TABLE {}: {}", table, cols)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn render_column(col: &ColumnDescriptor) -> String {
    let mut out = if col.nullable {
        format!("{} ({}, nullable)", col.name, col.data_type)
    } else {
        format!("{} ({})", col.name, col.data_type)
    };
    if !col.sample_values.is_empty() {
        out.push_str(&format!(" [examples: {}]", col.sample_values.join(", ")));
    }
    out
}

/// Swappable holder for the current snapshot. Readers get an `Arc` and keep it
/// for the whole request; a reload never mutates a snapshot already handed out.
#[derive(Clone)]
pub struct SchemaHandle {
    inner: Arc<ArcSwap<SchemaView>>,
}

impl SchemaHandle {
    pub fn new(initial: SchemaView) -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(Arc::new(initial))),
        }
    }

    pub fn snapshot(&self) -> Arc<SchemaView> {
        self.inner.load_full()
    }

    pub fn replace(&self, next: SchemaView) {
        let current = self.inner.load();
        if **current == next {
            debug!("Schema reload produced no changes ({} tables)", next.len());
        } else {
            info!("Swapping schema snapshot: {} -> {} tables", current.len(), next.len());
        }
        if next.is_empty() {
            warn!("Schema snapshot is empty; table allow-list checks are disabled");
        }
        self.inner.store(Arc::new(next));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn column(name: &str, data_type: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: false,
            sample_values: Vec::new(),
        }
    }

    pub(crate) fn products_schema() -> SchemaView {
        let mut tables = BTreeMap::new();
        tables.insert(
            "products".to_string(),
            vec![
                column("name", "TEXT"),
                column("sub_category", "TEXT"),
                column("rating", "REAL"),
            ],
        );
        tables.insert("orders".to_string(), vec![column("id", "INTEGER")]);
        SchemaView::new(tables)
    }

    struct StaticCatalog;

    #[async_trait]
    impl SchemaCatalog for StaticCatalog {
        async fn list_tables(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["sales".to_string(), "customers".to_string()])
        }

        async fn describe(&self, table: &str) -> anyhow::Result<Vec<ColumnDescriptor>> {
            if table == "sales" {
                Ok(vec![ColumnDescriptor {
                    name: "region".into(),
                    data_type: "TEXT".into(),
                    nullable: true,
                    sample_values: vec!["North".into(), "South".into()],
                }])
            } else {
                Ok(vec![column("id", "INTEGER")])
            }
        }
    }

    struct SlowCatalog;

    #[async_trait]
    impl SchemaCatalog for SlowCatalog {
        async fn list_tables(&self) -> anyhow::Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn describe(&self, _table: &str) -> anyhow::Result<Vec<ColumnDescriptor>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_introspect_and_render() {
        let view = SchemaView::introspect(&StaticCatalog, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(view.len(), 2);
        assert!(view.allowed_tables().contains("sales"));

        let rendered = view.render_for_prompt();
        assert_eq!(
            rendered,
            "TABLE customers: id (INTEGER)\nTABLE sales: region (TEXT, nullable) [examples: North, South]"
        );
    }

    #[tokio::test]
    async fn test_introspect_times_out() {
        let err = SchemaView::introspect(&SlowCatalog, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_handle_keeps_old_snapshot_alive() {
        let handle = SchemaHandle::new(products_schema());
        let before = handle.snapshot();
        handle.replace(SchemaView::default());

        assert_eq!(before.len(), 2);
        assert!(handle.snapshot().is_empty());
        assert_eq!(SchemaView::default().render_for_prompt(), "No tables available.");
    }
}
