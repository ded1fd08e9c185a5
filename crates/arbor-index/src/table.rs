//! A table of row versions kept in AVL indexes.
//!
//! Rows live only in the index trees. The first index added holds every
//! version and drives back-fill, scans over the whole table and vacuum.

use crate::avl::{IndexAvl, IndexDef, MatchType};
use crate::mvcc::{RowVisibility, TxnContext, TxnManager};
use crate::row::{Row, RowId};
use crate::store::MemoryStore;
use arbor_common::{ArborError, ColumnType, IndexConfig, Result, StoreConfig, Value};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Table with its indexes and their store.
#[derive(Debug)]
pub struct Table {
    name: String,
    columns: Vec<ColumnType>,
    indexes: Vec<IndexAvl>,
    store: MemoryStore,
    next_row_id: AtomicU64,
}

impl Table {
    /// Creates a table with no indexes.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnType>,
        config: StoreConfig,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            store: MemoryStore::new(0, config)?,
            next_row_id: AtomicU64::new(1),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn columns(&self) -> &[ColumnType] {
        &self.columns
    }

    #[inline]
    pub fn indexes(&self) -> &[IndexAvl] {
        &self.indexes
    }

    /// Returns the index at `position`.
    pub fn index(&self, position: usize) -> Result<&IndexAvl> {
        self.indexes
            .get(position)
            .ok_or_else(|| ArborError::IndexNotFound(format!("{}[{}]", self.name, position)))
    }

    #[inline]
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Adds an index and fills it with every stored version.
    /// Returns the index position.
    pub fn add_index(&mut self, def: IndexDef, config: IndexConfig) -> Result<usize> {
        let position = self.indexes.len();
        let index = IndexAvl::new(def, position, config)?;

        for (&col, ty) in index.columns().iter().zip(index.column_types()) {
            match self.columns.get(col) {
                Some(table_ty) if table_ty == ty => {}
                Some(table_ty) => {
                    return Err(ArborError::InvalidIndexDefinition(format!(
                        "index {} declares column {} as {}, table {} has {}",
                        index.name(),
                        col,
                        ty,
                        self.name,
                        table_ty
                    )));
                }
                None => {
                    return Err(ArborError::InvalidIndexDefinition(format!(
                        "index {} refers to column {} of {}-column table {}",
                        index.name(),
                        col,
                        self.columns.len(),
                        self.name
                    )));
                }
            }
        }

        self.store.add_tree();

        if let Some(primary) = self.indexes.first() {
            let rows: Vec<Arc<Row>> = primary.first_row(None, &self.store)?.collect();
            for row in rows {
                if let Err(e) = index.insert(None, &self.store, row) {
                    self.store.truncate_trees(position);
                    return Err(e);
                }
            }
        }

        debug!(table = %self.name, index = %index.name(), position, "index added");
        self.indexes.push(index);
        Ok(position)
    }

    fn validate(&self, data: &[Value]) -> Result<()> {
        if data.len() != self.columns.len() {
            return Err(ArborError::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: data.len(),
            });
        }
        for (ty, value) in self.columns.iter().zip(data) {
            if !ty.accepts(value) {
                return Err(ArborError::TypeMismatch {
                    expected: ty.to_string(),
                    actual: value.kind_name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Inserts a new row version created by `ctx` into every index.
    pub fn insert(&self, ctx: &TxnContext, data: Vec<Value>) -> Result<Arc<Row>> {
        ctx.ensure_active()?;
        self.validate(&data)?;
        if self.indexes.is_empty() {
            return Err(ArborError::IndexNotFound(format!("{} has no index", self.name)));
        }

        let id = self.next_row_id.fetch_add(1, AtomicOrdering::Relaxed);
        let row = Arc::new(Row::with_version(id, data, ctx.xid()));

        for (i, index) in self.indexes.iter().enumerate() {
            if let Err(e) = index.insert(Some(ctx), &self.store, Arc::clone(&row)) {
                for done in &self.indexes[..i] {
                    if let Err(undo) = done.delete(&self.store, &row) {
                        warn!(
                            table = %self.name,
                            index = %done.name(),
                            row = id,
                            error = %undo,
                            "rollback of partial insert failed"
                        );
                    }
                }
                return Err(e);
            }
        }

        Ok(row)
    }

    /// Marks `row` deleted by `ctx`. The version stays in the indexes until
    /// it is purged.
    pub fn delete(&self, ctx: &TxnContext, row: &Row) -> Result<()> {
        ctx.ensure_active()?;
        let manager = ctx.manager();
        row.version()
            .mark_deleted(ctx.xid(), |xid| manager.is_aborted(xid))
            .map_err(|holder| {
                debug!(table = %self.name, row = row.id(), holder, "write conflict");
                ArborError::WriteConflict { row_id: row.id() }
            })
    }

    /// Replaces `row` with a new version holding `data`.
    pub fn update(&self, ctx: &TxnContext, row: &Row, data: Vec<Value>) -> Result<Arc<Row>> {
        let deleted_before = row.version().xmax() == Some(ctx.xid());
        self.delete(ctx, row)?;
        match self.insert(ctx, data) {
            Ok(new_row) => Ok(new_row),
            Err(e) => {
                if !deleted_before {
                    row.version().clear_deleted(ctx.xid());
                }
                Err(e)
            }
        }
    }

    /// Removes `row` from every index. Returns false if no index held it.
    pub fn purge(&self, row: &Row) -> Result<bool> {
        let mut removed = false;
        for index in &self.indexes {
            removed |= index.delete(&self.store, row)?;
        }
        Ok(removed)
    }

    /// Purges versions no transaction can read any more: versions whose
    /// creator aborted, and, while no transaction is running, versions whose
    /// deleter committed. Deletes by aborted transactions are cleared.
    /// Returns the number of versions purged.
    ///
    /// When no transaction is running the aborted ids seen at the start are
    /// then dropped from `manager`, since no version refers to them.
    pub fn vacuum(&self, manager: &TxnManager) -> Result<usize> {
        let Some(primary) = self.indexes.first() else {
            return Ok(0);
        };
        let quiet = !manager.has_active();
        let settled = manager.aborted_xids();

        let mut dead: Vec<Arc<Row>> = Vec::new();
        for row in primary.first_row(None, &self.store)? {
            let version = row.version();
            let xmax = version.xmax();
            if manager.is_aborted(version.xmin())
                || (quiet && xmax.is_some_and(|x| manager.is_committed(x)))
            {
                dead.push(row);
            } else if let Some(x) = xmax.filter(|&x| manager.is_aborted(x)) {
                version.clear_deleted(x);
            }
        }

        for row in &dead {
            self.purge(row)?;
        }
        if quiet {
            manager.forget_aborted(&settled);
        }
        debug!(table = %self.name, purged = dead.len(), "vacuum finished");
        Ok(dead.len())
    }

    /// Makes the node slots released by purges reusable. See
    /// [`MemoryStore::reclaim_nodes`].
    pub fn reclaim_nodes(&mut self) -> usize {
        self.store.reclaim_nodes()
    }

    /// Rows readable by `ctx`, in the order of the index at `position`.
    pub fn scan(&self, ctx: &TxnContext, position: usize) -> Result<Vec<Arc<Row>>> {
        let index = self.index(position)?;
        Ok(index.first_row(Some(ctx), &self.store)?.collect())
    }

    /// Rows readable by `ctx` whose leading key columns equal `key`, using
    /// the index at `position`.
    pub fn find(&self, ctx: &TxnContext, position: usize, key: &[Value]) -> Result<Vec<Arc<Row>>> {
        let index = self.index(position)?;
        let visibility: &dyn RowVisibility = ctx;
        let it = index.find_first_row(
            Some(visibility),
            &self.store,
            key,
            key.len(),
            MatchType::Equal,
            false,
        )?;
        let map = index.default_column_map();
        Ok(it
            .take_while(|row| {
                index
                    .comparator()
                    .compare_search(key, map, key.len(), row.data())
                    == Ordering::Equal
            })
            .collect())
    }

    /// Looks up a row version by id through the first index.
    pub fn get(&self, id: RowId) -> Result<Option<Arc<Row>>> {
        let primary = self.index(0)?;
        Ok(primary.first_row(None, &self.store)?.find(|row| row.id() == id))
    }
}
