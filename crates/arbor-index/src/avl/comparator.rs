//! Key ordering for an AVL index.

use crate::row::Row;
use arbor_common::{ArborError, ColumnType, Result, Value};
use std::cmp::Ordering;

static NULL_VALUE: Value = Value::Null;

/// Column value at `pos`, treating a short row as NULL-padded.
#[inline]
fn column(data: &[Value], pos: usize) -> &Value {
    data.get(pos).unwrap_or(&NULL_VALUE)
}

/// Orders rows by the key columns of one index.
///
/// Column values are compared by their [`ColumnType`]; this type only
/// applies the per-column descending and nulls-last flags and the row-id
/// tie-break.
#[derive(Debug, Clone)]
pub struct IndexComparator {
    columns: Vec<usize>,
    types: Vec<ColumnType>,
    descending: Vec<bool>,
    nulls_last: Vec<bool>,
    simple_order: bool,
}

impl IndexComparator {
    /// Creates a comparator. All four slices must have the same, non-zero length.
    pub fn new(
        columns: Vec<usize>,
        types: Vec<ColumnType>,
        descending: Vec<bool>,
        nulls_last: Vec<bool>,
    ) -> Result<Self> {
        let n = columns.len();
        if n == 0 {
            return Err(ArborError::InvalidIndexDefinition(
                "index has no key columns".to_string(),
            ));
        }
        if types.len() != n || descending.len() != n || nulls_last.len() != n {
            return Err(ArborError::InvalidIndexDefinition(format!(
                "column arrays differ in length: columns={}, types={}, descending={}, nulls_last={}",
                n,
                types.len(),
                descending.len(),
                nulls_last.len()
            )));
        }

        let simple_order = !descending.iter().chain(nulls_last.iter()).any(|&f| f);

        Ok(Self {
            columns,
            types,
            descending,
            nulls_last,
            simple_order,
        })
    }

    /// Table column positions of the key, in key order.
    #[inline]
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    #[inline]
    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    #[inline]
    pub fn descending(&self) -> &[bool] {
        &self.descending
    }

    #[inline]
    pub fn nulls_last(&self) -> &[bool] {
        &self.nulls_last
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// True when no key column is descending or nulls-last.
    #[inline]
    pub fn is_simple_order(&self) -> bool {
        self.simple_order
    }

    /// Applies the descending and nulls-last flags of key column `j` to a
    /// raw comparison. The descending flip only applies between non-nulls,
    /// the nulls-last flip only when a NULL is involved.
    #[inline]
    fn orient(&self, j: usize, raw: Ordering, a: &Value, b: &Value) -> Ordering {
        if self.simple_order || raw == Ordering::Equal {
            return raw;
        }
        let nulls = a.is_null() || b.is_null();
        let mut ord = raw;
        if self.descending[j] && !nulls {
            ord = ord.reverse();
        }
        if self.nulls_last[j] && nulls {
            ord = ord.reverse();
        }
        ord
    }

    /// Compares two full table rows on the key columns, in index order.
    pub fn compare_row(&self, a: &[Value], b: &[Value]) -> Ordering {
        self.compare_from(a, b, 0)
    }

    fn compare_from(&self, a: &[Value], b: &[Value], start: usize) -> Ordering {
        for j in start..self.columns.len() {
            let pos = self.columns[j];
            let (va, vb) = (column(a, pos), column(b, pos));
            let raw = self.types[j].compare(va, vb);
            if raw != Ordering::Equal {
                return self.orient(j, raw, va, vb);
            }
        }
        Ordering::Equal
    }

    /// Compares a full row of this table with a row of another table whose
    /// matching columns are given by `row_col_map`. Uses the natural order of
    /// each column type: descending and nulls-last flags are ignored.
    pub fn compare_row_non_unique(
        &self,
        a: &[Value],
        b: &[Value],
        row_col_map: &[usize],
        field_count: usize,
    ) -> Ordering {
        let n = field_count.min(row_col_map.len()).min(self.columns.len());
        for j in 0..n {
            let ord = self.types[j].compare(column(a, self.columns[j]), column(b, row_col_map[j]));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// As [`compare_row_non_unique`](Self::compare_row_non_unique) with both
    /// rows laid out like this table.
    pub fn compare_row_prefix(&self, a: &[Value], b: &[Value], field_count: usize) -> Ordering {
        self.compare_row_non_unique(a, b, &self.columns, field_count)
    }

    /// Compares an incoming row with an existing one for insert or delete.
    /// Key columns from `start` on are compared in index order; when they
    /// tie and `use_row_id` is set, the row ids decide.
    pub fn compare_for_insert_or_delete(
        &self,
        new_row: &Row,
        existing: &Row,
        use_row_id: bool,
        start: usize,
    ) -> Ordering {
        let ord = self.compare_from(new_row.data(), existing.data(), start);
        if ord != Ordering::Equal || !use_row_id {
            return ord;
        }
        new_row.id().cmp(&existing.id())
    }

    /// Compares a search key with a node row in tree order. Search key
    /// column `j` is `rowdata[row_col_map[j]]`.
    pub fn compare_search(
        &self,
        rowdata: &[Value],
        row_col_map: &[usize],
        field_count: usize,
        node: &[Value],
    ) -> Ordering {
        let n = field_count.min(row_col_map.len()).min(self.columns.len());
        for j in 0..n {
            let ord = self.compare_value(j, column(rowdata, row_col_map[j]), node);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compares one value with key column `j` of a node row, in tree order.
    #[inline]
    pub fn compare_value(&self, j: usize, value: &Value, node: &[Value]) -> Ordering {
        let other = column(node, self.columns[j]);
        let raw = self.types[j].compare(value, other);
        self.orient(j, raw, value, other)
    }

    /// Returns true if any key column of the row is NULL.
    pub fn has_nulls(&self, data: &[Value]) -> bool {
        self.columns.iter().any(|&pos| column(data, pos).is_null())
    }
}
