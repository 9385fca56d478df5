//! Ordered record collections under a fixed column order.

use crate::value::{Record, Value};

/// An ordered sequence of records with a declared column order.
///
/// The column list is the contract: after the Normalize stage it equals the
/// schema's declared columns exactly and every downstream consumer (the
/// validator, the canonical serializer, the CSV writer) walks it in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl Dataset {
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Record] {
        &mut self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: Record) {
        self.rows.push(row);
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = Record>) {
        self.rows.extend(rows);
    }

    /// Replace the declared column order. Callers are responsible for
    /// ensuring rows carry matching fields; the validator enforces it.
    pub fn set_columns(&mut self, columns: Vec<String>) {
        self.columns = columns;
    }

    /// Project every row onto the declared column order: missing fields
    /// become `Null`, undeclared fields are dropped.
    pub fn align_to_columns(&mut self) {
        let columns = self.columns.clone();
        for row in &mut self.rows {
            let aligned: Record = columns
                .iter()
                .map(|c| (c.clone(), row.get(c).clone()))
                .collect();
            *row = aligned;
        }
    }

    /// Collect the non-null values of one column.
    #[must_use]
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        self.rows
            .iter()
            .map(|r| r.get(column))
            .filter(|v| !v.is_null())
            .collect()
    }

    /// Count nulls in one column.
    #[must_use]
    pub fn null_count(&self, column: &str) -> usize {
        self.rows.iter().filter(|r| r.get(column).is_null()).count()
    }

    /// Stable sort by the given keys, ascending, nulls last. With no keys
    /// this is a no-op; callers fall back to the primary identifier key
    /// before reaching here.
    pub fn sort_by_keys(&mut self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        self.rows.sort_by(|a, b| {
            for key in keys {
                let ord = a.get(key).cmp_for_sort(b.get(key));
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    }
}
