//! A toy tabular store indexed by the B+ tree.
//!
//! [`Table`] holds a comma-separated table in memory: a header of attribute
//! names plus a flat ordered list of string tuples, addressed by 1-based
//! [`TupleId`]. [`TableIndex`] pairs a table with two chosen key columns and
//! maintains a [`BPlusTree`] from the resulting composite keys to tuple ids.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::{debug, info};

use crate::BPlusTree;

/// 1-based position of a tuple within its table.
pub type TupleId = usize;

/// A two-column index key; tuples compare lexicographically by component.
pub type CompositeKey = (String, String);

/// Errors from the store layer. Tree lookups never produce these — absence
/// is an empty result — only I/O and id/column validation do.
#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    /// The source had no header line to read attribute names from.
    MissingHeader,
    /// A data row had a different arity than the header.
    RaggedRow { line: usize, expected: usize, found: usize },
    /// A key column number outside the table's width.
    ColumnOutOfRange { column: usize, width: usize },
    /// A tuple id outside `1..=rows`.
    TupleOutOfRange { id: TupleId, rows: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(formatter, "table source error: {error}"),
            Self::MissingHeader => write!(formatter, "table source is empty, expected a header line"),
            Self::RaggedRow { line, expected, found } => {
                write!(formatter, "row on line {line} has {found} fields, header has {expected}")
            }
            Self::ColumnOutOfRange { column, width } => {
                write!(formatter, "key column {column} out of range for a table of width {width}")
            }
            Self::TupleOutOfRange { id, rows } => {
                write!(formatter, "tuple id {id} out of range for a table of {rows} rows")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

/// An in-memory comma-separated table: attribute names plus data rows.
pub struct Table {
    attributes: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Parses a table from a reader. The first line is the header; every
    /// following non-blank line is one tuple and must match the header's
    /// arity. No quoting or escaping — fields are split on every comma.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, StoreError> {
        let mut lines = reader.lines();
        let header = lines.next().ok_or(StoreError::MissingHeader)??;
        let attributes: Vec<String> = header.trim().split(',').map(str::to_owned).collect();

        let mut rows = Vec::new();
        for (offset, line) in lines.enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row: Vec<String> = line.split(',').map(str::to_owned).collect();
            if row.len() != attributes.len() {
                return Err(StoreError::RaggedRow {
                    line: offset + 2,
                    expected: attributes.len(),
                    found: row.len(),
                });
            }
            rows.push(row);
        }

        Ok(Self { attributes, rows })
    }

    /// Reads a table from a file on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The tuple with the given 1-based id.
    pub fn tuple(&self, id: TupleId) -> Result<&[String], StoreError> {
        if id == 0 || id > self.rows.len() {
            return Err(StoreError::TupleOutOfRange {
                id,
                rows: self.rows.len(),
            });
        }
        Ok(&self.rows[id - 1])
    }
}

/// A table together with a B+ tree index over two of its columns.
///
/// The index maps each `(first column, second column)` pair to the ids of
/// the tuples carrying it; duplicate keys across tuples accumulate in one
/// bucket in insertion order.
pub struct TableIndex {
    table: Table,
    key_columns: (usize, usize),
    tree: BPlusTree<CompositeKey, TupleId>,
}

impl TableIndex {
    /// Builds an empty index over the given 0-based key columns.
    pub fn new(table: Table, first: usize, second: usize) -> Result<Self, StoreError> {
        let width = table.attributes.len();
        for column in [first, second] {
            if column >= width {
                return Err(StoreError::ColumnOutOfRange { column, width });
            }
        }
        Ok(Self {
            table,
            key_columns: (first, second),
            tree: BPlusTree::default(),
        })
    }

    #[must_use]
    pub fn table(&self) -> &Table {
        &self.table
    }

    #[must_use]
    pub fn tree(&self) -> &BPlusTree<CompositeKey, TupleId> {
        &self.tree
    }

    /// The composite key of the tuple with the given id.
    pub fn key_of(&self, id: TupleId) -> Result<CompositeKey, StoreError> {
        let tuple = self.table.tuple(id)?;
        Ok((tuple[self.key_columns.0].clone(), tuple[self.key_columns.1].clone()))
    }

    /// Rebuilds the index over the inclusive tuple-id range `start..=end`,
    /// discarding whatever was indexed before. Returns the number of tuples
    /// indexed; an inverted range loads nothing.
    pub fn load(&mut self, start: TupleId, end: TupleId) -> Result<usize, StoreError> {
        let rows = self.table.len();
        if start == 0 {
            return Err(StoreError::TupleOutOfRange { id: start, rows });
        }
        if end > rows {
            return Err(StoreError::TupleOutOfRange { id: end, rows });
        }

        self.tree = BPlusTree::new(self.tree.order());
        for id in start..=end {
            let key = self.key_of(id)?;
            self.tree.insert(key, id);
        }

        let loaded = self.tree.len();
        info!("rebuilt index over tuples {start}..={end}, {loaded} indexed");
        Ok(loaded)
    }

    /// Indexes the tuple with the given id.
    pub fn insert(&mut self, id: TupleId) -> Result<(), StoreError> {
        let key = self.key_of(id)?;
        debug!("indexing tuple #{id} under {key:?}");
        self.tree.insert(key, id);
        Ok(())
    }

    /// Removes the tuple with the given id from the index. Returns `false`
    /// when the tuple was not indexed.
    pub fn delete(&mut self, id: TupleId) -> Result<bool, StoreError> {
        let key = self.key_of(id)?;
        let removed = self.tree.delete(&key, &id);
        debug!("unindexing tuple #{id} under {key:?}: {removed}");
        Ok(removed)
    }

    /// Ids of the tuples indexed under `key`, empty when none are.
    #[must_use]
    pub fn search(&self, key: &CompositeKey) -> &[TupleId] {
        self.tree.find(key)
    }

    /// Scans indexed entries with keys in `low..=high`, ascending.
    pub fn range_search(&self, low: CompositeKey, high: CompositeKey) -> crate::RangeScan<'_, CompositeKey, TupleId> {
        self.tree.find_range(low, high)
    }
}
