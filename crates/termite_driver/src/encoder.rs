//! Row encoder: classifies each cell by storage class and appends slots.

use rusqlite::types::ValueRef;
use termite_term::{Pools, TermBuffer, TermSlot};

/// Encodes the rows of one result set into a term buffer.
///
/// Non-NULL cells emit one slot each. NULL cells emit nothing; their
/// positions go to the null pool and the row closes with a `SparseTuple`
/// of the full column count.
#[derive(Debug)]
pub struct ResultEncoder {
    column_count: u32,
    rows: u64,
    row_nulls: Vec<u32>,
}

impl ResultEncoder {
    pub fn new(column_count: usize) -> Self {
        Self {
            column_count: u32::try_from(column_count).unwrap_or(u32::MAX),
            rows: 0,
            row_nulls: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.column_count as usize
    }

    /// Rows closed so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Encode the current row of a stepping statement.
    pub fn encode_row(
        &mut self,
        row: &rusqlite::Row<'_>,
        buf: &mut TermBuffer,
        pools: &mut Pools,
    ) -> rusqlite::Result<()> {
        for col in 0..self.column_count() {
            let value = row.get_ref(col)?;
            self.push_cell(col, value, buf, pools);
        }
        self.close_row(buf, pools);
        Ok(())
    }

    /// Encode one row given as already-fetched cell values.
    pub fn encode_values<'v>(
        &mut self,
        values: impl IntoIterator<Item = ValueRef<'v>>,
        buf: &mut TermBuffer,
        pools: &mut Pools,
    ) {
        for (col, value) in values.into_iter().enumerate() {
            self.push_cell(col, value, buf, pools);
        }
        self.close_row(buf, pools);
    }

    fn push_cell(&mut self, col: usize, value: ValueRef<'_>, buf: &mut TermBuffer, pools: &mut Pools) {
        match value {
            ValueRef::Integer(i) => buf.push(TermSlot::Int(i)),
            ValueRef::Real(f) => buf.push(TermSlot::Float(pools.floats.push(f))),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                buf.push(TermSlot::Binary(pools.blobs.push(bytes)))
            }
            ValueRef::Null => self.row_nulls.push(col as u32),
        }
    }

    fn close_row(&mut self, buf: &mut TermBuffer, pools: &mut Pools) {
        if self.row_nulls.is_empty() {
            buf.push(TermSlot::Tuple(self.column_count));
        } else {
            let nulls = pools.nulls.push(std::mem::take(&mut self.row_nulls));
            buf.push(TermSlot::SparseTuple {
                arity: self.column_count,
                nulls,
            });
        }
        self.rows += 1;
    }
}
