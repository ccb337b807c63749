//! Building and packing callback tables.
//!
//! Substrates register their callbacks into a [`TableBuilder`], one list per event. Packing
//! turns the lists into one cache-aligned array with a fixed stride, where every row holds the
//! callbacks of one event followed by at least one `None`:
//!
//! ```text
//! table[event * stride + slot]
//! ```
//!
//! The stride is 1, 2 or 4 slots, or a multiple of half a cache line, so rows do not straddle
//! more cache lines than necessary.

use std::fmt;

use crate::substrates::aligned::CacheAligned;
use crate::util::constants::CACHE_LINE_SIZE;
use crate::util::conversions::raw_align_up;

/// Callback lists of every event, in registration order.
#[derive(Clone, Debug)]
pub struct TableBuilder<C> {
    rows: Vec<Vec<C>>,
    nr_substrates: usize,
}

impl<C: Copy> TableBuilder<C> {
    /// A builder for `rows` events, to which at most `nr_substrates` substrates contribute.
    pub fn new(rows: usize, nr_substrates: usize) -> Self {
        TableBuilder {
            rows: (0..rows).map(|_| Vec::with_capacity(nr_substrates)).collect(),
            nr_substrates,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Append the callbacks of one substrate. `incoming[event]` is the callback for `event`.
    /// Entries beyond the number of rows are ignored.
    pub fn append_callbacks(&mut self, incoming: &[Option<C>]) {
        let nr_substrates = self.nr_substrates;
        for (row, callback) in self.rows.iter_mut().zip(incoming) {
            if let Some(callback) = callback {
                assert!(
                    row.len() < nr_substrates,
                    "more than {} substrates registered a callback for the same event",
                    nr_substrates
                );
                row.push(*callback);
            }
        }
    }

    pub fn row(&self, row: usize) -> &[C] {
        &self.rows[row]
    }

    /// Length of the longest row.
    pub fn max_row_len(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Copy the rows into a packed table.
    pub fn pack(&self) -> PackedTable<C> {
        let stride = packed_stride::<C>(self.max_row_len() + 1);
        let mut table = CacheAligned::new(self.rows.len() * stride, None);
        for (i, row) in self.rows.iter().enumerate() {
            let start = i * stride;
            for (slot, callback) in table[start..start + row.len()].iter_mut().zip(row) {
                *slot = Some(*callback);
            }
        }
        trace!(
            "packed {} rows with stride {} ({} bytes)",
            self.rows.len(),
            stride,
            table.len() * std::mem::size_of::<Option<C>>()
        );
        PackedTable {
            table,
            stride,
            rows: self.rows.len(),
        }
    }
}

/// Stride of a packed table whose longest row needs `slots` entries, terminator included.
pub fn packed_stride<C>(slots: usize) -> usize {
    let entry = std::mem::size_of::<Option<C>>();
    let half_cache_line = CACHE_LINE_SIZE / 2;
    match slots {
        1 | 2 | 4 => slots,
        _ if entry == 0 || half_cache_line % entry != 0 => slots,
        _ => raw_align_up(slots * entry, half_cache_line) / entry,
    }
}

/// A packed, `None`-terminated callback table.
pub struct PackedTable<C: Copy> {
    table: CacheAligned<Option<C>>,
    stride: usize,
    rows: usize,
}

impl<C: Copy> PackedTable<C> {
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The raw table, `rows * stride` entries.
    pub fn as_slice(&self) -> &[Option<C>] {
        &self.table
    }

    /// The callbacks of `row`, up to the terminator.
    pub fn row(&self, row: usize) -> &[Option<C>] {
        let start = row * self.stride;
        let slots = &self.table[start..start + self.stride];
        let len = slots.iter().position(Option::is_none).unwrap_or(self.stride);
        &slots[..len]
    }

    /// Iterate the callbacks of `row` in registration order.
    #[inline(always)]
    pub fn callbacks(&self, row: usize) -> impl Iterator<Item = C> + '_ {
        let start = row * self.stride;
        self.table[start..start + self.stride]
            .iter()
            .map_while(|callback| *callback)
    }
}

impl<C: Copy> fmt::Debug for PackedTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PackedTable")
            .field("rows", &self.rows)
            .field("stride", &self.stride)
            .finish()
    }
}
