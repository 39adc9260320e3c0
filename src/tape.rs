//! # Column Tape Storage
//!
//! The tape is the reader's materialized column representation: for every
//! column, a packed vector of 64-bit slots, two per row.
//!
//! ## Slot Layout
//!
//! ```text
//! slot 2i   (poslen):  ┌─63─┬─62─┬─61─┬──── 60..16 ────┬── 15..0 ──┐
//!                      │miss│int │esc │  byte offset   │  length   │
//!                      └────┴────┴────┴────────────────┴───────────┘
//! slot 2i+1 (value):   raw bits of the typed value or a pool ref
//! ```
//!
//! - **miss**: the cell is missing; the value slot is meaningless
//! - **int**: the value slot holds `i64` bits. Set for every integer cell as
//!   it is written, so a later promotion to float costs nothing: the float
//!   read path widens flagged slots on access instead of rewriting the tape
//! - **esc**: the field content contains escape sequences and must be
//!   un-escaped when materialized as a string
//!
//! The offset field is 45 bits (≈ 35 TB addressable) and the length field
//! 16 bits; both bounds are validated by the parser before packing, never
//! silently truncated.
//!
//! Value slots reinterpret bits across int/float/date/time without
//! conversion, so packing is explicit bit arithmetic throughout — a typed
//! struct cast would bake in one interpretation.
//!
//! ## Sidecar
//!
//! Columns not yet committed to strings carry a sidecar: a plain vector of
//! poslen words, one per row. When contradictory evidence forces a column
//! down to strings, the sidecar is copied over the tape's poslen slots so
//! earlier rows can be reconstructed from the source buffer, and the sidecar
//! is dropped. Sidecars are also dropped wholesale when parsing completes.
//!
//! ## Growth
//!
//! Tapes are allocated from the estimated row count. On overrun the owner
//! recomputes the estimate from the bytes still unparsed and reserves
//! `remaining-estimate + pad` more rows in one grow-and-copy step.

use crate::config::{MAX_FIELD_LEN, POSLEN_LEN_BITS, POSLEN_POS_BITS, TAPE_GROWTH_PAD};

pub(crate) const MISSING_BIT: u64 = 1 << 63;
pub(crate) const WAS_INT_BIT: u64 = 1 << 62;
pub(crate) const ESCAPED_BIT: u64 = 1 << 61;

const POS_SHIFT: u32 = POSLEN_LEN_BITS;
const LEN_MASK: u64 = (1 << POSLEN_LEN_BITS) - 1;
const POS_MASK: u64 = (1 << POSLEN_POS_BITS) - 1;

/// Packs a poslen slot. `pos` and `len` must already be bounds-checked.
#[inline]
pub(crate) fn pack_poslen(pos: usize, len: usize, flag_bits: u64) -> u64 {
    debug_assert!(pos as u64 <= POS_MASK);
    debug_assert!(len <= MAX_FIELD_LEN);
    flag_bits | ((pos as u64) << POS_SHIFT) | len as u64
}

#[inline]
pub(crate) fn poslen_pos(slot: u64) -> usize {
    ((slot >> POS_SHIFT) & POS_MASK) as usize
}

#[inline]
pub(crate) fn poslen_len(slot: u64) -> usize {
    (slot & LEN_MASK) as usize
}

#[inline]
pub(crate) fn is_missing(slot: u64) -> bool {
    slot & MISSING_BIT != 0
}

#[inline]
pub(crate) fn was_int(slot: u64) -> bool {
    slot & WAS_INT_BIT != 0
}

#[inline]
pub(crate) fn is_escaped(slot: u64) -> bool {
    slot & ESCAPED_BIT != 0
}

/// One column's packed storage: two slots per row.
#[derive(Debug, Default)]
pub(crate) struct ColumnTape {
    slots: Vec<u64>,
}

impl ColumnTape {
    pub fn with_row_capacity(rows: usize) -> ColumnTape {
        ColumnTape { slots: Vec::with_capacity(rows * 2) }
    }

    pub fn rows(&self) -> usize {
        self.slots.len() / 2
    }

    #[inline]
    pub fn push(&mut self, poslen: u64, value: u64) {
        self.slots.push(poslen);
        self.slots.push(value);
    }

    #[inline]
    pub fn poslen(&self, row: usize) -> u64 {
        self.slots[row * 2]
    }

    #[inline]
    pub fn value(&self, row: usize) -> u64 {
        self.slots[row * 2 + 1]
    }

    #[inline]
    pub fn set_poslen(&mut self, row: usize, poslen: u64) {
        self.slots[row * 2] = poslen;
    }

    /// Grow-and-copy to `rows + additional_rows` capacity.
    pub fn reserve_rows(&mut self, additional_rows: usize) {
        self.slots.reserve_exact((additional_rows + TAPE_GROWTH_PAD) * 2);
    }

    pub fn slots(&self) -> &[u64] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [u64] {
        &mut self.slots
    }

    /// Pre-extends with `rows` placeholder rows (used by the merge step,
    /// which then copies worker slices into place).
    pub fn resize_rows(&mut self, rows: usize) {
        self.slots.resize(rows * 2, 0);
    }
}

/// Per-column poslen history for columns that may still fall back to
/// strings. Dropped at promotion or parse completion.
#[derive(Debug, Default)]
pub(crate) struct Sidecar {
    poslens: Vec<u64>,
}

impl Sidecar {
    pub fn with_row_capacity(rows: usize) -> Sidecar {
        Sidecar { poslens: Vec::with_capacity(rows) }
    }

    #[inline]
    pub fn push(&mut self, poslen: u64) {
        self.poslens.push(poslen);
    }

    pub fn reserve_rows(&mut self, additional_rows: usize) {
        self.poslens.reserve_exact(additional_rows + TAPE_GROWTH_PAD);
    }

    /// Copies the recorded poslen of every prior row over the tape's poslen
    /// slots, making those rows readable as strings.
    pub fn restore_into(&self, tape: &mut ColumnTape) {
        for (row, &poslen) in self.poslens.iter().enumerate() {
            tape.set_poslen(row, poslen);
        }
    }
}
