//! # tapecsv Configuration Constants
//!
//! This module centralizes the reader's tuning constants, grouping
//! interdependent values together and documenting their relationships.
//!
//! ## Dependency Graph
//!
//! ```text
//! POSLEN_POS_BITS (45) ─> MAX_BUFFER_LEN (2^45 - 1 bytes ≈ 35 TB)
//!       │
//!       └─> POSLEN_LEN_BITS (16) ─> MAX_FIELD_LEN (65,535 bytes)
//!             A single field longer than MAX_FIELD_LEN cannot be encoded
//!             in a poslen slot and aborts the parse.
//!
//! INFERENCE_ROW_WINDOW (10)
//!       │
//!       ├─> delimiter consistency scoring samples this many rows
//!       │
//!       └─> the row-count estimate averages the byte length of this
//!           many rows; MIN_ROW_ESTIMATE floors the result so tiny
//!           samples never produce a zero-capacity tape
//!
//! PARALLEL_MIN_CELLS (5,000)
//!       │
//!       └─> estimated rows × columns below this stays single-threaded;
//!           must be comfortably above MIN_ROW_ESTIMATE so the threshold
//!           is meaningful
//! ```

/// Bits of a poslen slot dedicated to the byte offset into the source buffer.
pub const POSLEN_POS_BITS: u32 = 45;

/// Bits of a poslen slot dedicated to the field byte length.
pub const POSLEN_LEN_BITS: u32 = 16;

/// Largest source buffer the tape encoding can address.
pub const MAX_BUFFER_LEN: u64 = (1 << POSLEN_POS_BITS) - 1;

/// Largest single field the tape encoding can describe.
pub const MAX_FIELD_LEN: usize = (1 << POSLEN_LEN_BITS) - 1;

/// Number of leading rows sampled for delimiter inference and the
/// row-count estimate.
pub const INFERENCE_ROW_WINDOW: usize = 10;

/// Candidate delimiters tried during inference, in tiebreak order.
pub const DELIMITER_CANDIDATES: [u8; 5] = [b',', b'\t', b' ', b'|', b';'];

/// Bytes that can never act as a field delimiter.
pub const FORBIDDEN_DELIMITERS: [u8; 3] = [b'\r', b'\n', b'\0'];

/// Floor for the estimated row count, so initial tape capacity is never zero.
pub const MIN_ROW_ESTIMATE: usize = 8;

/// Extra rows added on every tape reallocation beyond the recomputed estimate.
pub const TAPE_GROWTH_PAD: usize = 10;

/// Minimum estimated cell count (rows × columns) before the parallel
/// coordinator activates.
pub const PARALLEL_MIN_CELLS: usize = 5_000;

/// How many successive newline candidates the chunk-boundary aligner probes
/// before giving up on a split point.
pub const BOUNDARY_PROBE_LIMIT: usize = 64;

/// Default cap on collected parse warnings before suppression kicks in.
pub const DEFAULT_MAX_WARNINGS: usize = 100;

/// UTF-8 byte-order mark consumed from the start of a source.
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
