//! # tapecsv - High-Performance Delimited Text Reader
//!
//! tapecsv ingests CSV and related formats (TSV, whitespace-separated,
//! arbitrary single- or multi-byte delimiters) and produces a columnar,
//! typed, random-access table. This Rust implementation prioritizes:
//!
//! - **Zero-copy reads**: string cells borrow straight from the retained
//!   (possibly memory-mapped) input buffer
//! - **One allocation shape**: every column is a packed tape of two 64-bit
//!   slots per row, whatever its type
//! - **Scalable ingest**: the input is split at row boundaries and parsed
//!   by parallel workers that merge into one consistent result
//!
//! ## Quick Start
//!
//! ```ignore
//! use tapecsv::{parse_path, Column, ReaderOptions};
//!
//! let file = parse_path("trades.csv", ReaderOptions::default())?;
//!
//! println!("{} rows × {} cols", file.rows(), file.cols());
//! for (name, ty) in file.names().iter().zip(file.types()) {
//!     println!("  {name}: {ty}");
//! }
//!
//! if let Some(Column::Float64(prices)) = file.column_by_name("price") {
//!     let total: f64 = prices.iter().flatten().sum();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │         Public API (File)             │
//! ├───────────────────────────────────────┤
//! │  Column Views (typed, random access)  │
//! ├───────────────────────────────────────┤
//! │ Parallel Coordinator │ Slice Parser   │
//! ├──────────────────────┴────────────────┤
//! │  Type Inference & Promotion Lattice   │
//! ├───────────────────────────────────────┤
//! │   Tape Builder │ String Pool          │
//! ├───────────────────────────────────────┤
//! │  Field Parser (quotes, dates, bools)  │
//! ├───────────────────────────────────────┤
//! │  Layout Detector (header, delimiter)  │
//! ├───────────────────────────────────────┤
//! │  Source Loader (mmap / bytes / pipe)  │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Type Inference
//!
//! Column types are discovered cell by cell: Int64, Float64, Date,
//! DateTime, Time, Bool, then String. Contradictory evidence promotes a
//! column up a fixed lattice (Int64 widens to Float64; anything falls back
//! to String) and never down. Missingness is an orthogonal flag driven by
//! a configurable sentinel set. User-pinned types switch inference off per
//! column.
//!
//! ## Module Overview
//!
//! - `file`: parse orchestration, the [`File`] result, typed column views
//! - `reader`: the row loop, cell commit, and promotion machinery
//! - `parallel`: chunk planning, worker fan-out, tape and pool merging
//! - `layout`: header/data-start resolution and delimiter inference
//! - `field`: single-field scanning and typed content parsing
//! - `tape`: the packed two-slots-per-row column storage
//! - `pool`: string deduplication to dense refs
//! - `source`: path/bytes/reader/sub-process loading, BOM, footer
//! - `options`: the per-parse configuration record and its builder
//! - [`config`]: centralized tuning constants

pub mod config;
mod field;
mod file;
mod layout;
mod options;
mod parallel;
mod pool;
mod reader;
mod source;
mod tape;
mod types;
mod value;

pub use file::{
    BoolCol, Column, DateCol, DateTimeCol, File, Float64Col, Int64Col, ParseWarning, PooledCol,
    StrCol, TimeCol,
};
pub use options::{Delimiter, HeaderSpec, OptionsBuilder, ReaderOptions, Selection, TypeSpec};
pub use source::Source;
pub use types::{ColumnType, LogicalType};
pub use value::Value;

use eyre::Result;
use std::io::Read;
use std::path::Path;

/// Parses a file on disk.
pub fn parse_path<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<File> {
    File::parse(Source::path(path), options)
}

/// Parses an in-memory byte buffer.
pub fn parse_bytes<B: Into<Vec<u8>>>(bytes: B, options: ReaderOptions) -> Result<File> {
    File::parse(Source::bytes(bytes), options)
}

/// Reads a byte stream to its end, then parses it.
pub fn parse_reader<R: Read + Send + 'static>(reader: R, options: ReaderOptions) -> Result<File> {
    File::parse(Source::reader(reader), options)
}
