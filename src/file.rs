//! # Parsed File and Column Views
//!
//! [`File`] is the finished parse result: it owns the retained source
//! buffer, the per-column tapes, the ref tables of pooled columns, and the
//! collected warnings. All reads are zero-copy where the encoding allows —
//! string cells borrow straight from the buffer unless they carried escape
//! sequences.
//!
//! ## Read Path
//!
//! The type branch happens once per column: [`File::column`] resolves the
//! final type code into a typed view ([`Column`]), and indexing a typed
//! view is branch-free apart from the missing check.
//!
//! ```ignore
//! let file = tapecsv::parse_path("data.csv", ReaderOptions::default())?;
//! match file.column(0) {
//!     Column::Int64(ints) => {
//!         for v in ints.iter() { /* Option<i64> per row */ }
//!     }
//!     _ => {}
//! }
//! ```
//!
//! ## Orchestration
//!
//! [`File::parse`] runs the whole pipeline: load, layout detection, the
//! single-threaded or parallel parse, pool flattening, and column
//! projection. Configuration errors surface before the first data byte is
//! touched; a fatal parse error never returns a partial file.

use std::borrow::Cow;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;

use crate::config::PARALLEL_MIN_CELLS;
use crate::layout;
use crate::options::{ReaderOptions, Selection};
use crate::parallel;
use crate::pool::StringPool;
use crate::reader::{self, ParseContext, ParseOutput, SharedTypes};
use crate::source::{self, Source, SourceBuffer};
use crate::tape::{self, ColumnTape};
use crate::types::{ColumnType, LogicalType};
use crate::value::Value;

/// A non-fatal parse diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// 1-based data row, 0 when the warning is not tied to a row.
    pub row: usize,
    /// 0-based column index, when the warning is tied to one.
    pub col: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.row, self.col) {
            (0, _) => write!(f, "{}", self.message),
            (row, None) => write!(f, "row {}: {}", row, self.message),
            (row, Some(col)) => write!(f, "row {}, column {}: {}", row, col + 1, self.message),
        }
    }
}

/// A parsed delimited file: typed, random-access columns over the tape.
pub struct File {
    name: String,
    names: Vec<String>,
    types: Vec<ColumnType>,
    rows: usize,
    buffer: SourceBuffer,
    escape: u8,
    tapes: Vec<ColumnTape>,
    refs: Vec<Option<Vec<Box<[u8]>>>>,
    name_index: HashMap<String, usize>,
    warnings: Vec<ParseWarning>,
}

impl File {
    /// Parses `source` with `options` into a finished file.
    pub fn parse(source: impl Into<Source>, options: ReaderOptions) -> Result<File> {
        let opts = options;
        let loaded = source::load(source.into(), &opts)?;
        let buf = &loaded.buffer[..];
        let (start, end) = (loaded.start, loaded.end.max(loaded.start));

        if opts.transpose {
            let delim =
                layout::resolve_delimiter(buf, start, end, &opts, loaded.extension.as_deref());
            let (names, types, output) =
                reader::parse_transposed(buf, start, end, &opts, &delim, |names| {
                    reader::initial_types(&opts, names)
                })?;
            return finalize(loaded, names, Vec::new(), &types, output, &opts);
        }

        if start >= end {
            return finalize(
                loaded,
                Vec::new(),
                Vec::new(),
                &SharedTypes::new(Vec::new()),
                empty_output(),
                &opts,
            );
        }

        let detected = layout::detect(buf, start, end, &opts, loaded.extension.as_deref())?;
        let layout::Layout { names, data_start, delimiter, ncols, row_estimate, warnings } =
            detected;

        let types = SharedTypes::new(reader::initial_types(&opts, &names)?);
        let ctx = ParseContext {
            buf,
            opts: &opts,
            delim: &delimiter,
            ncols,
            row_estimate,
            types: &types,
        };

        if ncols == 0 || data_start >= end {
            return finalize(loaded, names, warnings, &types, empty_output(), &opts);
        }

        let output = match decide_threads(&opts, row_estimate, ncols) {
            Some(nthreads) => match parallel::parse_parallel(&ctx, data_start, end, nthreads)? {
                Some(output) => output,
                // No row-aligned split exists (e.g. one huge quoted region).
                None => reader::parse_slice(&ctx, data_start, end, opts.limit)?,
            },
            None => reader::parse_slice(&ctx, data_start, end, opts.limit)?,
        };

        finalize(loaded, names, warnings, &types, output, &opts)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.names.len()
    }

    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    /// The typed view of column `col`. The type branch happens here, once.
    pub fn column(&self, col: usize) -> Column<'_> {
        let ct = self.types[col];
        let slots = self.tapes[col].slots();
        match (ct.kind, ct.pooled) {
            (LogicalType::Int64, _) => Column::Int64(Int64Col { slots }),
            (LogicalType::Float64, _) => Column::Float64(Float64Col { slots }),
            (LogicalType::Date, _) => Column::Date(DateCol { slots }),
            (LogicalType::DateTime, _) => Column::DateTime(DateTimeCol { slots }),
            (LogicalType::Time, _) => Column::Time(TimeCol { slots }),
            (LogicalType::Bool, _) => Column::Bool(BoolCol { slots }),
            (LogicalType::String, true) => Column::Pooled(PooledCol {
                slots,
                refs: self.refs[col].as_deref().unwrap_or(&[]),
            }),
            (LogicalType::String, false) => Column::Str(StrCol {
                slots,
                buffer: &self.buffer,
                escape: self.escape,
            }),
        }
    }

    pub fn column_by_name(&self, name: &str) -> Option<Column<'_>> {
        self.name_index.get(name).map(|&i| self.column(i))
    }

    /// One cell as a [`Value`], honoring the missing flag.
    pub fn get(&self, col: usize, row: usize) -> Value<'_> {
        self.column(col).value(row)
    }

    /// The ref table of a pooled column: `refs[r - 1]` is the string for
    /// ref `r`.
    pub fn pool_refs(&self, col: usize) -> Option<&[Box<[u8]>]> {
        self.refs[col].as_deref()
    }

    /// Iterates rows as vectors of values. Convenience path; columnar
    /// access through [`File::column`] is the fast one.
    pub fn rows_iter(&self) -> impl Iterator<Item = Vec<Value<'_>>> + '_ {
        (0..self.rows).map(move |r| (0..self.cols()).map(move |c| self.get(c, r)).collect())
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("rows", &self.rows)
            .field("cols", &self.names.len())
            .field("names", &self.names)
            .field("types", &self.types)
            .finish()
    }
}

fn empty_output() -> ParseOutput {
    ParseOutput {
        tapes: Vec::new(),
        pools: Vec::new(),
        rows: 0,
        warnings: Vec::new(),
        truncated_warnings: false,
    }
}

/// Whether the parallel coordinator should run, and with how many workers.
fn decide_threads(opts: &ReaderOptions, row_estimate: usize, ncols: usize) -> Option<usize> {
    if opts.threaded == Some(false) || opts.transpose || opts.limit.is_some() {
        return None;
    }
    let nthreads = std::thread::available_parallelism().map(usize::from).unwrap_or(1);
    if nthreads < 2 || row_estimate <= nthreads {
        return None;
    }
    if opts.threaded != Some(true) && row_estimate * ncols < PARALLEL_MIN_CELLS {
        return None;
    }
    Some(nthreads)
}

/// Assembles the public [`File`] from a finished parse.
fn finalize(
    loaded: source::LoadedSource,
    names: Vec<String>,
    mut warnings: Vec<ParseWarning>,
    types: &SharedTypes,
    mut output: ParseOutput,
    opts: &ReaderOptions,
) -> Result<File> {
    let codes = types.snapshot();
    let mut col_types: Vec<ColumnType> = codes.iter().map(|&c| ColumnType::from_code(c)).collect();

    // Flatten pool maps into ref tables; the maps are gone after this.
    let mut refs: Vec<Option<Vec<Box<[u8]>>>> = Vec::with_capacity(names.len());
    for col in 0..names.len() {
        let pool: Option<StringPool> = output.pools.get_mut(col).and_then(Option::take);
        match (col_types.get(col), pool) {
            (Some(ct), Some(pool)) if ct.pooled => refs.push(Some(pool.into_refs())),
            (Some(ct), None) if ct.pooled => refs.push(Some(Vec::new())),
            _ => refs.push(None),
        }
    }

    warnings.extend(output.warnings.drain(..));
    if warnings.len() > opts.max_warnings {
        warnings.truncate(opts.max_warnings);
        output.truncated_warnings = true;
    }
    if output.truncated_warnings {
        warnings.push(ParseWarning {
            row: 0,
            col: None,
            message: "further warnings suppressed".to_string(),
        });
    }
    if opts.silence_warnings {
        warnings.clear();
    }

    let mut tapes = output.tapes;
    if tapes.len() < names.len() {
        // Columns that never saw a cell (empty input) still get a tape.
        tapes.resize_with(names.len(), ColumnTape::default);
    }

    // Column projection: drop unselected columns from the result.
    let mut names = names;
    if let Some(selection) = &opts.select {
        let keep = selection_mask(selection, &names)?;
        retain_by_mask(&mut names, &keep);
        retain_by_mask(&mut col_types, &keep);
        retain_by_mask(&mut tapes, &keep);
        retain_by_mask(&mut refs, &keep);
    }

    let mut name_index = HashMap::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        name_index.entry(name.clone()).or_insert(i);
    }

    Ok(File {
        name: loaded.name,
        names,
        types: col_types,
        rows: output.rows,
        buffer: loaded.buffer,
        escape: opts.escape,
        tapes,
        refs,
        name_index,
        warnings,
    })
}

fn selection_mask(selection: &Selection, names: &[String]) -> Result<Vec<bool>> {
    let mut keep = vec![false; names.len()];
    match selection {
        Selection::Indices(indices) => {
            for &i in indices {
                ensure!(i < names.len(), "no column at index {} to select", i);
                keep[i] = true;
            }
        }
        Selection::Names(wanted) => {
            for name in wanted {
                match names.iter().position(|n| n == name) {
                    Some(i) => keep[i] = true,
                    None => bail!("no column named '{}' to select", name),
                }
            }
        }
    }
    Ok(keep)
}

fn retain_by_mask<T>(items: &mut Vec<T>, keep: &[bool]) {
    let mut i = 0;
    items.retain(|_| {
        let kept = keep[i];
        i += 1;
        kept
    });
}

// ── Typed column views ─────────────────────────────────────────────

/// A typed, random-access view of one column.
pub enum Column<'a> {
    Int64(Int64Col<'a>),
    Float64(Float64Col<'a>),
    Date(DateCol<'a>),
    DateTime(DateTimeCol<'a>),
    Time(TimeCol<'a>),
    Bool(BoolCol<'a>),
    Str(StrCol<'a>),
    Pooled(PooledCol<'a>),
}

impl<'a> Column<'a> {
    pub fn len(&self) -> usize {
        match self {
            Column::Int64(c) => c.slots.len() / 2,
            Column::Float64(c) => c.slots.len() / 2,
            Column::Date(c) => c.slots.len() / 2,
            Column::DateTime(c) => c.slots.len() / 2,
            Column::Time(c) => c.slots.len() / 2,
            Column::Bool(c) => c.slots.len() / 2,
            Column::Str(c) => c.slots.len() / 2,
            Column::Pooled(c) => c.slots.len() / 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One cell as a [`Value`].
    pub fn value(&self, row: usize) -> Value<'a> {
        match self {
            Column::Int64(c) => c.get(row).map_or(Value::Missing, Value::Int),
            Column::Float64(c) => c.get(row).map_or(Value::Missing, Value::Float),
            Column::Date(c) => c.get(row).map_or(Value::Missing, Value::Date),
            Column::DateTime(c) => c.get(row).map_or(Value::Missing, Value::DateTime),
            Column::Time(c) => c.get(row).map_or(Value::Missing, Value::Time),
            Column::Bool(c) => c.get(row).map_or(Value::Missing, Value::Bool),
            Column::Str(c) => c.get(row).map_or(Value::Missing, Value::Str),
            Column::Pooled(c) => c.get(row).map_or(Value::Missing, Value::Str),
        }
    }
}

macro_rules! fixed_width_view {
    ($name:ident, $ty:ty, $decode:expr) => {
        pub struct $name<'a> {
            slots: &'a [u64],
        }

        impl<'a> $name<'a> {
            pub fn len(&self) -> usize {
                self.slots.len() / 2
            }

            pub fn is_empty(&self) -> bool {
                self.slots.is_empty()
            }

            /// `None` is a missing cell.
            #[inline]
            pub fn get(&self, row: usize) -> Option<$ty> {
                let poslen = self.slots[row * 2];
                if tape::is_missing(poslen) {
                    return None;
                }
                let decode: fn(u64, u64) -> $ty = $decode;
                Some(decode(self.slots[row * 2 + 1], poslen))
            }

            pub fn iter(&self) -> impl Iterator<Item = Option<$ty>> + '_ {
                (0..self.len()).map(move |r| self.get(r))
            }
        }
    };
}

fixed_width_view!(Int64Col, i64, |v, _| v as i64);
// A float column may hold rows written before an integer column promoted;
// those carry the was-int flag and widen on access.
fixed_width_view!(Float64Col, f64, |v, poslen| if tape::was_int(poslen) {
    v as i64 as f64
} else {
    f64::from_bits(v)
});
fixed_width_view!(DateCol, i32, |v, _| v as i64 as i32);
fixed_width_view!(DateTimeCol, i64, |v, _| v as i64);
fixed_width_view!(TimeCol, i64, |v, _| v as i64);
fixed_width_view!(BoolCol, bool, |v, _| v != 0);

/// Plain string column: cells materialize from the retained buffer.
pub struct StrCol<'a> {
    slots: &'a [u64],
    buffer: &'a [u8],
    escape: u8,
}

impl<'a> StrCol<'a> {
    pub fn len(&self) -> usize {
        self.slots.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `None` is a missing cell. Borrows from the buffer unless the field
    /// carried escapes (or invalid UTF-8 forces a rewrite).
    pub fn get(&self, row: usize) -> Option<Cow<'a, str>> {
        let poslen = self.slots[row * 2];
        if tape::is_missing(poslen) {
            return None;
        }
        let pos = tape::poslen_pos(poslen);
        let content = &self.buffer[pos..pos + tape::poslen_len(poslen)];
        if tape::is_escaped(poslen) {
            let mut out = Vec::with_capacity(content.len());
            crate::field::unescape(content, self.escape, &mut out);
            Some(Cow::Owned(String::from_utf8_lossy(&out).into_owned()))
        } else {
            Some(String::from_utf8_lossy(content))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<Cow<'a, str>>> + '_ {
        (0..self.len()).map(move |r| self.get(r))
    }
}

/// Pooled string column: value slots hold refs into the ref table.
pub struct PooledCol<'a> {
    slots: &'a [u64],
    refs: &'a [Box<[u8]>],
}

impl<'a> PooledCol<'a> {
    pub fn len(&self) -> usize {
        self.slots.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `None` is a missing cell (ref 0 is reserved for missing).
    pub fn get(&self, row: usize) -> Option<Cow<'a, str>> {
        let poslen = self.slots[row * 2];
        if tape::is_missing(poslen) {
            return None;
        }
        let r = self.slots[row * 2 + 1] as usize;
        Some(String::from_utf8_lossy(&self.refs[r - 1]))
    }

    /// The ref of one cell; 0 means missing.
    pub fn get_ref(&self, row: usize) -> u64 {
        let poslen = self.slots[row * 2];
        if tape::is_missing(poslen) {
            0
        } else {
            self.slots[row * 2 + 1]
        }
    }

    pub fn refs(&self) -> &'a [Box<[u8]>] {
        self.refs
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<Cow<'a, str>>> + '_ {
        (0..self.len()).map(move |r| self.get(r))
    }
}
