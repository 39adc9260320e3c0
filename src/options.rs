//! # Parse Options
//!
//! This module provides [`ReaderOptions`], the immutable configuration record
//! assembled once per parse, and its builder.
//!
//! ## Usage
//!
//! ```ignore
//! use tapecsv::{ReaderOptions, LogicalType};
//!
//! let opts = ReaderOptions::builder()
//!     .delimiter(b';')
//!     .header_row(1)
//!     .pool(true)
//!     .column_type("id", LogicalType::Int64)
//!     .build()?;
//! ```
//!
//! ## Validation
//!
//! `build()` performs every configuration check before any parsing begins:
//!
//! - the delimiter must not be `\r`, `\n`, or `\0`
//! - `ignore_repeated` requires an explicitly specified delimiter
//! - a header row must come strictly before the data row
//! - the pool threshold must lie in `[0, 1]`
//! - a `date_format` string must contain at least one recognized token
//!
//! Errors carry stable prefixes (`invalid delimiter:`, `invalid type:`, ...)
//! so callers can distinguish configuration failures from parse failures.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use crate::config::{DEFAULT_MAX_WARNINGS, FORBIDDEN_DELIMITERS};
use crate::types::LogicalType;

/// Field delimiter specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delimiter {
    /// Detect by consistency-scoring the first rows.
    Auto,
    Byte(u8),
    /// Multi-byte delimiter, e.g. `"::"`.
    Multi(SmallVec<[u8; 8]>),
}

impl Delimiter {
    pub(crate) fn bytes(&self) -> Option<&[u8]> {
        match self {
            Delimiter::Auto => None,
            Delimiter::Byte(b) => Some(std::slice::from_ref(b)),
            Delimiter::Multi(bytes) => Some(bytes),
        }
    }
}

/// Header resolution strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderSpec {
    /// 1-based row number of the header row.
    Row(usize),
    /// Inclusive 1-based row range whose fields are concatenated with `_`.
    Rows(usize, usize),
    /// Caller-supplied column names; no header row exists in the data.
    Names(Vec<String>),
    /// No header: synthetic `Column1`, `Column2`, ... names.
    None,
}

/// User-pinned column types.
#[derive(Debug, Clone, Default)]
pub enum TypeSpec {
    #[default]
    Unspecified,
    /// One type for every column.
    All(LogicalType),
    /// By 0-based column index; `None` entries stay inferred.
    ByIndex(Vec<Option<LogicalType>>),
    /// By column name; unnamed columns stay inferred.
    ByName(Vec<(String, LogicalType)>),
}

/// Column projection: which columns survive into the result.
#[derive(Debug, Clone)]
pub enum Selection {
    Indices(Vec<usize>),
    Names(Vec<String>),
}

/// A compiled `date_format` token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DateFormat {
    pub items: Vec<FormatItem>,
    /// Which logical type the token groups produce.
    pub kind: LogicalType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormatItem {
    Year4,
    Month2,
    Day2,
    Hour2,
    Minute2,
    Second2,
    Literal(u8),
}

impl DateFormat {
    /// Compiles a format string of `yyyy mm dd HH MM SS` tokens and literal
    /// separators. Which of Date/Time/DateTime it yields follows from which
    /// token groups appear.
    pub(crate) fn compile(fmt: &str) -> Result<DateFormat> {
        let bytes = fmt.as_bytes();
        let mut items = Vec::new();
        let mut i = 0;
        let (mut has_date, mut has_time) = (false, false);

        while i < bytes.len() {
            let rest = &bytes[i..];
            if rest.starts_with(b"yyyy") {
                items.push(FormatItem::Year4);
                has_date = true;
                i += 4;
            } else if rest.starts_with(b"mm") {
                items.push(FormatItem::Month2);
                has_date = true;
                i += 2;
            } else if rest.starts_with(b"dd") {
                items.push(FormatItem::Day2);
                has_date = true;
                i += 2;
            } else if rest.starts_with(b"HH") {
                items.push(FormatItem::Hour2);
                has_time = true;
                i += 2;
            } else if rest.starts_with(b"MM") {
                items.push(FormatItem::Minute2);
                has_time = true;
                i += 2;
            } else if rest.starts_with(b"SS") {
                items.push(FormatItem::Second2);
                has_time = true;
                i += 2;
            } else {
                items.push(FormatItem::Literal(bytes[i]));
                i += 1;
            }
        }

        let kind = match (has_date, has_time) {
            (true, true) => LogicalType::DateTime,
            (true, false) => LogicalType::Date,
            (false, true) => LogicalType::Time,
            (false, false) => {
                bail!("invalid type: date format '{}' contains no date or time tokens", fmt)
            }
        };

        Ok(DateFormat { items, kind })
    }
}

/// Immutable per-parse configuration. Construct through [`ReaderOptions::builder`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub(crate) header: HeaderSpec,
    pub(crate) normalize_names: bool,
    pub(crate) data_row: Option<usize>,
    pub(crate) footer_skip: usize,
    pub(crate) limit: Option<usize>,
    pub(crate) transpose: bool,
    pub(crate) comment: Option<Vec<u8>>,
    pub(crate) use_mmap: bool,
    pub(crate) ignore_empty_lines: bool,
    /// `None` means decide automatically from input size.
    pub(crate) threaded: Option<bool>,

    pub(crate) sentinels: Vec<Vec<u8>>,
    pub(crate) delimiter: Delimiter,
    pub(crate) ignore_repeated: bool,
    pub(crate) open_quote: u8,
    pub(crate) close_quote: u8,
    pub(crate) escape: u8,
    pub(crate) decimal: u8,
    pub(crate) true_strings: Vec<Vec<u8>>,
    pub(crate) false_strings: Vec<Vec<u8>>,
    pub(crate) date_format: Option<DateFormat>,
    pub(crate) wspace1: u8,
    pub(crate) wspace2: u8,

    pub(crate) types: TypeSpec,
    pub(crate) type_map: Vec<(LogicalType, LogicalType)>,
    /// Pool threshold: 0 disables pooling; `cardinality > threshold × rows`
    /// promotes a pooled column to plain strings.
    pub(crate) pool: f64,
    pub(crate) strict: bool,
    pub(crate) silence_warnings: bool,
    pub(crate) max_warnings: usize,
    pub(crate) select: Option<Selection>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            header: HeaderSpec::Row(1),
            normalize_names: false,
            data_row: None,
            footer_skip: 0,
            limit: None,
            transpose: false,
            comment: None,
            use_mmap: true,
            ignore_empty_lines: true,
            threaded: None,
            sentinels: vec![Vec::new()],
            delimiter: Delimiter::Auto,
            ignore_repeated: false,
            open_quote: b'"',
            close_quote: b'"',
            escape: b'"',
            decimal: b'.',
            true_strings: ["true", "TRUE", "True"].map(|s| s.as_bytes().to_vec()).to_vec(),
            false_strings: ["false", "FALSE", "False"].map(|s| s.as_bytes().to_vec()).to_vec(),
            date_format: None,
            wspace1: b' ',
            wspace2: b'\t',
            types: TypeSpec::Unspecified,
            type_map: Vec::new(),
            pool: 0.0,
            strict: false,
            silence_warnings: false,
            max_warnings: DEFAULT_MAX_WARNINGS,
            select: None,
        }
    }
}

impl ReaderOptions {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder { opts: ReaderOptions::default(), date_format_src: None }
    }

    /// Whether field-internal whitespace trimming applies: disabled when the
    /// delimiter itself is a space or tab.
    pub(crate) fn trims_whitespace(&self) -> bool {
        match self.delimiter.bytes() {
            Some([b' ']) | Some([b'\t']) => false,
            _ => true,
        }
    }

    pub(crate) fn is_sentinel(&self, content: &[u8]) -> bool {
        self.sentinels.iter().any(|s| s.as_slice() == content)
    }
}

/// Builder for [`ReaderOptions`]. Every setter is infallible; `build()`
/// validates the assembled configuration.
#[derive(Debug, Clone)]
pub struct OptionsBuilder {
    opts: ReaderOptions,
    date_format_src: Option<String>,
}

impl OptionsBuilder {
    pub fn header_row(mut self, row: usize) -> Self {
        self.opts.header = if row == 0 { HeaderSpec::None } else { HeaderSpec::Row(row) };
        self
    }

    pub fn header_rows(mut self, first: usize, last: usize) -> Self {
        self.opts.header = HeaderSpec::Rows(first, last);
        self
    }

    pub fn header_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.opts.header = HeaderSpec::Names(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn no_header(mut self) -> Self {
        self.opts.header = HeaderSpec::None;
        self
    }

    pub fn normalize_names(mut self, yes: bool) -> Self {
        self.opts.normalize_names = yes;
        self
    }

    /// 1-based row number where data starts; overrides the computed start.
    pub fn data_row(mut self, row: usize) -> Self {
        self.opts.data_row = Some(row);
        self
    }

    pub fn footer_skip(mut self, rows: usize) -> Self {
        self.opts.footer_skip = rows;
        self
    }

    pub fn limit(mut self, rows: usize) -> Self {
        self.opts.limit = Some(rows);
        self
    }

    pub fn transpose(mut self, yes: bool) -> Self {
        self.opts.transpose = yes;
        self
    }

    pub fn comment<S: AsRef<[u8]>>(mut self, prefix: S) -> Self {
        self.opts.comment = Some(prefix.as_ref().to_vec());
        self
    }

    pub fn use_mmap(mut self, yes: bool) -> Self {
        self.opts.use_mmap = yes;
        self
    }

    pub fn ignore_empty_lines(mut self, yes: bool) -> Self {
        self.opts.ignore_empty_lines = yes;
        self
    }

    pub fn threaded(mut self, yes: bool) -> Self {
        self.opts.threaded = Some(yes);
        self
    }

    /// Replaces the sentinel set with a single missing string.
    pub fn missing_string<S: AsRef<[u8]>>(mut self, s: S) -> Self {
        self.opts.sentinels = vec![s.as_ref().to_vec()];
        self
    }

    pub fn missing_strings<I, S>(mut self, strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.opts.sentinels = strings.into_iter().map(|s| s.as_ref().to_vec()).collect();
        self
    }

    pub fn delimiter(mut self, byte: u8) -> Self {
        self.opts.delimiter = Delimiter::Byte(byte);
        self
    }

    pub fn delimiter_str<S: AsRef<[u8]>>(mut self, delim: S) -> Self {
        let bytes = delim.as_ref();
        self.opts.delimiter = if bytes.len() == 1 {
            Delimiter::Byte(bytes[0])
        } else {
            Delimiter::Multi(SmallVec::from_slice(bytes))
        };
        self
    }

    pub fn ignore_repeated(mut self, yes: bool) -> Self {
        self.opts.ignore_repeated = yes;
        self
    }

    /// Sets open quote, close quote, and escape to the same byte.
    pub fn quote(mut self, byte: u8) -> Self {
        self.opts.open_quote = byte;
        self.opts.close_quote = byte;
        self.opts.escape = byte;
        self
    }

    pub fn open_quote(mut self, byte: u8) -> Self {
        self.opts.open_quote = byte;
        self
    }

    pub fn close_quote(mut self, byte: u8) -> Self {
        self.opts.close_quote = byte;
        self
    }

    pub fn escape(mut self, byte: u8) -> Self {
        self.opts.escape = byte;
        self
    }

    pub fn decimal(mut self, byte: u8) -> Self {
        self.opts.decimal = byte;
        self
    }

    pub fn true_strings<I, S>(mut self, strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.opts.true_strings = strings.into_iter().map(|s| s.as_ref().to_vec()).collect();
        self
    }

    pub fn false_strings<I, S>(mut self, strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.opts.false_strings = strings.into_iter().map(|s| s.as_ref().to_vec()).collect();
        self
    }

    pub fn date_format<S: Into<String>>(mut self, fmt: S) -> Self {
        self.date_format_src = Some(fmt.into());
        self
    }

    /// One pinned type for every column.
    pub fn all_types(mut self, ty: LogicalType) -> Self {
        self.opts.types = TypeSpec::All(ty);
        self
    }

    /// Pinned types by 0-based column index.
    pub fn types_by_index(mut self, types: Vec<Option<LogicalType>>) -> Self {
        self.opts.types = TypeSpec::ByIndex(types);
        self
    }

    /// Pins one named column's type, accumulating across calls.
    pub fn column_type<S: Into<String>>(mut self, name: S, ty: LogicalType) -> Self {
        match &mut self.opts.types {
            TypeSpec::ByName(pairs) => pairs.push((name.into(), ty)),
            _ => self.opts.types = TypeSpec::ByName(vec![(name.into(), ty)]),
        }
        self
    }

    /// Rewrites every inferred occurrence of `from` to `to` at commit time.
    pub fn type_map(mut self, from: LogicalType, to: LogicalType) -> Self {
        self.opts.type_map.push((from, to));
        self
    }

    /// `true` pools every string column; a fraction sets the promotion
    /// threshold.
    pub fn pool(mut self, yes: bool) -> Self {
        self.opts.pool = if yes { 1.0 } else { 0.0 };
        self
    }

    pub fn pool_fraction(mut self, threshold: f64) -> Self {
        self.opts.pool = threshold;
        self
    }

    pub fn strict(mut self, yes: bool) -> Self {
        self.opts.strict = yes;
        self
    }

    pub fn silence_warnings(mut self, yes: bool) -> Self {
        self.opts.silence_warnings = yes;
        self
    }

    pub fn max_warnings(mut self, cap: usize) -> Self {
        self.opts.max_warnings = cap;
        self
    }

    pub fn select_indices(mut self, indices: Vec<usize>) -> Self {
        self.opts.select = Some(Selection::Indices(indices));
        self
    }

    pub fn select_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.opts.select = Some(Selection::Names(names.into_iter().map(Into::into).collect()));
        self
    }

    /// Validates and freezes the configuration.
    pub fn build(mut self) -> Result<ReaderOptions> {
        if let Some(bytes) = self.opts.delimiter.bytes() {
            ensure!(!bytes.is_empty(), "invalid delimiter: empty delimiter");
            for b in bytes {
                ensure!(
                    !FORBIDDEN_DELIMITERS.contains(b),
                    "invalid delimiter: byte {:#04x} cannot act as a field delimiter",
                    b
                );
            }
        } else if self.opts.ignore_repeated {
            bail!(
                "invalid delimiter: ignore_repeated requires an explicitly specified delimiter"
            );
        }

        if let (HeaderSpec::Row(h), Some(d)) = (&self.opts.header, self.opts.data_row) {
            ensure!(
                d > *h,
                "header row {} is not before data row {}",
                h,
                d
            );
        }
        if let (HeaderSpec::Rows(_, last), Some(d)) = (&self.opts.header, self.opts.data_row) {
            ensure!(
                d > *last,
                "header row {} is not before data row {}",
                last,
                d
            );
        }

        ensure!(
            (0.0..=1.0).contains(&self.opts.pool),
            "invalid type: pool threshold {} is outside [0, 1]",
            self.opts.pool
        );

        if let Some(fmt) = self.date_format_src.take() {
            self.opts.date_format = Some(DateFormat::compile(&fmt)?);
        }

        Ok(self.opts)
    }
}
