//! # Layout Detection
//!
//! Before any cell is parsed, the layout detector resolves where the table
//! actually lives inside the byte window: the header row (if any), the
//! first data row, the field delimiter, the column names, and an estimated
//! row count for tape pre-allocation.
//!
//! ## Delimiter Inference
//!
//! When the caller did not supply a delimiter, the detector scores each
//! candidate from `,` `\t` ` ` `|` `;` by tokenizing the first window of
//! rows and measuring how consistent the per-row field count is. The winner
//! is the candidate with the highest modal frequency; ties break toward the
//! higher field count, then candidate order. Candidates whose modal field
//! count is 1 rank below every candidate that actually splits rows — a
//! delimiter that never matches is perfectly consistent and perfectly
//! useless. Paths ending in `.tsv` and `.wsv` preset tab and space.
//!
//! ## Header Resolution
//!
//! Row advancement respects quoted fields (embedded newlines are content),
//! skips comment-prefixed lines, and optionally skips empty lines. Synthetic
//! `Column1..ColumnN` names are generated when no header exists; explicit
//! caller names are width-adjusted against the first data row with a
//! warning. Normalization maps names to identifiers and numbered suffixes
//! disambiguate duplicates.
//!
//! ## Row Estimate
//!
//! The estimate averages the byte length of the first few rows and divides
//! into the window size. It is a hint: tapes grow when it is exceeded.

use eyre::{ensure, Result};
use memchr::memchr2;
use smallvec::SmallVec;

use crate::config::{DELIMITER_CANDIDATES, INFERENCE_ROW_WINDOW, MIN_ROW_ESTIMATE};
use crate::field::{self, flags};
use crate::file::ParseWarning;
use crate::options::{HeaderSpec, ReaderOptions};

/// Resolved table geometry.
#[derive(Debug)]
pub(crate) struct Layout {
    pub names: Vec<String>,
    /// Byte offset of the first data row.
    pub data_start: usize,
    /// Resolved delimiter bytes.
    pub delimiter: SmallVec<[u8; 8]>,
    pub ncols: usize,
    pub row_estimate: usize,
    pub warnings: Vec<ParseWarning>,
}

/// Advances past one row starting at `pos`, honoring quoted fields.
/// Returns the offset just past the row's terminator.
pub(crate) fn next_row_start(buf: &[u8], mut pos: usize, end: usize, opts: &ReaderOptions) -> usize {
    let mut quoted = false;
    while pos < end {
        if quoted {
            let b = buf[pos];
            if b == opts.escape && opts.escape != opts.close_quote && pos + 1 < end {
                pos += 2;
                continue;
            }
            if b == opts.close_quote {
                if opts.escape == opts.close_quote && pos + 1 < end && buf[pos + 1] == opts.close_quote
                {
                    pos += 2;
                    continue;
                }
                quoted = false;
            }
            pos += 1;
        } else {
            match memchr2(b'\n', opts.open_quote, &buf[pos..end]) {
                Some(off) => {
                    let at = pos + off;
                    if buf[at] == b'\n' {
                        return at + 1;
                    }
                    quoted = true;
                    pos = at + 1;
                }
                None => return end,
            }
        }
    }
    end
}

/// Whether the row starting at `pos` is skippable: empty (when configured)
/// or comment-prefixed.
fn is_skippable_row(buf: &[u8], pos: usize, end: usize, opts: &ReaderOptions) -> bool {
    if pos >= end {
        return false;
    }
    if opts.ignore_empty_lines && (buf[pos] == b'\n' || buf[pos] == b'\r') {
        return true;
    }
    if let Some(prefix) = &opts.comment {
        if buf[pos..end].starts_with(prefix) {
            return true;
        }
    }
    false
}

/// Skips comment and empty rows from `pos`.
pub(crate) fn skip_ignorable(buf: &[u8], mut pos: usize, end: usize, opts: &ReaderOptions) -> usize {
    while pos < end && is_skippable_row(buf, pos, end, opts) {
        pos = next_row_start(buf, pos, end, opts);
    }
    pos
}

/// Advances to the 1-based `target` row, counting only non-skipped rows.
/// Returns its byte offset.
fn advance_to_row(
    buf: &[u8],
    start: usize,
    end: usize,
    opts: &ReaderOptions,
    target: usize,
) -> usize {
    let mut pos = skip_ignorable(buf, start, end, opts);
    for _ in 1..target {
        pos = next_row_start(buf, pos, end, opts);
        pos = skip_ignorable(buf, pos, end, opts);
    }
    pos
}

/// Scans one row's fields with `delim`, returning the field count and the
/// offset past the row.
pub(crate) fn count_fields(
    buf: &[u8],
    mut pos: usize,
    end: usize,
    opts: &ReaderOptions,
    delim: &[u8],
) -> (usize, usize) {
    let mut count = 0;
    loop {
        let f = field::scan_field(buf, pos, end, opts, delim);
        count += 1;
        pos = f.next;
        if f.has(flags::NEWLINE) || f.has(flags::EOF) {
            break;
        }
    }
    (count, pos)
}

/// Consistency-scores candidate delimiters over the leading row window.
fn infer_delimiter(buf: &[u8], start: usize, end: usize, opts: &ReaderOptions) -> u8 {
    let mut best: Option<(usize, usize, usize)> = None; // (splits>1, mode freq, field count)
    let mut best_candidate = DELIMITER_CANDIDATES[0];

    for &candidate in &DELIMITER_CANDIDATES {
        let delim = [candidate];
        let mut counts: SmallVec<[usize; INFERENCE_ROW_WINDOW]> = SmallVec::new();
        let mut pos = skip_ignorable(buf, start, end, opts);
        while pos < end && counts.len() < INFERENCE_ROW_WINDOW {
            let (n, next) = count_fields(buf, pos, end, opts, &delim);
            counts.push(n);
            pos = skip_ignorable(buf, next, end, opts);
        }
        if counts.is_empty() {
            continue;
        }

        // Modal field count and its frequency.
        let (mut mode, mut freq) = (counts[0], 0);
        for &c in &counts {
            let f = counts.iter().filter(|&&x| x == c).count();
            if f > freq || (f == freq && c > mode) {
                mode = c;
                freq = f;
            }
        }

        let score = (usize::from(mode > 1), freq, mode);
        if best.map_or(true, |b| score > b) {
            best = Some(score);
            best_candidate = candidate;
        }
    }

    best_candidate
}

/// Maps a header field to a valid identifier: invalid characters become
/// `_` and the first character must be a letter or underscore.
fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_alphanumeric() || c == '_' {
            if i == 0 && !c.is_alphabetic() && c != '_' {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Appends `_1`, `_2`, ... to later occurrences of a repeated name.
fn deduplicate_names(names: &mut [String]) {
    let mut seen: hashbrown::HashMap<String, usize> = hashbrown::HashMap::new();
    for name in names.iter_mut() {
        match seen.get_mut(name.as_str()) {
            None => {
                seen.insert(name.clone(), 0);
            }
            Some(n) => {
                *n += 1;
                let fresh = format!("{}_{}", name, n);
                *name = fresh;
            }
        }
    }
}

fn synthetic_name(index: usize) -> String {
    format!("Column{}", index + 1)
}

/// Parses one header row into field strings.
fn parse_header_fields(
    buf: &[u8],
    mut pos: usize,
    end: usize,
    opts: &ReaderOptions,
    delim: &[u8],
) -> Vec<String> {
    let mut fields = Vec::new();
    let mut scratch = Vec::new();
    loop {
        let f = field::scan_field(buf, pos, end, opts, delim);
        let content = &buf[f.pos..f.pos + f.len];
        let text = if f.has(flags::ESCAPED) {
            field::unescape(content, opts.escape, &mut scratch);
            String::from_utf8_lossy(&scratch).into_owned()
        } else {
            String::from_utf8_lossy(content).into_owned()
        };
        fields.push(text);
        pos = f.next;
        if f.has(flags::NEWLINE) || f.has(flags::EOF) {
            break;
        }
    }
    fields
}

/// Estimates the total row count by extrapolating the average byte length
/// of the first sampled rows over the data window.
fn estimate_rows(buf: &[u8], start: usize, end: usize, opts: &ReaderOptions) -> usize {
    let mut pos = start;
    let mut sampled = 0usize;
    while pos < end && sampled < INFERENCE_ROW_WINDOW {
        pos = next_row_start(buf, pos, end, opts);
        sampled += 1;
    }
    if sampled == 0 {
        return MIN_ROW_ESTIMATE;
    }
    let avg = (pos - start).div_ceil(sampled).max(1);
    ((end - start) / avg + 1).max(MIN_ROW_ESTIMATE)
}

/// The delimiter actually used for a parse: user-specified, preset from the
/// path extension, or inferred from the data.
pub(crate) fn resolve_delimiter(
    buf: &[u8],
    start: usize,
    end: usize,
    opts: &ReaderOptions,
    extension: Option<&str>,
) -> SmallVec<[u8; 8]> {
    match opts.delimiter.bytes() {
        Some(bytes) => SmallVec::from_slice(bytes),
        None => match extension {
            Some("tsv") => SmallVec::from_slice(b"\t"),
            Some("wsv") => SmallVec::from_slice(b" "),
            _ => SmallVec::from_slice(&[infer_delimiter(buf, start, end, opts)]),
        },
    }
}

/// Resolves the table layout over `(buf, start, end)`.
pub(crate) fn detect(
    buf: &[u8],
    start: usize,
    end: usize,
    opts: &ReaderOptions,
    extension: Option<&str>,
) -> Result<Layout> {
    let mut warnings = Vec::new();
    let delimiter = resolve_delimiter(buf, start, end, opts, extension);

    let (mut names, data_start) = match &opts.header {
        HeaderSpec::Names(list) => {
            let data_start = match opts.data_row {
                Some(d) => advance_to_row(buf, start, end, opts, d),
                None => skip_ignorable(buf, start, end, opts),
            };
            (list.clone(), data_start)
        }
        HeaderSpec::None => {
            let data_start = match opts.data_row {
                Some(d) => advance_to_row(buf, start, end, opts, d),
                None => skip_ignorable(buf, start, end, opts),
            };
            let ncols = if data_start < end {
                count_fields(buf, data_start, end, opts, &delimiter).0
            } else {
                0
            };
            ((0..ncols).map(synthetic_name).collect(), data_start)
        }
        HeaderSpec::Row(h) => {
            let header_pos = advance_to_row(buf, start, end, opts, *h);
            ensure!(
                header_pos < end,
                "header row {} is not before data row: only {} bytes of input",
                h,
                end - start
            );
            let names = parse_header_fields(buf, header_pos, end, opts, &delimiter);
            let after = next_row_start(buf, header_pos, end, opts);
            let computed = skip_ignorable(buf, after, end, opts);
            let data_start = match opts.data_row {
                Some(d) => advance_to_row(buf, start, end, opts, d),
                None => computed,
            };
            (names, data_start)
        }
        HeaderSpec::Rows(first, last) => {
            let mut pos = advance_to_row(buf, start, end, opts, *first);
            let mut rows: Vec<Vec<String>> = Vec::new();
            for _ in *first..=*last {
                if pos >= end {
                    break;
                }
                rows.push(parse_header_fields(buf, pos, end, opts, &delimiter));
                pos = skip_ignorable(buf, next_row_start(buf, pos, end, opts), end, opts);
            }
            let width = rows.iter().map(Vec::len).max().unwrap_or(0);
            let names = (0..width)
                .map(|c| {
                    let parts: Vec<&str> = rows
                        .iter()
                        .filter_map(|r| r.get(c))
                        .map(String::as_str)
                        .filter(|s| !s.is_empty())
                        .collect();
                    if parts.is_empty() { synthetic_name(c) } else { parts.join("_") }
                })
                .collect();
            let data_start = match opts.data_row {
                Some(d) => advance_to_row(buf, start, end, opts, d),
                None => pos,
            };
            (names, data_start)
        }
    };

    // Width-adjust explicit caller names against the first data row,
    // padding with synthetic names or truncating.
    if !names.is_empty() && matches!(opts.header, HeaderSpec::Names(_)) {
        let data_cols = if data_start < end {
            count_fields(buf, data_start, end, opts, &delimiter).0
        } else {
            names.len()
        };
        if names.len() != data_cols {
            warnings.push(ParseWarning {
                row: 0,
                col: None,
                message: format!(
                    "{} column names given but rows have {} fields",
                    names.len(),
                    data_cols
                ),
            });
            names.truncate(data_cols);
            while names.len() < data_cols {
                names.push(synthetic_name(names.len()));
            }
        }
    }

    for (i, name) in names.iter_mut().enumerate() {
        if name.is_empty() {
            *name = synthetic_name(i);
        }
    }
    if opts.normalize_names {
        for name in names.iter_mut() {
            *name = normalize_name(name);
        }
    }
    deduplicate_names(&mut names);

    let ncols = names.len();
    let row_estimate = estimate_rows(buf, data_start, end, opts);

    Ok(Layout { names, data_start, delimiter, ncols, row_estimate, warnings })
}
