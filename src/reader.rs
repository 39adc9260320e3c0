//! # Slice Parsing and Type Inference
//!
//! This module walks a byte range row by row, writing every cell into the
//! column tapes while inferring (or enforcing) column types. The same loop
//! serves the single-threaded path and each parallel worker; only the byte
//! range differs.
//!
//! ## Cell Commit
//!
//! Each scanned field is committed against the column's current type code:
//!
//! 1. A user-pinned type is parsed as-is: failure is missing (or fatal in
//!    strict mode), never a promotion.
//! 2. An uncommitted column runs the inference ladder — Int64, Float64,
//!    the date/time shapes, Bool — and the first success commits the type.
//!    Anything else commits as a string (pooled when pooling is on).
//! 3. A committed column re-parses each new cell as its type. On
//!    contradiction, Int64 may promote to Float64; everything else falls
//!    back to strings. Promotions only move up the lattice and are pushed
//!    through the shared atomic type vector, so concurrent workers converge.
//!
//! Integer cells set the was-int poslen flag as they are written, which is
//! what makes Int64→Float64 promotion O(1): nothing is rewritten, the float
//! read path widens flagged slots on access.
//!
//! ## Row Shape
//!
//! A short row fills the remaining columns with missing cells and marks
//! their types missing; a long row is scanned to its terminator and the
//! extra fields discarded. Both emit warnings. A quoted field that never
//! closes is fatal.
//!
//! ## Transposed Mode
//!
//! With `transpose`, each input line is one column. A cursor per column
//! steps through all lines in lockstep, one field per output row, reusing
//! the same commit logic. Threading is disabled in this mode.

use std::sync::atomic::{AtomicU16, Ordering};

use eyre::{bail, ensure, Result};

use crate::config::MAX_FIELD_LEN;
use crate::field::{self, flags};
use crate::file::ParseWarning;
use crate::layout::{self, skip_ignorable};
use crate::options::{HeaderSpec, ReaderOptions};
use crate::pool::StringPool;
use crate::tape::{self, ColumnTape, Sidecar};
use crate::types::{LogicalType, TypeCode};

/// The per-column type vector shared across workers. Writes move only up
/// the promotion lattice, so a compare-exchange max-merge is safe from any
/// thread.
pub(crate) struct SharedTypes {
    codes: Vec<AtomicU16>,
}

impl SharedTypes {
    pub fn new(initial: Vec<TypeCode>) -> SharedTypes {
        SharedTypes { codes: initial.into_iter().map(|c| AtomicU16::new(c.bits())).collect() }
    }

    #[inline]
    pub fn load(&self, col: usize) -> TypeCode {
        TypeCode::from_bits(self.codes[col].load(Ordering::Relaxed))
    }

    /// Merges `code` into the column's entry, returning the merged code.
    pub fn merge(&self, col: usize, code: TypeCode) -> TypeCode {
        let slot = &self.codes[col];
        let mut cur = slot.load(Ordering::Relaxed);
        loop {
            let merged = TypeCode::from_bits(cur).lattice_max(code).bits();
            if merged == cur {
                return TypeCode::from_bits(cur);
            }
            match slot.compare_exchange_weak(cur, merged, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return TypeCode::from_bits(merged),
                Err(seen) => cur = seen,
            }
        }
    }

    pub fn snapshot(&self) -> Vec<TypeCode> {
        self.codes.iter().map(|c| TypeCode::from_bits(c.load(Ordering::Relaxed))).collect()
    }
}

/// Builds the initial type vector from the user's pinned types.
pub(crate) fn initial_types(opts: &ReaderOptions, names: &[String]) -> Result<Vec<TypeCode>> {
    use crate::options::TypeSpec;

    let ncols = names.len();
    let pin = |ty: LogicalType| -> TypeCode {
        if ty == LogicalType::String && opts.pool > 0.0 {
            TypeCode::POOL.with_user()
        } else {
            ty.to_code().with_user()
        }
    };

    let mut codes = vec![TypeCode::EMPTY; ncols];
    match &opts.types {
        TypeSpec::Unspecified => {}
        TypeSpec::All(ty) => codes.fill(pin(*ty)),
        TypeSpec::ByIndex(list) => {
            for (i, ty) in list.iter().enumerate() {
                if let (Some(ty), Some(slot)) = (ty, codes.get_mut(i)) {
                    *slot = pin(*ty);
                }
            }
        }
        TypeSpec::ByName(pairs) => {
            for (name, ty) in pairs {
                match names.iter().position(|n| n == name) {
                    Some(i) => codes[i] = pin(*ty),
                    None => bail!("invalid type: no column named '{}'", name),
                }
            }
        }
    }
    Ok(codes)
}

/// Everything a parse loop needs, shared by value across workers.
pub(crate) struct ParseContext<'a> {
    pub buf: &'a [u8],
    pub opts: &'a ReaderOptions,
    pub delim: &'a [u8],
    pub ncols: usize,
    pub row_estimate: usize,
    pub types: &'a SharedTypes,
}

/// One slice's materialized output, merged later by the coordinator.
#[derive(Debug)]
pub(crate) struct ParseOutput {
    pub tapes: Vec<ColumnTape>,
    pub pools: Vec<Option<StringPool>>,
    pub rows: usize,
    pub warnings: Vec<ParseWarning>,
    pub truncated_warnings: bool,
}

struct SliceState {
    tapes: Vec<ColumnTape>,
    sidecars: Vec<Option<Sidecar>>,
    pools: Vec<Option<StringPool>>,
    rows: usize,
    capacity_rows: usize,
    warnings: Vec<ParseWarning>,
    truncated_warnings: bool,
    unescape_scratch: Vec<u8>,
}

impl SliceState {
    fn new(ctx: &ParseContext<'_>) -> SliceState {
        let est = ctx.row_estimate;
        let types = ctx.types;
        let mut sidecars = Vec::with_capacity(ctx.ncols);
        for col in 0..ctx.ncols {
            let code = types.load(col);
            // String columns read straight from the tape's poslens, and
            // pinned columns never fall back, so neither keeps a history.
            if code.is_user() || code.is(TypeCode::STRING) || code.is(TypeCode::POOL) {
                sidecars.push(None);
            } else {
                sidecars.push(Some(Sidecar::with_row_capacity(est)));
            }
        }
        SliceState {
            tapes: (0..ctx.ncols).map(|_| ColumnTape::with_row_capacity(est)).collect(),
            sidecars,
            pools: (0..ctx.ncols).map(|_| None).collect(),
            rows: 0,
            capacity_rows: est,
            warnings: Vec::new(),
            truncated_warnings: false,
            unescape_scratch: Vec::new(),
        }
    }

    fn warn(&mut self, opts: &ReaderOptions, row: usize, col: Option<usize>, message: String) {
        if opts.silence_warnings || self.truncated_warnings {
            return;
        }
        if self.warnings.len() >= opts.max_warnings {
            self.truncated_warnings = true;
            return;
        }
        self.warnings.push(ParseWarning { row, col, message });
    }

    /// Grow-and-copy when the row estimate is exceeded: re-estimate from
    /// the bytes still unparsed and reserve in one step.
    fn ensure_capacity(&mut self, parsed_bytes: usize, remaining_bytes: usize) {
        if self.rows < self.capacity_rows {
            return;
        }
        let avg = (parsed_bytes / self.rows.max(1)).max(1);
        let additional = remaining_bytes / avg + 1;
        for tape in &mut self.tapes {
            tape.reserve_rows(additional);
        }
        for sidecar in self.sidecars.iter_mut().flatten() {
            sidecar.reserve_rows(additional);
        }
        self.capacity_rows += additional + crate::config::TAPE_GROWTH_PAD;
    }

    fn into_output(mut self) -> ParseOutput {
        // Position histories are only needed while columns can still fall
        // back to strings; parsing is over.
        self.sidecars.clear();
        ParseOutput {
            tapes: self.tapes,
            pools: self.pools,
            rows: self.rows,
            warnings: self.warnings,
            truncated_warnings: self.truncated_warnings,
        }
    }
}

/// Attempts to parse `content` as `kind`, returning raw value bits.
fn try_parse_as(
    kind: TypeCode,
    content: &[u8],
    opts: &ReaderOptions,
) -> Option<u64> {
    match kind {
        TypeCode::INT => field::parse_int(content).map(|v| v as u64),
        TypeCode::FLOAT => field::parse_float(content, opts.decimal).map(f64::to_bits),
        TypeCode::BOOL => field::parse_bool(content, opts).map(u64::from),
        TypeCode::DATE => match &opts.date_format {
            Some(fmt) if fmt.kind == LogicalType::Date => field::parse_with_format(content, fmt),
            Some(_) => None,
            None => field::parse_date_iso(content).map(|d| d as i64 as u64),
        },
        TypeCode::DATETIME => match &opts.date_format {
            Some(fmt) if fmt.kind == LogicalType::DateTime => {
                field::parse_with_format(content, fmt)
            }
            Some(_) => None,
            None => field::parse_datetime_iso(content).map(|v| v as u64),
        },
        TypeCode::TIME => match &opts.date_format {
            Some(fmt) if fmt.kind == LogicalType::Time => field::parse_with_format(content, fmt),
            Some(_) => None,
            None => field::parse_time_iso(content).map(|v| v as u64),
        },
        _ => None,
    }
}

/// Applies the user's type rewrite map to an inferred base code.
fn remap(opts: &ReaderOptions, base: TypeCode) -> TypeCode {
    let as_logical = |code: TypeCode| -> Option<LogicalType> {
        Some(match code {
            TypeCode::INT => LogicalType::Int64,
            TypeCode::FLOAT => LogicalType::Float64,
            TypeCode::DATE => LogicalType::Date,
            TypeCode::DATETIME => LogicalType::DateTime,
            TypeCode::TIME => LogicalType::Time,
            TypeCode::BOOL => LogicalType::Bool,
            TypeCode::STRING | TypeCode::POOL => LogicalType::String,
            _ => return None,
        })
    };
    let Some(logical) = as_logical(base) else { return base };
    for (from, to) in &opts.type_map {
        if *from == logical {
            return to.to_code();
        }
    }
    base
}

/// The inference ladder for an uncommitted column: first success wins.
fn infer_kind(content: &[u8], opts: &ReaderOptions) -> Option<(TypeCode, u64)> {
    if let Some(v) = field::parse_int(content) {
        return Some((TypeCode::INT, v as u64));
    }
    if let Some(v) = field::parse_float(content, opts.decimal) {
        return Some((TypeCode::FLOAT, v.to_bits()));
    }
    if let Some(fmt) = &opts.date_format {
        if let Some(bits) = field::parse_with_format(content, fmt) {
            return Some((fmt.kind.to_code(), bits));
        }
    } else {
        if let Some(d) = field::parse_date_iso(content) {
            return Some((TypeCode::DATE, d as i64 as u64));
        }
        if let Some(v) = field::parse_datetime_iso(content) {
            return Some((TypeCode::DATETIME, v as u64));
        }
        if let Some(v) = field::parse_time_iso(content) {
            return Some((TypeCode::TIME, v as u64));
        }
    }
    field::parse_bool(content, opts).map(|v| (TypeCode::BOOL, u64::from(v)))
}

/// Parses `[start, end)` into tapes. `limit` caps the number of data rows.
pub(crate) fn parse_slice(
    ctx: &ParseContext<'_>,
    start: usize,
    end: usize,
    limit: Option<usize>,
) -> Result<ParseOutput> {
    let mut state = SliceState::new(ctx);
    let opts = ctx.opts;
    let buf = ctx.buf;

    let mut pos = skip_ignorable(buf, start, end, opts);
    while pos < end {
        if limit.is_some_and(|cap| state.rows >= cap) {
            break;
        }
        state.ensure_capacity(pos - start, end - pos);

        let row = state.rows + 1;
        let mut row_done = false;

        for col in 0..ctx.ncols {
            if row_done {
                // Short row: the remaining columns are missing.
                state.warn(
                    opts,
                    row,
                    Some(col),
                    format!("expected {} fields, found {}", ctx.ncols, col),
                );
                for missing_col in col..ctx.ncols {
                    commit_missing(ctx, &mut state, missing_col, pos, 0);
                }
                break;
            }

            let f = field::scan_field(buf, pos, end, opts, ctx.delim);
            if f.has(flags::INVALID_QUOTE) {
                bail!(
                    "invalid quoted field at row {}, column {} (byte {})",
                    row,
                    col + 1,
                    f.pos
                );
            }
            ensure!(
                f.len <= MAX_FIELD_LEN,
                "field of {} bytes at row {}, column {} exceeds the {} byte limit",
                f.len,
                row,
                col + 1,
                MAX_FIELD_LEN
            );

            commit_cell(ctx, &mut state, col, row, &f)?;
            pos = f.next;
            // A trailing delimiter at end of input still opens one (empty,
            // EOF-terminated) field, so only the terminator flags end a row.
            row_done = f.has(flags::NEWLINE) || f.has(flags::EOF);
        }

        if !row_done {
            // Long row: discard fields up to the terminator.
            let mut extras = 0;
            loop {
                let f = field::scan_field(buf, pos, end, opts, ctx.delim);
                extras += 1;
                pos = f.next;
                if !f.has(flags::DELIM) {
                    break;
                }
            }
            state.warn(
                opts,
                row,
                None,
                format!("expected {} fields, found {}", ctx.ncols, ctx.ncols + extras),
            );
        }

        state.rows += 1;
        pos = skip_ignorable(buf, pos, end, opts);
    }

    Ok(state.into_output())
}

/// Writes a missing cell and marks the column's type missing.
fn commit_missing(
    ctx: &ParseContext<'_>,
    state: &mut SliceState,
    col: usize,
    pos: usize,
    len: usize,
) {
    let poslen = tape::pack_poslen(pos, len, tape::MISSING_BIT);
    state.tapes[col].push(poslen, 0);
    if let Some(sidecar) = &mut state.sidecars[col] {
        sidecar.push(poslen);
    }
    ctx.types.merge(col, TypeCode::MISSINGTYPE.with_missing());
}

/// Commits one scanned field into its column.
fn commit_cell(
    ctx: &ParseContext<'_>,
    state: &mut SliceState,
    col: usize,
    row: usize,
    f: &field::ScannedField,
) -> Result<()> {
    debug_assert!(f.has(flags::OK));
    let opts = ctx.opts;
    let content = &ctx.buf[f.pos..f.pos + f.len];
    let escaped_bit = if f.has(flags::ESCAPED) { tape::ESCAPED_BIT } else { 0 };

    if f.has(flags::SENTINEL) {
        let poslen = tape::pack_poslen(f.pos, f.len, tape::MISSING_BIT | escaped_bit);
        state.tapes[col].push(poslen, 0);
        if let Some(sidecar) = &mut state.sidecars[col] {
            sidecar.push(poslen);
        }
        ctx.types.merge(col, TypeCode::MISSINGTYPE.with_missing());
        return Ok(());
    }

    let code = ctx.types.load(col);

    if code.is_user() {
        return commit_pinned(ctx, state, col, row, f, content, escaped_bit, code);
    }

    let base = code.base();

    if base == TypeCode::EMPTY || base == TypeCode::MISSINGTYPE {
        match infer_kind(content, opts) {
            Some((kind, bits)) => {
                let target = remap(opts, kind);
                if target == TypeCode::STRING || target == TypeCode::POOL {
                    return commit_string(ctx, state, col, f, content, escaped_bit);
                }
                let bits = match (kind, target) {
                    (k, t) if k == t => bits,
                    _ => match try_parse_as(target, content, opts) {
                        Some(b) => b,
                        None => return commit_string(ctx, state, col, f, content, escaped_bit),
                    },
                };
                let was_int = if target == TypeCode::INT { tape::WAS_INT_BIT } else { 0 };
                let poslen = tape::pack_poslen(f.pos, f.len, was_int | escaped_bit);
                state.tapes[col].push(poslen, bits);
                if let Some(sidecar) = &mut state.sidecars[col] {
                    sidecar.push(poslen & !tape::WAS_INT_BIT);
                }
                ctx.types.merge(col, target);
                Ok(())
            }
            None => commit_string(ctx, state, col, f, content, escaped_bit),
        }
    } else if base == TypeCode::POOL || base == TypeCode::STRING {
        commit_string(ctx, state, col, f, content, escaped_bit)
    } else {
        // Committed typed column: parse as-is or promote.
        if let Some(bits) = try_parse_as(base, content, opts) {
            let was_int = if base == TypeCode::INT { tape::WAS_INT_BIT } else { 0 };
            let poslen = tape::pack_poslen(f.pos, f.len, was_int | escaped_bit);
            state.tapes[col].push(poslen, bits);
            if let Some(sidecar) = &mut state.sidecars[col] {
                sidecar.push(poslen & !tape::WAS_INT_BIT);
            }
            return Ok(());
        }

        if base == TypeCode::INT {
            if let Some(v) = field::parse_float(content, opts.decimal) {
                // Promote: earlier integer rows keep their bits and flag.
                ctx.types.merge(col, TypeCode::FLOAT);
                let poslen = tape::pack_poslen(f.pos, f.len, escaped_bit);
                state.tapes[col].push(poslen, v.to_bits());
                if let Some(sidecar) = &mut state.sidecars[col] {
                    sidecar.push(poslen);
                }
                return Ok(());
            }
        }

        // Fall back to strings: restore earlier rows' content positions,
        // then commit this field as a string.
        if let Some(sidecar) = state.sidecars[col].take() {
            sidecar.restore_into(&mut state.tapes[col]);
        }
        ctx.types.merge(col, TypeCode::STRING);
        commit_string(ctx, state, col, f, content, escaped_bit)
    }
}

/// Commits a string (or pooled string) cell.
fn commit_string(
    ctx: &ParseContext<'_>,
    state: &mut SliceState,
    col: usize,
    f: &field::ScannedField,
    content: &[u8],
    escaped_bit: u64,
) -> Result<()> {
    let opts = ctx.opts;
    let code = ctx.types.load(col);
    let poslen = tape::pack_poslen(f.pos, f.len, escaped_bit);

    // String columns no longer need a position history.
    state.sidecars[col] = None;

    let pooled = if code.is(TypeCode::POOL) {
        true
    } else if code.is(TypeCode::STRING) {
        false
    } else {
        // First string cell decides between pooled and plain.
        let target = if opts.pool > 0.0 { TypeCode::POOL } else { TypeCode::STRING };
        ctx.types.merge(col, target).is(TypeCode::POOL)
    };

    if pooled {
        let pool = state.pools[col].get_or_insert_with(StringPool::new);
        let r = if escaped_bit != 0 {
            let mut scratch = std::mem::take(&mut state.unescape_scratch);
            field::unescape(content, opts.escape, &mut scratch);
            let r = pool.intern(&scratch);
            state.unescape_scratch = scratch;
            r
        } else {
            pool.intern(content)
        };
        state.tapes[col].push(poslen, r);

        // Cardinality outgrew the threshold: keep the column as plain
        // strings from here on.
        let limit = (opts.pool * ctx.row_estimate.max(state.rows + 1) as f64) as usize;
        if pool.cardinality() > limit {
            ctx.types.merge(col, TypeCode::STRING);
            state.pools[col] = None;
        }
    } else {
        state.tapes[col].push(poslen, 0);
    }
    Ok(())
}

/// Commits against a user-pinned type: no inference, no promotion.
#[allow(clippy::too_many_arguments)]
fn commit_pinned(
    ctx: &ParseContext<'_>,
    state: &mut SliceState,
    col: usize,
    row: usize,
    f: &field::ScannedField,
    content: &[u8],
    escaped_bit: u64,
    code: TypeCode,
) -> Result<()> {
    let opts = ctx.opts;
    let base = code.base();

    if base == TypeCode::STRING || base == TypeCode::POOL {
        return commit_string(ctx, state, col, f, content, escaped_bit);
    }

    match try_parse_as(base, content, opts) {
        Some(bits) => {
            let was_int = if base == TypeCode::INT { tape::WAS_INT_BIT } else { 0 };
            state.tapes[col].push(tape::pack_poslen(f.pos, f.len, was_int | escaped_bit), bits);
            Ok(())
        }
        None if opts.strict => bail!(
            "strict parse error: '{}' at row {}, column {} does not parse as {}",
            String::from_utf8_lossy(content),
            row,
            col + 1,
            ColumnTypeName(base)
        ),
        None => {
            state.warn(
                opts,
                row,
                Some(col),
                format!(
                    "'{}' does not parse as {}, coerced to missing",
                    String::from_utf8_lossy(content),
                    ColumnTypeName(base)
                ),
            );
            state.tapes[col]
                .push(tape::pack_poslen(f.pos, f.len, tape::MISSING_BIT | escaped_bit), 0);
            ctx.types.merge(col, code.with_missing());
            Ok(())
        }
    }
}

/// Display helper for a base type code in messages.
struct ColumnTypeName(TypeCode);

impl std::fmt::Display for ColumnTypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            TypeCode::INT => "Int64",
            TypeCode::FLOAT => "Float64",
            TypeCode::DATE => "Date",
            TypeCode::DATETIME => "DateTime",
            TypeCode::TIME => "Time",
            TypeCode::BOOL => "Bool",
            _ => "String",
        };
        write!(f, "{}", name)
    }
}

/// Transposed parse: each input line is one column.
///
/// Returns the column names together with the output; names come from each
/// line's first field unless the caller supplied or suppressed them.
pub(crate) fn parse_transposed(
    buf: &[u8],
    start: usize,
    end: usize,
    opts: &ReaderOptions,
    delim: &[u8],
    types_seed: impl FnOnce(&[String]) -> Result<Vec<TypeCode>>,
) -> Result<(Vec<String>, SharedTypes, ParseOutput)> {
    // Line extents: (cursor, line end past terminator).
    let mut lines: Vec<(usize, usize)> = Vec::new();
    let mut pos = skip_ignorable(buf, start, end, opts);
    while pos < end {
        let next = layout::next_row_start(buf, pos, end, opts);
        lines.push((pos, next));
        pos = skip_ignorable(buf, next, end, opts);
    }

    let ncols = lines.len();
    let mut names = Vec::with_capacity(ncols);
    let take_names_from_data = !matches!(opts.header, HeaderSpec::Names(_) | HeaderSpec::None);

    let mut scratch = Vec::new();
    for (i, (cursor, line_end)) in lines.iter_mut().enumerate() {
        if take_names_from_data {
            let f = field::scan_field(buf, *cursor, *line_end, opts, delim);
            let content = &buf[f.pos..f.pos + f.len];
            let name = if f.has(flags::ESCAPED) {
                field::unescape(content, opts.escape, &mut scratch);
                String::from_utf8_lossy(&scratch).into_owned()
            } else {
                String::from_utf8_lossy(content).into_owned()
            };
            names.push(if name.is_empty() { format!("Column{}", i + 1) } else { name });
            *cursor = f.next;
        } else {
            match &opts.header {
                HeaderSpec::Names(list) => {
                    names.push(list.get(i).cloned().unwrap_or_else(|| format!("Column{}", i + 1)))
                }
                _ => names.push(format!("Column{}", i + 1)),
            }
        }
    }

    let types = SharedTypes::new(types_seed(&names)?);
    let row_estimate = match lines.first() {
        Some((cursor, line_end)) => {
            layout::count_fields(buf, *cursor, *line_end, opts, delim).0
        }
        None => 0,
    };

    let ctx = ParseContext {
        buf,
        opts,
        delim,
        ncols,
        row_estimate: row_estimate.max(crate::config::MIN_ROW_ESTIMATE),
        types: &types,
    };
    let mut state = SliceState::new(&ctx);
    let mut done: Vec<bool> = lines.iter().map(|(c, e)| c >= e).collect();

    while !done.iter().all(|&d| d) {
        if opts.limit.is_some_and(|cap| state.rows >= cap) {
            break;
        }
        let row = state.rows + 1;
        for col in 0..ncols {
            if done[col] {
                state.warn(
                    opts,
                    row,
                    Some(col),
                    format!("column {} exhausted before row {}", col + 1, row),
                );
                commit_missing(&ctx, &mut state, col, lines[col].1, 0);
                continue;
            }
            let (cursor, line_end) = lines[col];
            let f = field::scan_field(buf, cursor, line_end, opts, delim);
            if f.has(flags::INVALID_QUOTE) {
                bail!(
                    "invalid quoted field at row {}, column {} (byte {})",
                    row,
                    col + 1,
                    f.pos
                );
            }
            ensure!(
                f.len <= MAX_FIELD_LEN,
                "field of {} bytes at row {}, column {} exceeds the {} byte limit",
                f.len,
                row,
                col + 1,
                MAX_FIELD_LEN
            );
            commit_cell(&ctx, &mut state, col, row, &f)?;
            lines[col].0 = f.next;
            if f.has(flags::NEWLINE) || f.has(flags::EOF) {
                done[col] = true;
            }
        }
        state.rows += 1;
    }

    Ok((names, types, state.into_output()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8], opts: &ReaderOptions, ncols: usize) -> (ParseOutput, Vec<TypeCode>) {
        let names: Vec<String> = (0..ncols).map(|i| format!("c{}", i)).collect();
        let types = SharedTypes::new(initial_types(opts, &names).unwrap());
        let ctx = ParseContext {
            buf: data,
            opts,
            delim: b",",
            ncols,
            row_estimate: 8,
            types: &types,
        };
        let out = parse_slice(&ctx, 0, data.len(), opts.limit).unwrap();
        let codes = types.snapshot();
        (out, codes)
    }

    fn opts() -> ReaderOptions {
        ReaderOptions::default()
    }

    #[test]
    fn int_column_commits() {
        let (out, codes) = parse(b"1\n2\n3\n", &opts(), 1);
        assert_eq!(out.rows, 3);
        assert!(codes[0].is(TypeCode::INT));
        assert_eq!(out.tapes[0].value(0) as i64, 1);
        assert_eq!(out.tapes[0].value(2) as i64, 3);
        assert!(tape::was_int(out.tapes[0].poslen(0)));
    }

    #[test]
    fn int_promotes_to_float_lazily() {
        let (out, codes) = parse(b"1\n2.5\n3\n", &opts(), 1);
        assert!(codes[0].is(TypeCode::FLOAT));
        // Row 0 keeps integer bits plus the flag; row 1 is float bits.
        assert!(tape::was_int(out.tapes[0].poslen(0)));
        assert_eq!(out.tapes[0].value(0) as i64, 1);
        assert!(!tape::was_int(out.tapes[0].poslen(1)));
        assert_eq!(f64::from_bits(out.tapes[0].value(1)), 2.5);
        // Post-promotion integers parse as floats.
        assert_eq!(f64::from_bits(out.tapes[0].value(2)), 3.0);
    }

    #[test]
    fn typed_column_falls_back_to_string() {
        let (out, codes) = parse(b"1\n2\nhello\n", &opts(), 1);
        assert!(codes[0].is(TypeCode::STRING));
        // Earlier int rows read back as their original text extents.
        let poslen = out.tapes[0].poslen(0);
        assert!(!tape::was_int(poslen));
        assert_eq!(tape::poslen_pos(poslen), 0);
        assert_eq!(tape::poslen_len(poslen), 1);
    }

    #[test]
    fn sentinel_sets_missing() {
        let (out, codes) = parse(b"1\n\n3\n", &opts(), 1);
        // Default options skip empty lines, so use an explicit sentinel file.
        let _ = (out, codes);

        let o = ReaderOptions::builder().missing_strings(["NA"]).build().unwrap();
        let (out, codes) = parse(b"1\nNA\n3\n", &o, 1);
        assert!(codes[0].is(TypeCode::INT));
        assert!(codes[0].is_missing());
        assert!(tape::is_missing(out.tapes[0].poslen(1)));
        assert_eq!(out.tapes[0].value(2) as i64, 3);
    }

    #[test]
    fn short_row_fills_missing() {
        let (out, codes) = parse(b"1,2\n3\n5,6\n", &opts(), 2);
        assert_eq!(out.rows, 3);
        assert!(tape::is_missing(out.tapes[1].poslen(1)));
        assert!(codes[1].is_missing());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("expected 2 fields, found 1"));
    }

    #[test]
    fn long_row_discards_extras() {
        let (out, codes) = parse(b"1,2\n3,4,5,6\n7,8\n", &opts(), 2);
        assert_eq!(out.rows, 3);
        assert_eq!(out.tapes[0].value(2) as i64, 7);
        assert!(codes[0].is(TypeCode::INT));
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("found 4"));
    }

    #[test]
    fn unterminated_quote_is_fatal() {
        let types = SharedTypes::new(vec![TypeCode::EMPTY]);
        let o = opts();
        let ctx = ParseContext {
            buf: b"\"open\n",
            opts: &o,
            delim: b",",
            ncols: 1,
            row_estimate: 8,
            types: &types,
        };
        let err = parse_slice(&ctx, 0, 6, None).unwrap_err();
        assert!(err.to_string().contains("invalid quoted field"));
    }

    #[test]
    fn pooled_column_interning() {
        let o = ReaderOptions::builder().pool(true).build().unwrap();
        let (mut out, codes) = parse(b"x\ny\nx\n", &o, 1);
        assert!(codes[0].is(TypeCode::POOL));
        assert_eq!(out.tapes[0].value(0), 1);
        assert_eq!(out.tapes[0].value(1), 2);
        assert_eq!(out.tapes[0].value(2), 1);
        let refs = out.pools[0].take().unwrap().into_refs();
        assert_eq!(&*refs[0], b"x");
        assert_eq!(&*refs[1], b"y");
    }

    #[test]
    fn pool_promotes_on_cardinality() {
        // Threshold 0.1 with ~8 estimated rows allows one distinct value.
        let o = ReaderOptions::builder().pool_fraction(0.1).build().unwrap();
        let (out, codes) = parse(b"a\nb\nc\nd\ne\n", &o, 1);
        assert!(codes[0].is(TypeCode::STRING), "{:?}", codes[0]);
        assert!(out.pools[0].is_none());
    }

    #[test]
    fn user_pinned_type_never_promotes() {
        let o = ReaderOptions::builder().types_by_index(vec![Some(LogicalType::Int64)]).build().unwrap();
        let (out, codes) = parse(b"1\nx\n3\n", &o, 1);
        assert!(codes[0].is(TypeCode::INT));
        assert!(codes[0].is_missing());
        assert!(tape::is_missing(out.tapes[0].poslen(1)));
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("coerced to missing"));
    }

    #[test]
    fn strict_mode_fails_hard() {
        let o = ReaderOptions::builder()
            .types_by_index(vec![Some(LogicalType::Int64)])
            .strict(true)
            .build()
            .unwrap();
        let types = SharedTypes::new(initial_types(&o, &["a".to_string()]).unwrap());
        let ctx = ParseContext {
            buf: b"1\nx\n",
            opts: &o,
            delim: b",",
            ncols: 1,
            row_estimate: 8,
            types: &types,
        };
        let err = parse_slice(&ctx, 0, 4, None).unwrap_err();
        assert!(err.to_string().starts_with("strict parse error:"));
    }

    #[test]
    fn type_map_rewrites_int_to_float() {
        let o = ReaderOptions::builder()
            .type_map(LogicalType::Int64, LogicalType::Float64)
            .build()
            .unwrap();
        let (out, codes) = parse(b"1\n2\n", &o, 1);
        assert!(codes[0].is(TypeCode::FLOAT));
        assert_eq!(f64::from_bits(out.tapes[0].value(0)), 1.0);
    }

    #[test]
    fn bool_and_date_inference() {
        let (out, codes) = parse(b"true\nfalse\n", &opts(), 1);
        assert!(codes[0].is(TypeCode::BOOL));
        assert_eq!(out.tapes[0].value(0), 1);
        assert_eq!(out.tapes[0].value(1), 0);

        let (out, codes) = parse(b"2024-01-15\n1970-01-01\n", &opts(), 1);
        assert!(codes[0].is(TypeCode::DATE));
        assert_eq!(out.tapes[0].value(0) as i64, 19737);
        assert_eq!(out.tapes[0].value(1), 0);
    }

    #[test]
    fn limit_caps_rows() {
        let o = ReaderOptions::builder().limit(2).build().unwrap();
        let (out, _) = parse(b"1\n2\n3\n4\n", &o, 1);
        assert_eq!(out.rows, 2);
    }

    #[test]
    fn warning_cap_truncates() {
        let o = ReaderOptions::builder().max_warnings(2).build().unwrap();
        let (out, _) = parse(b"1,2\n3\n4\n5\n6\n7,8\n", &o, 2);
        assert_eq!(out.warnings.len(), 2);
        assert!(out.truncated_warnings);
    }

    #[test]
    fn transposed_parse() {
        let (names, types, out) = parse_transposed(
            b"a,1,2,3\nb,x,y,z\n",
            0,
            16,
            &opts(),
            b",",
            |names| initial_types(&ReaderOptions::default(), names),
        )
        .unwrap();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(out.rows, 3);
        let codes = types.snapshot();
        assert!(codes[0].is(TypeCode::INT));
        assert!(codes[1].is(TypeCode::STRING));
        assert_eq!(out.tapes[0].value(1) as i64, 2);
    }
}
