//! # Field Parsing
//!
//! This module parses one delimited field at a time: locating its extent
//! (quoting, escapes, terminator), trimming whitespace, matching the missing
//! sentinels, and converting field content to typed values.
//!
//! ## Two Stages
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌─────────────┐
//! │ raw bytes│───>│  scan_field  │───>│ typed parse │
//! └──────────┘    └──────────────┘    └─────────────┘
//!                  extent + flags       Option<value>
//! ```
//!
//! [`scan_field`] walks from a field's first byte to just past its
//! terminator and reports the content position/length plus status flags.
//! The typed parsers (`parse_int`, `parse_float`, date/time parsers) then
//! operate on the content slice alone and return `None` on mismatch —
//! type-inference policy lives upstream.
//!
//! ## Quoting
//!
//! A field beginning with the open-quote byte extends to the matching close
//! quote; newlines inside are field content. Escapes come in two shapes:
//! a distinct escape byte that un-escapes the following byte, or (when the
//! escape equals the close quote) quote doubling. A field whose close quote
//! is missing, or that carries junk between the close quote and the
//! terminator, is flagged invalid; that is always fatal upstream.
//!
//! ## Whitespace
//!
//! When the delimiter is not space or tab, the two configured whitespace
//! bytes are trimmed from both ends of unquoted content and from around the
//! quotes of quoted content. A delimiter match is attempted before any trim,
//! so a multi-byte delimiter starting with a space keeps winning.
//!
//! ## Dates and Times
//!
//! Civil date arithmetic is hand-rolled: dates are days since 1970-01-01,
//! times are microseconds since midnight, datetimes are microseconds since
//! epoch. ISO 8601 defaults (`YYYY-MM-DD`, `HH:MM:SS[.ffffff]`, and the two
//! joined by `T` or a space) apply unless a `date_format` is configured.
//! Fractional seconds beyond microseconds truncate; timezone offsets are
//! not recognized.

use crate::options::{DateFormat, FormatItem, ReaderOptions};

/// Status flags reported by [`scan_field`].
pub(crate) mod flags {
    /// Field scanned cleanly.
    pub const OK: u8 = 0x01;
    /// Content matched a missing sentinel.
    pub const SENTINEL: u8 = 0x02;
    /// Quoted field was not properly closed.
    pub const INVALID_QUOTE: u8 = 0x04;
    /// Content contains escape sequences.
    pub const ESCAPED: u8 = 0x08;
    /// Terminated by a newline.
    pub const NEWLINE: u8 = 0x10;
    /// Terminated by the delimiter.
    pub const DELIM: u8 = 0x20;
    /// Terminated by end of input.
    pub const EOF: u8 = 0x40;
}

/// One scanned field: content extent, status, and resume position.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScannedField {
    pub flags: u8,
    /// Content start (inside quotes, past leading whitespace).
    pub pos: usize,
    /// Content byte length (before the close quote / trailing whitespace).
    pub len: usize,
    /// Absolute position just past the terminator; where the next field or
    /// row begins.
    pub next: usize,
}

impl ScannedField {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Length of a delimiter match at `i`, or `None`.
#[inline]
pub(crate) fn delimiter_at(buf: &[u8], i: usize, end: usize, delim: &[u8]) -> Option<usize> {
    if i + delim.len() <= end && &buf[i..i + delim.len()] == delim {
        Some(delim.len())
    } else {
        None
    }
}

/// Scans one field starting at `start`, stopping before `end`.
///
/// `delim` is the resolved delimiter bytes; it is passed explicitly so the
/// layout detector can probe candidate delimiters with the same scanner.
pub(crate) fn scan_field(
    buf: &[u8],
    start: usize,
    end: usize,
    opts: &ReaderOptions,
    delim: &[u8],
) -> ScannedField {
    let trims = opts.trims_whitespace();
    let is_ws = |b: u8| b == opts.wspace1 || b == opts.wspace2;

    let mut i = start;
    while i < end && trims && is_ws(buf[i]) && delimiter_at(buf, i, end, delim).is_none() {
        i += 1;
    }

    if i < end && buf[i] == opts.open_quote {
        scan_quoted(buf, i + 1, end, opts, delim)
    } else {
        scan_unquoted(buf, i, end, opts, delim)
    }
}

fn scan_unquoted(
    buf: &[u8],
    content_start: usize,
    end: usize,
    opts: &ReaderOptions,
    delim: &[u8],
) -> ScannedField {
    let trims = opts.trims_whitespace();
    let is_ws = |b: u8| b == opts.wspace1 || b == opts.wspace2;

    let mut j = content_start;
    let mut term = flags::EOF;
    let mut next = end;

    while j < end {
        if let Some(dlen) = delimiter_at(buf, j, end, delim) {
            term = flags::DELIM;
            next = consume_repeats(buf, j + dlen, end, opts, delim);
            break;
        }
        match buf[j] {
            b'\n' => {
                term = flags::NEWLINE;
                next = j + 1;
                break;
            }
            b'\r' => {
                term = flags::NEWLINE;
                next = if j + 1 < end && buf[j + 1] == b'\n' { j + 2 } else { j + 1 };
                break;
            }
            _ => j += 1,
        }
    }

    let mut content_end = j;
    while trims && content_end > content_start && is_ws(buf[content_end - 1]) {
        content_end -= 1;
    }

    let len = content_end - content_start;
    let mut f = flags::OK | term;
    if opts.is_sentinel(&buf[content_start..content_end]) {
        f |= flags::SENTINEL;
    }

    ScannedField { flags: f, pos: content_start, len, next }
}

fn scan_quoted(
    buf: &[u8],
    content_start: usize,
    end: usize,
    opts: &ReaderOptions,
    delim: &[u8],
) -> ScannedField {
    let trims = opts.trims_whitespace();
    let is_ws = |b: u8| b == opts.wspace1 || b == opts.wspace2;
    let doubled = opts.escape == opts.close_quote;

    let mut j = content_start;
    let mut escaped = false;
    let close = loop {
        if j >= end {
            // Ran off the input with the quote still open.
            let mut f = flags::INVALID_QUOTE | flags::EOF;
            if escaped {
                f |= flags::ESCAPED;
            }
            return ScannedField {
                flags: f,
                pos: content_start,
                len: end - content_start,
                next: end,
            };
        }
        let b = buf[j];
        if !doubled && b == opts.escape && j + 1 < end {
            escaped = true;
            j += 2;
            continue;
        }
        if b == opts.close_quote {
            if doubled && j + 1 < end && buf[j + 1] == opts.close_quote {
                escaped = true;
                j += 2;
                continue;
            }
            break j;
        }
        j += 1;
    };

    let len = close - content_start;

    // From past the close quote to the terminator: whitespace is fine,
    // anything else invalidates the field.
    let mut k = close + 1;
    let mut term = flags::EOF;
    let mut next = end;
    let mut junk = false;
    while k < end {
        if let Some(dlen) = delimiter_at(buf, k, end, delim) {
            term = flags::DELIM;
            next = consume_repeats(buf, k + dlen, end, opts, delim);
            break;
        }
        match buf[k] {
            b'\n' => {
                term = flags::NEWLINE;
                next = k + 1;
                break;
            }
            b'\r' => {
                term = flags::NEWLINE;
                next = if k + 1 < end && buf[k + 1] == b'\n' { k + 2 } else { k + 1 };
                break;
            }
            b if trims && is_ws(b) => k += 1,
            _ => {
                junk = true;
                k += 1;
            }
        }
    }

    let mut f = term;
    if junk {
        f |= flags::INVALID_QUOTE;
    } else {
        f |= flags::OK;
    }
    if escaped {
        f |= flags::ESCAPED;
    }
    if !junk && opts.is_sentinel(&buf[content_start..close]) {
        f |= flags::SENTINEL;
    }

    ScannedField { flags: f, pos: content_start, len, next }
}

/// With `ignore_repeated`, collapses a run of delimiters into one.
#[inline]
fn consume_repeats(
    buf: &[u8],
    mut i: usize,
    end: usize,
    opts: &ReaderOptions,
    delim: &[u8],
) -> usize {
    if opts.ignore_repeated {
        while let Some(dlen) = delimiter_at(buf, i, end, delim) {
            i += dlen;
        }
    }
    i
}

/// Expands escape sequences in `content` into `out`. `out` is cleared first.
pub(crate) fn unescape(content: &[u8], escape: u8, out: &mut Vec<u8>) {
    out.clear();
    let mut i = 0;
    while i < content.len() {
        if content[i] == escape && i + 1 < content.len() {
            out.push(content[i + 1]);
            i += 2;
        } else {
            out.push(content[i]);
            i += 1;
        }
    }
}

// ── Typed content parsers ──────────────────────────────────────────

pub(crate) fn parse_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse::<i64>().ok()
}

pub(crate) fn parse_float(bytes: &[u8], decimal: u8) -> Option<f64> {
    if bytes.is_empty() {
        return None;
    }
    if decimal == b'.' {
        return std::str::from_utf8(bytes).ok()?.parse::<f64>().ok();
    }
    // Translate the configured decimal byte before conversion; a literal
    // '.' alongside a non-'.' decimal byte is a mismatch.
    if bytes.contains(&b'.') {
        return None;
    }
    let translated: Vec<u8> = bytes
        .iter()
        .map(|&b| if b == decimal { b'.' } else { b })
        .collect();
    std::str::from_utf8(&translated).ok()?.parse::<f64>().ok()
}

pub(crate) fn parse_bool(bytes: &[u8], opts: &ReaderOptions) -> Option<bool> {
    if opts.true_strings.iter().any(|s| s.as_slice() == bytes) {
        Some(true)
    } else if opts.false_strings.iter().any(|s| s.as_slice() == bytes) {
        Some(false)
    } else {
        None
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

fn days_since_epoch(year: i32, month: u32, day: u32) -> i32 {
    let mut days: i32 = 0;

    if year >= 1970 {
        for y in 1970..year {
            days += if is_leap_year(y) { 366 } else { 365 };
        }
    } else {
        for y in year..1970 {
            days -= if is_leap_year(y) { 366 } else { 365 };
        }
    }

    for m in 1..month {
        days += days_in_month(year, m) as i32;
    }

    days + day as i32 - 1
}

fn parse_digits(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return None;
    }
    let mut v: i64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?.checked_add((b - b'0') as i64)?;
    }
    Some(v)
}

fn make_date(year: i64, month: i64, day: i64) -> Option<i32> {
    let (year, month, day) = (year as i32, month as u32, day as u32);
    if !(1..=12).contains(&month) {
        return None;
    }
    if day < 1 || day > days_in_month(year, month) {
        return None;
    }
    Some(days_since_epoch(year, month, day))
}

fn make_time(hour: i64, minute: i64, second: i64, micros: i64) -> Option<i64> {
    if !(0..=23).contains(&hour) || !(0..=59).contains(&minute) || !(0..=59).contains(&second) {
        return None;
    }
    Some((hour * 3600 + minute * 60 + second) * 1_000_000 + micros)
}

/// `YYYY-MM-DD` → days since 1970-01-01.
pub(crate) fn parse_date_iso(bytes: &[u8]) -> Option<i32> {
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let year = parse_digits(&bytes[0..4])?;
    let month = parse_digits(&bytes[5..7])?;
    let day = parse_digits(&bytes[8..10])?;
    make_date(year, month, day)
}

/// `HH:MM:SS[.ffffff]` → microseconds since midnight.
pub(crate) fn parse_time_iso(bytes: &[u8]) -> Option<i64> {
    if bytes.len() < 8 || bytes[2] != b':' || bytes[5] != b':' {
        return None;
    }
    let hour = parse_digits(&bytes[0..2])?;
    let minute = parse_digits(&bytes[3..5])?;
    let second = parse_digits(&bytes[6..8])?;
    let micros = if bytes.len() > 8 {
        if bytes[8] != b'.' || bytes.len() == 9 {
            return None;
        }
        parse_fraction_micros(&bytes[9..])?
    } else {
        0
    };
    make_time(hour, minute, second, micros)
}

/// Fractional-second digits → microseconds, truncating past six digits.
fn parse_fraction_micros(bytes: &[u8]) -> Option<i64> {
    let mut v: i64 = 0;
    let mut digits = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        if digits < 6 {
            v = v * 10 + (b - b'0') as i64;
            digits += 1;
        }
    }
    while digits < 6 {
        v *= 10;
        digits += 1;
    }
    Some(v)
}

const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

/// `YYYY-MM-DD[T ]HH:MM:SS[.ffffff]` → microseconds since epoch.
pub(crate) fn parse_datetime_iso(bytes: &[u8]) -> Option<i64> {
    if bytes.len() < 19 || (bytes[10] != b'T' && bytes[10] != b' ') {
        return None;
    }
    let days = parse_date_iso(&bytes[0..10])?;
    let micros = parse_time_iso(&bytes[11..])?;
    Some(days as i64 * MICROS_PER_DAY + micros)
}

/// Parses content against a compiled `date_format`, producing the raw value
/// bits for the format's logical type.
pub(crate) fn parse_with_format(bytes: &[u8], fmt: &DateFormat) -> Option<u64> {
    let mut i = 0;
    let (mut year, mut month, mut day) = (1970i64, 1i64, 1i64);
    let (mut hour, mut minute, mut second) = (0i64, 0i64, 0i64);

    for item in &fmt.items {
        match item {
            FormatItem::Year4 => {
                year = parse_digits(bytes.get(i..i + 4)?)?;
                i += 4;
            }
            FormatItem::Month2 => {
                month = parse_digits(bytes.get(i..i + 2)?)?;
                i += 2;
            }
            FormatItem::Day2 => {
                day = parse_digits(bytes.get(i..i + 2)?)?;
                i += 2;
            }
            FormatItem::Hour2 => {
                hour = parse_digits(bytes.get(i..i + 2)?)?;
                i += 2;
            }
            FormatItem::Minute2 => {
                minute = parse_digits(bytes.get(i..i + 2)?)?;
                i += 2;
            }
            FormatItem::Second2 => {
                second = parse_digits(bytes.get(i..i + 2)?)?;
                i += 2;
            }
            FormatItem::Literal(b) => {
                if bytes.get(i) != Some(b) {
                    return None;
                }
                i += 1;
            }
        }
    }
    if i != bytes.len() {
        return None;
    }

    use crate::types::LogicalType;
    match fmt.kind {
        LogicalType::Date => make_date(year, month, day).map(|d| d as i64 as u64),
        LogicalType::Time => make_time(hour, minute, second, 0).map(|t| t as u64),
        LogicalType::DateTime => {
            let days = make_date(year, month, day)?;
            let micros = make_time(hour, minute, second, 0)?;
            Some((days as i64 * MICROS_PER_DAY + micros) as u64)
        }
        _ => None,
    }
}
