//! # Parallel Parse Coordination
//!
//! Fork-join parsing: the data range is cut into N byte slices aligned to
//! row boundaries, each worker runs the ordinary slice parser, and a merge
//! step concatenates the per-worker tapes into one result.
//!
//! ## Boundary Alignment
//!
//! A naive byte split can land inside a field, a quoted region, or a row.
//! Each candidate boundary is moved forward to the next newline and
//! validated by test-parsing one row and comparing its field count against
//! the expected column count; successive newlines are probed up to a limit.
//! If any boundary cannot be validated (for instance a quoted region
//! spanning the whole slice) the plan is abandoned and the caller parses
//! single-threaded.
//!
//! ## Shared State
//!
//! Workers share only the input buffer (read-only) and the atomic column
//! type vector, where promotions move monotonically up the lattice. Pool
//! maps, tapes, and warnings are thread-local until the merge.
//!
//! ## Merge
//!
//! Rows concatenate in thread order, so output order is file order and
//! repeated runs are deterministic. For each pooled column, thread 1's map
//! seeds the merged pool; other threads' keys are walked in ref (insertion)
//! order, assigning fresh refs to new keys and recording an old→new
//! re-coding vector per thread. The final fan-out copies each thread's
//! slots into their offsets in the master tapes, rewriting pooled value
//! slots through the re-coding vectors on the way.

use eyre::Result;
use memchr::memchr;

use crate::config::BOUNDARY_PROBE_LIMIT;
use crate::layout::count_fields;
use crate::pool::StringPool;
use crate::reader::{parse_slice, ParseContext, ParseOutput};
use crate::tape::{self, ColumnTape};
use crate::types::TypeCode;

/// Moves `candidate` forward to the start of a row whose field count
/// matches `ncols`. Probes successive newlines up to a limit.
fn align_boundary(ctx: &ParseContext<'_>, candidate: usize, end: usize) -> Option<usize> {
    let mut pos = candidate;
    for _ in 0..BOUNDARY_PROBE_LIMIT {
        let Some(newline) = memchr(b'\n', &ctx.buf[pos..end]) else {
            // No further newline: the remainder belongs to the previous slice.
            return Some(end);
        };
        let row_start = pos + newline + 1;
        if row_start >= end {
            return Some(end);
        }
        let (fields, _) = count_fields(ctx.buf, row_start, end, ctx.opts, ctx.delim);
        if fields == ctx.ncols {
            return Some(row_start);
        }
        pos = row_start;
    }
    None
}

/// Splits `[start, end)` into `nthreads` row-aligned slices. `None` when a
/// boundary cannot be validated.
fn plan_slices(
    ctx: &ParseContext<'_>,
    start: usize,
    end: usize,
    nthreads: usize,
) -> Option<Vec<(usize, usize)>> {
    let span = end - start;
    let mut bounds = Vec::with_capacity(nthreads + 1);
    bounds.push(start);
    for i in 1..nthreads {
        let candidate = start + span * i / nthreads;
        let aligned = align_boundary(ctx, candidate.max(*bounds.last().unwrap()), end)?;
        bounds.push(aligned.max(*bounds.last().unwrap()));
    }
    bounds.push(end);
    Some(bounds.windows(2).map(|w| (w[0], w[1])).collect())
}

/// Parses `[start, end)` with `nthreads` workers and merges the results.
/// Returns `Ok(None)` when no row-aligned split exists; the caller then
/// falls back to the single-threaded path.
pub(crate) fn parse_parallel(
    ctx: &ParseContext<'_>,
    start: usize,
    end: usize,
    nthreads: usize,
) -> Result<Option<ParseOutput>> {
    let Some(slices) = plan_slices(ctx, start, end, nthreads) else {
        return Ok(None);
    };

    let results: Vec<Result<ParseOutput>> = std::thread::scope(|scope| {
        let handles: Vec<_> = slices
            .iter()
            .map(|&(lo, hi)| scope.spawn(move || parse_slice(ctx, lo, hi, None)))
            .collect();
        handles.into_iter().map(|h| h.join().expect("parse worker panicked")).collect()
    });

    // Surface the first error in thread order; later workers completed
    // their slices regardless.
    let mut outputs = Vec::with_capacity(results.len());
    for result in results {
        outputs.push(result?);
    }

    Ok(Some(merge(ctx, outputs)))
}

/// Concatenates worker outputs in thread order.
fn merge(ctx: &ParseContext<'_>, mut outputs: Vec<ParseOutput>) -> ParseOutput {
    let ncols = ctx.ncols;
    let total_rows: usize = outputs.iter().map(|o| o.rows).sum();
    let final_types = ctx.types.snapshot();

    // Row offset of each worker's slice in the merged result.
    let mut bases = Vec::with_capacity(outputs.len());
    let mut acc = 0;
    for out in &outputs {
        bases.push(acc);
        acc += out.rows;
    }

    // Merge warnings in thread order, rebasing worker-local row numbers.
    let mut warnings = Vec::new();
    let mut truncated = false;
    for (out, &base) in outputs.iter_mut().zip(&bases) {
        truncated |= out.truncated_warnings;
        for mut w in out.warnings.drain(..) {
            if warnings.len() >= ctx.opts.max_warnings {
                truncated = true;
                break;
            }
            w.row += base;
            warnings.push(w);
        }
    }

    // Merge pooled columns: thread 1's map is the base; other threads'
    // keys are walked in insertion order and re-coded.
    let mut merged_pools: Vec<Option<StringPool>> = (0..ncols).map(|_| None).collect();
    let mut recodes: Vec<Vec<Vec<u64>>> = vec![Vec::new(); outputs.len()];

    for col in 0..ncols {
        if !final_types[col].is(TypeCode::POOL) {
            for recode in &mut recodes {
                recode.push(Vec::new());
            }
            continue;
        }
        let mut master = StringPool::new();
        for (out, recode) in outputs.iter_mut().zip(&mut recodes) {
            let mapping: Vec<u64> = match out.pools[col].take() {
                Some(pool) => {
                    pool.into_refs().iter().map(|key| master.intern(key)).collect()
                }
                None => Vec::new(),
            };
            recode.push(mapping);
        }
        merged_pools[col] = Some(master);
    }

    // Assemble the master tapes and hand each worker a disjoint chunk of
    // every column, then fan the copy back out across threads.
    let mut tapes: Vec<ColumnTape> = (0..ncols).map(|_| ColumnTape::default()).collect();
    for tape in &mut tapes {
        tape.resize_rows(total_rows);
    }

    let mut chunks: Vec<Vec<&mut [u64]>> = (0..outputs.len()).map(|_| Vec::new()).collect();
    for tape in &mut tapes {
        let mut rest = tape.slots_mut();
        for (w, out) in outputs.iter().enumerate() {
            let (head, tail) = rest.split_at_mut(out.rows * 2);
            chunks[w].push(head);
            rest = tail;
        }
    }

    std::thread::scope(|scope| {
        for ((out, chunk), recode) in outputs.iter().zip(chunks).zip(&recodes) {
            scope.spawn(move || copy_slice(out, chunk, recode));
        }
    });

    ParseOutput {
        tapes,
        pools: merged_pools,
        rows: total_rows,
        warnings,
        truncated_warnings: truncated,
    }
}

/// Copies one worker's slots into its region of the master tapes,
/// rewriting pooled refs through the re-coding vector.
fn copy_slice(out: &ParseOutput, chunks: Vec<&mut [u64]>, recodes: &[Vec<u64>]) {
    for (col, dest) in chunks.into_iter().enumerate() {
        let src = out.tapes[col].slots();
        let recode = &recodes[col];
        if recode.is_empty() {
            dest.copy_from_slice(src);
            continue;
        }
        for row in 0..out.tapes[col].rows() {
            let poslen = src[row * 2];
            let value = src[row * 2 + 1];
            dest[row * 2] = poslen;
            dest[row * 2 + 1] = if tape::is_missing(poslen) {
                value
            } else {
                recode[value as usize - 1]
            };
        }
    }
}
