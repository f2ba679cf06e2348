//! Adaptive row-batch sizing for hostname expansion.
//!
//! A batch of `ips` rows explodes into an unpredictable number of
//! `(ip_id, hostname)` pairs. [`search_batch`] looks for a row count whose
//! expanded size lands in `[min_expanded, max_expanded]`, and
//! [`ChunkPlanner`] tracks the offset and the next starting size across
//! chunks, including fan-out rejections.

pub const DEFAULT_ROW_BATCH: usize = 20_000;
pub const MIN_HOSTNAME_BATCH: usize = 40_000;
pub const MAX_HOSTNAME_BATCH: usize = 100_000;
pub const MAX_ROW_BATCH: usize = 250_000;
pub const MAX_PRIMARY_DOMAINS: usize = 60_000;
pub const DOMAIN_INSERT_GROUP: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub default_rows: usize,
    pub min_expanded: usize,
    pub max_expanded: usize,
    /// Hard ceiling on rows per batch.
    pub max_rows: usize,
    pub max_primary_domains: usize,
    pub insert_group: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        BatchLimits {
            default_rows: DEFAULT_ROW_BATCH,
            min_expanded: MIN_HOSTNAME_BATCH,
            max_expanded: MAX_HOSTNAME_BATCH,
            max_rows: MAX_ROW_BATCH,
            max_primary_domains: MAX_PRIMARY_DOMAINS,
            insert_group: DOMAIN_INSERT_GROUP,
        }
    }
}

/// Outcome of reading `size` rows at the current offset.
#[derive(Debug)]
pub struct Probe<T> {
    /// Rows actually read; fewer than requested means the table ran out.
    pub rows: usize,
    pub expanded: usize,
    pub payload: T,
}

#[derive(Debug)]
pub struct Accepted<T> {
    pub size: usize,
    pub rows: usize,
    pub expanded: usize,
    pub payload: T,
    pub attempts: usize,
}

fn accepted<T>(size: usize, probe: Probe<T>, attempts: usize) -> Accepted<T> {
    Accepted { size, rows: probe.rows, expanded: probe.expanded, payload: probe.payload, attempts }
}

fn shrink(size: usize) -> usize {
    (size * 4 / 5).clamp(1, size - 1)
}

fn grow(size: usize) -> usize {
    size + size / 4 + 1
}

/// Bisection-like search for a batch size whose expansion fits the band.
///
/// Stops when the expansion is within `[min_expanded, max_expanded]`, when
/// the size is saturated at `ceiling` (or the table ran out) with an
/// expansion at most `max_expanded`, or when no integer size lies between a
/// known undersized and a known oversized batch, in which case the undersized
/// one is accepted. A single row is accepted even if it alone exceeds the
/// band. Expansion is assumed monotone in the batch size, which holds for
/// prefixes of a table.
pub fn search_batch<T, E, F>(start: usize, ceiling: usize, limits: &BatchLimits, mut probe: F) -> Result<Accepted<T>, E>
where
    F: FnMut(usize) -> Result<Probe<T>, E>,
{
    let ceiling = ceiling.max(1);
    let mut size = start.clamp(1, ceiling);
    let mut undersized: Option<Accepted<T>> = None;
    let mut oversized: Option<usize> = None;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let result = probe(size)?;

        if result.expanded > limits.max_expanded {
            if size == 1 {
                return Ok(accepted(size, result, attempts));
            }
            oversized = Some(size);
            let next = match &undersized {
                Some(lo) => lo.size + (size - lo.size) / 2,
                None => shrink(size),
            };
            if let Some(lo) = undersized.take() {
                if next <= lo.size {
                    return Ok(Accepted { attempts, ..lo });
                }
                undersized = Some(lo);
            }
            size = next;
            continue;
        }

        let exhausted = result.rows < size;
        if result.expanded >= limits.min_expanded || exhausted || size >= ceiling {
            return Ok(accepted(size, result, attempts));
        }

        let next = match oversized {
            Some(hi) => size + (hi - size) / 2,
            None => grow(size).min(ceiling),
        };
        if next <= size {
            return Ok(accepted(size, result, attempts));
        }
        undersized = Some(accepted(size, result, attempts));
        size = next;
    }
}

/// Offset bookkeeping across chunks.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    limits: BatchLimits,
    total: u64,
    offset: u64,
    /// Last `ips.id` consumed; keyset cursor matching `offset`.
    last_id: i64,
    hint: usize,
    ceiling: usize,
}

impl ChunkPlanner {
    pub fn new(total: u64, limits: BatchLimits) -> Self {
        ChunkPlanner {
            limits,
            total,
            offset: 0,
            last_id: 0,
            hint: limits.default_rows + limits.default_rows / 4,
            ceiling: limits.max_rows,
        }
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.total
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn last_id(&self) -> i64 {
        self.last_id
    }

    /// Batch size the next search starts from.
    pub fn hint(&self) -> usize {
        self.hint
    }

    /// Largest batch size the next search may try.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Whether a chunk with this many distinct primary domains must be
    /// retried smaller. A single row is never rejected.
    pub fn exceeds_fan_out(&self, size: usize, distinct_domains: usize) -> bool {
        size > 1 && distinct_domains > self.limits.max_primary_domains
    }

    pub fn accept(&mut self, size: usize, rows: usize, last_id: i64) {
        self.offset = (self.offset + rows as u64).min(self.total);
        self.last_id = last_id;
        self.hint = size.max(1);
        self.ceiling = self.limits.max_rows;
    }

    /// Leaves the offset untouched; the retry at this offset is capped below
    /// the rejected size. Returns the new starting size.
    pub fn reject(&mut self, size: usize) -> usize {
        let upper = size.saturating_sub(1).max(1);
        let next = (size * 7 / 10).clamp(1, upper);
        self.hint = next;
        self.ceiling = next;
        next
    }
}
