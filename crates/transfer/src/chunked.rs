/// Half-open byte range `[start, end)` into an upload source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Creates a range. `end` is exclusive.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start {start} past end {end}");
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` if the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Splits `[0, total_bytes)` into consecutive ranges of `chunk_size` bytes.
///
/// The last range may be shorter. The ranges are ordered, do not overlap and
/// leave no gaps. A zero `total_bytes` or `chunk_size` yields an empty plan;
/// callers validate both before planning.
pub fn plan_chunks(total_bytes: u64, chunk_size: u64) -> Vec<ByteRange> {
    if total_bytes == 0 || chunk_size == 0 {
        return Vec::new();
    }

    let count = total_bytes.div_ceil(chunk_size);
    let mut ranges = Vec::with_capacity(count as usize);
    let mut start = 0;
    while start < total_bytes {
        let end = start.saturating_add(chunk_size).min(total_bytes);
        ranges.push(ByteRange::new(start, end));
        start = end;
    }
    ranges
}
