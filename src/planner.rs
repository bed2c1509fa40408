//! Partition planner.
//!
//! Splits an ordered table list into at most `max_groups` contiguous, balanced groups.
//! With `n` tables and `g = min(n, max_groups)` groups, the first `n % g` groups get
//! `ceil(n / g)` tables and the rest `floor(n / g)`. Concatenating the groups in order
//! gives back the input, so the same inputs always produce the same assignment.

/// Group `tables` into `min(tables.len(), max_groups)` balanced contiguous slices.
/// Zero tables or `max_groups == 0` yields no groups.
pub fn plan<T: Clone>(tables: &[T], max_groups: usize) -> Vec<Vec<T>> {
    let n = tables.len();
    let groups = n.min(max_groups);
    if groups == 0 {
        return Vec::new();
    }
    let base = n / groups;
    let larger = n % groups;

    let mut out = Vec::with_capacity(groups);
    let mut start = 0usize;
    for i in 0..groups {
        let size = if i < larger { base + 1 } else { base };
        out.push(tables[start..start + size].to_vec());
        start += size;
    }
    debug_assert_eq!(start, n);
    out
}

/// Group sizes `plan` would produce, without materializing the groups.
pub fn group_sizes(n: usize, max_groups: usize) -> Vec<usize> {
    let groups = n.min(max_groups);
    if groups == 0 {
        return Vec::new();
    }
    (0..groups).map(|i| n / groups + usize::from(i < n % groups)).collect()
}
