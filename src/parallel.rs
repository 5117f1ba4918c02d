//! Work partitioning over rayon.
//!
//! Every parallel operation in the crate follows the same protocol: partition
//! the work items into contiguous per-thread ranges, run one task per range,
//! join, then combine the per-range results in range order. Combining in range
//! order (never in completion order) keeps reductions deterministic for a given
//! partition.

use std::ops::Range;

use rayon::prelude::*;

/// Partition `count` indivisible work items into per-thread loads.
///
/// No thread receives fewer than `overhead_limit` items (except when `count`
/// itself is smaller), and at most `max_threads` loads are produced. A
/// `max_threads` of zero means "as many threads as the rayon pool has".
/// The remainder of the division is spread one item at a time over the first
/// loads, so loads differ by at most one item.
pub fn optimal_thread_loads(count: usize, overhead_limit: usize, max_threads: usize) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }
    let available = if max_threads == 0 {
        rayon::current_num_threads()
    } else {
        max_threads.min(rayon::current_num_threads().max(1))
    }
    .max(1);
    let overhead_limit = overhead_limit.max(1);
    let threads = available.min((count / overhead_limit).max(1));

    let base = count / threads;
    let extra = count % threads;
    (0..threads).map(|i| base + usize::from(i < extra)).collect()
}

/// Contiguous index ranges corresponding to [`optimal_thread_loads`].
pub fn thread_ranges(count: usize, overhead_limit: usize, max_threads: usize) -> Vec<Range<usize>> {
    let mut start = 0;
    optimal_thread_loads(count, overhead_limit, max_threads)
        .into_iter()
        .map(|load| {
            let range = start..start + load;
            start += load;
            range
        })
        .collect()
}

/// Run `f` once per thread range and return the results in range order.
pub fn map_ranges<T, F>(count: usize, overhead_limit: usize, max_threads: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(Range<usize>) -> T + Sync + Send,
{
    let ranges = thread_ranges(count, overhead_limit, max_threads);
    if ranges.len() <= 1 {
        return ranges.into_iter().map(f).collect();
    }
    ranges.into_par_iter().map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_cover_count_exactly() {
        for count in [1usize, 7, 64, 1000, 12345] {
            let loads = optimal_thread_loads(count, 16, 0);
            assert_eq!(loads.iter().sum::<usize>(), count);
            let max = *loads.iter().max().unwrap();
            let min = *loads.iter().min().unwrap();
            assert!(max - min <= 1);
        }
        assert!(optimal_thread_loads(0, 16, 0).is_empty());
    }

    #[test]
    fn overhead_limit_bounds_thread_count() {
        let loads = optimal_thread_loads(100, 40, 64);
        assert!(loads.len() <= 2, "got {} loads", loads.len());
        assert!(loads.iter().all(|&l| l >= 40));
        assert_eq!(optimal_thread_loads(5, 40, 0), vec![5]);
    }

    #[test]
    fn ranges_are_contiguous_and_ordered() {
        let sums = map_ranges(10_000, 100, 0, |r| r.clone().sum::<usize>());
        let total: usize = sums.iter().sum();
        assert_eq!(total, (0..10_000).sum::<usize>());
        let ranges = thread_ranges(10_000, 100, 0);
        for w in ranges.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }
}
