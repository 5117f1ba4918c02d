//! Median, order statistics and median absolute deviation.
//!
//! The strategy depends on the sample size:
//!
//! - up to 32 samples, the median is extracted with a Batcher odd–even merge
//!   sorting network generated once from a table;
//! - up to 2,560,000 samples, a copy is partially ordered with
//!   `select_nth_unstable_by`;
//! - larger samples never get copied. Each pass builds per-thread histograms
//!   of [`HISTOGRAM_LENGTH`] buckets over the current search range, sums them
//!   in thread order, and narrows the range to the bucket holding the wanted
//!   order statistic. Once the bucket is small enough its elements are
//!   gathered and selected exactly.
//!
//! MAD and two-sided MAD run the same machinery over derived sequences
//! without materializing them.

use std::sync::OnceLock;

use tracing::debug;

use crate::parallel;

/// Number of buckets per histogram refinement pass.
pub const HISTOGRAM_LENGTH: usize = 8192;

const NETWORK_SIZE: usize = 32;
const SELECT_LIMIT: usize = 2_560_000;
/// Buckets holding this many elements or fewer are resolved by selection.
const EXACT_BUCKET_LIMIT: usize = 2048;
const OVERHEAD_LIMIT: usize = 1 << 16;

/// Numeric sample types accepted by the median engine.
pub trait Sample: Copy + Send + Sync {
    /// Width of the search range below which histogram refinement stops.
    const EPSILON: f64;

    fn to_f64(self) -> f64;
}

macro_rules! impl_integer_sample {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            const EPSILON: f64 = 0.5 / (1u64 << (8 * std::mem::size_of::<$t>())) as f64;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}

impl_integer_sample!(u8, u16, u32, i16, i32);

impl Sample for f32 {
    const EPSILON: f64 = 2.0 * f32::EPSILON as f64;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Sample for f64 {
    const EPSILON: f64 = 2.0 * f64::EPSILON;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

/// Comparators `(i, j)`, `i < j`, of a Batcher odd–even merge sort over 32
/// inputs. A network for `n < 32` inputs is the subset with `j < n`: the
/// omitted comparators only touch padding slots.
fn sorting_network() -> &'static [(u8, u8)] {
    static NETWORK: OnceLock<Vec<(u8, u8)>> = OnceLock::new();
    NETWORK.get_or_init(|| {
        let n = NETWORK_SIZE;
        let mut comparators = Vec::new();
        let mut p = 1;
        while p < n {
            let mut k = p;
            while k >= 1 {
                let mut j = k % p;
                while j + k < n {
                    for i in 0..k.min(n - j - k) {
                        if (i + j) / (2 * p) == (i + j + k) / (2 * p) {
                            comparators.push(((i + j) as u8, (i + j + k) as u8));
                        }
                    }
                    j += 2 * k;
                }
                k /= 2;
            }
            p *= 2;
        }
        comparators
    })
}

fn network_median(values: &[f64]) -> f64 {
    let n = values.len();
    let mut a = [0.0; NETWORK_SIZE];
    a[..n].copy_from_slice(values);
    for &(i, j) in sorting_network() {
        let (i, j) = (i as usize, j as usize);
        if j < n && a[i] > a[j] {
            a.swap(i, j);
        }
    }
    if n % 2 == 1 {
        a[n / 2]
    } else {
        (a[n / 2 - 1] + a[n / 2]) / 2.0
    }
}

/// Median of an owned buffer of at most [`SELECT_LIMIT`] values.
fn buffer_median(mut v: Vec<f64>) -> f64 {
    let n = v.len();
    match n {
        0 => 0.0,
        1..=NETWORK_SIZE => network_median(&v),
        _ => {
            let k = n / 2;
            let (left, upper, _) = v.select_nth_unstable_by(k, f64::total_cmp);
            let upper = *upper;
            if n % 2 == 1 {
                upper
            } else {
                let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (lower + upper) / 2.0
            }
        }
    }
}

/// Number of samples for which `map` yields a value.
fn count_mapped<T, F>(values: &[T], map: &F) -> usize
where
    T: Sample,
    F: Fn(T) -> Option<f64> + Sync,
{
    parallel::map_ranges(values.len(), OVERHEAD_LIMIT, 0, |r| {
        values[r].iter().filter(|&&v| map(v).is_some()).count()
    })
    .into_iter()
    .sum()
}

fn collect_mapped<T, F>(values: &[T], count: usize, map: &F) -> Vec<f64>
where
    T: Sample,
    F: Fn(T) -> Option<f64>,
{
    let mut out = Vec::with_capacity(count);
    out.extend(values.iter().filter_map(|&v| map(v)));
    out
}

/// Median of the `count` mapped values of `values`.
fn mapped_median<T, F>(values: &[T], count: usize, map: &F) -> f64
where
    T: Sample,
    F: Fn(T) -> Option<f64> + Sync,
{
    if count <= SELECT_LIMIT {
        return buffer_median(collect_mapped(values, count, map));
    }
    debug!("Median: histogram refinement over {count} samples");
    let k = count / 2;
    let upper = refine(values, count, k, map, T::EPSILON);
    if count % 2 == 1 {
        upper
    } else {
        (upper + refine(values, count, k - 1, map, T::EPSILON)) / 2.0
    }
}

/// Current histogram search range. Values `v` with `low <= v < high` (or
/// `v <= high` when `closed`) are inside.
#[derive(Debug, Clone, Copy)]
struct Range {
    low: f64,
    high: f64,
    closed: bool,
}

impl Range {
    #[inline]
    fn contains(&self, v: f64) -> bool {
        v >= self.low && (v < self.high || (self.closed && v == self.high))
    }

    #[inline]
    fn boundary(&self, i: usize) -> f64 {
        if i >= HISTOGRAM_LENGTH {
            self.high
        } else {
            self.low + (self.high - self.low) * (i as f64 / HISTOGRAM_LENGTH as f64)
        }
    }

    /// Bucket of an inside value. The estimate from the bucket width is
    /// corrected against the boundaries so that membership is decided by
    /// comparisons alone.
    #[inline]
    fn bucket(&self, v: f64) -> usize {
        let width = self.high - self.low;
        let mut i = (((v - self.low) / width) * HISTOGRAM_LENGTH as f64) as usize;
        i = i.min(HISTOGRAM_LENGTH - 1);
        while i > 0 && v < self.boundary(i) {
            i -= 1;
        }
        while i + 1 < HISTOGRAM_LENGTH && v >= self.boundary(i + 1) {
            i += 1;
        }
        i
    }

    fn sub_range(&self, i: usize) -> Range {
        Range {
            low: self.boundary(i),
            high: self.boundary(i + 1),
            closed: self.closed && i + 1 == HISTOGRAM_LENGTH,
        }
    }
}

/// k-th order statistic (zero based) of the `count` mapped values by parallel
/// histogram refinement.
fn refine<T, F>(values: &[T], count: usize, k: usize, map: &F, epsilon: f64) -> f64
where
    T: Sample,
    F: Fn(T) -> Option<f64> + Sync,
{
    let extremes = parallel::map_ranges(values.len(), OVERHEAD_LIMIT, 0, |r| {
        values[r]
            .iter()
            .filter_map(|&v| map(v))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
    });
    let (min, max) = extremes
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (a, b)| (lo.min(a), hi.max(b)));
    if !(min < max) {
        return if min.is_finite() { min } else { 0.0 };
    }
    if k == 0 {
        return min;
    }
    if k + 1 >= count {
        return max;
    }

    let mut range = Range {
        low: min,
        high: max,
        closed: true,
    };
    let mut passes = 0usize;
    loop {
        passes += 1;
        let partial = parallel::map_ranges(values.len(), OVERHEAD_LIMIT, 0, |r| {
            let mut histogram = vec![0usize; HISTOGRAM_LENGTH];
            let mut below = 0usize;
            for v in values[r].iter().filter_map(|&v| map(v)) {
                if v < range.low {
                    below += 1;
                } else if range.contains(v) {
                    histogram[range.bucket(v)] += 1;
                }
            }
            (histogram, below)
        });
        let mut histogram = vec![0usize; HISTOGRAM_LENGTH];
        let mut below = 0usize;
        for (h, b) in partial {
            below += b;
            for (acc, c) in histogram.iter_mut().zip(h) {
                *acc += c;
            }
        }

        let mut acc = below;
        let mut bucket = HISTOGRAM_LENGTH - 1;
        for (i, &c) in histogram.iter().enumerate() {
            if acc + c > k {
                bucket = i;
                break;
            }
            acc += c;
        }
        let next = range.sub_range(bucket);
        let inside = histogram[bucket];

        if inside <= EXACT_BUCKET_LIMIT {
            let mut gathered: Vec<f64> = values
                .iter()
                .filter_map(|&v| map(v))
                .filter(|&v| next.contains(v))
                .collect();
            let j = (k - acc).min(gathered.len().saturating_sub(1));
            if gathered.is_empty() {
                return next.low;
            }
            let (_, v, _) = gathered.select_nth_unstable_by(j, f64::total_cmp);
            debug!("Median: order statistic {k} resolved after {passes} histogram passes");
            return *v;
        }

        let stalled = !(next.low > range.low || next.high < range.high);
        if next.high - next.low < epsilon || stalled {
            // Every value in the bucket equals the order statistic within
            // epsilon; report an actual sample.
            let lowest = parallel::map_ranges(values.len(), OVERHEAD_LIMIT, 0, |r| {
                values[r]
                    .iter()
                    .filter_map(|&v| map(v))
                    .filter(|&v| next.contains(v))
                    .fold(f64::INFINITY, f64::min)
            })
            .into_iter()
            .fold(f64::INFINITY, f64::min);
            debug!("Median: order statistic {k} converged after {passes} histogram passes");
            return lowest;
        }
        range = next;
    }
}

/// Median of `values`. For an even count, the mean of the two central order
/// statistics. Zero for an empty sample.
pub fn median<T: Sample>(values: &[T]) -> f64 {
    mapped_median(values, values.len(), &|v: T| Some(v.to_f64()))
}

/// The k-th smallest value of `values` (zero based). `k` is clamped to the
/// last index; an empty sample yields zero.
pub fn order_statistic<T: Sample>(values: &[T], k: usize) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let k = k.min(n - 1);
    if n <= SELECT_LIMIT {
        let mut v: Vec<f64> = values.iter().map(|v| v.to_f64()).collect();
        let (_, x, _) = v.select_nth_unstable_by(k, f64::total_cmp);
        return *x;
    }
    refine(values, n, k, &|v: T| Some(v.to_f64()), T::EPSILON)
}

/// The k-th smallest value computed by histogram refinement regardless of the
/// sample size.
pub fn histogram_order_statistic<T: Sample>(values: &[T], k: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let k = k.min(values.len() - 1);
    refine(values, values.len(), k, &|v: T| Some(v.to_f64()), T::EPSILON)
}

/// Median absolute deviation from `center`.
pub fn mad<T: Sample>(values: &[T], center: f64) -> f64 {
    mapped_median(values, values.len(), &|v: T| Some((v.to_f64() - center).abs()))
}

/// Medians of the absolute deviations from `center` of the samples below or at
/// `center` and of the samples above it, in that order.
pub fn two_sided_mad<T: Sample>(values: &[T], center: f64) -> (f64, f64) {
    let low = |v: T| {
        let x = v.to_f64();
        (x <= center).then(|| center - x)
    };
    let high = |v: T| {
        let x = v.to_f64();
        (x > center).then(|| x - center)
    };
    let n_low = count_mapped(values, &low);
    let n_high = values.len() - n_low;
    (
        mapped_median(values, n_low, &low),
        mapped_median(values, n_high, &high),
    )
}
