/// Robust background estimation: iterative sigma-clipped statistics.

use tracing::debug;

/// Statistics of a grid after iterative outlier rejection.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BackgroundStats {
    pub mean: f32,
    pub median: f32,
    /// Always >= 0; exactly 0 for a degenerate (all-identical) grid.
    pub std_dev: f32,
}

impl BackgroundStats {
    fn zero() -> Self {
        BackgroundStats {
            mean: 0.0,
            median: 0.0,
            std_dev: 0.0,
        }
    }
}

const MAX_CLIP_ITERS: usize = 10;

/// Estimate background level and noise of an intensity grid.
///
/// Iteratively recomputes median and standard deviation over the finite
/// samples, discarding samples farther than `sigma_clip` standard deviations
/// from the current median, until the sample set is stable or the iteration
/// bound is hit. A real point source covering a minority of the grid does
/// not bias the result.
pub fn estimate_background(data: &[f32], sigma_clip: f32) -> BackgroundStats {
    let mut samples: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
    sigma_clipped_stats(&mut samples, sigma_clip)
}

/// Iterative sigma clipping over a working sample set (consumed in place).
pub(crate) fn sigma_clipped_stats(samples: &mut Vec<f32>, sigma_clip: f32) -> BackgroundStats {
    if samples.is_empty() {
        return BackgroundStats::zero();
    }

    let mut iterations = 0;
    for _ in 0..MAX_CLIP_ITERS {
        let median = find_median(samples);
        let std = std_dev(samples);
        // Inclusive bounds: the median itself always survives, so a
        // zero-spread set converges instead of clipping to nothing.
        let lo = median - sigma_clip * std;
        let hi = median + sigma_clip * std;

        let before = samples.len();
        samples.retain(|&v| v >= lo && v <= hi);
        iterations += 1;
        if samples.len() == before {
            break;
        }
    }

    let stats = BackgroundStats {
        mean: mean(samples),
        median: find_median(samples),
        std_dev: std_dev(samples),
    };
    debug!(
        iterations,
        remaining = samples.len(),
        background = stats.median,
        noise = stats.std_dev,
        "sigma clipping converged"
    );
    stats
}

/// Replace every non-finite sample with the median of the finite ones.
/// Returns the number of samples replaced.
pub fn fill_non_finite(data: &mut [f32]) -> usize {
    let mut finite: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() == data.len() {
        return 0;
    }

    let fill = if finite.is_empty() {
        0.0
    } else {
        find_median(&mut finite)
    };

    let mut replaced = 0;
    for v in data.iter_mut() {
        if !v.is_finite() {
            *v = fill;
            replaced += 1;
        }
    }
    replaced
}

fn mean(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let sum: f64 = data.iter().map(|&v| v as f64).sum();
    (sum / data.len() as f64) as f32
}

fn std_dev(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data) as f64;
    let sum_sq: f64 = data
        .iter()
        .map(|&v| {
            let d = v as f64 - m;
            d * d
        })
        .sum();
    ((sum_sq / data.len() as f64).sqrt()) as f32
}

/// Median via quickselect (upper median for even lengths, in place).
pub(crate) fn find_median(data: &mut [f32]) -> f32 {
    match data.len() {
        0 => 0.0,
        1 => data[0],
        2 => data[0].max(data[1]),
        _ => quickselect(data, data.len() / 2),
    }
}

/// Quickselect: find k-th smallest element (in-place, modifies slice).
fn quickselect(arr: &mut [f32], k: usize) -> f32 {
    let mut left = 0usize;
    let mut right = arr.len() - 1;

    while left < right {
        if right - left == 1 {
            if arr[left] > arr[right] {
                arr.swap(left, right);
            }
            return arr[k];
        }

        let mid = left + (right - left) / 2;

        // Median-of-three pivot
        if arr[mid] < arr[left] {
            arr.swap(left, mid);
        }
        if arr[right] < arr[left] {
            arr.swap(left, right);
        }
        if arr[right] < arr[mid] {
            arr.swap(mid, right);
        }

        let pivot = arr[mid];

        // Move pivot to right-1
        arr.swap(mid, right - 1);

        // Partition
        let mut i = left;
        let mut j = right - 1;

        loop {
            i += 1;
            while arr[i] < pivot {
                i += 1;
            }
            j -= 1;
            while arr[j] > pivot {
                j -= 1;
            }
            if i >= j {
                break;
            }
            arr.swap(i, j);
        }

        // Restore pivot
        arr.swap(i, right - 1);

        if i == k {
            return arr[k];
        } else if i > k {
            right = i - 1;
        } else {
            left = i + 1;
        }
    }

    arr[k]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic N(0, sigma) samples via LCG + Box-Muller.
    fn gaussian_samples(n: usize, mut rng: u64, sigma: f32) -> Vec<f32> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
            let u1 = ((rng >> 11) as f64 / (1u64 << 53) as f64).max(1e-15);
            rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
            let u2 = (rng >> 11) as f64 / (1u64 << 53) as f64;
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            out.push(sigma * z as f32);
        }
        out
    }

    #[test]
    fn test_outlier_resistance() {
        // 95% N(0, 1), 5% extreme outliers at 100 sigma
        let mut data = gaussian_samples(9500, 42, 1.0);
        data.extend(std::iter::repeat(100.0f32).take(500));

        // The naive standard deviation is dominated by the outliers
        let naive = std_dev(&data);
        assert!(naive > 10.0, "naive std {} should be >> 1", naive);

        let stats = estimate_background(&data, 3.0);
        assert!(stats.median.abs() < 0.1, "median {} should be ~0", stats.median);
        assert!(
            (stats.std_dev - 1.0).abs() < 0.1,
            "robust std {} should be within 10% of 1",
            stats.std_dev
        );
    }

    #[test]
    fn test_pure_gaussian() {
        let data = gaussian_samples(20000, 7, 1.0);
        let stats = estimate_background(&data, 3.0);
        // 3-sigma clipping of a pure Gaussian trims the tails slightly
        assert!(stats.std_dev > 0.9 && stats.std_dev < 1.0, "std: {}", stats.std_dev);
        assert!(stats.mean.abs() < 0.05, "mean: {}", stats.mean);
    }

    #[test]
    fn test_degenerate_grid_has_zero_std() {
        let data = vec![3.5f32; 400];
        let stats = estimate_background(&data, 3.0);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.median, 3.5);
        assert_eq!(stats.mean, 3.5);
    }

    #[test]
    fn test_empty_grid() {
        let stats = estimate_background(&[], 3.0);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.median, 0.0);
    }

    #[test]
    fn test_fill_non_finite() {
        let mut data = vec![1.0, f32::NAN, 3.0, f32::INFINITY, 2.0, f32::NEG_INFINITY];
        let replaced = fill_non_finite(&mut data);
        assert_eq!(replaced, 3);
        // Median of [1, 3, 2] with upper-median convention is 2
        assert_eq!(data, vec![1.0, 2.0, 3.0, 2.0, 2.0, 2.0]);

        let mut clean = vec![1.0f32, 2.0, 3.0];
        assert_eq!(fill_non_finite(&mut clean), 0);
        assert_eq!(clean, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_find_median_small() {
        assert_eq!(find_median(&mut []), 0.0);
        assert_eq!(find_median(&mut [5.0]), 5.0);
        assert_eq!(find_median(&mut [5.0, 1.0]), 5.0);
        assert_eq!(find_median(&mut [9.0, 1.0, 4.0]), 4.0);
    }
}
