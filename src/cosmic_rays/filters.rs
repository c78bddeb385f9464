//! Moving-window filters over 2D images.
//!
//! All filters use a square window of side `size` and the "reflect" boundary
//! policy, where the image is mirrored about its edge pixels:
//!
//! `d c b a | a b c d | d c b a`
//!
//! For an even `size`, the window extends one pixel further before the centre
//! pixel than after it.

use ndarray::prelude::*;

/// Map a (possibly out-of-range) index onto `0..n` by reflecting about the
/// array edges.
fn reflect_index(i: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let m = i.rem_euclid(period);
    if m < n {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// The offsets of a window of side `size` relative to its centre pixel.
fn window_offsets(size: usize) -> std::ops::Range<isize> {
    let lo = -(size as isize / 2);
    lo..lo + size as isize
}

/// Visit every pixel of `image`, handing `f` the values in the window around
/// that pixel.
fn for_each_window<F>(image: ArrayView2<f64>, size: usize, mut f: F) -> Array2<f64>
where
    F: FnMut(&mut Vec<f64>) -> f64,
{
    let (num_rows, num_cols) = image.dim();
    let mut out = Array2::zeros((num_rows, num_cols));
    let mut window = Vec::with_capacity(size * size);
    for ((i_row, i_col), out) in out.indexed_iter_mut() {
        window.clear();
        for d_row in window_offsets(size) {
            let r = reflect_index(i_row as isize + d_row, num_rows);
            for d_col in window_offsets(size) {
                let c = reflect_index(i_col as isize + d_col, num_cols);
                window.push(image[(r, c)]);
            }
        }
        *out = f(&mut window);
    }
    out
}

/// The median of `values`, averaging the two middle values when there are an
/// even number of them. `values` is reordered. NaN if `values` is empty.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        // The largest value below the pivot is the other middle value.
        let lower = lower
            .iter()
            .copied()
            .max_by(f64::total_cmp)
            .unwrap_or(upper);
        (lower + upper) / 2.0
    }
}

/// Moving-window median. The element of rank `size² / 2` is used, so for an
/// even `size` this is the upper of the two middle values.
pub fn median_filter(image: ArrayView2<f64>, size: usize) -> Array2<f64> {
    let rank = size * size / 2;
    for_each_window(image, size, |window| {
        *window.select_nth_unstable_by(rank, f64::total_cmp).1
    })
}

/// Moving-window mean.
pub fn uniform_filter(image: ArrayView2<f64>, size: usize) -> Array2<f64> {
    let norm = (size * size) as f64;
    for_each_window(image, size, |window| window.iter().sum::<f64>() / norm)
}

/// Moving-window population standard deviation, from the mean and the mean of
/// squares: `sqrt(mean(x²) - mean(x)²)`.
///
/// Rounding can make the variance slightly negative in flat regions; those
/// variances are clamped to zero. The number of clamped pixels is also
/// returned.
pub fn std_filter(image: ArrayView2<f64>, size: usize) -> (Array2<f64>, usize) {
    let mean = uniform_filter(image, size);
    let squared = image.mapv(|v| v * v);
    let mean_of_squares = uniform_filter(squared.view(), size);

    let mut num_clamped = 0;
    let std = ndarray::Zip::from(&mean_of_squares)
        .and(&mean)
        .map_collect(|&sq, &m| {
            let variance = sq - m * m;
            if variance < 0.0 {
                num_clamped += 1;
                0.0
            } else {
                variance.sqrt()
            }
        });
    (std, num_clamped)
}
