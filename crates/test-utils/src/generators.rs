//! Test data generators for synthetic climate grids.
//!
//! All grids are row-major with latitude as the row index, matching the
//! `(lat, lon)` layout of the stores. Missing cells are NaN.

/// Evenly spaced coordinates `start, start + step, ...` (`n` values).
///
/// # Example
///
/// ```
/// use test_utils::axis;
///
/// assert_eq!(axis(0.0, 0.5, 3), vec![0.0, 0.5, 1.0]);
/// ```
pub fn axis(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// Creates a test grid with predictable values.
///
/// Each cell value is `col * 1000 + row`, which makes it easy to check that
/// a value came from the expected source cell.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0);  // col=1, row=0
/// assert_eq!(grid[10], 1.0);    // col=0, row=1
/// ```
pub fn create_test_grid(nlon: usize, nlat: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(nlon * nlat);
    for row in 0..nlat {
        for col in 0..nlon {
            data.push((col * 1000 + row) as f64);
        }
    }
    data
}

/// Monthly mean temperatures in degrees C, colder toward the last row.
pub fn create_temperature_grid(nlon: usize, nlat: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(nlon * nlat);
    for row in 0..nlat {
        for col in 0..nlon {
            let y_factor = row as f64 / nlat.max(1) as f64;
            let x_factor = col as f64 / nlon.max(1) as f64;
            data.push(15.0 - y_factor * 12.0 + x_factor * 2.0);
        }
    }
    data
}

/// Monthly precipitation totals in mm with a deterministic pseudo-random
/// pattern seeded by `seed`.
pub fn create_precipitation_grid(nlon: usize, nlat: usize, seed: u32) -> Vec<f64> {
    let mut data = Vec::with_capacity(nlon * nlat);
    for row in 0..nlat {
        for col in 0..nlon {
            let hash = (row as u32)
                .wrapping_mul(31)
                .wrapping_add(col as u32)
                .wrapping_mul(17)
                .wrapping_add(seed);
            data.push(20.0 + (hash % 150) as f64);
        }
    }
    data
}

/// Creates a grid filled with `value`.
pub fn create_constant_grid(nlon: usize, nlat: usize, value: f64) -> Vec<f64> {
    vec![value; nlon * nlat]
}

/// Sets the listed `(col, row)` cells of `data` to NaN.
pub fn with_missing(mut data: Vec<f64>, nlon: usize, positions: &[(usize, usize)]) -> Vec<f64> {
    for &(col, row) in positions {
        if let Some(cell) = data.get_mut(row * nlon + col) {
            *cell = f64::NAN;
        }
    }
    data
}

/// Land-sea mask with land (1) everywhere except the listed sea columns (0).
pub fn create_land_mask(nlon: usize, nlat: usize, sea_columns: &[usize]) -> Vec<f64> {
    let mut data = Vec::with_capacity(nlon * nlat);
    for _row in 0..nlat {
        for col in 0..nlon {
            data.push(if sea_columns.contains(&col) { 0.0 } else { 1.0 });
        }
    }
    data
}

/// Mean of the values of `data` inside `rows × cols`, ignoring NaN.
pub fn window_mean(
    data: &[f64],
    nlon: usize,
    rows: std::ops::Range<usize>,
    cols: std::ops::Range<usize>,
) -> Option<f64> {
    let values: Vec<f64> = rows
        .flat_map(|row| cols.clone().map(move |col| data[row * nlon + col]))
        .filter(|v| !v.is_nan())
        .collect();
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}
