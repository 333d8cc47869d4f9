//! Concrete raster operators used by the local evaluator

use ndarray::{Array2, Zip};
use num_traits::Float;
use std::collections::VecDeque;

use crate::core::expr::{BinaryOp, KernelShape, SlopeUnits};
use crate::types::{FloodError, FloodResult};

/// Raster values plus a validity mask (`false` = masked / undefined)
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedRaster {
    pub values: Array2<f32>,
    pub valid: Array2<bool>,
}

impl MaskedRaster {
    pub fn new(values: Array2<f32>, valid: Array2<bool>) -> FloodResult<Self> {
        if values.dim() != valid.dim() {
            return Err(FloodError::Processing(format!(
                "value grid {:?} does not match mask grid {:?}",
                values.dim(),
                valid.dim()
            )));
        }
        Ok(Self { values, valid })
    }

    /// Wrap raw values; non-finite pixels become masked
    pub fn from_values(values: Array2<f32>) -> Self {
        let valid = values.mapv(is_usable);
        Self { values, valid }
    }

    pub fn filled(shape: (usize, usize), value: f32) -> Self {
        Self {
            values: Array2::from_elem(shape, value),
            valid: Array2::from_elem(shape, true),
        }
    }

    pub fn masked(shape: (usize, usize)) -> Self {
        Self {
            values: Array2::zeros(shape),
            valid: Array2::from_elem(shape, false),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Unmasked pixels with a non-zero value
    pub fn nonzero_count(&self) -> usize {
        Zip::from(&self.values)
            .and(&self.valid)
            .fold(0, |acc, &v, &ok| if ok && v != 0.0 { acc + 1 } else { acc })
    }

    /// True if every unmasked non-zero pixel here is also unmasked and non-zero in `other`
    pub fn is_subset_of(&self, other: &MaskedRaster) -> bool {
        if self.dim() != other.dim() {
            return false;
        }
        Zip::from(&self.values)
            .and(&self.valid)
            .and(&other.values)
            .and(&other.valid)
            .fold(true, |acc, &v, &ok, &ov, &ook| {
                acc && (!(ok && v != 0.0) || (ook && ov != 0.0))
            })
    }

    /// Mask every pixel for which `keep(row, col)` is false
    pub fn restrict<F>(&mut self, keep: F)
    where
        F: Fn(usize, usize) -> bool,
    {
        for ((i, j), valid) in self.valid.indexed_iter_mut() {
            if *valid && !keep(i, j) {
                *valid = false;
            }
        }
    }
}

fn is_usable<T: Float>(value: T) -> bool {
    value.is_finite()
}

fn check_same_grid(a: &MaskedRaster, b: &MaskedRaster) -> FloodResult<()> {
    if a.dim() != b.dim() {
        return Err(FloodError::Processing(format!(
            "raster grids differ: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(())
}

/// Pixelwise binary operation; the result is valid where both inputs are
///
/// Division by zero yields 0, matching the compute service.
pub fn binary(operator: BinaryOp, left: &MaskedRaster, right: &MaskedRaster) -> FloodResult<MaskedRaster> {
    check_same_grid(left, right)?;

    let values = Zip::from(&left.values)
        .and(&right.values)
        .map_collect(|&a, &b| match operator {
            BinaryOp::Divide => {
                if b == 0.0 {
                    0.0
                } else {
                    a / b
                }
            }
            BinaryOp::GreaterThan => (a > b) as u8 as f32,
            BinaryOp::GreaterOrEqual => (a >= b) as u8 as f32,
            BinaryOp::LessThan => (a < b) as u8 as f32,
        });
    let valid = Zip::from(&left.valid)
        .and(&right.valid)
        .map_collect(|&a, &b| a && b);

    MaskedRaster::new(values, valid)
}

/// Conditional replacement: `value` where `test` is unmasked and non-zero
pub fn replace_where(image: &MaskedRaster, test: &MaskedRaster, value: f32) -> FloodResult<MaskedRaster> {
    check_same_grid(image, test)?;

    let values = Zip::from(&image.values)
        .and(&test.values)
        .and(&test.valid)
        .map_collect(|&v, &t, &t_ok| if t_ok && t != 0.0 { value } else { v });

    MaskedRaster::new(values, image.valid.clone())
}

/// Mask pixels where `mask` is masked or zero; never unmasks
pub fn update_mask(image: &MaskedRaster, mask: &MaskedRaster) -> FloodResult<MaskedRaster> {
    check_same_grid(image, mask)?;

    let valid = Zip::from(&image.valid)
        .and(&mask.values)
        .and(&mask.valid)
        .map_collect(|&ok, &m, &m_ok| ok && m_ok && m != 0.0);

    MaskedRaster::new(image.values.clone(), valid)
}

fn kernel_offsets(radius_rows: f64, radius_cols: f64, shape: KernelShape) -> Vec<(isize, isize)> {
    let reach_rows = radius_rows.max(0.0).floor() as isize;
    let reach_cols = radius_cols.max(0.0).floor() as isize;
    let mut offsets = Vec::new();

    for di in -reach_rows..=reach_rows {
        for dj in -reach_cols..=reach_cols {
            let inside = match shape {
                KernelShape::Square => true,
                KernelShape::Circle => {
                    let ni = if radius_rows > 0.0 { di as f64 / radius_rows } else { 0.0 };
                    let nj = if radius_cols > 0.0 { dj as f64 / radius_cols } else { 0.0 };
                    ni * ni + nj * nj <= 1.0 + 1e-9
                }
            };
            if inside {
                offsets.push((di, dj));
            }
        }
    }
    offsets
}

fn neighbourhood_mean(raster: &MaskedRaster, offsets: &[(isize, isize)], i: usize, j: usize) -> f32 {
    let (height, width) = raster.dim();
    let mut sum = 0.0f64;
    let mut count = 0usize;

    for &(di, dj) in offsets {
        let ii = i as isize + di;
        let jj = j as isize + dj;
        if ii < 0 || jj < 0 || ii >= height as isize || jj >= width as isize {
            continue;
        }
        let (ii, jj) = (ii as usize, jj as usize);
        if raster.valid[[ii, jj]] {
            sum += raster.values[[ii, jj]] as f64;
            count += 1;
        }
    }

    // The centre pixel is valid, so count >= 1
    (sum / count as f64) as f32
}

/// Focal mean over an elliptical or square neighbourhood
///
/// Radii are in pixels along rows and columns. Only unmasked neighbours
/// contribute, and masked pixels stay masked.
pub fn focal_mean(
    raster: &MaskedRaster,
    radius_rows: f64,
    radius_cols: f64,
    shape: KernelShape,
) -> MaskedRaster {
    let offsets = kernel_offsets(radius_rows, radius_cols, shape);
    log::debug!(
        "Focal mean: {} kernel taps ({:.2} x {:.2} px, {:?})",
        offsets.len(),
        radius_rows,
        radius_cols,
        shape
    );

    let values = focal_mean_values(raster, &offsets);
    MaskedRaster {
        values,
        valid: raster.valid.clone(),
    }
}

#[cfg(feature = "parallel")]
fn focal_mean_values(raster: &MaskedRaster, offsets: &[(isize, isize)]) -> Array2<f32> {
    Zip::indexed(&raster.valid).par_map_collect(|(i, j), &ok| {
        if ok {
            neighbourhood_mean(raster, offsets, i, j)
        } else {
            0.0
        }
    })
}

#[cfg(not(feature = "parallel"))]
fn focal_mean_values(raster: &MaskedRaster, offsets: &[(isize, isize)]) -> Array2<f32> {
    Zip::indexed(&raster.valid).map_collect(|(i, j), &ok| {
        if ok {
            neighbourhood_mean(raster, offsets, i, j)
        } else {
            0.0
        }
    })
}

/// Size of the connected same-valued region containing each pixel, capped at `max_size`
pub fn connected_pixel_count(raster: &MaskedRaster, max_size: u32, eight_connected: bool) -> MaskedRaster {
    let (height, width) = raster.dim();
    let labels = label_components(raster, eight_connected);

    let mut sizes: Vec<u32> = Vec::new();
    for label in labels.iter().flatten() {
        if *label >= sizes.len() {
            sizes.resize(label + 1, 0);
        }
        sizes[*label] += 1;
    }

    let mut values = Array2::zeros((height, width));
    for ((i, j), label) in labels.indexed_iter() {
        if let Some(label) = label {
            values[[i, j]] = sizes[*label].min(max_size) as f32;
        }
    }

    MaskedRaster {
        values,
        valid: raster.valid.clone(),
    }
}

fn neighbour_steps(eight_connected: bool) -> &'static [(isize, isize)] {
    const FOUR: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
    const EIGHT: [(isize, isize); 8] = [
        (-1, -1),
        (-1, 0),
        (-1, 1),
        (0, -1),
        (0, 1),
        (1, -1),
        (1, 0),
        (1, 1),
    ];
    if eight_connected {
        &EIGHT
    } else {
        &FOUR
    }
}

/// Label connected regions of unmasked, equal-valued pixels
///
/// Labels are assigned in raster scan order of each region's first pixel.
pub fn label_components(raster: &MaskedRaster, eight_connected: bool) -> Array2<Option<usize>> {
    let (height, width) = raster.dim();
    let mut labels: Array2<Option<usize>> = Array2::from_elem((height, width), None);
    let steps = neighbour_steps(eight_connected);
    let mut next_label = 0usize;
    let mut queue = VecDeque::new();

    for i in 0..height {
        for j in 0..width {
            if !raster.valid[[i, j]] || labels[[i, j]].is_some() {
                continue;
            }

            let value = raster.values[[i, j]];
            labels[[i, j]] = Some(next_label);
            queue.push_back((i, j));

            while let Some((ci, cj)) = queue.pop_front() {
                for &(di, dj) in steps {
                    let ni = ci as isize + di;
                    let nj = cj as isize + dj;
                    if ni < 0 || nj < 0 || ni >= height as isize || nj >= width as isize {
                        continue;
                    }
                    let (ni, nj) = (ni as usize, nj as usize);
                    if raster.valid[[ni, nj]]
                        && labels[[ni, nj]].is_none()
                        && raster.values[[ni, nj]] == value
                    {
                        labels[[ni, nj]] = Some(next_label);
                        queue.push_back((ni, nj));
                    }
                }
            }

            next_label += 1;
        }
    }

    log::debug!("Labelled {} connected regions", next_label);
    labels
}

/// Terrain slope from an elevation raster using central differences
///
/// `pixel_spacing` is (dx, dy) in meters. Pixels whose stencil touches a
/// masked elevation are masked; the outermost rows and columns copy their
/// nearest interior neighbour.
pub fn terrain_slope(
    dem: &MaskedRaster,
    pixel_spacing: (f64, f64),
    units: SlopeUnits,
) -> FloodResult<MaskedRaster> {
    let (height, width) = dem.dim();
    if height < 3 || width < 3 {
        return Err(FloodError::Processing(format!(
            "elevation raster {}x{} is too small for slope calculation",
            height, width
        )));
    }

    let dx = pixel_spacing.0;
    let dy = pixel_spacing.1;
    if dx <= 0.0 || dy <= 0.0 {
        return Err(FloodError::Processing(format!(
            "invalid pixel spacing ({}, {})",
            dx, dy
        )));
    }

    let mut slope = Array2::zeros((height, width));
    let mut valid = Array2::from_elem((height, width), false);
    let mut masked_input = 0usize;

    for i in 1..height - 1 {
        for j in 1..width - 1 {
            let stencil = [(i, j), (i, j + 1), (i, j - 1), (i + 1, j), (i - 1, j)];
            if stencil.iter().any(|&p| !dem.valid[p]) {
                masked_input += 1;
                continue;
            }

            let dz_dx = (dem.values[[i, j + 1]] as f64 - dem.values[[i, j - 1]] as f64) / (2.0 * dx);
            let dz_dy = (dem.values[[i + 1, j]] as f64 - dem.values[[i - 1, j]] as f64) / (2.0 * dy);
            let gradient = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt();

            slope[[i, j]] = match units {
                SlopeUnits::Degrees => gradient.atan().to_degrees() as f32,
                SlopeUnits::Percent => (gradient * 100.0) as f32,
            };
            valid[[i, j]] = true;
        }
    }

    fill_edge_values(&mut slope);
    fill_edge_values(&mut valid);

    log::debug!(
        "Slope calculation: {} interior pixels with masked elevation",
        masked_input
    );

    MaskedRaster::new(slope, valid)
}

/// Fill edge values by copying from nearest interior pixels
fn fill_edge_values<T: Copy>(array: &mut Array2<T>) {
    let (height, width) = array.dim();

    for j in 0..width {
        array[[0, j]] = array[[1, j]];
        array[[height - 1, j]] = array[[height - 2, j]];
    }

    for i in 0..height {
        array[[i, 0]] = array[[i, 1]];
        array[[i, width - 1]] = array[[i, width - 2]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_binary_division_by_zero_and_masks() {
        let mut left = MaskedRaster::filled((2, 2), 6.0);
        left.valid[[0, 1]] = false;
        let mut right = MaskedRaster::filled((2, 2), 3.0);
        right.values[[1, 1]] = 0.0;

        let ratio = binary(BinaryOp::Divide, &left, &right).unwrap();
        assert_relative_eq!(ratio.values[[0, 0]], 2.0);
        assert_eq!(ratio.values[[1, 1]], 0.0);
        assert!(!ratio.valid[[0, 1]]);
        assert!(ratio.valid[[1, 1]]);
    }

    #[test]
    fn test_comparisons_are_strict_where_expected() {
        let values = MaskedRaster::from_values(Array2::from_shape_vec((1, 3), vec![4.999, 5.0, 5.001]).unwrap());
        let five = MaskedRaster::filled((1, 3), 5.0);

        let gt = binary(BinaryOp::GreaterThan, &values, &five).unwrap();
        assert_eq!(gt.values.as_slice().unwrap(), &[0.0, 0.0, 1.0]);

        let gte = binary(BinaryOp::GreaterOrEqual, &values, &five).unwrap();
        assert_eq!(gte.values.as_slice().unwrap(), &[0.0, 1.0, 1.0]);

        let lt = binary(BinaryOp::LessThan, &values, &five).unwrap();
        assert_eq!(lt.values.as_slice().unwrap(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_update_mask_never_unmasks() {
        let mut image = MaskedRaster::filled((1, 3), 1.0);
        image.valid[[0, 2]] = false;
        let mask = MaskedRaster::from_values(Array2::from_shape_vec((1, 3), vec![1.0, 0.0, 1.0]).unwrap());

        let out = update_mask(&image, &mask).unwrap();
        assert_eq!(out.valid.as_slice().unwrap(), &[true, false, false]);
    }

    #[test]
    fn test_replace_where_ignores_masked_test() {
        let image = MaskedRaster::filled((1, 3), 1.0);
        let mut test = MaskedRaster::from_values(Array2::from_shape_vec((1, 3), vec![1.0, 0.0, 1.0]).unwrap());
        test.valid[[0, 2]] = false;

        let out = replace_where(&image, &test, 0.0).unwrap();
        assert_eq!(out.values.as_slice().unwrap(), &[0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_focal_mean_skips_masked_neighbours() {
        let mut raster = MaskedRaster::filled((5, 5), 2.0);
        raster.values[[2, 3]] = 100.0;
        raster.valid[[2, 3]] = false;
        raster.values[[2, 1]] = 4.0;

        let smoothed = focal_mean(&raster, 1.0, 1.0, KernelShape::Circle);

        // Cross-shaped kernel at radius 1: centre, up, down, left (4.0); right is masked
        assert_relative_eq!(smoothed.values[[2, 2]], (2.0 + 2.0 + 2.0 + 4.0) / 4.0);
        assert!(!smoothed.valid[[2, 3]]);
    }

    #[test]
    fn test_connected_pixel_count_connectivity() {
        let mut raster = MaskedRaster::masked((3, 3));
        for &(i, j) in &[(0, 0), (1, 1), (2, 2)] {
            raster.values[[i, j]] = 1.0;
            raster.valid[[i, j]] = true;
        }

        let four = connected_pixel_count(&raster, 100, false);
        assert_eq!(four.values[[1, 1]], 1.0);

        let eight = connected_pixel_count(&raster, 100, true);
        assert_eq!(eight.values[[1, 1]], 3.0);

        let capped = connected_pixel_count(&raster, 2, true);
        assert_eq!(capped.values[[0, 0]], 2.0);
    }

    #[test]
    fn test_connected_pixel_count_separates_values() {
        let raster = MaskedRaster::from_values(
            Array2::from_shape_vec((1, 4), vec![1.0, 1.0, 0.0, 0.0]).unwrap(),
        );
        let counts = connected_pixel_count(&raster, 100, true);
        assert_eq!(counts.values.as_slice().unwrap(), &[2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_terrain_slope_of_ramp() {
        // 1 m rise per 10 m pixel eastwards: gradient 0.1
        let dem = MaskedRaster::from_values(Array2::from_shape_fn((5, 5), |(_, j)| j as f32));
        let percent = terrain_slope(&dem, (10.0, 10.0), SlopeUnits::Percent).unwrap();
        let degrees = terrain_slope(&dem, (10.0, 10.0), SlopeUnits::Degrees).unwrap();

        assert_relative_eq!(percent.values[[2, 2]], 10.0, epsilon = 1e-4);
        assert_relative_eq!(degrees.values[[2, 2]], 0.1f64.atan().to_degrees() as f32, epsilon = 1e-4);
        // Edges copied from the interior
        assert_relative_eq!(percent.values[[0, 0]], percent.values[[1, 1]]);
        assert!(percent.valid[[4, 4]]);
    }

    #[test]
    fn test_terrain_slope_rejects_tiny_rasters() {
        let dem = MaskedRaster::filled((2, 2), 0.0);
        assert!(terrain_slope(&dem, (10.0, 10.0), SlopeUnits::Degrees).is_err());
    }
}
