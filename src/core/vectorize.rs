//! Raster to polygon conversion by pixel-edge boundary tracing
//!
//! Each connected region of equal-valued, unmasked pixels becomes one polygon.
//! Boundaries run along pixel edges on the lattice of pixel corners, with
//! lattice point (x, y) = (column, row). Rings are traced so the region lies
//! to the left when the grid is viewed north-up, which makes exterior rings
//! counter-clockwise and holes clockwise in geographic coordinates.

use std::collections::HashMap;

use ndarray::Array2;

use crate::core::raster::{label_components, MaskedRaster};
use crate::types::{signed_ring_area, FeatureCollection, Polygon, RasterGrid};

type Point = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct Edge {
    start: Point,
    end: Point,
}

impl Edge {
    fn direction(&self) -> (i64, i64) {
        (self.end.0 - self.start.0, self.end.1 - self.start.1)
    }
}

/// Convert the unmasked pixels of `raster` into polygons on `grid`
///
/// `eight_connected` controls both which pixels form a region and how rings
/// pass through corners where two region pixels touch diagonally.
pub fn polygonize(raster: &MaskedRaster, grid: &RasterGrid, eight_connected: bool) -> FeatureCollection {
    let labels = label_components(raster, eight_connected);
    let edges_by_region = boundary_edges(&labels);

    let polygons = regions_to_polygons(&edges_by_region, grid, eight_connected);

    log::debug!(
        "Vectorized {} regions ({}-connected)",
        polygons.len(),
        if eight_connected { 8 } else { 4 }
    );

    FeatureCollection { polygons }
}

/// Trace and assemble each region; output order follows label order
#[cfg(feature = "parallel")]
fn regions_to_polygons(regions: &[Vec<Edge>], grid: &RasterGrid, eight_connected: bool) -> Vec<Polygon> {
    use rayon::prelude::*;

    regions
        .par_iter()
        .filter_map(|edges| assemble_polygon(trace_rings(edges, eight_connected), grid))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn regions_to_polygons(regions: &[Vec<Edge>], grid: &RasterGrid, eight_connected: bool) -> Vec<Polygon> {
    regions
        .iter()
        .filter_map(|edges| assemble_polygon(trace_rings(edges, eight_connected), grid))
        .collect()
}

/// Boundary edges of every labelled region, indexed by label
fn boundary_edges(labels: &Array2<Option<usize>>) -> Vec<Vec<Edge>> {
    let (height, width) = labels.dim();
    let mut regions: Vec<Vec<Edge>> = Vec::new();

    let label_at = |i: isize, j: isize| -> Option<usize> {
        if i < 0 || j < 0 || i >= height as isize || j >= width as isize {
            None
        } else {
            labels[[i as usize, j as usize]]
        }
    };

    for ((i, j), label) in labels.indexed_iter() {
        let Some(label) = *label else { continue };
        if label >= regions.len() {
            regions.resize_with(label + 1, Vec::new);
        }

        let (ii, jj) = (i as isize, j as isize);
        let (x, y) = (j as i64, i as i64);
        let top_left = (x, y);
        let bottom_left = (x, y + 1);
        let bottom_right = (x + 1, y + 1);
        let top_right = (x + 1, y);

        let edges = &mut regions[label];
        if label_at(ii, jj - 1) != Some(label) {
            edges.push(Edge { start: top_left, end: bottom_left });
        }
        if label_at(ii + 1, jj) != Some(label) {
            edges.push(Edge { start: bottom_left, end: bottom_right });
        }
        if label_at(ii, jj + 1) != Some(label) {
            edges.push(Edge { start: bottom_right, end: top_right });
        }
        if label_at(ii - 1, jj) != Some(label) {
            edges.push(Edge { start: top_right, end: top_left });
        }
    }

    regions
}

/// Link boundary edges into closed rings of lattice points
fn trace_rings(edges: &[Edge], eight_connected: bool) -> Vec<Vec<Point>> {
    let mut outgoing: HashMap<Point, Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.start).or_default().push(idx);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for first in 0..edges.len() {
        if used[first] {
            continue;
        }

        let mut ring = Vec::new();
        let mut current = first;
        loop {
            used[current] = true;
            ring.push(edges[current].start);

            let next = match next_edge(edges, &outgoing, current, eight_connected) {
                Some(next) => next,
                None => {
                    log::warn!("Open boundary at {:?}; dropping ring", edges[current].end);
                    ring.clear();
                    break;
                }
            };
            if next == first {
                break;
            }
            if used[next] {
                log::warn!("Boundary revisits edge at {:?}; dropping ring", edges[next].start);
                ring.clear();
                break;
            }
            current = next;
        }

        if ring.len() >= 4 {
            rings.push(simplify_ring(ring));
        }
    }

    rings
}

fn next_edge(
    edges: &[Edge],
    outgoing: &HashMap<Point, Vec<usize>>,
    current: usize,
    eight_connected: bool,
) -> Option<usize> {
    let candidates = outgoing.get(&edges[current].end)?;
    match candidates.as_slice() {
        [only] => Some(*only),
        _ => {
            // Saddle: two region pixels meet diagonally at this corner
            let (dx, dy) = edges[current].direction();
            let wanted = if eight_connected { (-dy, dx) } else { (dy, -dx) };
            candidates
                .iter()
                .copied()
                .find(|&idx| edges[idx].direction() == wanted)
        }
    }
}

/// Drop vertices that lie on a straight run
fn simplify_ring(ring: Vec<Point>) -> Vec<Point> {
    let n = ring.len();
    let mut corners = Vec::with_capacity(n);
    for k in 0..n {
        let prev = ring[(k + n - 1) % n];
        let cur = ring[k];
        let next = ring[(k + 1) % n];
        let d_in = (cur.0 - prev.0, cur.1 - prev.1);
        let d_out = (next.0 - cur.0, next.1 - cur.1);
        if d_in != d_out {
            corners.push(cur);
        }
    }
    corners
}

fn to_geographic(ring: &[Point], grid: &RasterGrid) -> Vec<[f64; 2]> {
    let mut coords: Vec<[f64; 2]> = ring
        .iter()
        .map(|&(x, y)| {
            let (lon, lat) = grid.corner(y as f64, x as f64);
            [lon, lat]
        })
        .collect();
    if let Some(&first) = coords.first() {
        coords.push(first);
    }
    coords
}

/// Orientation in a north-up frame: positive for exterior rings
fn lattice_orientation(ring: &[Point]) -> f64 {
    let flipped: Vec<[f64; 2]> = ring.iter().map(|&(x, y)| [x as f64, -(y as f64)]).collect();
    signed_ring_area(&flipped)
}

fn assemble_polygon(rings: Vec<Vec<Point>>, grid: &RasterGrid) -> Option<Polygon> {
    let mut exteriors = Vec::new();
    let mut holes = Vec::new();

    for ring in rings {
        let area = lattice_orientation(&ring);
        if area > 0.0 {
            exteriors.push((area, ring));
        } else if area < 0.0 {
            holes.push(ring);
        }
    }

    if exteriors.len() > 1 {
        log::warn!(
            "Region produced {} exterior rings; keeping the largest",
            exteriors.len()
        );
    }

    let (_, exterior) = exteriors
        .into_iter()
        .max_by(|a, b| a.0.total_cmp(&b.0))?;

    Some(Polygon {
        exterior: to_geographic(&exterior, grid),
        holes: holes.iter().map(|h| to_geographic(h, grid)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(rows: usize, cols: usize) -> RasterGrid {
        RasterGrid::new(0.0, 0.0, 1.0, rows, cols)
    }

    fn mask_from(rows: &[&str]) -> MaskedRaster {
        let height = rows.len();
        let width = rows[0].len();
        let mut raster = MaskedRaster::masked((height, width));
        for (i, row) in rows.iter().enumerate() {
            for (j, c) in row.chars().enumerate() {
                if c == '#' {
                    raster.values[[i, j]] = 1.0;
                    raster.valid[[i, j]] = true;
                }
            }
        }
        raster
    }

    #[test]
    fn test_single_pixel_is_counter_clockwise_square() {
        let raster = mask_from(&["...", ".#.", "..."]);
        let fc = polygonize(&raster, &grid(3, 3), false);

        assert_eq!(fc.len(), 1);
        let poly = &fc.polygons[0];
        assert_eq!(poly.exterior.len(), 5);
        assert_eq!(poly.exterior.first(), poly.exterior.last());
        assert!(signed_ring_area(&poly.exterior) > 0.0);
        assert_relative_eq!(poly.area(), 1.0);
    }

    #[test]
    fn test_ring_of_pixels_has_hole() {
        let raster = mask_from(&["###", "#.#", "###"]);
        let fc = polygonize(&raster, &grid(3, 3), false);

        assert_eq!(fc.len(), 1);
        let poly = &fc.polygons[0];
        assert_eq!(poly.holes.len(), 1);
        assert!(signed_ring_area(&poly.holes[0]) < 0.0);
        assert_relative_eq!(poly.area(), 8.0);
    }

    #[test]
    fn test_diagonal_pixels_follow_connectivity() {
        let raster = mask_from(&["#.", ".#"]);

        let four = polygonize(&raster, &grid(2, 2), false);
        assert_eq!(four.len(), 2);
        for poly in &four.polygons {
            assert_relative_eq!(poly.area(), 1.0);
        }

        let eight = polygonize(&raster, &grid(2, 2), true);
        assert_eq!(eight.len(), 1);
        assert_eq!(eight.polygons[0].exterior.len(), 9);
        assert_relative_eq!(eight.polygons[0].area(), 2.0);
    }

    #[test]
    fn test_values_split_regions() {
        let mut raster = MaskedRaster::filled((1, 4), 1.0);
        raster.values[[0, 2]] = 2.0;
        raster.values[[0, 3]] = 2.0;

        let fc = polygonize(&raster, &grid(1, 4), false);
        assert_eq!(fc.len(), 2);
        assert_relative_eq!(fc.total_area(), 4.0);
    }

    #[test]
    fn test_l_shape_simplified() {
        let raster = mask_from(&["#.", "##"]);
        let fc = polygonize(&raster, &grid(2, 2), false);

        // Six corners plus the closing vertex
        assert_eq!(fc.polygons[0].exterior.len(), 7);
        assert_relative_eq!(fc.polygons[0].area(), 3.0);
    }
}
