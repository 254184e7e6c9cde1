#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Deterministic hexagonal tessellation clipped to a boundary.
//!
//! Tiles the boundary's bounding box with flat-edged hexagons, clips every
//! hexagon against the union of the boundary polygons, drops degenerate
//! fragments, and assigns contiguous `cell_id` values in generation order.
//! Identical boundary and diameter inputs always produce an identical
//! grid.

use geo::{
    Area, BooleanOps, BoundingRect, Coord, LineString, MultiPolygon, Polygon, Rect, Validation,
    unary_union,
};
use hotspot_models::HexGrid;
use thiserror::Error;

/// Errors that can occur while building a grid.
#[derive(Debug, Error)]
pub enum GridError {
    /// The hexagon diameter must be a positive, finite number of
    /// projected units.
    #[error("invalid hex diameter {hex_diameter}: must be positive and finite")]
    NonPositiveDiameter {
        /// The rejected diameter.
        hex_diameter: f64,
    },
}

/// Builds a hexagonal grid covering `boundary`, clipped to it.
///
/// `boundary` is one or more polygons in a projected (linear-unit)
/// coordinate system; `hex_diameter` is the corner-to-corner hexagon
/// diameter in the same units. The boundary polygons are dissolved into a
/// single union before clipping so that overlapping boundary parts cannot
/// produce duplicate cells.
///
/// An empty or degenerate boundary yields an empty grid, not an error;
/// downstream stages must tolerate zero cells.
///
/// # Errors
///
/// Returns [`GridError::NonPositiveDiameter`] if `hex_diameter` is not a
/// positive finite number.
pub fn build_hex_grid(boundary: &[Polygon<f64>], hex_diameter: f64) -> Result<HexGrid, GridError> {
    if hex_diameter <= 0.0 || !hex_diameter.is_finite() {
        return Err(GridError::NonPositiveDiameter { hex_diameter });
    }

    let union: MultiPolygon<f64> = unary_union(boundary.iter());
    let Some(bounds) = union.bounding_rect() else {
        log::warn!("Boundary is empty or degenerate; producing an empty grid");
        return Ok(HexGrid::default());
    };

    let radius = hex_diameter / 2.0;
    let mut geometries = Vec::new();
    let mut dropped = 0_usize;

    for hex in tile_extent(bounds, radius) {
        let clipped = hex.intersection(&union);
        if clipped.unsigned_area() > 0.0 && clipped.is_valid() {
            geometries.push(clipped);
        } else {
            // Zero-area slivers at the tiling edge are expected.
            dropped += 1;
        }
    }

    if dropped > 0 {
        log::debug!("Dropped {dropped} degenerate cells after clipping");
    }
    log::info!(
        "Built hex grid: {} cells (diameter {hex_diameter})",
        geometries.len()
    );

    Ok(HexGrid::from_geometries(geometries))
}

/// Generates the unclipped hexagon tiling covering `bounds`.
///
/// Hexagons have their vertices at angles `2πk/6` from the center, giving
/// a horizontal extent of `2·radius` and a vertical extent of
/// `sqrt(3)·radius`. Centers within a row are `3·radius` apart, every
/// other row is offset horizontally by `1.5·radius`, and rows advance by
/// half the hexagon height, which makes the union of hexagons cover the
/// extent without gaps. The extent is padded by one spacing unit in each
/// direction so the boundary edges are fully covered.
fn tile_extent(bounds: Rect<f64>, radius: f64) -> Vec<Polygon<f64>> {
    let w = 3.0 * radius;
    let h = 3.0_f64.sqrt() * radius;

    let (min_x, min_y) = bounds.min().x_y();
    let (max_x, max_y) = bounds.max().x_y();

    let mut hexes = Vec::new();
    let mut y = min_y - h;
    let mut row = 0_u64;

    while y <= max_y + h {
        let mut x = if row % 2 == 0 {
            min_x - w
        } else {
            min_x - w + 1.5 * radius
        };
        while x <= max_x + w {
            hexes.push(hexagon(x, y, radius));
            x += w;
        }
        y += h / 2.0;
        row += 1;
    }

    hexes
}

/// A regular hexagon centered at `(cx, cy)`.
///
/// `radius` is the distance from the center to any vertex. Seven vertices
/// are placed (six distinct plus the closing point) at angles `2πk/6`.
fn hexagon(cx: f64, cy: f64, radius: f64) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = (0..=6)
        .map(|k| {
            let angle = 2.0 * std::f64::consts::PI * f64::from(k) / 6.0;
            Coord {
                x: cx + radius * angle.cos(),
                y: cy + radius * angle.sin(),
            }
        })
        .collect();
    Polygon::new(LineString::new(coords), vec![])
}
