//! Planar polygon helpers: orientation and cap triangulation.

use crate::error::MeshError;
use glam::DVec2;

const EPS: f64 = 1e-12;

/// Shoelace area; positive for counter-clockwise rings.
pub fn signed_area(ring: &[DVec2]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    (0..n)
        .map(|i| ring[i].perp_dot(ring[(i + 1) % n]))
        .sum::<f64>()
        * 0.5
}

#[inline]
fn corner_cross(a: DVec2, b: DVec2, c: DVec2) -> f64 {
    (b - a).perp_dot(c - b)
}

/// Triangulate a weakly simple polygon (holes already spliced in) with earcut.
///
/// Returns index triples into `polygon`, each counter-clockwise; slivers are dropped.
pub fn triangulate(polygon: &[DVec2]) -> Result<Vec<[usize; 3]>, MeshError> {
    if polygon.len() < 3 {
        return Ok(Vec::new());
    }

    let coords: Vec<f64> = polygon.iter().flat_map(|p| [p.x, p.y]).collect();
    let indices = earcutr::earcut(&coords, &[], 2)
        .map_err(|err| MeshError::Triangulation(format!("{err:?}")))?;

    Ok(indices
        .chunks_exact(3)
        .filter_map(|t| {
            let (a, b, c) = (t[0], t[1], t[2]);
            let turn = corner_cross(polygon[a], polygon[b], polygon[c]);
            if turn.abs() <= EPS {
                None
            } else if turn > 0.0 {
                Some([a, b, c])
            } else {
                Some([a, c, b])
            }
        })
        .collect())
}
