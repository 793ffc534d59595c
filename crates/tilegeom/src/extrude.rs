//! Footprint ring → capped prism.

use crate::error::MeshError;
use crate::scene::{Primitive, Vertex};
use crate::tessellate::{signed_area, triangulate};
use glam::{DVec2, DVec3};

/// Points closer than this (metres) are the same ring vertex.
const RING_EPSILON: f64 = 1e-9;

/// Drop the closing duplicate and any repeated consecutive vertices.
pub fn clean_ring(ring: &[DVec2]) -> Vec<DVec2> {
    let mut out: Vec<DVec2> = Vec::with_capacity(ring.len());
    for &p in ring {
        if out.last().map_or(true, |q| q.distance(p) >= RING_EPSILON) {
            out.push(p);
        }
    }
    while out.len() > 1 && out[0].distance(out[out.len() - 1]) < RING_EPSILON {
        out.pop();
    }
    out
}

/// Clean the ring and orient it counter-clockwise (`ccw`) or clockwise.
pub fn oriented_ring(ring: &[DVec2], ccw: bool) -> Vec<DVec2> {
    let mut out = clean_ring(ring);
    if (signed_area(&out) > 0.0) != ccw {
        out.reverse();
    }
    out
}

/// Splice each hole into the boundary through its nearest vertex pair.
///
/// `outer` must be counter-clockwise and every hole clockwise; the result is
/// one weakly simple counter-clockwise polygon.
pub fn remove_holes(outer: &[DVec2], holes: &[Vec<DVec2>]) -> Vec<DVec2> {
    let mut boundary = outer.to_vec();

    for hole in holes.iter().filter(|h| h.len() >= 3) {
        let mut best = (0usize, 0usize, f64::INFINITY);
        for (i, o) in boundary.iter().enumerate() {
            for (j, h) in hole.iter().enumerate() {
                let d = o.distance_squared(*h);
                if d < best.2 {
                    best = (i, j, d);
                }
            }
        }
        let (i, j, _) = best;

        let mut spliced = Vec::with_capacity(boundary.len() + hole.len() + 2);
        spliced.extend_from_slice(&boundary[..=i]);
        spliced.extend((0..=hole.len()).map(|k| hole[(j + k) % hole.len()]));
        spliced.extend_from_slice(&boundary[i..]);
        boundary = spliced;
    }

    boundary
}

/// Extrudes local-frame footprints between a floor and a roof height.
#[derive(Debug, Clone, Copy, Default)]
pub struct FootprintExtruder;

impl FootprintExtruder {
    /// Build one primitive: top cap, bottom cap and an outward-facing quad per edge.
    ///
    /// Only x/y of the input is used. Walls follow the original rings, so
    /// hole bridges never produce wall faces.
    pub fn extrude(
        &self,
        outer: &[DVec3],
        holes: &[Vec<DVec3>],
        floor_height: f64,
        roof_height: f64,
    ) -> Result<Primitive, MeshError> {
        if roof_height < floor_height {
            return Err(MeshError::InvertedHeights {
                floor: floor_height,
                roof: roof_height,
            });
        }

        let flat = |ring: &[DVec3]| ring.iter().map(|p| p.truncate()).collect::<Vec<_>>();

        let shell = oriented_ring(&flat(outer), true);
        if shell.len() < 3 {
            return Err(MeshError::TooFewRingPoints(shell.len()));
        }
        if shell.iter().any(|p| !p.is_finite()) {
            return Err(MeshError::NonFinite);
        }

        let hole_rings: Vec<Vec<DVec2>> = holes
            .iter()
            .map(|h| oriented_ring(&flat(h), false))
            .filter(|h| h.len() >= 3 && h.iter().all(|p| p.is_finite()))
            .collect();

        let cap = oriented_ring(&remove_holes(&shell, &hole_rings), true);
        let cap_triangles = triangulate(&cap)?;

        let mut primitive = Primitive::default();

        // Roof, facing up.
        let base = primitive.vertices.len() as u32;
        for p in &cap {
            primitive.push_vertex(Vertex::with_normal(p.extend(roof_height), DVec3::Z));
        }
        for &[a, b, c] in &cap_triangles {
            primitive.push_triangle(base + a as u32, base + b as u32, base + c as u32);
        }

        // Floor, facing down.
        let base = primitive.vertices.len() as u32;
        for p in &cap {
            primitive.push_vertex(Vertex::with_normal(p.extend(floor_height), DVec3::NEG_Z));
        }
        for &[a, b, c] in &cap_triangles {
            primitive.push_triangle(base + a as u32, base + c as u32, base + b as u32);
        }

        for ring in std::iter::once(&shell).chain(&hole_rings) {
            Self::push_walls(&mut primitive, ring, floor_height, roof_height);
        }

        Ok(primitive)
    }

    fn push_walls(primitive: &mut Primitive, ring: &[DVec2], floor: f64, roof: f64) {
        let n = ring.len();
        for i in 0..n {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            let normal = (b - a).extend(0.0).cross(DVec3::Z).normalize_or_zero();

            let b0 = primitive.push_vertex(Vertex::with_normal(a.extend(floor), normal));
            let b1 = primitive.push_vertex(Vertex::with_normal(b.extend(floor), normal));
            let t1 = primitive.push_vertex(Vertex::with_normal(b.extend(roof), normal));
            let t0 = primitive.push_vertex(Vertex::with_normal(a.extend(roof), normal));

            primitive.push_triangle(b0, b1, t1);
            primitive.push_triangle(b0, t1, t0);
        }
    }
}
