//! Polyline + cross-section profile → closed tube mesh.

use crate::bbox::BoundingBox;
use crate::error::MeshError;
use crate::feature::{Feature, FeatureGeometry, PipeProfile};
use crate::scene::{Primitive, Vertex};
use glam::{DVec2, DVec3};
use smallvec::SmallVec;
use std::f64::consts::TAU;

/// Adjacent centerline points closer than this (metres) are collapsed.
pub const DEFAULT_PIPE_TOLERANCE: f64 = 0.01;
pub const DEFAULT_CIRCLE_SEGMENTS: usize = 16;

/// Remove every point closer than `tolerance` to the point kept before it.
///
/// The earlier point of a close pair always survives. Comparing against the last
/// kept point reaches the same fixed point as re-scanning until no adjacent pair
/// is within tolerance.
pub fn collapse_duplicates(points: &[DVec3], tolerance: f64) -> Result<Vec<DVec3>, MeshError> {
    let mut out = points.to_vec();
    out.dedup_by(|later, earlier| later.distance(*earlier) < tolerance);
    if out.len() < 2 {
        return Err(MeshError::TooFewPolylinePoints(out.len()));
    }
    Ok(out)
}

/// Centerline bounds grown by the profile's radial extent.
pub fn pipe_bounds(polyline: &[DVec3], profile: &PipeProfile) -> BoundingBox {
    BoundingBox::from_points(polyline.iter().copied())
        .expanded(DVec3::splat(profile.radial_offset()))
}

/// Profile outline in the (side, up) plane, counter-clockwise seen from +tangent.
struct CrossSection {
    outline: Vec<DVec2>,
    /// Circular outlines get radial normals, polygons get one normal per edge.
    smooth: bool,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    origin: DVec3,
    tangent: DVec3,
    side: DVec3,
    up: DVec3,
}

impl Frame {
    #[inline]
    fn direction(&self, p: DVec2) -> DVec3 {
        self.side * p.x + self.up * p.y
    }

    #[inline]
    fn place(&self, p: DVec2) -> DVec3 {
        self.origin + self.direction(p)
    }
}

/// Orthonormal frame at every centerline vertex.
///
/// The tangent averages the incident segment directions; `up` starts at +Z (or +X
/// for a vertical start) and is carried along by projecting the previous one, so
/// the tube does not twist at bends.
fn vertex_frames(points: &[DVec3]) -> Vec<Frame> {
    let segments: Vec<DVec3> = points
        .windows(2)
        .map(|w| (w[1] - w[0]).normalize_or_zero())
        .collect();

    let mut frames = Vec::with_capacity(points.len());
    let mut up_hint = DVec3::Z;

    for (k, &origin) in points.iter().enumerate() {
        let mut incident: SmallVec<[DVec3; 2]> = SmallVec::new();
        if k > 0 {
            incident.push(segments[k - 1]);
        }
        if k < segments.len() {
            incident.push(segments[k]);
        }

        // A hairpin cancels the average; fall back to the outgoing direction.
        let tangent = incident
            .iter()
            .sum::<DVec3>()
            .try_normalize()
            .or_else(|| incident.last().copied())
            .unwrap_or(DVec3::X);

        let project = |v: DVec3| (v - tangent * v.dot(tangent)).try_normalize();
        let up = project(up_hint)
            .or_else(|| project(DVec3::X))
            .unwrap_or(DVec3::Y);
        up_hint = up;

        frames.push(Frame {
            origin,
            tangent,
            side: up.cross(tangent),
            up,
        });
    }

    frames
}

/// Builds tube meshes around pipe centerlines.
#[derive(Debug, Clone, Copy)]
pub struct PipeMeshBuilder {
    pub circle_segments: usize,
    pub tolerance: f64,
}

impl Default for PipeMeshBuilder {
    fn default() -> Self {
        Self {
            circle_segments: DEFAULT_CIRCLE_SEGMENTS,
            tolerance: DEFAULT_PIPE_TOLERANCE,
        }
    }
}

impl PipeMeshBuilder {
    pub fn new(circle_segments: usize, tolerance: f64) -> Self {
        Self {
            circle_segments: circle_segments.max(3),
            tolerance,
        }
    }

    fn cross_section(&self, profile: &PipeProfile) -> Result<CrossSection, MeshError> {
        match *profile {
            PipeProfile::Circular { diameter } => {
                let r = diameter / 1000.0 / 2.0;
                if !(r > 0.0) {
                    return Err(MeshError::EmptyProfile);
                }
                let n = self.circle_segments.max(3);
                let outline = (0..n)
                    .map(|j| {
                        let (sin, cos) = (TAU * j as f64 / n as f64).sin_cos();
                        DVec2::new(cos * r, sin * r)
                    })
                    .collect();
                Ok(CrossSection {
                    outline,
                    smooth: true,
                })
            }
            PipeProfile::Rectangular { width, height } => {
                let (hw, hh) = (width / 1000.0 / 2.0, height / 1000.0 / 2.0);
                if !(hw > 0.0 && hh > 0.0) {
                    return Err(MeshError::EmptyProfile);
                }
                Ok(CrossSection {
                    outline: vec![
                        DVec2::new(hw, -hh),
                        DVec2::new(hw, hh),
                        DVec2::new(-hw, hh),
                        DVec2::new(-hw, -hh),
                    ],
                    smooth: false,
                })
            }
            PipeProfile::Oval | PipeProfile::Irregular => {
                Err(MeshError::UnsupportedProfile(profile.kind()))
            }
        }
    }

    /// Tube walls between consecutive vertex rings plus a flat cap at each end.
    pub fn build(&self, polyline: &[DVec3], profile: &PipeProfile) -> Result<Primitive, MeshError> {
        if polyline.iter().any(|p| !p.is_finite()) {
            return Err(MeshError::NonFinite);
        }
        let section = self.cross_section(profile)?;
        let points = collapse_duplicates(polyline, self.tolerance)?;
        let frames = vertex_frames(&points);

        let mut primitive = Primitive::default();
        for pair in frames.windows(2) {
            push_walls(&mut primitive, &section, &pair[0], &pair[1]);
        }
        if let (Some(first), Some(last)) = (frames.first(), frames.last()) {
            push_cap(&mut primitive, &section, first, false);
            push_cap(&mut primitive, &section, last, true);
        }

        Ok(primitive)
    }
}

fn push_walls(primitive: &mut Primitive, section: &CrossSection, f0: &Frame, f1: &Frame) {
    let outline = &section.outline;
    let n = outline.len();

    for j in 0..n {
        let p = outline[j];
        let q = outline[(j + 1) % n];

        let (np, nq) = if section.smooth {
            (p.normalize_or_zero(), q.normalize_or_zero())
        } else {
            let e = q - p;
            let edge = DVec2::new(e.y, -e.x).normalize_or_zero();
            (edge, edge)
        };

        let a = primitive.push_vertex(Vertex::with_normal(f0.place(p), f0.direction(np)));
        let b = primitive.push_vertex(Vertex::with_normal(f0.place(q), f0.direction(nq)));
        let c = primitive.push_vertex(Vertex::with_normal(f1.place(q), f1.direction(nq)));
        let d = primitive.push_vertex(Vertex::with_normal(f1.place(p), f1.direction(np)));

        primitive.push_triangle(a, b, c);
        primitive.push_triangle(a, c, d);
    }
}

/// Fan around the ring centre; `forward` faces +tangent (end cap).
fn push_cap(primitive: &mut Primitive, section: &CrossSection, frame: &Frame, forward: bool) {
    let normal = if forward { frame.tangent } else { -frame.tangent };

    let center = primitive.push_vertex(Vertex::with_normal(frame.origin, normal));
    let base = primitive.vertices.len() as u32;
    for &p in &section.outline {
        primitive.push_vertex(Vertex::with_normal(frame.place(p), normal));
    }

    let n = section.outline.len() as u32;
    for j in 0..n {
        let (a, b) = (base + j, base + (j + 1) % n);
        if forward {
            primitive.push_triangle(center, a, b);
        } else {
            primitive.push_triangle(center, b, a);
        }
    }
}

/// Join pipe runs tail-to-head when their profiles are equal and the joint is
/// within `tolerance`.
///
/// `to_metric` maps a source coordinate to a metric space (`None` blocks the join).
/// Input order is preserved; a feature joins the first earlier run it continues.
/// Callers pass features of one tile only.
pub fn merge_pipe_features<F>(features: Vec<Feature>, tolerance: f64, to_metric: F) -> Vec<Feature>
where
    F: Fn(DVec3) -> Option<DVec3>,
{
    let mut merged: Vec<Feature> = Vec::with_capacity(features.len());

    for feature in features {
        let joined = match (&feature.geometry, &feature.profile) {
            (FeatureGeometry::Pipe { polyline }, Some(profile)) => merged
                .iter_mut()
                .any(|run| try_join(run, polyline, profile, tolerance, &to_metric)),
            _ => false,
        };
        if !joined {
            merged.push(feature);
        }
    }

    merged
}

fn try_join<F>(
    run: &mut Feature,
    next: &[DVec3],
    profile: &PipeProfile,
    tolerance: f64,
    to_metric: &F,
) -> bool
where
    F: Fn(DVec3) -> Option<DVec3>,
{
    if !run.profile.is_some_and(|p| p.is_same_profile(profile)) {
        return false;
    }
    let FeatureGeometry::Pipe { polyline } = &mut run.geometry else {
        return false;
    };
    let (Some(&tail), Some(&head)) = (polyline.last(), next.first()) else {
        return false;
    };

    let close = match (to_metric(tail), to_metric(head)) {
        (Some(a), Some(b)) => a.distance(b) < tolerance,
        _ => false,
    };
    if close {
        polyline.extend_from_slice(&next[1..]);
    }
    close
}
