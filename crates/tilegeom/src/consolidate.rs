//! Mesh clean-up passes run on finished geometry before serialization.

use crate::scene::{Primitive, Scene, Vertex};
use rstar::primitives::GeomWithData;
use rstar::RTree;

/// Triangles with less area than this (m²) are dropped as degenerate.
pub const DEGENERATE_AREA_EPSILON: f64 = 1e-10;

/// Which vertices count as the same when welding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeldOptions {
    /// Positions closer than this (strictly) are merge candidates.
    pub position_tolerance: f64,
    pub match_tex_coord: bool,
    pub match_normal: bool,
    pub match_color: bool,
    pub match_batch_id: bool,
}

impl Default for WeldOptions {
    fn default() -> Self {
        Self {
            position_tolerance: 1e-4,
            match_tex_coord: true,
            match_normal: true,
            match_color: true,
            match_batch_id: true,
        }
    }
}

impl WeldOptions {
    fn attributes_match(&self, a: &Vertex, b: &Vertex) -> bool {
        (!self.match_tex_coord || a.tex_coord == b.tex_coord)
            && (!self.match_normal || a.normal == b.normal)
            && (!self.match_color || a.color == b.color)
            && (!self.match_batch_id || a.batch_id == b.batch_id)
    }
}

type Kept = GeomWithData<[f64; 3], u32>;

impl Primitive {
    /// Merge vertices that are within tolerance and agree on every matched attribute.
    ///
    /// Each vertex maps to the earliest kept vertex it matches, so kept vertices keep
    /// their original relative order and a second pass with the same options changes nothing.
    pub fn weld_vertices(&mut self, options: &WeldOptions) {
        if self.vertices.is_empty() {
            return;
        }

        let tol = options.position_tolerance;
        let mut tree: RTree<Kept> = RTree::new();
        let mut kept: Vec<Vertex> = Vec::with_capacity(self.vertices.len());
        let mut remap: Vec<u32> = Vec::with_capacity(self.vertices.len());

        for vertex in &self.vertices {
            let p = vertex.position.to_array();

            let target = if tol > 0.0 {
                tree.locate_within_distance(p, tol * tol)
                    .filter(|k| {
                        let q = &kept[k.data as usize];
                        q.position.distance(vertex.position) < tol
                            && options.attributes_match(q, vertex)
                    })
                    .map(|k| k.data)
                    .min()
            } else {
                None
            };

            match target {
                Some(id) => remap.push(id),
                None => {
                    let id = kept.len() as u32;
                    kept.push(*vertex);
                    tree.insert(Kept::new(p, id));
                    remap.push(id);
                }
            }
        }

        for index in &mut self.indices {
            *index = remap[*index as usize];
        }
        self.vertices = kept;
    }

    /// Rescale nonzero normals to unit length; zero normals stay as they are.
    pub fn unitize_normals(&mut self) {
        for normal in self.vertices.iter_mut().filter_map(|v| v.normal.as_mut()) {
            if let Some(unit) = normal.try_normalize() {
                *normal = unit;
            }
        }
    }

    /// Drop triangles that repeat an index or have (near) zero area.
    pub fn delete_degenerate_faces(&mut self) {
        let keep: Vec<u32> = self
            .triangles()
            .filter(|&[a, b, c]| {
                a != b
                    && b != c
                    && a != c
                    && self.face_normal([a, b, c]).length() * 0.5 >= DEGENERATE_AREA_EPSILON
            })
            .flatten()
            .collect();
        self.indices = keep;
    }

    pub fn clear_normals(&mut self) {
        for vertex in &mut self.vertices {
            vertex.normal = None;
        }
    }
}

impl Scene {
    pub fn weld_vertices(&mut self, options: &WeldOptions) {
        self.for_each_primitive_mut(|p| p.weld_vertices(options));
    }

    pub fn unitize_normals(&mut self) {
        self.for_each_primitive_mut(Primitive::unitize_normals);
    }

    pub fn delete_degenerate_faces(&mut self) {
        self.for_each_primitive_mut(Primitive::delete_degenerate_faces);
    }

    pub fn clear_normals(&mut self) {
        self.for_each_primitive_mut(Primitive::clear_normals);
    }

    /// Standard clean-up order: weld, degenerate faces, normals.
    ///
    /// Welding can fold a sliver onto a repeated index, so faces are filtered after it.
    pub fn consolidate(&mut self, options: &WeldOptions) {
        self.weld_vertices(options);
        self.delete_degenerate_faces();
        self.unitize_normals();
    }
}
