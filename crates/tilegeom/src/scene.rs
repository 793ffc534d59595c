//! Scene graph: an owned tree of nodes, each holding meshes of primitives.
//!
//! Parents own their children outright; passes that need ancestor context
//! (accumulated transforms) carry it down while walking from the root.

use crate::bbox::BoundingBox;
use glam::{DMat4, DVec2, DVec3};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub position: DVec3,
    pub normal: Option<DVec3>,
    pub tex_coord: Option<DVec2>,
    pub color: Option<[f32; 4]>,
    pub batch_id: Option<u32>,
}

impl Vertex {
    pub fn new(position: DVec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_normal(position: DVec3, normal: DVec3) -> Self {
        Self {
            position,
            normal: Some(normal),
            ..Default::default()
        }
    }
}

/// Indexed triangle list with a single material.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Primitive {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material_index: usize,
}

impl Primitive {
    /// Append a vertex and return its index.
    pub fn push_vertex(&mut self, vertex: Vertex) -> u32 {
        self.vertices.push(vertex);
        (self.vertices.len() - 1) as u32
    }

    pub fn push_triangle(&mut self, a: u32, b: u32, c: u32) {
        self.indices.extend_from_slice(&[a, b, c]);
    }

    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Geometric normal of triangle `t` (unnormalized, length = 2 × area).
    pub fn face_normal(&self, t: [u32; 3]) -> DVec3 {
        let a = self.vertices[t[0] as usize].position;
        let b = self.vertices[t[1] as usize].position;
        let c = self.vertices[t[2] as usize].position;
        (b - a).cross(c - a)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(self.vertices.iter().map(|v| v.position))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
}

impl Mesh {
    pub fn from_primitive(primitive: Primitive) -> Self {
        Self {
            primitives: vec![primitive],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub transform: DMat4,
    pub children: Vec<Node>,
    pub meshes: Vec<Mesh>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new("")
    }
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: DMat4::IDENTITY,
            children: Vec::new(),
            meshes: Vec::new(),
        }
    }

    /// Bounds of this subtree in the space of `parent`'s accumulated transform.
    pub fn bounding_box(&self, parent: &DMat4) -> BoundingBox {
        let world = *parent * self.transform;
        let mut bbox = BoundingBox::new();

        for primitive in self.meshes.iter().flat_map(|m| &m.primitives) {
            bbox.add_box(&primitive.bounding_box().transformed(&world));
        }
        for child in &self.children {
            bbox.add_box(&child.bounding_box(&world));
        }

        bbox
    }

    pub fn triangle_count(&self) -> usize {
        let own: usize = self
            .meshes
            .iter()
            .flat_map(|m| &m.primitives)
            .map(Primitive::triangle_count)
            .sum();
        own + self.children.iter().map(Node::triangle_count).sum::<usize>()
    }

    pub fn for_each_primitive(&self, f: &mut dyn FnMut(&Primitive)) {
        for primitive in self.meshes.iter().flat_map(|m| &m.primitives) {
            f(primitive);
        }
        for child in &self.children {
            child.for_each_primitive(f);
        }
    }

    pub fn for_each_primitive_mut(&mut self, f: &mut dyn FnMut(&mut Primitive)) {
        for primitive in self.meshes.iter_mut().flat_map(|m| &mut m.primitives) {
            f(primitive);
        }
        for child in &mut self.children {
            child.for_each_primitive_mut(f);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            base_color: [0.9, 0.9, 0.9, 1.0],
        }
    }
}

/// Provenance attributes, keyed by the node they describe.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneAttribute {
    pub node_name: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub root: Node,
    pub materials: Vec<Material>,
    pub attribute: SceneAttribute,
    pub original_path: Option<PathBuf>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// One identity root node, no materials, no attributes.
    pub fn new() -> Self {
        Self {
            root: Node::new("root"),
            materials: Vec::new(),
            attribute: SceneAttribute::default(),
            original_path: None,
        }
    }

    /// Record provenance attributes for the root node.
    ///
    /// The `name` entry always ends up as `display_name`, whatever the input map held.
    pub fn attach_attributes(&mut self, attributes: &BTreeMap<String, String>, display_name: &str) {
        self.attribute.node_name = self.root.name.clone();
        self.attribute.attributes = attributes.clone();
        self.attribute
            .attributes
            .insert("name".to_owned(), display_name.to_owned());
    }

    /// Union of every primitive's bounds under its accumulated transform.
    /// Walks the whole tree on each call.
    pub fn bounding_box(&self) -> BoundingBox {
        self.root.bounding_box(&DMat4::IDENTITY)
    }

    pub fn triangle_count(&self) -> usize {
        self.root.triangle_count()
    }

    /// Every primitive references an existing material.
    pub fn check_materials(&self) -> bool {
        let count = self.materials.len();
        let mut ok = true;
        self.root
            .for_each_primitive(&mut |p| ok &= p.material_index < count);
        ok
    }

    pub fn for_each_primitive_mut(&mut self, mut f: impl FnMut(&mut Primitive)) {
        self.root.for_each_primitive_mut(&mut f);
    }
}
