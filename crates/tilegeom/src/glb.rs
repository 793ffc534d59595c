//! Binary glTF 2.0 payload writer.
//!
//! One glTF node per scene node (matrix kept), one glTF mesh per node that owns
//! meshes, one primitive per scene primitive. Vertex data is written as f32
//! POSITION/NORMAL/_BATCHID plus u32 indices, little-endian.

use crate::scene::{Material, Node, Primitive, Scene};
use glam::DMat4;
use serde_json::{json, Value};
use std::io;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const ARRAY_BUFFER: u32 = 34962;
const ELEMENT_ARRAY_BUFFER: u32 = 34963;
const FLOAT: u32 = 5126;
const UNSIGNED_INT: u32 = 5125;
const TRIANGLES: u32 = 4;

/// Turns a finalized scene into the opaque geometry payload of a tile.
pub trait PayloadWriter: Send + Sync {
    fn write_payload(&self, scene: &Scene) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy)]
pub struct GlbWriter {
    /// Wrap the scene in a Z-up → Y-up rotation node, as tile viewers expect.
    pub y_up: bool,
}

impl Default for GlbWriter {
    fn default() -> Self {
        Self { y_up: true }
    }
}

impl PayloadWriter for GlbWriter {
    fn write_payload(&self, scene: &Scene) -> io::Result<Vec<u8>> {
        let mut gltf = GltfBuilder::default();
        let mut root = gltf.add_node(&scene.root);

        if self.y_up {
            // (x, y, z) -> (x, z, -y)
            let z_up_to_y_up = DMat4::from_rotation_x(-std::f64::consts::FRAC_PI_2);
            gltf.nodes.push(json!({
                "name": "YUpAxis",
                "matrix": z_up_to_y_up.to_cols_array(),
                "children": [root],
            }));
            root = gltf.nodes.len() - 1;
        }

        gltf.finish(root, &scene.materials)
    }
}

#[derive(Default)]
struct GltfBuilder {
    bin: Vec<u8>,
    buffer_views: Vec<Value>,
    accessors: Vec<Value>,
    meshes: Vec<Value>,
    nodes: Vec<Value>,
}

impl GltfBuilder {
    fn push_view(&mut self, bytes: &[u8], target: u32) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let offset = self.bin.len();
        self.bin.extend_from_slice(bytes);
        self.buffer_views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": bytes.len(),
            "target": target,
        }));
        self.buffer_views.len() - 1
    }

    fn push_accessor(&mut self, accessor: Value) -> usize {
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    fn add_primitive(&mut self, p: &Primitive) -> Option<Value> {
        if p.vertices.is_empty() || p.indices.is_empty() {
            return None;
        }
        let count = p.vertices.len();

        let positions: Vec<[f32; 3]> = p
            .vertices
            .iter()
            .map(|v| v.position.as_vec3().to_array())
            .collect();
        let (mut min, mut max) = ([f32::MAX; 3], [f32::MIN; 3]);
        for pos in &positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(pos[axis]);
                max[axis] = max[axis].max(pos[axis]);
            }
        }

        let view = self.push_view(bytemuck::cast_slice(&positions), ARRAY_BUFFER);
        let position = self.push_accessor(json!({
            "bufferView": view,
            "componentType": FLOAT,
            "count": count,
            "type": "VEC3",
            "min": min,
            "max": max,
        }));
        let mut attributes = json!({ "POSITION": position });

        let normals: Option<Vec<[f32; 3]>> = p
            .vertices
            .iter()
            .map(|v| v.normal.map(|n| n.as_vec3().to_array()))
            .collect();
        if let Some(normals) = normals {
            let view = self.push_view(bytemuck::cast_slice(&normals), ARRAY_BUFFER);
            attributes["NORMAL"] = json!(self.push_accessor(json!({
                "bufferView": view,
                "componentType": FLOAT,
                "count": count,
                "type": "VEC3",
            })));
        }

        let batch_ids: Option<Vec<f32>> = p
            .vertices
            .iter()
            .map(|v| v.batch_id.map(|id| id as f32))
            .collect();
        if let Some(batch_ids) = batch_ids {
            let view = self.push_view(bytemuck::cast_slice(&batch_ids), ARRAY_BUFFER);
            attributes["_BATCHID"] = json!(self.push_accessor(json!({
                "bufferView": view,
                "componentType": FLOAT,
                "count": count,
                "type": "SCALAR",
            })));
        }

        let view = self.push_view(bytemuck::cast_slice(&p.indices), ELEMENT_ARRAY_BUFFER);
        let indices = self.push_accessor(json!({
            "bufferView": view,
            "componentType": UNSIGNED_INT,
            "count": p.indices.len(),
            "type": "SCALAR",
        }));

        Some(json!({
            "attributes": attributes,
            "indices": indices,
            "material": p.material_index,
            "mode": TRIANGLES,
        }))
    }

    /// Pre-order: the returned index is the first node pushed for this subtree.
    fn add_node(&mut self, node: &Node) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Value::Null);

        let mut out = json!({ "name": node.name });
        if node.transform != DMat4::IDENTITY {
            out["matrix"] = json!(node.transform.to_cols_array());
        }

        let primitives: Vec<Value> = node
            .meshes
            .iter()
            .flat_map(|m| &m.primitives)
            .filter_map(|p| self.add_primitive(p))
            .collect();
        if !primitives.is_empty() {
            self.meshes.push(json!({ "name": node.name, "primitives": primitives }));
            out["mesh"] = json!(self.meshes.len() - 1);
        }

        let children: Vec<usize> = node.children.iter().map(|c| self.add_node(c)).collect();
        if !children.is_empty() {
            out["children"] = json!(children);
        }

        self.nodes[index] = out;
        index
    }

    fn finish(mut self, root: usize, materials: &[Material]) -> io::Result<Vec<u8>> {
        let materials: Vec<Value> = materials
            .iter()
            .map(|m| {
                json!({
                    "name": m.name,
                    "pbrMetallicRoughness": {
                        "baseColorFactor": m.base_color,
                        "metallicFactor": 0.0,
                        "roughnessFactor": 1.0,
                    },
                })
            })
            .collect();

        let mut doc = json!({
            "asset": { "version": "2.0", "generator": "tilegeom" },
            "scene": 0,
            "scenes": [{ "nodes": [root] }],
            "nodes": self.nodes,
            "meshes": self.meshes,
            "materials": materials,
            "accessors": self.accessors,
            "bufferViews": self.buffer_views,
        });
        if !self.bin.is_empty() {
            doc["buffers"] = json!([{ "byteLength": self.bin.len() }]);
        }

        let mut json_chunk = serde_json::to_vec(&doc)?;
        while json_chunk.len() % 4 != 0 {
            json_chunk.push(b' ');
        }
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }

        let bin_chunk_len = if self.bin.is_empty() { 0 } else { 8 + self.bin.len() };
        let total = 12 + 8 + json_chunk.len() + bin_chunk_len;
        let total = u32::try_from(total)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "GLB exceeds 4 GiB"))?;

        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(GLB_MAGIC);
        out.extend_from_slice(&GLB_VERSION.to_le_bytes());
        out.extend_from_slice(&total.to_le_bytes());
        out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        out.extend_from_slice(&json_chunk);
        if !self.bin.is_empty() {
            out.extend_from_slice(&(self.bin.len() as u32).to_le_bytes());
            out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
            out.extend_from_slice(&self.bin);
        }

        Ok(out)
    }
}
