//! Georeferenced footprints and pipe centerlines → local-frame scene graphs →
//! batched `.b3dm` tiles.
//!
//! Flow per feature: [`convert_feature`] re-bases the geometry into an
//! east/north/up frame at the feature's centre, extrudes it
//! ([`FootprintExtruder`] or [`PipeMeshBuilder`]), assembles a [`Scene`] and
//! consolidates it. Built features are grouped with [`group_into_batches`] and
//! written by a [`TileEncoder`].

pub mod batch;
pub mod bbox;
pub mod config;
pub mod consolidate;
pub mod convert;
pub mod crs;
pub mod error;
pub mod extrude;
pub mod feature;
pub mod geo;
pub mod glb;
pub mod pipe;
pub mod scene;
pub mod tessellate;

pub use batch::{extract, extract_to, group_into_batches, TileBatch, TileEncoder};
pub use bbox::BoundingBox;
pub use config::ConversionConfig;
pub use consolidate::WeldOptions;
pub use convert::{convert_feature, merge_tile_pipes, BuiltFeature, FeatureOutcome};
pub use crs::Crs;
pub use error::{MeshError, Result, TileError};
pub use extrude::FootprintExtruder;
pub use feature::{Feature, FeatureGeometry, PipeProfile};
pub use geo::Ellipsoid;
pub use glb::{GlbWriter, PayloadWriter};
pub use pipe::{merge_pipe_features, PipeMeshBuilder};
pub use scene::{Material, Mesh, Node, Primitive, Scene, SceneAttribute, Vertex};

pub use b3dm::Alignment;
