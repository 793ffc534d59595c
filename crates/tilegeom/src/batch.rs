//! Tile batches: grouping built features, merging their scenes and writing
//! one `.b3dm` container per tile code.

use crate::convert::BuiltFeature;
use crate::error::{Result, TileError};
use crate::glb::{GlbWriter, PayloadWriter};
use crate::scene::Scene;
use b3dm::{Alignment, B3dmTile};
use hashbrown::HashMap;
use log::{debug, info};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

pub const B3DM_EXTENSION: &str = "b3dm";
pub const BATCHED_ROOT_NODE: &str = "BatchedRootNode";

/// Scenes sharing one tile code, in output order. Encoded as exactly one file.
#[derive(Debug, Clone, Default)]
pub struct TileBatch {
    pub tile_code: String,
    pub entries: Vec<(Scene, String)>,
}

impl TileBatch {
    pub fn new(tile_code: impl Into<String>) -> Self {
        Self {
            tile_code: tile_code.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, scene: Scene, name: impl Into<String>) {
        self.entries.push((scene, name.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(_, name)| name.as_str()).collect()
    }

    /// One scene holding every entry under a common root.
    ///
    /// Entry `i` becomes child `i`, its material indices are shifted past the
    /// materials of earlier entries and each of its vertices gets `batch_id = i`.
    pub fn merged_scene(&self) -> Scene {
        let mut merged = Scene::new();
        merged.root.name = BATCHED_ROOT_NODE.to_owned();

        for (i, (scene, _)) in self.entries.iter().enumerate() {
            let offset = merged.materials.len();
            merged.materials.extend(scene.materials.iter().cloned());

            let mut root = scene.root.clone();
            let batch_id = i as u32;
            root.for_each_primitive_mut(&mut |p| {
                p.material_index += offset;
                for v in &mut p.vertices {
                    v.batch_id = Some(batch_id);
                }
            });
            merged.root.children.push(root);
        }

        merged
    }
}

/// Group `(tile_code, feature)` pairs into batches.
///
/// Batches come out in order of first appearance; entries keep input order.
pub fn group_into_batches<I>(features: I) -> Vec<TileBatch>
where
    I: IntoIterator<Item = (String, BuiltFeature)>,
{
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut batches: Vec<TileBatch> = Vec::new();

    for (tile_code, built) in features {
        let slot = *slots.entry(tile_code.clone()).or_insert_with(|| {
            batches.push(TileBatch::new(tile_code));
            batches.len() - 1
        });
        batches[slot].push(built.scene, built.name);
    }

    batches
}

/// Writes tile batches into an output directory.
#[derive(Debug, Clone)]
pub struct TileEncoder<W = GlbWriter> {
    output_dir: PathBuf,
    writer: W,
    alignment: Alignment,
}

impl TileEncoder<GlbWriter> {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_writer(output_dir, GlbWriter::default())
    }
}

impl<W: PayloadWriter> TileEncoder<W> {
    pub fn with_writer(output_dir: impl Into<PathBuf>, writer: W) -> Self {
        Self {
            output_dir: output_dir.into(),
            writer,
            alignment: Alignment::Unpadded,
        }
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn tile_path(&self, tile_code: &str) -> PathBuf {
        self.output_dir
            .join(format!("{tile_code}.{B3DM_EXTENSION}"))
    }

    /// Merge the batch, serialize its payload and write `<output_dir>/<tile_code>.b3dm`.
    pub fn encode(&self, batch: &TileBatch) -> Result<PathBuf> {
        let path = self.tile_path(&batch.tile_code);

        let payload = if batch.is_empty() {
            Err(io::Error::new(ErrorKind::InvalidInput, "tile batch has no entries"))
        } else {
            self.writer.write_payload(&batch.merged_scene())
        }
        .map_err(|source| TileError::SerializationFailure {
            path: path.clone(),
            source,
        })?;

        self.write_tile(&batch.tile_code, &batch.names(), payload)
    }

    /// Wrap an already serialized payload with the batch tables and write it.
    ///
    /// A failed write removes the partial file.
    pub fn write_tile<S: AsRef<str>>(
        &self,
        tile_code: &str,
        names: &[S],
        payload: Vec<u8>,
    ) -> Result<PathBuf> {
        let path = self.tile_path(tile_code);

        let written = B3dmTile::from_names(names, payload).and_then(|tile| {
            let tile = tile.aligned(self.alignment);
            let header = tile.header()?;
            b3dm::write_file(&path, &tile)?;
            Ok(header)
        });

        match written {
            Ok(header) => {
                info!(
                    "wrote {} ({} entries, {} bytes)",
                    path.display(),
                    names.len(),
                    header.byte_length
                );
                Ok(path)
            }
            Err(source) => {
                if fs::remove_file(&path).is_ok() {
                    debug!("removed partial tile {}", path.display());
                }
                Err(TileError::SerializationFailure { path, source })
            }
        }
    }
}

/// Payload bytes of a tile file, exactly as stored.
pub fn extract(path: &Path) -> Result<Vec<u8>> {
    b3dm::read_file(path)
        .map(|tile| tile.payload)
        .map_err(|source| TileError::MalformedContainer {
            path: path.to_path_buf(),
            source,
        })
}

/// Write the payload of `input` to `output`; returns the payload length.
pub fn extract_to(input: &Path, output: &Path) -> Result<usize> {
    let payload = extract(input)?;
    fs::write(output, &payload).map_err(|source| TileError::SerializationFailure {
        path: output.to_path_buf(),
        source,
    })?;
    debug!("extracted {} bytes from {}", payload.len(), input.display());
    Ok(payload.len())
}
