use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds of the conversion and tiling pipeline.
///
/// `InvalidGeometry` and `TransformFailure` are per-feature skip reasons; the
/// other two are per-file failures and name the offending path.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("feature {feature}: invalid geometry: {reason}")]
    InvalidGeometry { feature: String, reason: String },

    #[error("feature {feature}: coordinate transform failed: {reason}")]
    TransformFailure { feature: String, reason: String },

    #[error("failed to write tile {}: {source}", path.display())]
    SerializationFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed container {}: {source}", path.display())]
    MalformedContainer {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TileError {
    pub fn invalid_geometry(feature: &str, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            feature: feature.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn transform_failure(feature: &str, reason: impl Into<String>) -> Self {
        Self::TransformFailure {
            feature: feature.to_owned(),
            reason: reason.into(),
        }
    }

    /// True for outcomes that skip a single feature without affecting its batch.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::InvalidGeometry { .. } | Self::TransformFailure { .. }
        )
    }
}

pub type Result<T, E = TileError> = std::result::Result<T, E>;

/// Why a geometry builder refused its input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshError {
    #[error("ring has {0} distinct points, need at least 3")]
    TooFewRingPoints(usize),

    #[error("roof height {roof} is below floor height {floor}")]
    InvertedHeights { floor: f64, roof: f64 },

    #[error("polyline has {0} points after collapsing, need at least 2")]
    TooFewPolylinePoints(usize),

    #[error("no cross-section generator for {0} profiles")]
    UnsupportedProfile(&'static str),

    #[error("profile dimensions must be positive")]
    EmptyProfile,

    #[error("non-finite coordinate")]
    NonFinite,

    #[error("cap triangulation failed: {0}")]
    Triangulation(String),
}
