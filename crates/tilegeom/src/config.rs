use crate::consolidate::WeldOptions;
use crate::crs::Crs;
use crate::pipe::{DEFAULT_CIRCLE_SEGMENTS, DEFAULT_PIPE_TOLERANCE};
use b3dm::Alignment;

/// Read-only settings shared by every conversion worker.
///
/// Built once at start-up and passed by reference; nothing mutates it mid-run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionConfig {
    /// Swap x/y of every source coordinate before projection.
    pub flip_coordinate: bool,
    pub name_column: String,
    pub height_column: String,
    /// Per-feature floor altitude; `absolute_altitude` applies when unset or unparseable.
    pub altitude_column: Option<String>,
    /// Circular pipe diameter in millimetres.
    pub diameter_column: String,
    pub minimum_height: f64,
    pub absolute_altitude: f64,
    /// Extra downward extension of every footprint prism.
    pub skirt_height: f64,
    pub crs: Crs,

    pub pipe_tolerance: f64,
    /// Depth of the pipe top below the ground elevation carried in z.
    pub pipe_depth: f64,
    pub circle_segments: usize,
    pub merge_pipes: bool,

    pub weld: WeldOptions,
    pub alignment: Alignment,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            flip_coordinate: false,
            name_column: "name".to_owned(),
            height_column: "height".to_owned(),
            altitude_column: None,
            diameter_column: "diameter".to_owned(),
            minimum_height: 1.0,
            absolute_altitude: 0.0,
            skirt_height: 0.0,
            crs: Crs::default(),
            pipe_tolerance: DEFAULT_PIPE_TOLERANCE,
            pipe_depth: 2.0,
            circle_segments: DEFAULT_CIRCLE_SEGMENTS,
            merge_pipes: false,
            weld: WeldOptions::default(),
            alignment: Alignment::default(),
        }
    }
}
