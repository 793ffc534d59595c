use glam::DVec3;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Pipe cross-section. Dimensions are in millimetres.
///
/// Two profiles are interchangeable for merging exactly when they compare
/// equal: same shape and identical dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipeProfile {
    Circular { diameter: f64 },
    Rectangular { width: f64, height: f64 },
    Oval,
    Irregular,
}

impl PipeProfile {
    pub fn kind(&self) -> &'static str {
        match self {
            PipeProfile::Circular { .. } => "circular",
            PipeProfile::Rectangular { .. } => "rectangular",
            PipeProfile::Oval => "oval",
            PipeProfile::Irregular => "irregular",
        }
    }

    #[inline]
    pub fn is_same_profile(&self, other: &PipeProfile) -> bool {
        self == other
    }

    /// Largest distance (metres) from the centerline to the tube surface.
    pub fn radial_offset(&self) -> f64 {
        match *self {
            PipeProfile::Circular { diameter } => diameter / 1000.0 / 2.0,
            PipeProfile::Rectangular { width, height } => width.hypot(height) / 1000.0 / 2.0,
            PipeProfile::Oval | PipeProfile::Irregular => 0.0,
        }
    }

    /// Vertical distance (metres) from the centerline to the top of the tube.
    pub fn half_height(&self) -> f64 {
        match *self {
            PipeProfile::Circular { diameter } => diameter / 1000.0 / 2.0,
            PipeProfile::Rectangular { height, .. } => height / 1000.0 / 2.0,
            PipeProfile::Oval | PipeProfile::Irregular => 0.0,
        }
    }
}

/// Feature geometry in the source CRS, one variant per extrusion kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    /// Building footprint: outer ring plus interior rings (holes).
    Footprint {
        outer: Vec<DVec3>,
        holes: Vec<Vec<DVec3>>,
    },
    /// Duct/pipe centerline.
    Pipe { polyline: Vec<DVec3> },
}

/// One input record from a feature reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub attributes: BTreeMap<String, String>,
    pub geometry: FeatureGeometry,
    pub profile: Option<PipeProfile>,
    pub source: Option<PathBuf>,
}

impl Feature {
    pub fn footprint(id: impl Into<String>, outer: Vec<DVec3>, holes: Vec<Vec<DVec3>>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
            geometry: FeatureGeometry::Footprint { outer, holes },
            profile: None,
            source: None,
        }
    }

    pub fn pipe(id: impl Into<String>, polyline: Vec<DVec3>, profile: Option<PipeProfile>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
            geometry: FeatureGeometry::Pipe { polyline },
            profile,
            source: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attribute parsed as a finite number; missing, "null" or garbage yields `None`.
    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        self.attribute(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }
}
