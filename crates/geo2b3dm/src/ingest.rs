use anyhow::{bail, Context, Result};
use glam::DVec3;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tilegeom::{Feature, PipeProfile};
use walkdir::WalkDir;

/// A feature plus the tile it is batched into.
#[derive(Debug, Clone)]
pub struct TiledFeature {
    pub tile_code: String,
    pub feature: Feature,
}

#[derive(Debug, Deserialize)]
struct GeoJsonRoot {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<GeoJsonFeature>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonFeature {
    #[serde(default)]
    id: Option<Value>,
    geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

type Position = Vec<f64>;

/// Every `*.geojson` / `*.json` file below `input_dir`, sorted by path.
pub fn find_inputs(input_dir: &Path) -> Vec<PathBuf> {
    let mut inputs: Vec<PathBuf> = WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let ext = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.to_ascii_lowercase())
                .unwrap_or_default();
            ext == "geojson" || ext == "json"
        })
        .collect();
    inputs.sort();
    inputs
}

/// File stems and property values become file names; keep them to a safe alphabet.
pub fn sanitize_tile_code(raw: &str) -> String {
    let code: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if code.is_empty() || code.chars().all(|c| c == '.') {
        "tile".to_owned()
    } else {
        code
    }
}

fn property_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn position(raw: &[f64]) -> Option<DVec3> {
    match *raw {
        [x, y] => Some(DVec3::new(x, y, 0.0)),
        [x, y, z, ..] => Some(DVec3::new(x, y, z)),
        _ => None,
    }
}

fn line(raw: Vec<Position>) -> Option<Vec<DVec3>> {
    raw.iter().map(|p| position(p)).collect()
}

/// Outer ring plus holes.
fn polygon(raw: Vec<Vec<Position>>) -> Option<(Vec<DVec3>, Vec<Vec<DVec3>>)> {
    let mut rings = raw.into_iter().map(line);
    let outer = rings.next()??;
    let holes = rings.collect::<Option<Vec<_>>>()?;
    Some((outer, holes))
}

/// Explicit non-circular profile from `profile` / `width` / `height` (mm) properties.
fn profile_from(attributes: &BTreeMap<String, String>) -> Option<PipeProfile> {
    let number = |key: &str| {
        attributes
            .get(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
    };
    match attributes.get("profile")?.trim().to_ascii_lowercase().as_str() {
        "rectangular" => Some(PipeProfile::Rectangular {
            width: number("width")?,
            height: number("height")?,
        }),
        "oval" => Some(PipeProfile::Oval),
        "irregular" => Some(PipeProfile::Irregular),
        _ => None,
    }
}

fn expand(
    raw: GeoJsonGeometry,
    id: &str,
    profile: Option<PipeProfile>,
) -> Result<Vec<Feature>, String> {
    let bad = |e: serde_json::Error| format!("{} coordinates: {e}", raw.kind);
    let malformed = || format!("{} has a malformed position", raw.kind);

    let numbered = |k: usize, total: usize| {
        if total == 1 {
            id.to_owned()
        } else {
            format!("{id}#{k}")
        }
    };

    match raw.kind.as_str() {
        "Polygon" => {
            let rings: Vec<Vec<Position>> = serde_json::from_value(raw.coordinates.clone()).map_err(bad)?;
            let (outer, holes) = polygon(rings).ok_or_else(malformed)?;
            Ok(vec![Feature::footprint(id, outer, holes)])
        }
        "MultiPolygon" => {
            let polygons: Vec<Vec<Vec<Position>>> =
                serde_json::from_value(raw.coordinates.clone()).map_err(bad)?;
            let total = polygons.len();
            polygons
                .into_iter()
                .enumerate()
                .map(|(k, rings)| {
                    let (outer, holes) = polygon(rings).ok_or_else(malformed)?;
                    Ok(Feature::footprint(numbered(k, total), outer, holes))
                })
                .collect()
        }
        "LineString" => {
            let points: Vec<Position> = serde_json::from_value(raw.coordinates.clone()).map_err(bad)?;
            let polyline = line(points).ok_or_else(malformed)?;
            Ok(vec![Feature::pipe(id, polyline, profile)])
        }
        "MultiLineString" => {
            let lines: Vec<Vec<Position>> = serde_json::from_value(raw.coordinates.clone()).map_err(bad)?;
            let total = lines.len();
            lines
                .into_iter()
                .enumerate()
                .map(|(k, points)| {
                    let polyline = line(points).ok_or_else(malformed)?;
                    Ok(Feature::pipe(numbered(k, total), polyline, profile))
                })
                .collect()
        }
        other => Err(format!("unsupported geometry type {other}")),
    }
}

/// Read one FeatureCollection into tiled features.
///
/// The tile code is the `tile_column` property when given and present, else the file stem.
/// Features with missing or unsupported geometry are logged and dropped.
pub fn read_feature_collection(path: &Path, tile_column: Option<&str>) -> Result<Vec<TiledFeature>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let root: GeoJsonRoot = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    if root.kind != "FeatureCollection" {
        bail!("{}: expected a FeatureCollection, found {}", path.display(), root.kind);
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tile")
        .to_owned();
    let source = path.to_path_buf();
    let mut out = Vec::with_capacity(root.features.len());

    for (index, raw) in root.features.into_iter().enumerate() {
        let id = raw
            .id
            .as_ref()
            .and_then(property_string)
            .unwrap_or_else(|| format!("{stem}:{index}"));

        let attributes: BTreeMap<String, String> = raw
            .properties
            .unwrap_or_default()
            .iter()
            .filter_map(|(k, v)| property_string(v).map(|v| (k.clone(), v)))
            .collect();

        let tile_code = sanitize_tile_code(
            tile_column
                .and_then(|column| attributes.get(column))
                .map(String::as_str)
                .unwrap_or(&stem),
        );

        let Some(geometry) = raw.geometry else {
            warn!("{}: feature {id} has no geometry", path.display());
            continue;
        };

        match expand(geometry, &id, profile_from(&attributes)) {
            Ok(features) => out.extend(features.into_iter().map(|mut feature| {
                feature.attributes = attributes.clone();
                feature.source = Some(source.clone());
                TiledFeature {
                    tile_code: tile_code.clone(),
                    feature,
                }
            })),
            Err(reason) => warn!("{}: skipping feature {id}: {reason}", path.display()),
        }
    }

    debug!("{}: {} features", path.display(), out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilegeom::FeatureGeometry;

    fn write_input(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("geo2b3dm-ingest-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            { "type": "Feature", "id": 17,
              "properties": { "name": "Hall", "height": 12.5, "block": "A/1", "note": null },
              "geometry": { "type": "Polygon", "coordinates": [
                  [[127.0, 37.5], [127.001, 37.5], [127.001, 37.501], [127.0, 37.501], [127.0, 37.5]],
                  [[127.0004, 37.5004], [127.0006, 37.5004], [127.0006, 37.5006], [127.0004, 37.5004]]
              ] } },
            { "type": "Feature",
              "properties": { "diameter": "300", "block": "A/1" },
              "geometry": { "type": "MultiLineString", "coordinates": [
                  [[127.0, 37.5, 12.0], [127.001, 37.5, 12.5]],
                  [[127.001, 37.5, 12.5], [127.002, 37.5, 13.0]]
              ] } },
            { "type": "Feature", "id": "duct",
              "properties": { "profile": "Rectangular", "width": 800, "height": 400 },
              "geometry": { "type": "LineString", "coordinates": [[127.0, 37.5], [127.0, 37.6]] } },
            { "type": "Feature", "properties": {},
              "geometry": { "type": "Point", "coordinates": [127.0, 37.5] } },
            { "type": "Feature", "properties": {}, "geometry": null }
        ]
    }"#;

    #[test]
    fn reads_supported_geometries() {
        let path = write_input("district.geojson", COLLECTION);
        let features = read_feature_collection(&path, None).unwrap();

        let ids: Vec<&str> = features.iter().map(|f| f.feature.id.as_str()).collect();
        assert_eq!(ids, ["17", "district:1#0", "district:1#1", "duct"]);
        assert!(features.iter().all(|f| f.tile_code == "district"));

        let hall = &features[0].feature;
        assert_eq!(hall.attribute("height"), Some("12.5"));
        assert_eq!(hall.attribute("note"), None);
        assert_eq!(hall.source.as_deref(), Some(path.as_path()));
        match &hall.geometry {
            FeatureGeometry::Footprint { outer, holes } => {
                assert_eq!(outer.len(), 5);
                assert_eq!(holes.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        match &features[1].feature.geometry {
            FeatureGeometry::Pipe { polyline } => assert_eq!(polyline[1].z, 12.5),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(features[1].feature.profile, None);
        assert_eq!(
            features[3].feature.profile,
            Some(PipeProfile::Rectangular {
                width: 800.0,
                height: 400.0
            })
        );
    }

    #[test]
    fn tile_column_overrides_file_stem() {
        let path = write_input("by-block.geojson", COLLECTION);
        let features = read_feature_collection(&path, Some("block")).unwrap();

        let codes: Vec<&str> = features.iter().map(|f| f.tile_code.as_str()).collect();
        assert_eq!(codes, ["A_1", "A_1", "A_1", "by-block"]);
    }

    #[test]
    fn rejects_non_collections() {
        let path = write_input("single.json", r#"{ "type": "Feature", "properties": {} }"#);
        assert!(read_feature_collection(&path, None).is_err());
    }

    #[test]
    fn tile_codes_are_file_safe() {
        assert_eq!(sanitize_tile_code(" 37/127 "), "37_127");
        assert_eq!(sanitize_tile_code(".."), "tile");
        assert_eq!(sanitize_tile_code("N37-E127_v2"), "N37-E127_v2");
    }
}
