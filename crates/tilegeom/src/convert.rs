//! One feature in, one consolidated local-frame scene out.

use crate::bbox::BoundingBox;
use crate::config::ConversionConfig;
use crate::error::{Result, TileError};
use crate::extrude::FootprintExtruder;
use crate::feature::{Feature, FeatureGeometry, PipeProfile};
use crate::geo::{local_frame, to_cartesian};
use crate::pipe::{merge_pipe_features, pipe_bounds, PipeMeshBuilder};
use crate::scene::{Material, Mesh, Node, Primitive, Scene};
use glam::{DMat4, DVec3};
use log::{debug, warn};

pub const DEFAULT_BUILDING_NAME: &str = "Extrusion-Building";
pub const DEFAULT_PIPE_NAME: &str = "PipeLineString";

/// A converted feature ready for batching.
#[derive(Debug, Clone)]
pub struct BuiltFeature {
    pub feature_id: String,
    pub name: String,
    pub scene: Scene,
    /// Bounds in the feature's local frame; pipes include their radial extent.
    pub local_bounds: BoundingBox,
}

#[derive(Debug)]
pub enum FeatureOutcome {
    Built(BuiltFeature),
    Skipped { feature_id: String, reason: TileError },
}

impl FeatureOutcome {
    pub fn built(self) -> Option<BuiltFeature> {
        match self {
            FeatureOutcome::Built(built) => Some(built),
            FeatureOutcome::Skipped { .. } => None,
        }
    }
}

/// Convert one feature; invalid input becomes a logged skip, never an error.
pub fn convert_feature(feature: &Feature, config: &ConversionConfig) -> FeatureOutcome {
    let result = match &feature.geometry {
        FeatureGeometry::Footprint { outer, holes } => convert_footprint(feature, outer, holes, config),
        FeatureGeometry::Pipe { polyline } => convert_pipe(feature, polyline, config),
    };

    match result {
        Ok(built) => {
            debug!(
                "feature {} -> '{}' ({} triangles)",
                built.feature_id,
                built.name,
                built.scene.triangle_count()
            );
            FeatureOutcome::Built(built)
        }
        Err(reason) => {
            warn!("skipping feature {}: {reason}", feature.id);
            FeatureOutcome::Skipped {
                feature_id: feature.id.clone(),
                reason,
            }
        }
    }
}

/// Source coordinate to `(lon, lat, z)`, honouring the axis flip.
fn to_geographic(p: DVec3, config: &ConversionConfig, feature_id: &str) -> Result<DVec3> {
    let (x, y) = if config.flip_coordinate {
        (p.y, p.x)
    } else {
        (p.x, p.y)
    };
    let (lon, lat) = config
        .crs
        .to_geographic(x, y)
        .map_err(|reason| TileError::transform_failure(feature_id, reason))?;
    Ok(DVec3::new(lon, lat, p.z))
}

fn geographic_ring(ring: &[DVec3], config: &ConversionConfig, id: &str) -> Result<Vec<DVec3>> {
    ring.iter()
        .map(|&p| to_geographic(p, config, id).map(|g| g.truncate().extend(0.0)))
        .collect()
}

/// Geographic point into the local frame given by `inverse`.
#[inline]
fn to_local(inverse: &DMat4, g: DVec3) -> DVec3 {
    inverse.transform_point3(to_cartesian(g.x, g.y, g.z))
}

fn display_name(feature: &Feature, config: &ConversionConfig, fallback: &str) -> String {
    feature
        .attribute(&config.name_column)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback)
        .to_owned()
}

fn convert_footprint(
    feature: &Feature,
    outer: &[DVec3],
    holes: &[Vec<DVec3>],
    config: &ConversionConfig,
) -> Result<BuiltFeature> {
    let id = feature.id.as_str();
    if outer.len() < 3 {
        return Err(TileError::invalid_geometry(
            id,
            format!("ring has {} points", outer.len()),
        ));
    }

    let outer_geo = geographic_ring(outer, config, id)?;
    let holes_geo = holes
        .iter()
        .map(|h| geographic_ring(h, config, id))
        .collect::<Result<Vec<_>>>()?;

    let mut center = BoundingBox::from_points(outer_geo.iter().copied()).center();
    center.z -= config.skirt_height;
    let (frame, inverse) = local_frame(to_cartesian(center.x, center.y, center.z));

    let flatten = |ring: &[DVec3]| -> Vec<DVec3> {
        ring.iter()
            .map(|&g| {
                let mut local = to_local(&inverse, g);
                local.z = 0.0;
                local
            })
            .collect()
    };
    let outer_local = flatten(&outer_geo);
    let holes_local: Vec<Vec<DVec3>> = holes_geo.iter().map(|h| flatten(h)).collect();

    let height = feature
        .attribute_f64(&config.height_column)
        .unwrap_or(config.minimum_height)
        .max(config.minimum_height);
    let floor = config
        .altitude_column
        .as_deref()
        .and_then(|column| feature.attribute_f64(column))
        .unwrap_or(config.absolute_altitude);
    let roof = floor + height + config.skirt_height;

    let primitive = FootprintExtruder
        .extrude(&outer_local, &holes_local, floor, roof)
        .map_err(|e| TileError::invalid_geometry(id, e.to_string()))?;

    let name = display_name(feature, config, DEFAULT_BUILDING_NAME);
    let scene = assemble_scene(feature, &name, frame, primitive, config)?;
    let local_bounds = scene.root.children[0].bounding_box(&DMat4::IDENTITY);

    Ok(BuiltFeature {
        feature_id: feature.id.clone(),
        name,
        scene,
        local_bounds,
    })
}

fn pipe_profile(feature: &Feature, config: &ConversionConfig) -> Result<PipeProfile> {
    if let Some(profile) = feature.profile {
        return Ok(profile);
    }
    feature
        .attribute_f64(&config.diameter_column)
        .map(|diameter| PipeProfile::Circular { diameter })
        .ok_or_else(|| {
            TileError::invalid_geometry(
                &feature.id,
                format!("no profile and no '{}' attribute", config.diameter_column),
            )
        })
}

fn convert_pipe(feature: &Feature, polyline: &[DVec3], config: &ConversionConfig) -> Result<BuiltFeature> {
    let id = feature.id.as_str();
    if polyline.len() < 2 {
        return Err(TileError::invalid_geometry(
            id,
            format!("polyline has {} points", polyline.len()),
        ));
    }

    let profile = pipe_profile(feature, config)?;
    let drop = profile.half_height() + config.pipe_depth;

    let geo = polyline
        .iter()
        .map(|&p| {
            to_geographic(p, config, id).map(|g| DVec3::new(g.x, g.y, g.z - drop))
        })
        .collect::<Result<Vec<_>>>()?;

    let center = BoundingBox::from_points(geo.iter().copied()).center();
    let (frame, inverse) = local_frame(to_cartesian(center.x, center.y, center.z));
    let local: Vec<DVec3> = geo.iter().map(|&g| to_local(&inverse, g)).collect();

    let primitive = PipeMeshBuilder::new(config.circle_segments, config.pipe_tolerance)
        .build(&local, &profile)
        .map_err(|e| TileError::invalid_geometry(id, e.to_string()))?;

    let name = display_name(feature, config, DEFAULT_PIPE_NAME);
    let scene = assemble_scene(feature, &name, frame, primitive, config)?;

    Ok(BuiltFeature {
        feature_id: feature.id.clone(),
        name,
        scene,
        local_bounds: pipe_bounds(&local, &profile),
    })
}

/// Root node carries the local frame; one child holds the mesh.
fn assemble_scene(
    feature: &Feature,
    name: &str,
    frame: DMat4,
    primitive: Primitive,
    config: &ConversionConfig,
) -> Result<Scene> {
    let mut scene = Scene::new();
    scene.root.name = name.to_owned();
    scene.root.transform = frame;
    scene.materials.push(Material::default());
    scene.original_path = feature.source.clone();

    let mut node = Node::new(name);
    node.meshes.push(Mesh::from_primitive(primitive));
    scene.root.children.push(node);

    scene.attach_attributes(&feature.attributes, name);
    scene.consolidate(&config.weld);

    if scene.triangle_count() == 0 {
        return Err(TileError::invalid_geometry(
            &feature.id,
            "no triangles left after consolidation",
        ));
    }
    Ok(scene)
}

/// Join continuing pipe runs of one tile, comparing endpoints in geocentric metres.
///
/// Pipes without an explicit profile take theirs from the diameter column first,
/// so circular runs described only by attributes merge too.
pub fn merge_tile_pipes(mut features: Vec<Feature>, config: &ConversionConfig) -> Vec<Feature> {
    for feature in &mut features {
        if feature.profile.is_none() && matches!(feature.geometry, FeatureGeometry::Pipe { .. }) {
            feature.profile = pipe_profile(feature, config).ok();
        }
    }

    let before = features.len();
    let merged = merge_pipe_features(features, config.pipe_tolerance, |p| {
        to_geographic(p, config, "")
            .ok()
            .map(|g| to_cartesian(g.x, g.y, g.z))
    });
    if merged.len() != before {
        debug!("merged {before} pipe features into {}", merged.len());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;

    const LON: f64 = 127.0;
    const LAT: f64 = 37.5;
    /// Roughly 8.8 m east-west and 11 m north-south at this latitude.
    const D: f64 = 0.0001;

    fn square_footprint() -> Feature {
        let ring = vec![
            DVec3::new(LON, LAT, 0.0),
            DVec3::new(LON + D, LAT, 0.0),
            DVec3::new(LON + D, LAT + D, 0.0),
            DVec3::new(LON, LAT + D, 0.0),
            DVec3::new(LON, LAT, 0.0),
        ];
        Feature::footprint("b1", ring, vec![])
    }

    fn local_mesh_bounds(built: &BuiltFeature) -> BoundingBox {
        built.scene.root.children[0].bounding_box(&DMat4::IDENTITY)
    }

    fn expect_built(outcome: FeatureOutcome) -> BuiltFeature {
        match outcome {
            FeatureOutcome::Built(built) => built,
            FeatureOutcome::Skipped { reason, .. } => panic!("unexpected skip: {reason}"),
        }
    }

    fn expect_skip(outcome: FeatureOutcome) -> TileError {
        match outcome {
            FeatureOutcome::Skipped { reason, .. } => reason,
            FeatureOutcome::Built(built) => panic!("unexpected build of {}", built.feature_id),
        }
    }

    #[test]
    fn footprint_becomes_local_prism() {
        let feature = square_footprint()
            .with_attribute("height", "10")
            .with_attribute("name", "from-source")
            .with_attribute("usage", "office");
        let config = ConversionConfig {
            name_column: "label".to_owned(),
            ..ConversionConfig::default()
        };

        let built = expect_built(convert_feature(&feature, &config));

        assert_eq!(built.name, DEFAULT_BUILDING_NAME);
        assert_eq!(built.scene.root.name, DEFAULT_BUILDING_NAME);
        assert_eq!(built.scene.triangle_count(), 12);
        assert!(built.scene.check_materials());
        assert_eq!(built.scene.attribute.attributes["name"], DEFAULT_BUILDING_NAME);
        assert_eq!(built.scene.attribute.attributes["usage"], "office");

        let local = local_mesh_bounds(&built);
        assert!(local.min.z.abs() < 1e-9);
        assert!((local.max.z - 10.0).abs() < 1e-9);
        assert!(local.center().truncate().length() < 1e-3);
        assert!((local.size().x - 8.85).abs() < 0.1);

        // Root frame puts the local origin back on the ellipsoid.
        let origin = built.scene.root.transform.transform_point3(DVec3::ZERO);
        let expected = to_cartesian(LON + D / 2.0, LAT + D / 2.0, 0.0);
        assert!(origin.distance(expected) < 1e-6);
    }

    #[test]
    fn height_attributes_and_skirt() {
        let config = ConversionConfig {
            minimum_height: 3.0,
            skirt_height: 1.5,
            altitude_column: Some("ground".to_owned()),
            absolute_altitude: 20.0,
            ..ConversionConfig::default()
        };

        let low = square_footprint().with_attribute("height", "0.5");
        let local = local_mesh_bounds(&expect_built(convert_feature(&low, &config)));
        assert!((local.min.z - 20.0).abs() < 1e-9);
        assert!((local.max.z - (20.0 + 3.0 + 1.5)).abs() < 1e-9);

        let grounded = square_footprint()
            .with_attribute("height", "12")
            .with_attribute("ground", "5");
        let local = local_mesh_bounds(&expect_built(convert_feature(&grounded, &config)));
        assert!((local.min.z - 5.0).abs() < 1e-9);
        assert!((local.max.z - 18.5).abs() < 1e-9);
    }

    #[test]
    fn skirt_lowers_the_origin() {
        let config = ConversionConfig {
            skirt_height: 2.0,
            ..ConversionConfig::default()
        };
        let built = expect_built(convert_feature(&square_footprint(), &config));

        let origin = built.scene.root.transform.transform_point3(DVec3::ZERO);
        let expected = to_cartesian(LON + D / 2.0, LAT + D / 2.0, -2.0);
        assert!(origin.distance(expected) < 1e-6);
    }

    #[test]
    fn degenerate_footprints_are_skipped() {
        let config = ConversionConfig::default();

        let two = Feature::footprint(
            "tiny",
            vec![DVec3::new(LON, LAT, 0.0), DVec3::new(LON + D, LAT, 0.0)],
            vec![],
        );
        let reason = expect_skip(convert_feature(&two, &config));
        assert!(matches!(reason, TileError::InvalidGeometry { ref feature, .. } if feature == "tiny"));

        let off_globe = Feature::footprint(
            "far",
            vec![
                DVec3::new(0.0, 95.0, 0.0),
                DVec3::new(1.0, 95.0, 0.0),
                DVec3::new(1.0, 96.0, 0.0),
            ],
            vec![],
        );
        let reason = expect_skip(convert_feature(&off_globe, &config));
        assert!(matches!(reason, TileError::TransformFailure { .. }));
        assert!(reason.is_skip());
    }

    #[test]
    fn flipped_axes_match_unflipped() {
        let plain = expect_built(convert_feature(&square_footprint(), &ConversionConfig::default()));

        let swapped = match &square_footprint().geometry {
            FeatureGeometry::Footprint { outer, .. } => outer
                .iter()
                .map(|p| DVec3::new(p.y, p.x, p.z))
                .collect::<Vec<_>>(),
            FeatureGeometry::Pipe { .. } => unreachable!(),
        };
        let config = ConversionConfig {
            flip_coordinate: true,
            ..ConversionConfig::default()
        };
        let flipped = expect_built(convert_feature(&Feature::footprint("b1", swapped, vec![]), &config));

        assert!(plain
            .scene
            .root
            .transform
            .abs_diff_eq(flipped.scene.root.transform, 1e-6));
        assert_eq!(plain.scene.triangle_count(), flipped.scene.triangle_count());
    }

    #[test]
    fn projected_footprint() {
        let crs = Crs::parse("EPSG:32652").unwrap();
        let (x, y) = crs.from_geographic(LON, LAT);
        let ring = vec![
            DVec3::new(x, y, 0.0),
            DVec3::new(x + 20.0, y, 0.0),
            DVec3::new(x + 20.0, y + 10.0, 0.0),
            DVec3::new(x, y + 10.0, 0.0),
        ];
        let config = ConversionConfig {
            crs,
            ..ConversionConfig::default()
        };

        let built = expect_built(convert_feature(&Feature::footprint("utm", ring, vec![]), &config));

        // Grid convergence rotates the rectangle, so compare roof area instead of extents.
        let mut roof_area = 0.0;
        built.scene.root.children[0].for_each_primitive(&mut |p| {
            roof_area += p
                .triangles()
                .map(|t| p.face_normal(t).z)
                .filter(|z| *z > 1e-9)
                .sum::<f64>()
                * 0.5;
        });
        assert!((roof_area - 200.0).abs() < 0.5);
    }

    fn street_pipe() -> Feature {
        Feature::pipe(
            "p1",
            vec![
                DVec3::new(LON, LAT, 10.0),
                DVec3::new(LON + D, LAT, 10.0),
                DVec3::new(LON + D, LAT + D, 10.0),
            ],
            None,
        )
    }

    #[test]
    fn pipe_from_diameter_attribute() {
        let feature = street_pipe().with_attribute("diameter", "500");
        let built = expect_built(convert_feature(&feature, &ConversionConfig::default()));

        assert_eq!(built.name, DEFAULT_PIPE_NAME);
        assert!(built.scene.check_materials());

        let local = local_mesh_bounds(&built);
        assert!(local.size().z < 0.5 + 1e-2);
        assert!(built.local_bounds.contains_box(&local));

        // Centerline sits 0.25 m (radius) + 2 m below the ground elevation.
        let origin = built.scene.root.transform.transform_point3(DVec3::ZERO);
        let expected = to_cartesian(LON + D / 2.0, LAT + D / 2.0, 10.0 - 2.25);
        assert!(origin.distance(expected) < 1e-6);
    }

    #[test]
    fn pipe_profile_rules() {
        let config = ConversionConfig::default();

        let reason = expect_skip(convert_feature(&street_pipe(), &config));
        assert!(matches!(reason, TileError::InvalidGeometry { .. }));

        let mut oval = street_pipe();
        oval.profile = Some(PipeProfile::Oval);
        assert!(matches!(
            expect_skip(convert_feature(&oval, &config)),
            TileError::InvalidGeometry { .. }
        ));

        let mut duct = street_pipe();
        duct.profile = Some(PipeProfile::Rectangular {
            width: 800.0,
            height: 400.0,
        });
        let built = expect_built(convert_feature(&duct, &config));
        assert!(built.scene.triangle_count() > 0);
    }

    #[test]
    fn collapsed_pipe_is_skipped() {
        let feature = Feature::pipe(
            "stub",
            vec![DVec3::new(LON, LAT, 0.0), DVec3::new(LON, LAT, 0.001)],
            Some(PipeProfile::Circular { diameter: 300.0 }),
        );
        let reason = expect_skip(convert_feature(&feature, &ConversionConfig::default()));
        assert!(matches!(reason, TileError::InvalidGeometry { .. }));
    }

    #[test]
    fn merging_uses_metric_tolerance() {
        let profile = Some(PipeProfile::Circular { diameter: 300.0 });
        let a = Feature::pipe(
            "a",
            vec![DVec3::new(LON, LAT, 0.0), DVec3::new(LON + D, LAT, 0.0)],
            profile,
        );
        let b = Feature::pipe(
            "b",
            vec![DVec3::new(LON + D, LAT, 0.0), DVec3::new(LON + 2.0 * D, LAT, 0.0)],
            profile,
        );
        // ~1 m gap at this latitude
        let c = Feature::pipe(
            "c",
            vec![DVec3::new(LON + 2.1 * D, LAT, 0.0), DVec3::new(LON + 3.0 * D, LAT, 0.0)],
            profile,
        );

        let merged = merge_tile_pipes(vec![a, b, c], &ConversionConfig::default());
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[1].id, "c");
    }

    #[test]
    fn diameter_column_pipes_merge() {
        let run = |id: &str, diameter: &str, from: f64, to: f64| {
            Feature::pipe(
                id,
                vec![DVec3::new(from, LAT, 10.0), DVec3::new(to, LAT, 10.0)],
                None,
            )
            .with_attribute("diameter", diameter)
        };

        let merged = merge_tile_pipes(
            vec![
                run("a", "300", LON, LON + D),
                run("b", "300", LON + D, LON + 2.0 * D),
                run("c", "450", LON + 2.0 * D, LON + 3.0 * D),
            ],
            &ConversionConfig::default(),
        );

        let ids: Vec<&str> = merged.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(merged[0].profile, Some(PipeProfile::Circular { diameter: 300.0 }));
        match &merged[0].geometry {
            FeatureGeometry::Pipe { polyline } => assert_eq!(polyline.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(convert_feature(&merged[0], &ConversionConfig::default()).built().is_some());
    }
}
