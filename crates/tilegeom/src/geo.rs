//! Geographic ↔ local Cartesian transforms on the WGS-84 ellipsoid.
//!
//! Each feature gets its own east/north/up tangent frame anchored at the
//! centre of its bounding box; all meshing happens in that frame and the
//! frame matrix becomes the feature's root node transform.

use glam::{DMat4, DVec3, DVec4};

/// Reference ellipsoid given by its semi-major axis and inverse flattening.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub a: f64,
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_223_563,
    };

    /// Korean and most national grids; differs from WGS-84 by 0.1 mm at the pole.
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_222_101,
    };

    pub fn b(&self) -> f64 {
        self.a * (1.0 - 1.0 / self.inv_f)
    }

    /// First eccentricity squared.
    pub fn e2(&self) -> f64 {
        let f = 1.0 / self.inv_f;
        f * (2.0 - f)
    }

    /// Second eccentricity squared.
    pub fn ep2(&self) -> f64 {
        let e2 = self.e2();
        e2 / (1.0 - e2)
    }
}

/// Geographic (degrees, metres) to geocentric Cartesian metres.
pub fn to_cartesian(lon_deg: f64, lat_deg: f64, alt_m: f64) -> DVec3 {
    let wgs84 = Ellipsoid::WGS84;
    let e2 = wgs84.e2();
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();

    // Prime vertical radius of curvature.
    let n = wgs84.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    DVec3::new(
        (n + alt_m) * cos_lat * cos_lon,
        (n + alt_m) * cos_lat * sin_lon,
        (n * (1.0 - e2) + alt_m) * sin_lat,
    )
}

/// East/north/up frame at a geocentric origin, plus its inverse.
///
/// Columns of the forward matrix are east, north, up and the origin, so it maps
/// local coordinates to ECEF. The inverse is the rigid-body inverse.
pub fn local_frame(origin: DVec3) -> (DMat4, DMat4) {
    let (a, b) = (Ellipsoid::WGS84.a, Ellipsoid::WGS84.b());

    // Ellipsoid surface normal through the origin.
    let up = DVec3::new(origin.x / (a * a), origin.y / (a * a), origin.z / (b * b))
        .try_normalize()
        .unwrap_or(DVec3::Z);

    let east = DVec3::new(-origin.y, origin.x, 0.0)
        .try_normalize()
        .unwrap_or(DVec3::Y);
    let north = up.cross(east);

    let frame = DMat4::from_cols(
        east.extend(0.0),
        north.extend(0.0),
        up.extend(0.0),
        origin.extend(1.0),
    );

    let inverse = DMat4::from_cols(
        DVec4::new(east.x, north.x, up.x, 0.0),
        DVec4::new(east.y, north.y, up.y, 0.0),
        DVec4::new(east.z, north.z, up.z, 0.0),
        DVec4::new(-east.dot(origin), -north.dot(origin), -up.dot(origin), 1.0),
    );

    (frame, inverse)
}
