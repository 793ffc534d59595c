//! Source coordinate reference systems and their inverse projections.

use crate::geo::Ellipsoid;
use std::f64::consts::FRAC_PI_2;
use std::fmt;

/// Projection of the incoming feature coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Crs {
    /// EPSG:4326, coordinates are already longitude/latitude degrees.
    #[default]
    Wgs84,
    /// EPSG:3857, spherical "pseudo" Mercator metres.
    WebMercator,
    /// Transverse Mercator (UTM zones on WGS-84, Korean belts on GRS80).
    ///
    /// The resulting latitude/longitude is used as WGS-84 without a datum shift;
    /// GRS80 and WGS-84 realisations agree to well below a millimetre here.
    TransverseMercator {
        ellipsoid: Ellipsoid,
        lon0_deg: f64,
        lat0_deg: f64,
        k0: f64,
        false_easting: f64,
        false_northing: f64,
    },
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Wgs84 => f.write_str("EPSG:4326"),
            Crs::WebMercator => f.write_str("EPSG:3857"),
            Crs::TransverseMercator {
                lon0_deg, lat0_deg, ..
            } => write!(f, "tmerc(lon0={lon0_deg}, lat0={lat0_deg})"),
        }
    }
}

impl Crs {
    /// Parse an `EPSG:nnnn` code (the prefix is optional).
    pub fn parse(code: &str) -> Result<Self, String> {
        let trimmed = code.trim();
        let digits = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        let epsg: u32 = digits
            .parse()
            .map_err(|_| format!("unrecognised CRS code '{code}'"))?;

        match epsg {
            4326 => Ok(Crs::Wgs84),
            3857 | 900913 => Ok(Crs::WebMercator),
            32601..=32660 => Ok(Self::utm(epsg - 32600, true)),
            32701..=32760 => Ok(Self::utm(epsg - 32700, false)),
            5185 => Ok(Self::korea_belt(125.0)),
            5186 => Ok(Self::korea_belt(127.0)),
            5187 => Ok(Self::korea_belt(129.0)),
            5188 => Ok(Self::korea_belt(131.0)),
            other => Err(format!("unsupported CRS EPSG:{other}")),
        }
    }

    pub fn utm(zone: u32, north: bool) -> Self {
        Crs::TransverseMercator {
            ellipsoid: Ellipsoid::WGS84,
            lon0_deg: zone as f64 * 6.0 - 183.0,
            lat0_deg: 0.0,
            k0: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
        }
    }

    /// Korea 2010 belts (EPSG:5185-5188), defined on GRS80.
    fn korea_belt(lon0_deg: f64) -> Self {
        Crs::TransverseMercator {
            ellipsoid: Ellipsoid::GRS80,
            lon0_deg,
            lat0_deg: 38.0,
            k0: 1.0,
            false_easting: 200_000.0,
            false_northing: 600_000.0,
        }
    }

    /// Projected `(x, y)` to `(lon, lat)` degrees.
    pub fn to_geographic(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        if !x.is_finite() || !y.is_finite() {
            return Err(format!("non-finite source coordinate ({x}, {y})"));
        }

        let (lon, lat) = match *self {
            Crs::Wgs84 => (x, y),
            Crs::WebMercator => {
                let r = Ellipsoid::WGS84.a;
                let lon = (x / r).to_degrees();
                let lat = (2.0 * (y / r).exp().atan() - FRAC_PI_2).to_degrees();
                (lon, lat)
            }
            Crs::TransverseMercator {
                ellipsoid,
                lon0_deg,
                lat0_deg,
                k0,
                false_easting,
                false_northing,
            } => tmerc_inverse(
                &ellipsoid,
                x - false_easting,
                y - false_northing,
                lon0_deg,
                lat0_deg,
                k0,
            ),
        };

        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
            return Err(format!("projection of ({x}, {y}) in {self} left the globe"));
        }
        Ok((lon, lat))
    }

    /// `(lon, lat)` degrees to projected `(x, y)`; the inverse of [`Crs::to_geographic`].
    ///
    /// Useful for producing source-CRS coordinates, e.g. when preparing input for a
    /// projected dataset.
    pub fn from_geographic(&self, lon: f64, lat: f64) -> (f64, f64) {
        match *self {
            Crs::Wgs84 => (lon, lat),
            Crs::WebMercator => {
                let r = Ellipsoid::WGS84.a;
                let x = r * lon.to_radians();
                let y = r * (FRAC_PI_2 * 0.5 + lat.to_radians() * 0.5).tan().ln();
                (x, y)
            }
            Crs::TransverseMercator {
                ellipsoid,
                lon0_deg,
                lat0_deg,
                k0,
                false_easting,
                false_northing,
            } => {
                let (e, n) = tmerc_forward(&ellipsoid, lon, lat, lon0_deg, lat0_deg, k0);
                (e + false_easting, n + false_northing)
            }
        }
    }
}

/// Meridian arc length from the equator.
fn meridian_arc(ell: &Ellipsoid, phi: f64) -> f64 {
    let e2 = ell.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    ell.a
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

fn tmerc_forward(ell: &Ellipsoid, lon: f64, lat: f64, lon0: f64, lat0: f64, k0: f64) -> (f64, f64) {
    let e2 = ell.e2();
    let ep2 = ell.ep2();

    let phi = lat.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = ell.a / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = (lon - lon0).to_radians() * cos_phi;

    let m = meridian_arc(ell, phi);
    let m0 = meridian_arc(ell, lat0.to_radians());

    let x = k0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0);
    let y = k0
        * (m - m0
            + n * tan_phi
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

    (x, y)
}

fn tmerc_inverse(ell: &Ellipsoid, x: f64, y: f64, lon0: f64, lat0: f64, k0: f64) -> (f64, f64) {
    let e2 = ell.e2();
    let ep2 = ell.ep2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    let m = meridian_arc(ell, lat0.to_radians()) + y / k0;
    let mu = m / (ell.a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let root = (1.0 - e2).sqrt();
    let e1 = (1.0 - root) / (1.0 + root);

    // Footpoint latitude
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let tan_phi1 = phi1.tan();
    let c1 = ep2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let w = 1.0 - e2 * sin_phi1 * sin_phi1;
    let n1 = ell.a / w.sqrt();
    let r1 = ell.a * (1.0 - e2) / w.powf(1.5);
    let d = x / (n1 * k0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);
    let lon = lon0.to_radians()
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_codes() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap(), Crs::Wgs84);
        assert_eq!(Crs::parse("3857").unwrap(), Crs::WebMercator);
        assert_eq!(Crs::parse("EPSG:32652").unwrap(), Crs::utm(52, true));
        assert!(matches!(
            Crs::parse("EPSG:5186").unwrap(),
            Crs::TransverseMercator { lon0_deg, .. } if lon0_deg == 127.0
        ));
        assert!(Crs::parse("EPSG:2097").is_err());
        assert!(Crs::parse("+proj=tmerc").is_err());
    }

    #[test]
    fn web_mercator_inverse() {
        let (lon, lat) = Crs::WebMercator.to_geographic(0.0, 0.0).unwrap();
        assert!(lon.abs() < 1e-12 && lat.abs() < 1e-12);

        let (lon, _) = Crs::WebMercator
            .to_geographic(20_037_508.342_789_244, 0.0)
            .unwrap();
        assert!((lon - 180.0).abs() < 1e-9);

        let (x, y) = Crs::WebMercator.from_geographic(126.97, 37.56);
        let (lon, lat) = Crs::WebMercator.to_geographic(x, y).unwrap();
        assert!((lon - 126.97).abs() < 1e-9 && (lat - 37.56).abs() < 1e-9);
    }

    #[test]
    fn utm_central_meridian_origin() {
        let crs = Crs::utm(52, true);
        let (lon, lat) = crs.to_geographic(500_000.0, 0.0).unwrap();
        assert!((lon - 129.0).abs() < 1e-9);
        assert!(lat.abs() < 1e-9);
    }

    #[test]
    fn transverse_mercator_round_trip() {
        for crs in [Crs::utm(52, true), Crs::parse("EPSG:5186").unwrap()] {
            let (x, y) = crs.from_geographic(126.978, 37.5665);
            let (lon, lat) = crs.to_geographic(x, y).unwrap();
            assert!((lon - 126.978).abs() < 1e-6, "{crs}: lon {lon}");
            assert!((lat - 37.5665).abs() < 1e-6, "{crs}: lat {lat}");
        }
    }

    #[test]
    fn korean_belts_use_grs80() {
        let belt = Crs::parse("EPSG:5186").unwrap();
        assert!(matches!(
            belt,
            Crs::TransverseMercator { ellipsoid, .. } if ellipsoid == Ellipsoid::GRS80
        ));
        assert!(matches!(
            Crs::utm(52, true),
            Crs::TransverseMercator { ellipsoid, .. } if ellipsoid == Ellipsoid::WGS84
        ));

        // Belt origin: 38N on the central meridian.
        let (lon, lat) = belt.to_geographic(200_000.0, 600_000.0).unwrap();
        assert!((lon - 127.0).abs() < 1e-7);
        assert!((lat - 38.0).abs() < 1e-7);
    }

    #[test]
    fn rejects_non_finite_input() {
        assert!(Crs::Wgs84.to_geographic(f64::NAN, 1.0).is_err());
        assert!(Crs::Wgs84.to_geographic(0.0, 95.0).is_err());
    }
}
