//! WGS84 (lon, lat) to planar reprojection for the target systems the converter draws in.
//!
//! Supported EPSG codes: 4326 (no-op), 3857 / 900913 (spherical Web Mercator),
//! 3395 (ellipsoidal World Mercator), 2154 (Lambert-93), 326xx / 327xx (UTM north /
//! south on WGS84) and 258xx (UTM north on GRS80, ETRS89).

use std::f64::consts::FRAC_PI_4;

use regex::Regex;

use crate::data::osm::PlanarCoords;
use crate::errors::{Error, Result};

const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

// Lambert-93 (RGF93, GRS80)
const LAMBERT93_LAT1: f64 = 49.0;
const LAMBERT93_LAT2: f64 = 44.0;
const LAMBERT93_LAT0: f64 = 46.5;
const LAMBERT93_LON0: f64 = 3.0;
const LAMBERT93_FALSE_EASTING: f64 = 700_000.0;
const LAMBERT93_FALSE_NORTHING: f64 = 6_600_000.0;

pub const DEFAULT_PROJECTION: &str = "EPSG:3857";

/// Reference ellipsoid, semi-major axis in metres and flattening.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub a: f64,
    pub f: f64,
}

pub const WGS84: Ellipsoid = Ellipsoid { a: 6_378_137.0, f: 1.0 / 298.257_223_563 };
pub const GRS80: Ellipsoid = Ellipsoid { a: 6_378_137.0, f: 1.0 / 298.257_222_101 };

impl Ellipsoid {
    fn e2(&self) -> f64 {
        2.0 * self.f - self.f * self.f
    }

    fn e(&self) -> f64 {
        self.e2().sqrt()
    }

    fn e_prime2(&self) -> f64 {
        self.e2() / (1.0 - self.e2())
    }

    /// Isometric latitude term `t` (Snyder 1987, eq. 15-9).
    fn conformal_t(&self, lat: f64) -> f64 {
        let e = self.e();
        let e_sin = e * lat.sin();
        (FRAC_PI_4 - lat / 2.0).tan() / ((1.0 - e_sin) / (1.0 + e_sin)).powf(e / 2.0)
    }

    /// Snyder 1987, eq. 14-15.
    fn parallel_radius_factor(&self, lat: f64) -> f64 {
        let sin_lat = lat.sin();
        lat.cos() / (1.0 - self.e2() * sin_lat * sin_lat).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datum {
    Wgs84,
    Grs80,
}

impl Datum {
    pub fn ellipsoid(&self) -> Ellipsoid {
        match self {
            Datum::Wgs84 => WGS84,
            Datum::Grs80 => GRS80,
        }
    }
}

/// Maps WGS84 longitude/latitude in degrees to target coordinates.
pub trait Project {
    fn project(&self, lon: f64, lat: f64) -> Result<PlanarCoords>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Wgs84,
    WebMercator,
    WorldMercator,
    Lambert93,
    Utm { zone: u32, north: bool, datum: Datum },
}

impl Projection {
    /// Accepts `EPSG:3857`, `epsg:3857` or a bare `3857`.
    pub fn from_code(code: &str) -> Result<Projection> {
        let re = Regex::new(r"^(?i:epsg:)?(?<code>\d+)$")
            .map_err(|err| Error::config(err.to_string()))?;
        let epsg: u32 = re.captures(code.trim())
            .and_then(|captures| captures.name("code"))
            .ok_or_else(|| Error::projection(format!("Not an EPSG code: '{}'", code)))?
            .as_str()
            .parse()
            .map_err(|_| Error::projection(format!("EPSG code out of range: '{}'", code)))?;

        match epsg {
            4326 => Ok(Projection::Wgs84),
            3857 | 900913 => Ok(Projection::WebMercator),
            3395 => Ok(Projection::WorldMercator),
            2154 => Ok(Projection::Lambert93),
            25801..=25860 => Ok(Projection::Utm { zone: epsg - 25800, north: true, datum: Datum::Grs80 }),
            32601..=32660 => Ok(Projection::Utm { zone: epsg - 32600, north: true, datum: Datum::Wgs84 }),
            32701..=32760 => Ok(Projection::Utm { zone: epsg - 32700, north: false, datum: Datum::Wgs84 }),
            _ => Err(Error::projection(format!("Unsupported target coordinate system EPSG:{}", epsg))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Projection::Wgs84 => 4326,
            Projection::WebMercator => 3857,
            Projection::WorldMercator => 3395,
            Projection::Lambert93 => 2154,
            Projection::Utm { zone, datum: Datum::Grs80, .. } => 25800 + zone,
            Projection::Utm { zone, north: true, datum: Datum::Wgs84 } => 32600 + zone,
            Projection::Utm { zone, north: false, datum: Datum::Wgs84 } => 32700 + zone,
        }
    }
}

impl Project for Projection {
    fn project(&self, lon: f64, lat: f64) -> Result<PlanarCoords> {
        if !lon.is_finite() || !lat.is_finite() || lon.abs() > 180.0 || lat.abs() > 90.0 {
            return Err(Error::projection(format!("Invalid coordinate lon={} lat={}", lon, lat)));
        }
        match *self {
            Projection::Wgs84 => Ok(PlanarCoords::new(lon, lat)),
            Projection::WebMercator | Projection::WorldMercator | Projection::Lambert93 if lat.abs() >= 90.0 => {
                Err(Error::projection(format!("Latitude {} has no image in EPSG:{}", lat, self.epsg())))
            },
            Projection::WebMercator => Ok(web_mercator(lon, lat)),
            Projection::WorldMercator => Ok(world_mercator(lon, lat)),
            Projection::Lambert93 => Ok(lambert93(lon, lat)),
            Projection::Utm { zone, north, datum } => Ok(transverse_mercator(lon, lat, zone, north, datum.ellipsoid())),
        }
    }
}

fn web_mercator(lon: f64, lat: f64) -> PlanarCoords {
    let x = WGS84.a * lon.to_radians();
    let y = WGS84.a * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    PlanarCoords::new(x, y)
}

/// Mercator on the WGS84 ellipsoid (Snyder 1987, eq. 7-7).
fn world_mercator(lon: f64, lat: f64) -> PlanarCoords {
    let x = WGS84.a * lon.to_radians();
    let y = -WGS84.a * WGS84.conformal_t(lat.to_radians()).ln();
    PlanarCoords::new(x, y)
}

/// Lambert Conformal Conic with two standard parallels (Snyder 1987, eq. 15-1 to 15-10).
fn lambert93(lon: f64, lat: f64) -> PlanarCoords {
    let ellipsoid = GRS80;
    let lat1 = LAMBERT93_LAT1.to_radians();
    let lat2 = LAMBERT93_LAT2.to_radians();

    let m1 = ellipsoid.parallel_radius_factor(lat1);
    let m2 = ellipsoid.parallel_radius_factor(lat2);
    let t1 = ellipsoid.conformal_t(lat1);
    let t2 = ellipsoid.conformal_t(lat2);

    let n = (m1.ln() - m2.ln()) / (t1.ln() - t2.ln());
    let big_f = m1 / (n * t1.powf(n));
    let rho0 = ellipsoid.a * big_f * ellipsoid.conformal_t(LAMBERT93_LAT0.to_radians()).powf(n);
    let rho = ellipsoid.a * big_f * ellipsoid.conformal_t(lat.to_radians()).powf(n);
    let theta = n * (lon - LAMBERT93_LON0).to_radians();

    PlanarCoords::new(
        LAMBERT93_FALSE_EASTING + rho * theta.sin(),
        LAMBERT93_FALSE_NORTHING + rho0 - rho * theta.cos(),
    )
}

/// Transverse Mercator series (Snyder 1987, eq. 8-9 and 8-10).
fn transverse_mercator(lon_deg: f64, lat_deg: f64, zone: u32, north: bool, ellipsoid: Ellipsoid) -> PlanarCoords {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians();

    let e2 = ellipsoid.e2();
    let e_prime2 = ellipsoid.e_prime2();
    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = ellipsoid.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = e_prime2 * cos_lat * cos_lat;
    let a = cos_lat * (lon - lon0);
    let m = meridional_arc(lat, ellipsoid);

    let a2 = a * a;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    let easting = K0 * n
        * (a
            + (1.0 - t + c) * a2 * a / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * e_prime2) * a4 * a / 120.0)
        + FALSE_EASTING;

    let northing = K0
        * (m
            + n * tan_lat
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * e_prime2) * a6 / 720.0));

    let northing = if north { northing } else { northing + FALSE_NORTHING_SOUTH };
    PlanarCoords::new(easting, northing)
}

fn meridional_arc(lat: f64, ellipsoid: Ellipsoid) -> f64 {
    let e2 = ellipsoid.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    ellipsoid.a * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}
