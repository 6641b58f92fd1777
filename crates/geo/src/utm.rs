use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::{CoordinateTransform, GeoPoint, ProjectionError};

/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 first eccentricity squared.
const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);
/// WGS84 second eccentricity squared.
const WGS84_EP2: f64 = WGS84_E2 / (1.0 - WGS84_E2);

const UTM_K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    North,
    South,
}

/// Universal Transverse Mercator projection for one zone, with an optional
/// local origin subtracted so scene coordinates stay small near the area of
/// interest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmProjection {
    zone: u8,
    hemisphere: Hemisphere,
    local_origin: DVec2,
}

impl UtmProjection {
    pub fn new(zone: u8, hemisphere: Hemisphere) -> Result<Self, ProjectionError> {
        if !(1..=60).contains(&zone) {
            return Err(ProjectionError::InvalidZone(zone));
        }
        Ok(Self {
            zone,
            hemisphere,
            local_origin: DVec2::ZERO,
        })
    }

    /// Projection in the zone containing `geo`, with its local origin at `geo`.
    pub fn centered_on(geo: GeoPoint) -> Result<Self, ProjectionError> {
        if !(-80.0..=84.0).contains(&geo.lat) {
            return Err(ProjectionError::LatitudeOutOfRange(geo.lat));
        }
        let zone = (((geo.lon + 180.0) / 6.0).floor() as i32).clamp(0, 59) as u8 + 1;
        let hemisphere = if geo.lat >= 0.0 {
            Hemisphere::North
        } else {
            Hemisphere::South
        };
        let base = Self::new(zone, hemisphere)?;
        let origin = base.forward(geo);
        Ok(base.with_local_origin(origin))
    }

    /// Subtract `origin` (absolute easting/northing) from every projected point.
    pub fn with_local_origin(mut self, origin: DVec2) -> Self {
        self.local_origin = origin;
        self
    }

    pub fn zone(&self) -> u8 {
        self.zone
    }

    pub fn hemisphere(&self) -> Hemisphere {
        self.hemisphere
    }

    pub fn local_origin(&self) -> DVec2 {
        self.local_origin
    }

    fn central_meridian(&self) -> f64 {
        (self.zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
    }

    fn false_northing(&self) -> f64 {
        match self.hemisphere {
            Hemisphere::North => 0.0,
            Hemisphere::South => FALSE_NORTHING_SOUTH,
        }
    }

    /// Absolute UTM easting/northing for `geo`.
    pub fn forward(&self, geo: GeoPoint) -> DVec2 {
        let phi = geo.lat.to_radians();
        let dlam = (geo.lon - self.central_meridian()).to_radians();

        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = phi.tan();

        let n = WGS84_A / (1.0 - WGS84_E2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = WGS84_EP2 * cos_phi * cos_phi;
        let a = cos_phi * dlam;
        let m = meridian_arc(phi);

        let a2 = a * a;
        let a3 = a2 * a;
        let a4 = a3 * a;
        let a5 = a4 * a;
        let a6 = a5 * a;

        let easting = UTM_K0
            * n
            * (a + (1.0 - t + c) * a3 / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * WGS84_EP2) * a5 / 120.0)
            + FALSE_EASTING;

        let northing = UTM_K0
            * (m + n
                * tan_phi
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * WGS84_EP2) * a6 / 720.0))
            + self.false_northing();

        DVec2::new(easting, northing)
    }

    /// Geographic position for an absolute UTM easting/northing.
    pub fn inverse(&self, utm: DVec2) -> GeoPoint {
        let x = utm.x - FALSE_EASTING;
        let m = (utm.y - self.false_northing()) / UTM_K0;

        let e2 = WGS84_E2;
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        let sqrt_1me2 = (1.0 - e2).sqrt();
        let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);
        let e1_2 = e1 * e1;
        let e1_3 = e1_2 * e1;
        let e1_4 = e1_3 * e1;

        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

        let (sin_phi1, cos_phi1) = phi1.sin_cos();
        let tan_phi1 = phi1.tan();
        let denom = 1.0 - e2 * sin_phi1 * sin_phi1;

        let c1 = WGS84_EP2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let n1 = WGS84_A / denom.sqrt();
        let r1 = WGS84_A * (1.0 - e2) / denom.powf(1.5);
        let d = x / (n1 * UTM_K0);

        let d2 = d * d;
        let d3 = d2 * d;
        let d4 = d3 * d;
        let d5 = d4 * d;
        let d6 = d5 * d;

        let lat = phi1
            - (n1 * tan_phi1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * WGS84_EP2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                        - 252.0 * WGS84_EP2
                        - 3.0 * c1 * c1)
                        * d6
                        / 720.0);

        let lon = (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * WGS84_EP2 + 24.0 * t1 * t1)
                * d5
                / 120.0)
            / cos_phi1;

        GeoPoint::new(
            self.central_meridian() + lon.to_degrees(),
            lat.to_degrees(),
        )
    }
}

impl CoordinateTransform for UtmProjection {
    fn to_geographic(&self, planar: DVec2) -> GeoPoint {
        self.inverse(planar + self.local_origin)
    }

    fn to_planar(&self, geo: GeoPoint) -> DVec2 {
        self.forward(geo) - self.local_origin
    }
}

/// Length of the meridian arc from the equator to latitude `phi` (radians).
fn meridian_arc(phi: f64) -> f64 {
    let e2 = WGS84_E2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}
