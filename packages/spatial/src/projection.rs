//! Albers equal-area conic projection on the GRS80 ellipsoid.
//!
//! Forward equations follow Snyder, *Map Projections: A Working Manual*
//! (USGS PP 1395), §14. Areas measured in projected meters equal areas on
//! the ellipsoid, which is what area-weighted population needs; distances
//! are only approximately preserved.

use geo::{Coord, MapCoords, MultiPolygon};
use site_predict_geography_models::{AlbersParams, LatLon};

/// GRS80 semi-major axis in meters.
const SEMI_MAJOR: f64 = 6_378_137.0;

/// GRS80 flattening.
const FLATTENING: f64 = 1.0 / 298.257_222_101;

/// A configured Albers projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlbersProjection {
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
    lon0: f64,
    false_easting: f64,
    false_northing: f64,
}

impl AlbersProjection {
    /// Precomputes the projection constants.
    #[must_use]
    pub fn new(params: AlbersParams) -> Self {
        let e2 = FLATTENING * (2.0 - FLATTENING);
        let e = e2.sqrt();

        let phi0 = params.lat_origin.to_radians();
        let phi1 = params.standard_parallel_1.to_radians();
        let phi2 = params.standard_parallel_2.to_radians();

        let m1 = m(phi1, e2);
        let m2 = m(phi2, e2);
        let q0 = q(phi0, e, e2);
        let q1 = q(phi1, e, e2);
        let q2 = q(phi2, e, e2);

        let n = if (phi1 - phi2).abs() < 1e-12 {
            phi1.sin()
        } else {
            (m1.powi(2) - m2.powi(2)) / (q2 - q1)
        };
        let c = n.mul_add(q1, m1.powi(2));
        let rho0 = SEMI_MAJOR * n.mul_add(-q0, c).sqrt() / n;

        Self {
            e,
            e2,
            n,
            c,
            rho0,
            lon0: params.lon_origin.to_radians(),
            false_easting: params.false_easting,
            false_northing: params.false_northing,
        }
    }

    /// Projects a WGS84 coordinate to planar meters.
    #[must_use]
    pub fn project(&self, point: LatLon) -> Coord<f64> {
        self.project_lon_lat(point.longitude, point.latitude)
    }

    /// Projects a longitude/latitude pair (degrees) to planar meters.
    #[must_use]
    pub fn project_lon_lat(&self, lon: f64, lat: f64) -> Coord<f64> {
        let q = q(lat.to_radians(), self.e, self.e2);
        let rho = SEMI_MAJOR * self.n.mul_add(-q, self.c).max(0.0).sqrt() / self.n;
        let theta = self.n * (lon.to_radians() - self.lon0);

        Coord {
            x: rho.mul_add(theta.sin(), self.false_easting),
            y: rho.mul_add(-theta.cos(), self.false_northing + self.rho0),
        }
    }

    /// Projects a WGS84 (x = longitude, y = latitude) multipolygon.
    #[must_use]
    pub fn project_multipolygon(&self, shape: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        shape.map_coords(|c| self.project_lon_lat(c.x, c.y))
    }
}

/// Snyder eq. 14-15.
fn m(phi: f64, e2: f64) -> f64 {
    let sin = phi.sin();
    phi.cos() / (e2 * sin).mul_add(-sin, 1.0).sqrt()
}

/// Snyder eq. 3-12.
fn q(phi: f64, e: f64, e2: f64) -> f64 {
    let sin = phi.sin();
    let es = e * sin;
    (1.0 - e2) * (sin / es.mul_add(-es, 1.0) - ((1.0 - es) / (1.0 + es)).ln() / (2.0 * e))
}
