//! Supported regions and their region-specific geometry parameters.
//!
//! Each region carries its bounding envelope (used to reject coordinates
//! before any network call) and the parameters of the Albers equal-area
//! conic projection its buffers are computed in.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::LatLon;

/// A state the model supports.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Region {
    /// Florida (FIPS 12).
    #[strum(to_string = "FL", serialize = "florida")]
    #[serde(rename = "FL")]
    Florida,
    /// Pennsylvania (FIPS 42).
    #[strum(to_string = "PA", serialize = "pennsylvania")]
    #[serde(rename = "PA")]
    Pennsylvania,
}

/// Approximate lat/lon bounding box of a region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Southern edge.
    pub lat_min: f64,
    /// Northern edge.
    pub lat_max: f64,
    /// Western edge.
    pub lon_min: f64,
    /// Eastern edge.
    pub lon_max: f64,
}

impl Envelope {
    /// Whether the point lies inside the envelope (edges inclusive).
    #[must_use]
    pub fn contains(&self, point: LatLon) -> bool {
        (self.lat_min..=self.lat_max).contains(&point.latitude)
            && (self.lon_min..=self.lon_max).contains(&point.longitude)
    }
}

/// Parameters of an Albers equal-area conic projection on the GRS80
/// ellipsoid, in degrees and meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlbersParams {
    /// Latitude of origin.
    pub lat_origin: f64,
    /// Central meridian.
    pub lon_origin: f64,
    /// First standard parallel.
    pub standard_parallel_1: f64,
    /// Second standard parallel.
    pub standard_parallel_2: f64,
    /// False easting in meters.
    pub false_easting: f64,
    /// False northing in meters.
    pub false_northing: f64,
}

impl Region {
    /// All supported regions.
    pub const ALL: &[Self] = &[Self::Florida, Self::Pennsylvania];

    /// Two-letter state abbreviation.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Florida => "FL",
            Self::Pennsylvania => "PA",
        }
    }

    /// Two-digit state FIPS code; the first two characters of every unit
    /// identifier in this region.
    #[must_use]
    pub const fn state_fips(self) -> &'static str {
        match self {
            Self::Florida => "12",
            Self::Pennsylvania => "42",
        }
    }

    /// Full state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Florida => "Florida",
            Self::Pennsylvania => "Pennsylvania",
        }
    }

    /// Looks up the region owning a state FIPS code.
    #[must_use]
    pub fn from_state_fips(fips: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.state_fips() == fips)
    }

    /// Bounding envelope used for coordinate validation.
    #[must_use]
    pub const fn envelope(self) -> Envelope {
        match self {
            Self::Florida => Envelope {
                lat_min: 24.5,
                lat_max: 31.0,
                lon_min: -87.6,
                lon_max: -80.0,
            },
            Self::Pennsylvania => Envelope {
                lat_min: 39.7,
                lat_max: 42.3,
                lon_min: -80.5,
                lon_max: -74.7,
            },
        }
    }

    /// Equal-area projection the region's buffers are computed in.
    ///
    /// Florida uses the Florida GDL Albers definition (EPSG:3086).
    /// Pennsylvania uses standard parallels at one sixth of the state's
    /// latitude span from each edge.
    #[must_use]
    pub const fn projection(self) -> AlbersParams {
        match self {
            Self::Florida => AlbersParams {
                lat_origin: 24.0,
                lon_origin: -84.0,
                standard_parallel_1: 24.0,
                standard_parallel_2: 31.5,
                false_easting: 400_000.0,
                false_northing: 0.0,
            },
            Self::Pennsylvania => AlbersParams {
                lat_origin: 39.5,
                lon_origin: -77.6,
                standard_parallel_1: 40.133_333,
                standard_parallel_2: 41.866_667,
                false_easting: 0.0,
                false_northing: 0.0,
            },
        }
    }

    /// Median store size in square feet among the region's training sites,
    /// used when a query does not supply one.
    #[must_use]
    pub const fn median_store_sq_ft(self) -> f64 {
        match self {
            Self::Florida => 3_500.0,
            Self::Pennsylvania => 4_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn parses_codes_case_insensitively() {
        assert_eq!(Region::from_str("FL").unwrap(), Region::Florida);
        assert_eq!(Region::from_str("pa").unwrap(), Region::Pennsylvania);
        assert_eq!(Region::from_str("Florida").unwrap(), Region::Florida);
        assert!(Region::from_str("CA").is_err());
    }

    #[test]
    fn displays_as_code() {
        assert_eq!(Region::Florida.to_string(), "FL");
        assert_eq!(Region::Pennsylvania.to_string(), "PA");
    }

    #[test]
    fn fips_roundtrip() {
        for region in Region::ALL {
            assert_eq!(Region::from_state_fips(region.state_fips()), Some(*region));
        }
        assert_eq!(Region::from_state_fips("06"), None);
    }

    #[test]
    fn envelope_contains_known_cities() {
        let orlando = LatLon::new(28.5685, -81.2163);
        let philadelphia = LatLon::new(39.952_583, -75.165_222);
        assert!(Region::Florida.envelope().contains(orlando));
        assert!(!Region::Florida.envelope().contains(philadelphia));
        assert!(Region::Pennsylvania.envelope().contains(philadelphia));
    }
}
