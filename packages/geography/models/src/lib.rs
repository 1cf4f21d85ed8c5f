#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Statistical unit, region and competitor site types.
//!
//! A statistical unit is a census tract: the smallest area for which
//! population and demographic statistics are published. Units are
//! immutable once created; demographic attributes the statistics authority
//! suppressed are carried as `None` and never coerced to zero.

pub mod region;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use region::{AlbersParams, Envelope, Region};

/// Square meters in one square mile.
pub const SQ_METERS_PER_SQ_MILE: f64 = 2_589_988.11;

/// Meters in one statute mile.
pub const METERS_PER_MILE: f64 = 1_609.344;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

impl LatLon {
    /// Creates a coordinate.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and within the valid ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Error returned when a string is not a valid tract identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid tract GEOID '{value}': expected 11 ASCII digits")]
pub struct UnitIdError {
    /// The rejected input.
    pub value: String,
}

/// Census tract GEOID: 2-digit state FIPS + 3-digit county FIPS + 6-digit
/// tract code (e.g. `"12095016501"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId(String);

impl UnitId {
    /// Builds an identifier from its three components.
    ///
    /// # Errors
    ///
    /// Returns [`UnitIdError`] if the concatenation is not 11 digits.
    pub fn from_parts(state: &str, county: &str, tract: &str) -> Result<Self, UnitIdError> {
        format!("{state}{county}{tract}").parse()
    }

    /// The full 11-character GEOID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-digit state FIPS code.
    #[must_use]
    pub fn state_fips(&self) -> &str {
        &self.0[..2]
    }

    /// Three-digit county FIPS code.
    #[must_use]
    pub fn county_fips(&self) -> &str {
        &self.0[2..5]
    }

    /// Six-digit tract code.
    #[must_use]
    pub fn tract_code(&self) -> &str {
        &self.0[5..]
    }

    /// Region owning this unit, if it is a supported one.
    #[must_use]
    pub fn region(&self) -> Option<Region> {
        Region::from_state_fips(self.state_fips())
    }
}

impl FromStr for UnitId {
    type Err = UnitIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() == 11 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(UnitIdError {
                value: s.to_string(),
            })
        }
    }
}

impl TryFrom<String> for UnitId {
    type Error = UnitIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UnitId> for String {
    fn from(id: UnitId) -> Self {
        id.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A numeric attribute published for a unit.
///
/// The string form doubles as the snapshot column name and the feature
/// name.
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
pub enum Attribute {
    /// Total population (`B01001_001E`).
    #[strum(to_string = "total_population")]
    Population,
    /// Median age (`B01002_001E`).
    #[strum(to_string = "median_age")]
    MedianAge,
    /// Median household income (`B19013_001E`).
    #[strum(to_string = "median_household_income")]
    MedianHouseholdIncome,
    /// Per-capita income (`B19301_001E`).
    #[strum(to_string = "per_capita_income")]
    PerCapitaIncome,
    /// Population aged 25 and over (`B15003_001E`).
    #[strum(to_string = "total_pop_25_plus")]
    Population25Plus,
    /// Bachelor's degree holders (`B15003_022E`).
    #[strum(to_string = "bachelors_degree")]
    Bachelors,
    /// Master's degree holders (`B15003_023E`).
    #[strum(to_string = "masters_degree")]
    Masters,
    /// Professional degree holders (`B15003_024E`).
    #[strum(to_string = "professional_degree")]
    Professional,
    /// Doctorate holders (`B15003_025E`).
    #[strum(to_string = "doctorate_degree")]
    Doctorate,
}

impl Attribute {
    /// Demographic attributes, in snapshot column order. Population is not
    /// included; it is a required field of every unit.
    pub const DEMOGRAPHIC: &[Self] = &[
        Self::MedianAge,
        Self::MedianHouseholdIncome,
        Self::PerCapitaIncome,
        Self::Population25Plus,
        Self::Bachelors,
        Self::Masters,
        Self::Professional,
        Self::Doctorate,
    ];

    /// ACS 5-year variable code for this attribute.
    #[must_use]
    pub const fn acs_variable(self) -> &'static str {
        match self {
            Self::Population => "B01001_001E",
            Self::MedianAge => "B01002_001E",
            Self::MedianHouseholdIncome => "B19013_001E",
            Self::PerCapitaIncome => "B19301_001E",
            Self::Population25Plus => "B15003_001E",
            Self::Bachelors => "B15003_022E",
            Self::Masters => "B15003_023E",
            Self::Professional => "B15003_024E",
            Self::Doctorate => "B15003_025E",
        }
    }
}

/// Demographic attributes of a unit. `None` means the value was not
/// published; it is never equivalent to an observed zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    /// Median age in years.
    pub median_age: Option<f64>,
    /// Median household income in dollars.
    pub median_household_income: Option<f64>,
    /// Per-capita income in dollars.
    pub per_capita_income: Option<f64>,
    /// Population aged 25 and over.
    pub total_pop_25_plus: Option<f64>,
    /// Bachelor's degree holders.
    pub bachelors_degree: Option<f64>,
    /// Master's degree holders.
    pub masters_degree: Option<f64>,
    /// Professional degree holders.
    pub professional_degree: Option<f64>,
    /// Doctorate holders.
    pub doctorate_degree: Option<f64>,
}

impl Demographics {
    /// Value of a demographic attribute. Always `None` for
    /// [`Attribute::Population`], which lives on the unit itself.
    #[must_use]
    pub const fn get(&self, attribute: Attribute) -> Option<f64> {
        match attribute {
            Attribute::Population => None,
            Attribute::MedianAge => self.median_age,
            Attribute::MedianHouseholdIncome => self.median_household_income,
            Attribute::PerCapitaIncome => self.per_capita_income,
            Attribute::Population25Plus => self.total_pop_25_plus,
            Attribute::Bachelors => self.bachelors_degree,
            Attribute::Masters => self.masters_degree,
            Attribute::Professional => self.professional_degree,
            Attribute::Doctorate => self.doctorate_degree,
        }
    }

    /// Sets a demographic attribute. Ignored for
    /// [`Attribute::Population`].
    pub const fn set(&mut self, attribute: Attribute, value: Option<f64>) {
        match attribute {
            Attribute::Population => {}
            Attribute::MedianAge => self.median_age = value,
            Attribute::MedianHouseholdIncome => self.median_household_income = value,
            Attribute::PerCapitaIncome => self.per_capita_income = value,
            Attribute::Population25Plus => self.total_pop_25_plus = value,
            Attribute::Bachelors => self.bachelors_degree = value,
            Attribute::Masters => self.masters_degree = value,
            Attribute::Professional => self.professional_degree = value,
            Attribute::Doctorate => self.doctorate_degree = value,
        }
    }

    /// Attributes that are absent.
    #[must_use]
    pub fn absent(&self) -> Vec<Attribute> {
        Attribute::DEMOGRAPHIC
            .iter()
            .copied()
            .filter(|a| self.get(*a).is_none())
            .collect()
    }
}

/// A census tract with its population and demographic statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalUnit {
    /// Tract GEOID.
    pub id: UnitId,
    /// Internal point (centroid) of the tract.
    pub centroid: LatLon,
    /// Land area in square meters.
    pub land_area_sqm: f64,
    /// Total population.
    pub population: u32,
    /// Demographic attributes.
    pub demographics: Demographics,
    /// Attributes whose value was not observed at the source and was filled
    /// by a default-on-absence rule.
    pub estimated: BTreeSet<Attribute>,
}

impl StatisticalUnit {
    /// Whether every attribute was observed: nothing estimated and no
    /// demographic attribute absent.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.estimated.is_empty() && self.demographics.absent().is_empty()
    }

    /// Land area in square miles.
    #[must_use]
    pub fn land_area_sq_mi(&self) -> f64 {
        self.land_area_sqm / SQ_METERS_PER_SQ_MILE
    }

    /// Residents per square mile of land, or `None` without land area.
    #[must_use]
    pub fn population_density(&self) -> Option<f64> {
        let sq_mi = self.land_area_sq_mi();
        (sq_mi > 0.0).then(|| f64::from(self.population) / sq_mi)
    }
}

/// A competing retail site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorSite {
    /// Roster identifier.
    pub id: String,
    /// Region the site operates in.
    pub region: Region,
    /// Site location.
    pub location: LatLon,
    /// Store size in square feet, when known.
    pub sq_ft: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_geoid_components() {
        let id: UnitId = "12095016501".parse().unwrap();
        assert_eq!(id.state_fips(), "12");
        assert_eq!(id.county_fips(), "095");
        assert_eq!(id.tract_code(), "016501");
        assert_eq!(id.region(), Some(Region::Florida));
    }

    #[test]
    fn rejects_malformed_geoids() {
        assert!("1209501650".parse::<UnitId>().is_err());
        assert!("12O95016501".parse::<UnitId>().is_err());
        assert!("".parse::<UnitId>().is_err());
    }

    #[test]
    fn builds_from_parts() {
        let id = UnitId::from_parts("42", "101", "000500").unwrap();
        assert_eq!(id.as_str(), "42101000500");
        assert_eq!(id.region(), Some(Region::Pennsylvania));
    }

    #[test]
    fn attribute_names_match_columns() {
        assert_eq!(Attribute::Population.to_string(), "total_population");
        assert_eq!(Attribute::Population25Plus.to_string(), "total_pop_25_plus");
        assert_eq!(
            "median_household_income".parse::<Attribute>().unwrap(),
            Attribute::MedianHouseholdIncome
        );
    }

    #[test]
    fn absent_demographics_are_not_zero() {
        let mut demographics = Demographics::default();
        demographics.set(Attribute::MedianAge, Some(0.0));
        assert_eq!(demographics.get(Attribute::MedianAge), Some(0.0));
        assert_eq!(demographics.get(Attribute::PerCapitaIncome), None);
        assert_eq!(demographics.absent().len(), Attribute::DEMOGRAPHIC.len() - 1);
    }

    #[test]
    fn density_uses_square_miles() {
        let unit = StatisticalUnit {
            id: "12095016501".parse().unwrap(),
            centroid: LatLon::new(28.5, -81.2),
            land_area_sqm: SQ_METERS_PER_SQ_MILE * 2.0,
            population: 3_000,
            demographics: Demographics::default(),
            estimated: BTreeSet::new(),
        };
        assert!((unit.population_density().unwrap() - 1_500.0).abs() < 1e-9);
        assert!(!unit.is_complete());
    }
}
