//! Feature names as the downstream model expects them.

use site_predict_geography_models::Region;

/// Store size in square feet.
pub const SQ_FT: &str = "sq_ft";
/// Home tract population per square mile of land.
pub const POPULATION_DENSITY: &str = "population_density";
/// Home tract land area in square meters.
pub const TRACT_AREA_SQM: &str = "tract_area_sqm";
/// Share of the 25+ population holding a bachelor's degree or higher.
pub const PCT_BACHELOR_PLUS: &str = "pct_bachelor_plus";
/// `pop_5mi × median_household_income / 1e6`.
pub const AFFLUENT_MARKET_5MI: &str = "affluent_market_5mi";
/// `pct_bachelor_plus × population_density`.
pub const EDUCATED_URBAN_SCORE: &str = "educated_urban_score";
/// `median_age × pop_3mi / 1000`.
pub const AGE_ADJUSTED_CATCHMENT_3MI: &str = "age_adjusted_catchment_3mi";

/// Features crossed with each region indicator.
pub const REGIONAL_BASES: &[&str] = &[
    "pop_5mi",
    "pop_20mi",
    "competitors_5mi",
    "saturation_5mi",
    "median_household_income",
];

/// Radius as it appears in a feature name: `5` for 5.0, `2.5` for 2.5.
#[must_use]
pub fn radius_label(radius_miles: f64) -> String {
    if radius_miles.fract().abs() < f64::EPSILON {
        format!("{radius_miles:.0}")
    } else {
        format!("{radius_miles}")
    }
}

#[must_use]
pub fn population(radius_miles: f64) -> String {
    format!("pop_{}mi", radius_label(radius_miles))
}

#[must_use]
pub fn competitors(radius_miles: f64) -> String {
    format!("competitors_{}mi", radius_label(radius_miles))
}

#[must_use]
pub fn saturation(radius_miles: f64) -> String {
    format!("saturation_{}mi", radius_label(radius_miles))
}

#[must_use]
pub fn weighted_competition(radius_miles: f64) -> String {
    format!("competition_weighted_{}mi", radius_label(radius_miles))
}

/// `is_FL`, `is_PA`.
#[must_use]
pub fn indicator(region: Region) -> String {
    format!("is_{}", region.code())
}

/// `pop_5mi_FL` and friends.
#[must_use]
pub fn regional(base: &str, region: Region) -> String {
    format!("{base}_{}", region.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_radii_have_no_decimal() {
        assert_eq!(population(5.0), "pop_5mi");
        assert_eq!(saturation(20.0), "saturation_20mi");
        assert_eq!(competitors(2.5), "competitors_2.5mi");
        assert_eq!(weighted_competition(20.0), "competition_weighted_20mi");
    }

    #[test]
    fn region_names_use_postal_code() {
        assert_eq!(indicator(Region::Florida), "is_FL");
        assert_eq!(regional("pop_5mi", Region::Pennsylvania), "pop_5mi_PA");
    }
}
