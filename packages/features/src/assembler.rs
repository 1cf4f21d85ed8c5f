//! Feature vector assembly.
//!
//! Merges the home tract's census fields with the radius aggregates,
//! derives ratio and interaction terms and emits the vector in model order.
//!
//! Required fields (aggregates, population, land area, store size) are
//! never imputed. Optional demographic fields that the home tract does not
//! publish are replaced with the region median and recorded on the vector;
//! any term computed from an imputed input inherits the label. A field that
//! is still missing after imputation fails the query.

use std::collections::BTreeMap;

use site_predict_features_models::{
    Feature, FeatureVector, Imputation, ImputationBasis, Provenance, names,
};
use site_predict_geography::catalog::{UnitCatalog, median};
use site_predict_geography_models::{Attribute, Demographics, LatLon, Region, StatisticalUnit};
use site_predict_spatial::aggregator::Aggregates;

use crate::FeatureError;

/// Everything one vector is assembled from.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    pub region: Region,
    pub location: LatLon,
    /// The home tract as held by the catalog.
    pub home: &'a StatisticalUnit,
    /// Whether the home tract has zero population.
    pub home_unpopulated: bool,
    pub aggregates: &'a Aggregates,
    /// Store size in square feet, if known.
    pub size_hint: Option<f64>,
}

/// `(bachelor's + master's + professional + doctorate) / pop 25+ × 100`.
/// `None` when the 25+ population is absent or zero or a degree count is
/// absent.
#[must_use]
pub fn pct_bachelor_plus(demographics: &Demographics) -> Option<f64> {
    let pop25 = demographics.total_pop_25_plus.filter(|p| *p > 0.0)?;
    let degrees = demographics.bachelors_degree?
        + demographics.masters_degree?
        + demographics.professional_degree?
        + demographics.doctorate_degree?;
    Some(degrees / pop25 * 100.0)
}

/// Accumulates features and their provenance in model order.
struct Builder {
    region: Region,
    features: Vec<Feature>,
    provenance: Provenance,
    missing: Vec<String>,
}

impl Builder {
    fn push(&mut self, name: impl Into<String>, value: f64) {
        self.features.push(Feature {
            name: name.into(),
            value,
        });
    }

    fn push_required(&mut self, name: impl Into<String>, value: Option<f64>) {
        let name = name.into();
        match value {
            Some(value) if value.is_finite() => self.push(name, value),
            _ => self.missing.push(name),
        }
    }

    fn value(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value)
    }

    fn is_imputed(&self, name: &str) -> bool {
        self.provenance.imputations.contains_key(name)
    }

    /// Pushes an observed value, or the region median in its place.
    fn push_imputable(&mut self, name: &str, observed: Option<f64>, median: Option<f64>) {
        if let Some(value) = observed {
            self.push(name, value);
            return;
        }
        let Some(value) = median else {
            self.missing.push(name.to_string());
            return;
        };

        log::debug!("{name} absent, imputing {} median {value}", self.region);
        self.provenance.imputations.insert(
            name.to_string(),
            Imputation {
                value,
                basis: ImputationBasis::RegionMedian {
                    region: self.region,
                },
            },
        );
        self.push(name, value);
    }

    /// Pushes `value` computed from `inputs`, labelling it if any input was
    /// imputed. A term with a missing input is reported missing.
    fn push_derived(&mut self, name: &str, inputs: &[&str], compute: impl Fn(&[f64]) -> f64) {
        let values: Option<Vec<f64>> = inputs.iter().map(|input| self.value(input)).collect();
        let Some(values) = values else {
            self.missing.push(name.to_string());
            return;
        };

        let value = compute(&values);
        self.label_inherited(name, value, inputs);
        self.push(name, value);
    }

    /// Marks `name` estimated if any of `inputs` is.
    fn inherit_estimate(&mut self, name: &str, inputs: &[&str]) {
        if inputs
            .iter()
            .any(|input| self.provenance.estimated.contains(*input))
        {
            self.provenance.estimated.insert(name.to_string());
        }
    }

    fn label_inherited(&mut self, name: &str, value: f64, inputs: &[&str]) {
        self.inherit_estimate(name, inputs);
        let imputed: Vec<String> = inputs
            .iter()
            .filter(|input| self.is_imputed(input))
            .map(ToString::to_string)
            .collect();
        if !imputed.is_empty() {
            self.provenance.imputations.insert(
                name.to_string(),
                Imputation {
                    value,
                    basis: ImputationBasis::Inherited { from: imputed },
                },
            );
        }
    }
}

/// Median `pct_bachelor_plus` over the region's populated tracts.
fn region_pct_bachelor_plus(catalog: &UnitCatalog, region: Region) -> Option<f64> {
    median(
        catalog
            .units(region)
            .iter()
            .filter(|u| u.is_complete())
            .filter_map(|u| pct_bachelor_plus(&u.demographics))
            .collect(),
    )
}

/// Assembles the feature vector. `catalog` supplies region medians for
/// imputation.
///
/// # Errors
///
/// Returns [`FeatureError::IncompleteFeatureSet`] naming every field that
/// could be neither observed nor imputed.
pub fn assemble(input: &AssemblyInput<'_>, catalog: &UnitCatalog) -> Result<FeatureVector, FeatureError> {
    let home = input.home;
    let region = input.region;
    let mut b = Builder {
        region,
        features: Vec::new(),
        provenance: Provenance::new(home.id.clone()),
        missing: Vec::new(),
    };
    b.provenance.home_unit_unpopulated = input.home_unpopulated;
    b.provenance
        .approximated_units
        .clone_from(&input.aggregates.approximated_units);

    match input.size_hint.filter(|s| s.is_finite() && *s > 0.0) {
        Some(sq_ft) => b.push(names::SQ_FT, sq_ft),
        None => {
            if let Some(hint) = input.size_hint {
                log::warn!("Ignoring invalid store size {hint}, using {region} median");
            }
            b.push(names::SQ_FT, region.median_store_sq_ft());
            b.provenance.estimated.insert(names::SQ_FT.to_string());
        }
    }

    for radius in &input.aggregates.radii {
        b.push(names::population(radius.radius_miles), radius.population);
        b.push(
            names::competitors(radius.radius_miles),
            f64::from(radius.competitors),
        );
        let saturation = names::saturation(radius.radius_miles);
        if radius.saturation_sentinel {
            b.provenance.saturation_sentinels.push(saturation.clone());
        }
        b.push(saturation, radius.saturation);
    }
    b.push(
        names::weighted_competition(input.aggregates.weighted_radius_miles),
        input.aggregates.weighted_competition,
    );

    let population = Attribute::Population.to_string();
    if home.estimated.contains(&Attribute::Population) {
        b.provenance.estimated.insert(population.clone());
    }
    b.push(population.as_str(), f64::from(home.population));

    let mut effective = home.demographics.clone();
    for &attribute in Attribute::DEMOGRAPHIC {
        let name = attribute.to_string();
        let observed = home.demographics.get(attribute);
        let median = if observed.is_none() {
            catalog.median(region, attribute)
        } else {
            None
        };
        b.push_imputable(&name, observed, median);
        effective.set(attribute, b.value(&name));
    }

    b.push_required(names::POPULATION_DENSITY, home.population_density());
    b.inherit_estimate(names::POPULATION_DENSITY, &[population.as_str()]);
    b.push_required(
        names::TRACT_AREA_SQM,
        Some(home.land_area_sqm).filter(|a| *a > 0.0),
    );

    let pct_inputs = [
        Attribute::Population25Plus,
        Attribute::Bachelors,
        Attribute::Masters,
        Attribute::Professional,
        Attribute::Doctorate,
    ]
    .map(|a| a.to_string());
    let pct_inputs: Vec<&str> = pct_inputs.iter().map(String::as_str).collect();

    if let Some(pct) = pct_bachelor_plus(&effective) {
        b.label_inherited(names::PCT_BACHELOR_PLUS, pct, &pct_inputs);
        b.push(names::PCT_BACHELOR_PLUS, pct);
    } else {
        let median = region_pct_bachelor_plus(catalog, region);
        b.push_imputable(names::PCT_BACHELOR_PLUS, None, median);
    }

    let mhi = Attribute::MedianHouseholdIncome.to_string();
    let age = Attribute::MedianAge.to_string();
    b.push_derived(names::AFFLUENT_MARKET_5MI, &["pop_5mi", mhi.as_str()], |v| {
        v[0] * v[1] / 1e6
    });
    b.push_derived(
        names::EDUCATED_URBAN_SCORE,
        &[names::PCT_BACHELOR_PLUS, names::POPULATION_DENSITY],
        |v| v[0] * v[1],
    );
    b.push_derived(names::AGE_ADJUSTED_CATCHMENT_3MI, &[age.as_str(), "pop_3mi"], |v| {
        v[0] * v[1] / 1000.0
    });

    let indicators: BTreeMap<Region, f64> = Region::ALL
        .iter()
        .map(|&r| (r, if r == region { 1.0 } else { 0.0 }))
        .collect();
    for (&r, &indicator) in &indicators {
        b.push(names::indicator(r), indicator);
    }
    for (&r, &indicator) in &indicators {
        for base in names::REGIONAL_BASES {
            let name = names::regional(base, r);
            let Some(value) = b.value(base) else {
                b.missing.push(name);
                continue;
            };
            if indicator > 0.0 {
                b.label_inherited(&name, value, &[base]);
            }
            b.push(name, value * indicator);
        }
    }

    if !b.missing.is_empty() {
        return Err(FeatureError::IncompleteFeatureSet {
            home_unit: home.id.clone(),
            missing: b.missing,
        });
    }

    let vector = FeatureVector::new(region, input.location, b.features, b.provenance);
    if vector.is_degraded() {
        log::warn!(
            "Feature vector for {} (tract {}) is degraded: {}",
            input.location,
            home.id,
            vector.degradations().join("; ")
        );
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use site_predict_spatial::aggregator::RadiusAggregate;

    use super::*;

    const RADII: [f64; 5] = [1.0, 3.0, 5.0, 10.0, 20.0];
    const POPULATIONS: [f64; 5] = [14_594.0, 119_652.0, 234_133.0, 691_815.0, 1_796_438.0];

    fn demographics() -> Demographics {
        Demographics {
            median_age: Some(34.0),
            median_household_income: Some(62_000.0),
            per_capita_income: Some(31_000.0),
            total_pop_25_plus: Some(2_800.0),
            bachelors_degree: Some(600.0),
            masters_degree: Some(200.0),
            professional_degree: Some(50.0),
            doctorate_degree: Some(30.0),
        }
    }

    fn unit(geoid: &str, demographics: Demographics) -> StatisticalUnit {
        StatisticalUnit {
            id: geoid.parse().unwrap(),
            centroid: LatLon::new(28.56, -81.21),
            land_area_sqm: 2_589_988.11,
            population: 4_000,
            demographics,
            estimated: BTreeSet::new(),
        }
    }

    fn aggregates(populations: [f64; 5]) -> Aggregates {
        Aggregates {
            radii: RADII
                .iter()
                .zip(populations)
                .enumerate()
                .map(|(i, (&radius_miles, population))| {
                    let competitors = u32::try_from(i).unwrap();
                    RadiusAggregate {
                        radius_miles,
                        population,
                        competitors,
                        saturation: if population > 0.0 {
                            f64::from(competitors) / population * 100_000.0
                        } else {
                            0.0
                        },
                        saturation_sentinel: population <= 0.0,
                        units_intersecting: 1,
                    }
                })
                .collect(),
            weighted_competition: 1.25,
            weighted_radius_miles: 20.0,
            approximated_units: BTreeSet::new(),
        }
    }

    fn catalog() -> UnitCatalog {
        let catalog = UnitCatalog::in_memory();
        let mut richer = demographics();
        richer.median_age = Some(40.0);
        richer.median_household_income = Some(80_000.0);
        catalog.install_units(
            Region::Florida,
            vec![
                unit("12095000100", demographics()),
                unit("12095000200", richer.clone()),
                unit("12095000300", richer),
            ],
        );
        catalog
    }

    fn assemble_for(home: &StatisticalUnit, aggregates: &Aggregates, size_hint: Option<f64>) -> Result<FeatureVector, FeatureError> {
        assemble(
            &AssemblyInput {
                region: Region::Florida,
                location: LatLon::new(28.5685, -81.2163),
                home,
                home_unpopulated: false,
                aggregates,
                size_hint,
            },
            &catalog(),
        )
    }

    #[test]
    fn complete_tract_yields_clean_vector_in_model_order() {
        let home = unit("12095016501", demographics());
        let vector = assemble_for(&home, &aggregates(POPULATIONS), Some(4_200.0)).unwrap();

        let names: Vec<&str> = vector.names().collect();
        assert_eq!(&names[..4], &["sq_ft", "pop_1mi", "competitors_1mi", "saturation_1mi"]);
        assert_eq!(names[16], "competition_weighted_20mi");
        assert_eq!(names[17], "total_population");
        assert!(names.ends_with(&["median_household_income_PA"]));
        assert_eq!(vector.len(), 44);

        assert!(!vector.is_degraded(), "{:?}", vector.degradations());
        assert_eq!(vector.get("sq_ft"), Some(4_200.0));
        assert_eq!(vector.get("population_density"), Some(4_000.0));
        assert_eq!(vector.get("pct_bachelor_plus"), Some(880.0 / 2_800.0 * 100.0));
        assert_eq!(vector.get("affluent_market_5mi"), Some(234_133.0 * 62_000.0 / 1e6));
        assert_eq!(vector.get("age_adjusted_catchment_3mi"), Some(34.0 * 119_652.0 / 1000.0));
        assert_eq!(vector.get("is_FL"), Some(1.0));
        assert_eq!(vector.get("is_PA"), Some(0.0));
        assert_eq!(vector.get("pop_20mi_FL"), Some(1_796_438.0));
        assert_eq!(vector.get("pop_20mi_PA"), Some(0.0));
    }

    #[test]
    fn missing_size_uses_region_median() {
        let home = unit("12095016501", demographics());
        let vector = assemble_for(&home, &aggregates(POPULATIONS), None).unwrap();

        assert_eq!(vector.get("sq_ft"), Some(3_500.0));
        assert!(vector.provenance.estimated.contains("sq_ft"));
        assert!(vector.is_degraded());
    }

    #[test]
    fn absent_income_is_imputed_and_inherited() {
        let mut suppressed = demographics();
        suppressed.median_household_income = None;
        let home = unit("12095016501", suppressed);
        let vector = assemble_for(&home, &aggregates(POPULATIONS), Some(4_000.0)).unwrap();

        assert_eq!(vector.get("median_household_income"), Some(80_000.0));
        let imputations = &vector.provenance.imputations;
        assert_eq!(
            imputations["median_household_income"].basis,
            ImputationBasis::RegionMedian {
                region: Region::Florida
            }
        );
        assert_eq!(
            imputations["affluent_market_5mi"].basis,
            ImputationBasis::Inherited {
                from: vec!["median_household_income".to_string()]
            }
        );
        assert!(imputations.contains_key("median_household_income_FL"));
        assert!(!imputations.contains_key("median_household_income_PA"));
        assert_eq!(vector.get("affluent_market_5mi"), Some(234_133.0 * 80_000.0 / 1e6));
    }

    #[test]
    fn zero_pop25_falls_back_to_region_pct_median() {
        let mut demographics = demographics();
        demographics.total_pop_25_plus = Some(0.0);
        let home = unit("12095016501", demographics);
        let vector = assemble_for(&home, &aggregates(POPULATIONS), Some(4_000.0)).unwrap();

        assert_eq!(vector.get("total_pop_25_plus"), Some(0.0));
        assert_eq!(vector.get("pct_bachelor_plus"), Some(880.0 / 2_800.0 * 100.0));
        assert!(vector.provenance.imputations.contains_key("pct_bachelor_plus"));
        assert!(vector.provenance.imputations.contains_key("educated_urban_score"));
    }

    #[test]
    fn estimated_population_marks_derived_fields() {
        let mut home = unit("12095016501", demographics());
        home.population = 0;
        home.estimated.insert(Attribute::Population);
        let vector = assemble_for(&home, &aggregates(POPULATIONS), Some(4_000.0)).unwrap();

        assert_eq!(vector.get("population_density"), Some(0.0));
        let estimated = &vector.provenance.estimated;
        assert!(estimated.contains("total_population"));
        assert!(estimated.contains("population_density"));
        assert!(estimated.contains("educated_urban_score"));
        assert!(!estimated.contains("affluent_market_5mi"));
        assert!(
            vector
                .degradations()
                .contains(&"population_density estimated".to_string())
        );
        assert!(!vector.is_usable());
    }

    #[test]
    fn zero_area_tract_is_incomplete() {
        let mut home = unit("12095016501", demographics());
        home.land_area_sqm = 0.0;
        let err = assemble_for(&home, &aggregates(POPULATIONS), Some(4_000.0)).unwrap_err();

        match err {
            FeatureError::IncompleteFeatureSet { missing, .. } => {
                assert!(missing.contains(&"population_density".to_string()));
                assert!(missing.contains(&"tract_area_sqm".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unimputable_field_is_incomplete() {
        let mut demographics = demographics();
        demographics.per_capita_income = None;
        let home = unit("42101000100", demographics);
        let err = assemble(
            &AssemblyInput {
                region: Region::Pennsylvania,
                location: LatLon::new(39.95, -75.16),
                home: &home,
                home_unpopulated: false,
                aggregates: &aggregates(POPULATIONS),
                size_hint: Some(4_000.0),
            },
            &catalog(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            FeatureError::IncompleteFeatureSet { ref missing, .. } if missing == &["per_capita_income"]
        ));
    }

    #[test]
    fn zero_population_radius_records_sentinel() {
        let home = unit("12095016501", demographics());
        let mut populations = POPULATIONS;
        populations[0] = 0.0;
        let vector = assemble_for(&home, &aggregates(populations), Some(4_000.0)).unwrap();

        assert_eq!(vector.get("saturation_1mi"), Some(0.0));
        assert_eq!(vector.provenance.saturation_sentinels, vec!["saturation_1mi"]);
    }
}
