#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature vector types.
//!
//! A [`FeatureVector`] is the ordered, named numeric input to the
//! regression model plus the provenance that explains how each value was
//! obtained. Anything that is not a straight observation (a median standing
//! in for a suppressed field, a defaulted store size, a saturation sentinel,
//! a tract approximated by a disc) is recorded so callers can decide whether
//! to trust the vector.

pub mod names;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use site_predict_geography_models::{LatLon, Region, UnitId};

/// A single named feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Feature name.
    pub name: String,
    /// Feature value.
    pub value: f64,
}

/// Where an imputed value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImputationBasis {
    /// Median of observed values across the region's tracts.
    RegionMedian {
        /// Region the median was taken over.
        region: Region,
    },
    /// Computed from other imputed inputs.
    Inherited {
        /// The imputed inputs.
        from: Vec<String>,
    },
}

/// A value substituted for a missing observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Imputation {
    /// Value used.
    pub value: f64,
    /// How it was obtained.
    pub basis: ImputationBasis,
}

/// A caller's sign-off on a degraded vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedApproval {
    /// Who approved.
    pub approver: String,
    /// Why the degraded inputs are acceptable.
    pub reason: String,
    /// When the approval was recorded.
    pub approved_at: DateTime<Utc>,
}

/// How the values of a vector were obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// The tract the query point resolved to.
    pub home_unit: UnitId,
    /// Whether the home tract has zero population.
    pub home_unit_unpopulated: bool,
    /// Imputed fields by name.
    pub imputations: BTreeMap<String, Imputation>,
    /// Fields whose value is a default rather than an observation (the
    /// store size when no size hint was given, a live-fetched tract's
    /// defaulted population).
    pub estimated: BTreeSet<String>,
    /// Saturation fields that hold the zero-population sentinel.
    pub saturation_sentinels: Vec<String>,
    /// Tracts whose geometry was approximated by an equal-area disc.
    pub approximated_units: BTreeSet<UnitId>,
    /// Approval of the degraded inputs, if given.
    pub approval: Option<DegradedApproval>,
}

impl Provenance {
    /// Empty provenance for a home tract.
    #[must_use]
    pub const fn new(home_unit: UnitId) -> Self {
        Self {
            home_unit,
            home_unit_unpopulated: false,
            imputations: BTreeMap::new(),
            estimated: BTreeSet::new(),
            saturation_sentinels: Vec::new(),
            approximated_units: BTreeSet::new(),
            approval: None,
        }
    }
}

/// Model input for one query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Query region.
    pub region: Region,
    /// Query coordinate.
    pub location: LatLon,
    /// When the vector was assembled.
    pub computed_at: DateTime<Utc>,
    features: Vec<Feature>,
    /// How the values were obtained.
    pub provenance: Provenance,
}

impl FeatureVector {
    #[must_use]
    pub fn new(
        region: Region,
        location: LatLon,
        features: Vec<Feature>,
        provenance: Provenance,
    ) -> Self {
        Self {
            region,
            location,
            computed_at: Utc::now(),
            features,
            provenance,
        }
    }

    /// Features in model order.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Feature names in model order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }

    /// Value of a named feature.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The fixed-width numeric input for the model.
    #[must_use]
    pub fn to_model_input(&self) -> Vec<f64> {
        self.features.iter().map(|f| f.value).collect()
    }

    /// Human-readable reasons the vector is degraded. Empty when every
    /// value is a direct observation.
    #[must_use]
    pub fn degradations(&self) -> Vec<String> {
        let p = &self.provenance;
        let mut reasons = Vec::new();

        if p.home_unit_unpopulated {
            reasons.push(format!("home tract {} has zero population", p.home_unit));
        }
        for (field, imputation) in &p.imputations {
            match &imputation.basis {
                ImputationBasis::RegionMedian { region } => {
                    reasons.push(format!("{field} imputed from {region} median"));
                }
                ImputationBasis::Inherited { from } => {
                    reasons.push(format!("{field} derived from imputed {}", from.join(", ")));
                }
            }
        }
        for field in &p.estimated {
            reasons.push(format!("{field} estimated"));
        }
        for field in &p.saturation_sentinels {
            reasons.push(format!("{field} is a zero-population sentinel"));
        }
        if !p.approximated_units.is_empty() {
            reasons.push(format!(
                "{} tracts approximated by equal-area discs",
                p.approximated_units.len()
            ));
        }

        reasons
    }

    /// Whether any value is not a direct observation.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degradations().is_empty()
    }

    /// Records a caller's approval of the degraded inputs. A later approval
    /// replaces an earlier one.
    pub fn approve_degraded(&mut self, approver: impl Into<String>, reason: impl Into<String>) {
        let approval = DegradedApproval {
            approver: approver.into(),
            reason: reason.into(),
            approved_at: Utc::now(),
        };
        self.provenance.approval = Some(approval);
    }

    /// Whether the vector may be scored: either nothing is degraded or the
    /// degradation has been approved.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.provenance.approval.is_some() || !self.is_degraded()
    }
}
