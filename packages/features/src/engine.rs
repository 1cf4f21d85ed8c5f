//! The per-query pipeline: resolve, aggregate, assemble.

use std::collections::BTreeMap;
use std::sync::Arc;

use site_predict_features_models::FeatureVector;
use site_predict_geocoder::census::CensusBoundaryClient;
use site_predict_geocoder::resolver::Resolver;
use site_predict_geography::acs::AcsClient;
use site_predict_geography::catalog::UnitCatalog;
use site_predict_geography::fetch::{FallbackGeometry, UnitFetcher, UnitGeometrySource};
use site_predict_geography::gazetteer::GazetteerFiles;
use site_predict_geography::paths::DataPaths;
use site_predict_geography::roster::load_roster;
use site_predict_geography::tigerweb::TigerwebClient;
use site_predict_geography_models::{LatLon, Region};
use site_predict_spatial::aggregator::RadiusAggregator;
use site_predict_spatial::index::{BoundaryMap, load_boundaries};

use crate::assembler::{AssemblyInput, assemble};
use crate::config::PipelineConfig;
use crate::{FeatureError, StartupError};

/// Computes feature vectors against a shared catalog and roster.
pub struct FeatureEngine {
    catalog: Arc<UnitCatalog>,
    resolver: Resolver,
    aggregator: Arc<RadiusAggregator>,
}

impl FeatureEngine {
    /// Assembles an engine from already-built parts. The resolver's fetcher
    /// and the aggregator must share `catalog`.
    #[must_use]
    pub const fn new(
        catalog: Arc<UnitCatalog>,
        resolver: Resolver,
        aggregator: Arc<RadiusAggregator>,
    ) -> Self {
        Self {
            catalog,
            resolver,
            aggregator,
        }
    }

    /// Loads the configured regions, roster and boundary files and wires
    /// the live services.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if a snapshot or the roster is missing or
    /// malformed, a boundary file is malformed, or an HTTP client cannot be
    /// built.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, StartupError> {
        let paths = DataPaths::new(&config.data_dir);
        let catalog = Arc::new(UnitCatalog::new(paths.clone()));
        let loaded = catalog.load_regions(&config.regions).await?;
        log::info!("Catalog ready: {loaded} tracts across {} regions", config.regions.len());

        let roster_path = paths.competitors();
        let roster = tokio::task::spawn_blocking(move || load_roster(&roster_path)).await??;

        let boundaries = load_region_boundaries(&paths, &config.regions).await?;

        let policy = config.retry;
        let geometry: Vec<Arc<dyn UnitGeometrySource>> = vec![
            Arc::new(GazetteerFiles::new(paths.clone(), config.gazetteer_year)),
            Arc::new(TigerwebClient::new(
                &config.services.tigerweb_tract_layer_url,
                policy,
            )?),
        ];
        let demographics = AcsClient::new(&config.services.acs_url, config.acs_year, policy)?;
        let fetcher = Arc::new(UnitFetcher::new(
            Arc::clone(&catalog),
            Arc::new(FallbackGeometry::new(geometry)),
            Arc::new(demographics),
        ));

        let boundary_service = CensusBoundaryClient::new(&config.services.geocoder_url, policy)?;
        let resolver = Resolver::new(Arc::new(boundary_service), fetcher);

        let aggregator = Arc::new(RadiusAggregator::new(
            Arc::clone(&catalog),
            roster.into(),
            boundaries,
            config.aggregation.settings(),
        ));

        Ok(Self::new(catalog, resolver, aggregator))
    }

    /// The shared catalog.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<UnitCatalog> {
        &self.catalog
    }

    /// Number of tracts fetched live since startup.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.resolver.fetcher().fetch_count()
    }

    /// Computes the feature vector for a candidate site.
    ///
    /// `size_hint` is the store size in square feet; without one the
    /// region median is used and recorded as estimated.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError`] if the coordinate is invalid, cannot be
    /// resolved, its data cannot be found, or required fields are missing.
    pub async fn compute_features(
        &self,
        latitude: f64,
        longitude: f64,
        region: Region,
        size_hint: Option<f64>,
    ) -> Result<FeatureVector, FeatureError> {
        let at = LatLon::new(latitude, longitude);

        let resolved = self
            .resolver
            .resolve(latitude, longitude, region)
            .await
            .map_err(|e| FeatureError::from_resolve(at, e))?;
        let home = resolved.home;

        let aggregator = Arc::clone(&self.aggregator);
        let aggregated =
            match tokio::task::spawn_blocking(move || aggregator.aggregate(at, region)).await {
                Ok(result) => result,
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            };
        let aggregates = aggregated.map_err(|e| FeatureError::DataNotFound {
            at,
            unit: Some(home.id.clone()),
            reason: e.to_string(),
        })?;

        assemble(
            &AssemblyInput {
                region,
                location: at,
                home: &home,
                home_unpopulated: resolved.unpopulated,
                aggregates: &aggregates,
                size_hint,
            },
            &self.catalog,
        )
    }
}

/// Loads each region's boundary file. A region without one falls back to
/// equal-area discs for every tract.
async fn load_region_boundaries(
    paths: &DataPaths,
    regions: &[Region],
) -> Result<BTreeMap<Region, Arc<BoundaryMap>>, StartupError> {
    let mut boundaries = BTreeMap::new();

    for &region in regions {
        let path = paths.boundaries(region);
        if !path.exists() {
            log::warn!(
                "No boundary file for {region} at {}; every tract will use an equal-area disc. \
                 Run `fetch-boundaries` to download it",
                path.display()
            );
            continue;
        }
        let map = tokio::task::spawn_blocking(move || load_boundaries(&path)).await??;
        boundaries.insert(region, Arc::new(map));
    }

    Ok(boundaries)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use site_predict_geocoder::{BoundaryService, TractMatch};
    use site_predict_geography::fetch::{
        DemographicRecord, DemographicsSource, UnitGeometry, UnitGeometrySource,
    };
    use site_predict_geography_models::{
        CompetitorSite, Demographics, SQ_METERS_PER_SQ_MILE, StatisticalUnit, UnitId,
    };
    use site_predict_source::SourceError;
    use site_predict_spatial::aggregator::AggregationSettings;

    use super::*;

    const CENTER: LatLon = LatLon::new(28.5685, -81.2163);
    const HOME: &str = "12095016501";

    struct FixedBoundary {
        calls: AtomicU32,
    }

    #[async_trait]
    impl BoundaryService for FixedBoundary {
        async fn tract_at(&self, _at: LatLon) -> Result<Option<TractMatch>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(TractMatch {
                id: HOME.parse().unwrap(),
                basename: Some("165.01".to_string()),
            }))
        }
    }

    struct HomeGeometry;

    #[async_trait]
    impl UnitGeometrySource for HomeGeometry {
        fn name(&self) -> &str {
            "fixture"
        }

        async fn geometry(&self, id: &UnitId) -> Result<Option<UnitGeometry>, SourceError> {
            Ok((id.as_str() == HOME).then(|| UnitGeometry {
                centroid: CENTER,
                land_area_sqm: SQ_METERS_PER_SQ_MILE,
            }))
        }
    }

    struct HomeDemographics;

    #[async_trait]
    impl DemographicsSource for HomeDemographics {
        async fn demographics(
            &self,
            id: &UnitId,
        ) -> Result<Option<DemographicRecord>, SourceError> {
            Ok((id.as_str() == HOME).then(|| DemographicRecord {
                population: Some(6_000.0),
                demographics: demographics(),
            }))
        }
    }

    fn demographics() -> Demographics {
        Demographics {
            median_age: Some(36.0),
            median_household_income: Some(58_000.0),
            per_capita_income: Some(29_000.0),
            total_pop_25_plus: Some(4_000.0),
            bachelors_degree: Some(900.0),
            masters_degree: Some(300.0),
            professional_degree: Some(60.0),
            doctorate_degree: Some(40.0),
        }
    }

    fn home_unit() -> StatisticalUnit {
        StatisticalUnit {
            id: HOME.parse().unwrap(),
            centroid: CENTER,
            land_area_sqm: SQ_METERS_PER_SQ_MILE,
            population: 6_000,
            demographics: demographics(),
            estimated: BTreeSet::new(),
        }
    }

    /// A ring of neighbouring tracts around the home tract.
    fn neighbours() -> Vec<StatisticalUnit> {
        (0..12u32)
            .map(|i| {
                let angle = f64::from(i) * std::f64::consts::TAU / 12.0;
                StatisticalUnit {
                    id: format!("12095{:06}", 100 + i).parse().unwrap(),
                    centroid: LatLon::new(
                        CENTER.latitude + 0.05 * angle.sin(),
                        CENTER.longitude + 0.05 * angle.cos(),
                    ),
                    land_area_sqm: 3.0 * SQ_METERS_PER_SQ_MILE,
                    population: 3_000 + i * 100,
                    demographics: demographics(),
                    estimated: BTreeSet::new(),
                }
            })
            .collect()
    }

    fn engine(preloaded_home: bool) -> (FeatureEngine, Arc<FixedBoundary>) {
        let catalog = Arc::new(UnitCatalog::in_memory());
        let mut units = neighbours();
        if preloaded_home {
            units.push(home_unit());
        }
        catalog.install_units(Region::Florida, units);

        let boundary = Arc::new(FixedBoundary {
            calls: AtomicU32::new(0),
        });
        let fetcher = Arc::new(UnitFetcher::new(
            Arc::clone(&catalog),
            Arc::new(HomeGeometry),
            Arc::new(HomeDemographics),
        ));
        let resolver = Resolver::new(boundary.clone(), fetcher);

        let competitors: Vec<CompetitorSite> = vec![
            CompetitorSite {
                id: "self".to_string(),
                region: Region::Florida,
                location: CENTER,
                sq_ft: Some(4_000.0),
            },
            CompetitorSite {
                id: "east".to_string(),
                region: Region::Florida,
                location: LatLon::new(CENTER.latitude, CENTER.longitude + 0.06),
                sq_ft: None,
            },
        ];
        let aggregator = Arc::new(RadiusAggregator::new(
            Arc::clone(&catalog),
            competitors.into(),
            BTreeMap::new(),
            AggregationSettings::default(),
        ));

        (FeatureEngine::new(catalog, resolver, aggregator), boundary)
    }

    #[tokio::test]
    async fn missing_home_fetches_once_and_matches_preloaded() {
        let (fetching, boundary) = engine(false);
        let (preloaded, _) = engine(true);

        let fetched = fetching
            .compute_features(CENTER.latitude, CENTER.longitude, Region::Florida, Some(4_000.0))
            .await
            .unwrap();
        let again = fetching
            .compute_features(CENTER.latitude, CENTER.longitude, Region::Florida, Some(4_000.0))
            .await
            .unwrap();
        let reference = preloaded
            .compute_features(CENTER.latitude, CENTER.longitude, Region::Florida, Some(4_000.0))
            .await
            .unwrap();

        assert_eq!(fetching.fetch_count(), 1);
        assert_eq!(preloaded.fetch_count(), 0);
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 1);
        assert_close(&fetched.to_model_input(), &reference.to_model_input());
        assert_close(&again.to_model_input(), &reference.to_model_input());
    }

    /// Index order differs between catalogs, so partial-overlap sums may
    /// differ in the last bits.
    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() <= 1e-9 * e.abs().max(1.0), "{a} vs {e}");
        }
    }

    #[tokio::test]
    async fn self_site_is_not_a_competitor() {
        let (engine, _) = engine(true);
        let vector = engine
            .compute_features(CENTER.latitude, CENTER.longitude, Region::Florida, None)
            .await
            .unwrap();

        assert_eq!(vector.get("competitors_1mi"), Some(0.0));
        assert_eq!(vector.get("competitors_5mi"), Some(1.0));
        assert!(vector.get("competition_weighted_20mi").unwrap() > 0.0);
        assert!(vector.provenance.estimated.contains("sq_ft"));
    }

    #[tokio::test]
    async fn population_grows_with_radius() {
        let (engine, _) = engine(true);
        let vector = engine
            .compute_features(CENTER.latitude, CENTER.longitude, Region::Florida, Some(4_000.0))
            .await
            .unwrap();

        let pops: Vec<f64> = [1, 3, 5, 10, 20]
            .iter()
            .map(|r| vector.get(&format!("pop_{r}mi")).unwrap())
            .collect();
        assert!(pops.windows(2).all(|w| w[1] >= w[0]), "{pops:?}");
        let total: f64 = neighbours()
            .iter()
            .map(|u| f64::from(u.population))
            .sum::<f64>()
            + 6_000.0;
        assert!((pops[4] - total).abs() < 1e-6);
    }

    #[tokio::test]
    async fn out_of_region_point_is_rejected() {
        let (engine, boundary) = engine(true);
        let err = engine
            .compute_features(40.44, -79.99, Region::Florida, None)
            .await
            .unwrap_err();

        assert!(matches!(err, FeatureError::InvalidCoordinates { .. }));
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 0);
    }

    /// Reproduces the reference aggregates for the Orlando benchmark site.
    /// Needs the Florida data files under `SITE_PREDICT_DATA_DIR` and
    /// network access for tract resolution.
    #[tokio::test]
    #[ignore = "requires the Florida data set and network access"]
    async fn orlando_reference_aggregates() {
        let dir = std::env::var("SITE_PREDICT_DATA_DIR").unwrap_or_else(|_| "data".to_string());
        let config = PipelineConfig::from_overrides(&format!(
            "data_dir = {dir:?}\nregions = [\"FL\"]\n"
        ))
        .unwrap();
        let engine = FeatureEngine::from_config(&config).await.unwrap();

        let vector = engine
            .compute_features(28.5685, -81.2163, Region::Florida, None)
            .await
            .unwrap();

        let expected = [
            (1, 14_594.0),
            (3, 119_652.0),
            (5, 234_133.0),
            (10, 691_815.0),
            (20, 1_796_438.0),
        ];
        for (radius, population) in expected {
            let actual = vector.get(&format!("pop_{radius}mi")).unwrap();
            assert!(
                (actual - population).abs() / population < 0.01,
                "pop_{radius}mi: {actual} vs {population}"
            );
        }
    }
}
