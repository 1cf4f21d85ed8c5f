//! Multi-radius population and competition aggregation.
//!
//! For each radius around a center point:
//!
//! * population is the area-weighted sum over intersecting tracts,
//!   `population × intersection_area / tract_area` with the weight clamped
//!   into `[0, 1]`;
//! * competitors are roster sites within the radius by geodesic distance,
//!   excluding sites closer than the self-exclusion distance;
//! * saturation is competitors per 100,000 residents.
//!
//! Distance-weighted competition (`Σ 1/d` in miles) is computed once, for
//! the largest radius, over every competitor distance in range.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use geo::{Area, BooleanOps, Distance, Geodesic, MultiPolygon, Point};
use site_predict_geography::catalog::UnitCatalog;
use site_predict_geography_models::{CompetitorSite, LatLon, METERS_PER_MILE, Region, UnitId};

use crate::SpatialError;
use crate::buffer::{Buffer, DEFAULT_SEGMENTS};
use crate::index::{BoundaryMap, RegionIndex};
use crate::projection::AlbersProjection;

/// Residents per saturation unit.
const SATURATION_PER: f64 = 100_000.0;

/// Aggregation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSettings {
    /// Radii in miles, ascending.
    pub radii_miles: Vec<f64>,
    /// Sites at or closer than this distance (miles) are the query site
    /// itself and never count as competitors.
    pub self_exclusion_miles: f64,
    /// Vertices per buffer polygon.
    pub buffer_segments: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            radii_miles: vec![1.0, 3.0, 5.0, 10.0, 20.0],
            self_exclusion_miles: 0.1,
            buffer_segments: DEFAULT_SEGMENTS,
        }
    }
}

/// Aggregates for one radius.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiusAggregate {
    /// Radius in miles.
    pub radius_miles: f64,
    /// Area-weighted population.
    pub population: f64,
    /// Competitor sites within the radius.
    pub competitors: u32,
    /// Competitors per 100,000 residents; `0.0` when population is zero.
    pub saturation: f64,
    /// Whether `saturation` is the zero-population sentinel rather than a
    /// computed ratio.
    pub saturation_sentinel: bool,
    /// Tracts with a non-zero intersection.
    pub units_intersecting: usize,
}

/// All aggregates for a center point.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregates {
    /// Per-radius aggregates, in radius order.
    pub radii: Vec<RadiusAggregate>,
    /// `Σ 1/d` over competitors within the largest radius.
    pub weighted_competition: f64,
    /// Radius the weighted competition covers.
    pub weighted_radius_miles: f64,
    /// Tracts that contributed population through an equal-area disc
    /// rather than their boundary polygon.
    pub approximated_units: BTreeSet<UnitId>,
}

impl Aggregates {
    /// The aggregate for a given radius.
    #[must_use]
    pub fn at(&self, radius_miles: f64) -> Option<&RadiusAggregate> {
        self.radii
            .iter()
            .find(|r| (r.radius_miles - radius_miles).abs() < 1e-9)
    }
}

/// Competitor distances from a center, in miles. Sites inside the
/// self-exclusion distance are dropped.
#[must_use]
pub fn competitor_distances(
    center: LatLon,
    competitors: &[CompetitorSite],
    self_exclusion_miles: f64,
) -> Vec<f64> {
    let origin = Point::new(center.longitude, center.latitude);
    competitors
        .iter()
        .map(|site| {
            let destination = Point::new(site.location.longitude, site.location.latitude);
            Geodesic.distance(origin, destination) / METERS_PER_MILE
        })
        .filter(|&miles| miles > self_exclusion_miles)
        .collect()
}

/// Number of distances within `radius_miles` (inclusive).
#[must_use]
pub fn count_within(distances: &[f64], radius_miles: f64) -> u32 {
    let count = distances.iter().filter(|&&d| d <= radius_miles).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// `Σ 1/d` over distances within `radius_miles`.
#[must_use]
pub fn inverse_distance_sum(distances: &[f64], radius_miles: f64) -> f64 {
    distances
        .iter()
        .filter(|&&d| d <= radius_miles && d > 0.0)
        .map(|d| 1.0 / d)
        .sum()
}

/// Competitors per 100,000 residents, with the zero-population sentinel.
#[must_use]
pub fn saturation(competitors: u32, population: f64) -> (f64, bool) {
    if population > 0.0 {
        (f64::from(competitors) / population * SATURATION_PER, false)
    } else {
        (0.0, true)
    }
}

/// Area-weighted population inside a buffer.
///
/// The weight divides the overlap by the tract's published land area, so a
/// polygon that also covers water can overshoot; it is clamped into
/// `[0, 1]`.
fn weighted_population(index: &RegionIndex, buffer: &Buffer) -> (f64, usize, BTreeSet<UnitId>) {
    let clip = MultiPolygon(vec![buffer.polygon.clone()]);
    let mut population = 0.0;
    let mut intersecting = 0;
    let mut approximated = BTreeSet::new();

    for entry in index.candidates(&buffer.bounds()) {
        let overlap = if buffer.contains_rect(&entry.bounds) {
            entry.area_sqm
        } else {
            entry.polygon.intersection(&clip).unsigned_area()
        };
        let weight = (overlap / entry.weight_area_sqm).clamp(0.0, 1.0);

        if weight > 0.0 {
            population += entry.population * weight;
            intersecting += 1;
            if entry.approximated {
                approximated.insert(entry.id.clone());
            }
        }
    }

    (population, intersecting, approximated)
}

/// Computes radius aggregates against the shared catalog and roster.
///
/// Region indexes are built lazily and rebuilt when the catalog has grown
/// since the last build (a tract was fetched on demand).
pub struct RadiusAggregator {
    catalog: Arc<UnitCatalog>,
    competitors: Arc<[CompetitorSite]>,
    boundaries: BTreeMap<Region, Arc<BoundaryMap>>,
    settings: AggregationSettings,
    indexes: RwLock<BTreeMap<Region, Arc<RegionIndex>>>,
}

impl RadiusAggregator {
    /// Creates an aggregator. `boundaries` maps each region to its tract
    /// polygons; a region without an entry uses equal-area discs
    /// throughout.
    #[must_use]
    pub fn new(
        catalog: Arc<UnitCatalog>,
        competitors: Arc<[CompetitorSite]>,
        boundaries: BTreeMap<Region, Arc<BoundaryMap>>,
        settings: AggregationSettings,
    ) -> Self {
        Self {
            catalog,
            competitors,
            boundaries,
            settings,
            indexes: RwLock::new(BTreeMap::new()),
        }
    }

    /// The aggregation parameters.
    #[must_use]
    pub const fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    fn region_index(&self, region: Region) -> Result<Arc<RegionIndex>, SpatialError> {
        if !self.catalog.is_loaded(region) {
            return Err(SpatialError::RegionNotLoaded { region });
        }

        let unit_count = self.catalog.unit_count(region);
        if let Some(index) = self
            .indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&region)
            .filter(|index| index.unit_count() == unit_count)
        {
            return Ok(Arc::clone(index));
        }

        let units = self.catalog.units(region);

        let empty = BoundaryMap::new();
        let boundaries = self.boundaries.get(&region).map_or(&empty, |b| &**b);
        let projection = AlbersProjection::new(region.projection());

        log::info!("Building {region} tract index over {} tracts...", units.len());
        let index = Arc::new(RegionIndex::build(
            &projection,
            &units,
            boundaries,
            self.settings.buffer_segments,
        ));

        self.indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region, Arc::clone(&index));
        Ok(index)
    }

    /// Aggregates population and competition around `center`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::RegionNotLoaded`] if the catalog has no
    /// tracts for `region`.
    pub fn aggregate(&self, center: LatLon, region: Region) -> Result<Aggregates, SpatialError> {
        let index = self.region_index(region)?;
        let projection = AlbersProjection::new(region.projection());
        let projected_center = projection.project(center);

        let distances = competitor_distances(
            center,
            &self.competitors,
            self.settings.self_exclusion_miles,
        );

        let mut radii = Vec::with_capacity(self.settings.radii_miles.len());
        let mut approximated_units = BTreeSet::new();

        for &radius_miles in &self.settings.radii_miles {
            let buffer = Buffer::new(
                projected_center,
                radius_miles * METERS_PER_MILE,
                self.settings.buffer_segments,
            );
            let (population, units_intersecting, approximated) =
                weighted_population(&index, &buffer);
            approximated_units.extend(approximated);

            let competitors = count_within(&distances, radius_miles);
            let (saturation, saturation_sentinel) = saturation(competitors, population);

            log::debug!(
                "{center} r={radius_miles}mi: population {population:.0} over {units_intersecting} tracts, {competitors} competitors"
            );

            radii.push(RadiusAggregate {
                radius_miles,
                population,
                competitors,
                saturation,
                saturation_sentinel,
                units_intersecting,
            });
        }

        if radii
            .windows(2)
            .any(|pair| pair[1].population + 1e-6 < pair[0].population)
        {
            log::warn!(
                "Non-monotonic population around {center}: {:?}",
                radii.iter().map(|r| r.population).collect::<Vec<_>>()
            );
        }

        let weighted_radius_miles = self
            .settings
            .radii_miles
            .iter()
            .copied()
            .fold(0.0, f64::max);

        Ok(Aggregates {
            weighted_competition: inverse_distance_sum(&distances, weighted_radius_miles),
            weighted_radius_miles,
            radii,
            approximated_units,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use geo::{Coord, LineString, Polygon};
    use site_predict_geography_models::{Demographics, StatisticalUnit};

    use super::*;

    const CENTER: LatLon = LatLon::new(28.5685, -81.2163);

    fn site(id: &str, lat: f64, lon: f64) -> CompetitorSite {
        CompetitorSite {
            id: id.to_string(),
            region: Region::Florida,
            location: LatLon::new(lat, lon),
            sq_ft: None,
        }
    }

    fn unit(geoid: &str, centroid: LatLon, population: u32, land_area_sqm: f64) -> StatisticalUnit {
        StatisticalUnit {
            id: geoid.parse().unwrap(),
            centroid,
            land_area_sqm,
            population,
            demographics: Demographics::default(),
            estimated: BTreeSet::new(),
        }
    }

    /// A lon/lat square of side `d` degrees centered on `center`.
    fn square(center: LatLon, d: f64) -> MultiPolygon<f64> {
        let (x, y, h) = (center.longitude, center.latitude, d / 2.0);
        MultiPolygon(vec![Polygon::new(
            LineString::from(vec![
                Coord { x: x - h, y: y - h },
                Coord { x: x + h, y: y - h },
                Coord { x: x + h, y: y + h },
                Coord { x: x - h, y: y + h },
                Coord { x: x - h, y: y - h },
            ]),
            vec![],
        )])
    }

    /// A grid of 41×41 tracts of 0.02° around the center, 1,000 residents
    /// each, every other one without a boundary polygon.
    fn aggregator(competitors: Vec<CompetitorSite>) -> RadiusAggregator {
        let catalog = Arc::new(UnitCatalog::in_memory());
        let mut units = Vec::new();
        let mut boundaries = BoundaryMap::new();

        for i in -20i32..=20 {
            for j in -20i32..=20 {
                let centroid = LatLon::new(
                    CENTER.latitude + f64::from(i) * 0.02,
                    CENTER.longitude + f64::from(j) * 0.02,
                );
                let serial = (i + 20) * 41 + (j + 20);
                let geoid = format!("12095{serial:06}");
                let shape = square(centroid, 0.02);
                let area = AlbersProjection::new(Region::Florida.projection())
                    .project_multipolygon(&shape)
                    .unsigned_area();
                if serial % 2 == 0 {
                    boundaries.insert(geoid.parse().unwrap(), shape);
                }
                units.push(unit(&geoid, centroid, 1_000, area));
            }
        }
        catalog.install_units(Region::Florida, units);

        RadiusAggregator::new(
            catalog,
            competitors.into(),
            BTreeMap::from([(Region::Florida, Arc::new(boundaries))]),
            AggregationSettings {
                radii_miles: vec![1.0, 3.0, 5.0, 10.0],
                ..AggregationSettings::default()
            },
        )
    }

    #[test]
    fn saturation_uses_sentinel_for_zero_population() {
        assert_eq!(saturation(3, 0.0), (0.0, true));
        let (value, sentinel) = saturation(3, 150_000.0);
        assert!(!sentinel);
        assert!((value - 2.0).abs() < 1e-12);
    }

    #[test]
    fn self_exclusion_drops_colocated_site() {
        let sites = [
            site("self", CENTER.latitude, CENTER.longitude),
            site("near", CENTER.latitude + 0.001, CENTER.longitude),
            site("two_miles", CENTER.latitude + 0.029, CENTER.longitude),
        ];
        let distances = competitor_distances(CENTER, &sites, 0.1);
        assert_eq!(distances.len(), 1);
        assert!((distances[0] - 2.0).abs() < 0.05);
    }

    #[test]
    fn inverse_distance_sum_is_exact() {
        let distances = [0.5, 2.0, 4.0, 25.0];
        let sum = inverse_distance_sum(&distances, 20.0);
        assert!((sum - (2.0 + 0.5 + 0.25)).abs() < 1e-12);
    }

    #[test]
    fn population_and_competitors_are_monotonic() {
        let sites = vec![
            site("a", CENTER.latitude + 0.01, CENTER.longitude),
            site("b", CENTER.latitude + 0.06, CENTER.longitude),
            site("c", CENTER.latitude - 0.12, CENTER.longitude + 0.05),
        ];
        let aggregates = aggregator(sites).aggregate(CENTER, Region::Florida).unwrap();

        for pair in aggregates.radii.windows(2) {
            assert!(pair[1].population >= pair[0].population);
            assert!(pair[1].competitors >= pair[0].competitors);
        }
        assert_eq!(aggregates.at(1.0).unwrap().competitors, 1);
        assert_eq!(aggregates.at(10.0).unwrap().competitors, 3);
        assert!(!aggregates.approximated_units.is_empty());
    }

    #[test]
    fn weighted_population_tracks_circle_area() {
        let aggregates = aggregator(vec![]).aggregate(CENTER, Region::Florida).unwrap();
        let ten = aggregates.at(10.0).unwrap();

        let projection = AlbersProjection::new(Region::Florida.projection());
        let cell_area = projection
            .project_multipolygon(&square(CENTER, 0.02))
            .unsigned_area();
        let circle = std::f64::consts::PI * (10.0 * METERS_PER_MILE).powi(2);
        let expected = circle / cell_area * 1_000.0;

        assert!(
            (ten.population - expected).abs() / expected < 0.03,
            "{} vs {expected}",
            ten.population
        );
        assert_eq!(ten.competitors, 0);
        assert!(!ten.saturation_sentinel);
    }

    /// One tract whose 0.02° square straddles the 1-mile buffer edge east
    /// of the center, with the given published land area.
    fn straddling_tract(land_area_sqm: impl Fn(f64) -> f64) -> (RegionIndex, Buffer) {
        let projection = AlbersProjection::new(Region::Florida.projection());
        let edge = LatLon::new(CENTER.latitude, CENTER.longitude + 0.0165);
        let shape = square(edge, 0.02);
        let polygon_area = projection.project_multipolygon(&shape).unsigned_area();

        let id: UnitId = "12095016501".parse().unwrap();
        let tract = unit(id.as_str(), edge, 2_000, land_area_sqm(polygon_area));
        let index = RegionIndex::build(
            &projection,
            &[Arc::new(tract)],
            &BoundaryMap::from([(id, shape)]),
            DEFAULT_SEGMENTS,
        );
        let buffer = Buffer::new(projection.project(CENTER), METERS_PER_MILE, DEFAULT_SEGMENTS);
        (index, buffer)
    }

    #[test]
    fn partial_overlap_weights_population_by_area() {
        let (index, buffer) = straddling_tract(|polygon_area| polygon_area);
        let (population, intersecting, _) = weighted_population(&index, &buffer);

        assert_eq!(intersecting, 1);
        assert!(population > 0.0 && population < 2_000.0, "{population}");
        assert!(population > 600.0 && population < 1_400.0, "{population}");
    }

    #[test]
    fn weight_is_clamped_when_land_area_is_below_overlap() {
        let (index, buffer) = straddling_tract(|polygon_area| polygon_area * 0.1);
        let (population, intersecting, _) = weighted_population(&index, &buffer);

        assert_eq!(intersecting, 1);
        assert!((population - 2_000.0).abs() < 1e-9, "{population}");
    }

    #[test]
    fn unloaded_region_is_an_error() {
        let err = aggregator(vec![])
            .aggregate(LatLon::new(40.0, -77.0), Region::Pennsylvania)
            .unwrap_err();
        assert!(matches!(err, SpatialError::RegionNotLoaded { .. }));
    }

    #[test]
    fn index_rebuilds_after_catalog_grows() {
        let aggregator = aggregator(vec![]);
        let before = aggregator.aggregate(CENTER, Region::Florida).unwrap();

        aggregator
            .catalog
            .insert_fetched(unit("12095999999", CENTER, 5_000, 100_000.0))
            .unwrap();
        let after = aggregator.aggregate(CENTER, Region::Florida).unwrap();

        let gained = after.radii[0].population - before.radii[0].population;
        assert!((gained - 5_000.0).abs() < 1e-6);
    }
}
