//! R-tree of projected tract geometries for one region.
//!
//! Boundary polygons come from the region's `GeoJSON` file (WGS84) and are
//! projected once when the index is built. A tract missing from the file
//! is represented by a disc of its published land area around its
//! centroid and flagged as approximated.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use geo::{Area, BoundingRect, MultiPolygon, Rect};
use geojson::GeoJson;
use rstar::{AABB, RTree, RTreeObject};
use site_predict_geography_models::{StatisticalUnit, UnitId};

use crate::SpatialError;
use crate::buffer::equal_area_disc;
use crate::projection::AlbersProjection;

/// Tract boundaries in WGS84, keyed by identifier.
pub type BoundaryMap = HashMap<UnitId, MultiPolygon<f64>>;

/// A projected tract stored in the R-tree.
#[derive(Debug)]
pub struct UnitEntry {
    /// Tract identifier.
    pub id: UnitId,
    /// Tract population.
    pub population: f64,
    /// Projected area of the geometry in square meters.
    pub area_sqm: f64,
    /// Denominator of the population weight: the published land area, or
    /// the geometry's area when none is published.
    pub weight_area_sqm: f64,
    /// Whether the geometry is an equal-area disc standing in for a
    /// missing boundary.
    pub approximated: bool,
    /// Bounding rectangle in projected meters.
    pub bounds: Rect<f64>,
    /// Projected geometry.
    pub polygon: MultiPolygon<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for UnitEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial index over one region's populated tracts.
pub struct RegionIndex {
    tree: RTree<UnitEntry>,
    unit_count: usize,
    approximated: usize,
}

impl RegionIndex {
    /// Projects and indexes `units`, using `boundaries` where available.
    #[must_use]
    pub fn build(
        projection: &AlbersProjection,
        units: &[Arc<StatisticalUnit>],
        boundaries: &BoundaryMap,
        segments: usize,
    ) -> Self {
        let mut approximated = 0;

        let entries: Vec<UnitEntry> = units
            .iter()
            .filter_map(|unit| {
                let (polygon, is_approximation) = match boundaries.get(&unit.id) {
                    Some(shape) => (projection.project_multipolygon(shape), false),
                    None => {
                        let center = projection.project(unit.centroid);
                        let disc = equal_area_disc(center, unit.land_area_sqm, segments);
                        (MultiPolygon(vec![disc]), true)
                    }
                };

                let area_sqm = polygon.unsigned_area();
                let Some(bounds) = polygon.bounding_rect() else {
                    log::warn!("Tract {} has empty geometry, excluded from index", unit.id);
                    return None;
                };
                if area_sqm <= 0.0 {
                    log::warn!("Tract {} has zero-area geometry, excluded from index", unit.id);
                    return None;
                }
                if is_approximation {
                    log::debug!("Tract {} has no boundary, using equal-area disc", unit.id);
                    approximated += 1;
                }

                Some(UnitEntry {
                    id: unit.id.clone(),
                    population: f64::from(unit.population),
                    area_sqm,
                    weight_area_sqm: if unit.land_area_sqm > 0.0 {
                        unit.land_area_sqm
                    } else {
                        area_sqm
                    },
                    approximated: is_approximation,
                    bounds,
                    polygon,
                    envelope: compute_envelope(&bounds),
                })
            })
            .collect();

        if approximated > 0 {
            log::warn!(
                "{approximated} of {} tracts lack boundary polygons and use equal-area discs",
                units.len()
            );
        }

        Self {
            tree: RTree::bulk_load(entries),
            unit_count: units.len(),
            approximated,
        }
    }

    /// Number of catalog units the index was built from.
    #[must_use]
    pub const fn unit_count(&self) -> usize {
        self.unit_count
    }

    /// Number of indexed tracts represented by discs.
    #[must_use]
    pub const fn approximated(&self) -> usize {
        self.approximated
    }

    /// Tracts whose bounding box intersects `rect`.
    pub fn candidates(&self, rect: &Rect<f64>) -> impl Iterator<Item = &UnitEntry> {
        self.tree
            .locate_in_envelope_intersecting(&compute_envelope(rect))
    }
}

/// Bounding box envelope for the R-tree.
fn compute_envelope(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// Converts a `GeoJSON` geometry into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon` geometry types.
fn geometry_to_multipolygon(geometry: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Parses a `FeatureCollection` whose features carry a `GEOID` property.
///
/// # Errors
///
/// Returns [`SpatialError::GeoJson`] if the text is not a
/// `FeatureCollection`.
pub fn parse_boundaries(text: &str) -> Result<BoundaryMap, SpatialError> {
    let geojson: GeoJson = text.parse().map_err(|e| SpatialError::GeoJson {
        message: format!("{e}"),
    })?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(SpatialError::GeoJson {
            message: "expected a FeatureCollection".to_string(),
        });
    };

    let mut boundaries = BoundaryMap::new();
    let mut skipped = 0u64;

    for feature in collection.features {
        let id = feature
            .property("GEOID")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<UnitId>().ok());
        let shape = feature.geometry.and_then(geometry_to_multipolygon);

        match (id, shape) {
            (Some(id), Some(shape)) => {
                boundaries.insert(id, shape);
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} boundary features without GEOID or polygon geometry");
    }
    Ok(boundaries)
}

/// Reads a region boundary file.
///
/// # Errors
///
/// Returns [`SpatialError`] if the file cannot be read or parsed.
pub fn load_boundaries(path: &Path) -> Result<BoundaryMap, SpatialError> {
    let text = std::fs::read_to_string(path).map_err(|source| SpatialError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let boundaries = parse_boundaries(&text)?;
    log::info!(
        "Loaded {} tract boundaries from {}",
        boundaries.len(),
        path.display()
    );
    Ok(boundaries)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use site_predict_geography_models::{Demographics, LatLon, Region};

    use super::*;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"GEOID": "12095016501"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-81.22, 28.56], [-81.21, 28.56], [-81.21, 28.57], [-81.22, 28.57], [-81.22, 28.56]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"GEOID": "12095016502"},
                "geometry": {"type": "Point", "coordinates": [-81.2, 28.5]}
            },
            {
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-81.0, 28.0], [-80.9, 28.0], [-80.9, 28.1], [-81.0, 28.0]]]
                }
            }
        ]
    }"#;

    fn unit(geoid: &str, centroid: LatLon) -> Arc<StatisticalUnit> {
        Arc::new(StatisticalUnit {
            id: geoid.parse().unwrap(),
            centroid,
            land_area_sqm: 1_000_000.0,
            population: 100,
            demographics: Demographics::default(),
            estimated: BTreeSet::new(),
        })
    }

    #[test]
    fn parses_polygon_features_only() {
        let boundaries = parse_boundaries(COLLECTION).unwrap();
        assert_eq!(boundaries.len(), 1);
        assert!(boundaries.contains_key(&"12095016501".parse().unwrap()));
    }

    #[test]
    fn rejects_bare_geometry() {
        let err = parse_boundaries(r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#);
        assert!(matches!(err, Err(SpatialError::GeoJson { .. })));
    }

    #[test]
    fn missing_boundaries_become_discs() {
        let projection = AlbersProjection::new(Region::Florida.projection());
        let boundaries = parse_boundaries(COLLECTION).unwrap();
        let units = vec![
            unit("12095016501", LatLon::new(28.565, -81.215)),
            unit("12095016502", LatLon::new(28.5, -81.2)),
        ];

        let index = RegionIndex::build(&projection, &units, &boundaries, 64);
        assert_eq!(index.unit_count(), 2);
        assert_eq!(index.approximated(), 1);

        let everything = Rect::new(
            geo::Coord {
                x: -1e12,
                y: -1e12,
            },
            geo::Coord {
                x: 1e12,
                y: 1e12,
            },
        );
        let disc = index
            .candidates(&everything)
            .find(|e| e.approximated)
            .unwrap();
        assert!((disc.area_sqm - 1_000_000.0).abs() < 1.0);
    }
}
