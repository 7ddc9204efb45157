//! Geospatial index: cell-bucketed points with radius candidate lookup.
//!
//! Points are bucketed into an equal-angle grid whose cell edge halves with
//! each resolution step (resolution 7 default, 15 finest). A radius query
//! collects the covering cells and returns their documents; callers
//! post-filter candidates by true haversine distance.

use ahash::AHashMap;

use crate::error::{QuarryError, Result};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// A geographical point with latitude and longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Create a point, validating the coordinate ranges.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(QuarryError::bad_request(format!(
                "Invalid latitude: {lat} (must be between -90 and 90)"
            )));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(QuarryError::bad_request(format!(
                "Invalid longitude: {lng} (must be between -180 and 180)"
            )));
        }
        Ok(GeoPoint { lat, lng })
    }

    /// Haversine distance to another point, in meters.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lng = (other.lng - self.lng).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    /// Squared Euclidean distance in degrees, the geo-sort comparator key.
    pub fn squared_degree_distance(&self, other: &GeoPoint) -> f64 {
        let dlat = self.lat - other.lat;
        let dlng = self.lng - other.lng;
        dlat * dlat + dlng * dlng
    }
}

/// Cell edge length in degrees at a given resolution.
fn cell_edge_degrees(resolution: u8) -> f64 {
    // resolution 0 covers 45 degrees per cell; each step halves the edge
    45.0 / f64::from(1u32 << resolution.min(crate::schema::FINEST_GEO_RESOLUTION))
}

/// Compute the cell id of a point at a resolution.
pub fn cell_of(point: &GeoPoint, resolution: u8) -> u64 {
    let edge = cell_edge_degrees(resolution);
    let lat_idx = ((point.lat + 90.0) / edge) as u32;
    let lng_idx = ((point.lng + 180.0) / edge) as u32;
    (u64::from(lat_idx) << 32) | u64::from(lng_idx)
}

/// Cells covering a circle of `radius_m` meters around `center`.
fn covering_cells(center: &GeoPoint, radius_m: f64, resolution: u8) -> Vec<u64> {
    let edge = cell_edge_degrees(resolution);
    let lat_delta = radius_m / METERS_PER_DEGREE;
    let lng_scale = center.lat.to_radians().cos().abs().max(0.01);
    let lng_delta = lat_delta / lng_scale;

    let lat_min = ((center.lat - lat_delta + 90.0).max(0.0) / edge) as u32;
    let lat_max = ((center.lat + lat_delta + 90.0).min(180.0) / edge) as u32;
    let lng_min = ((center.lng - lng_delta + 180.0).max(0.0) / edge) as u32;
    let lng_max = ((center.lng + lng_delta + 180.0).min(360.0) / edge) as u32;

    let mut cells = Vec::new();
    for lat_idx in lat_min..=lat_max {
        for lng_idx in lng_min..=lng_max {
            cells.push((u64::from(lat_idx) << 32) | u64::from(lng_idx));
        }
    }
    cells
}

/// Per-field geospatial index of one shard.
#[derive(Debug)]
pub struct GeoIndex {
    resolution: u8,
    cells: AHashMap<u64, Vec<u32>>,
    points: AHashMap<u32, GeoPoint>,
}

impl GeoIndex {
    /// Create an empty index at the given cell resolution.
    pub fn new(resolution: u8) -> Self {
        GeoIndex {
            resolution,
            cells: AHashMap::new(),
            points: AHashMap::new(),
        }
    }

    /// Index a document's point.
    pub fn insert(&mut self, point: GeoPoint, seq_id: u32) {
        let cell = cell_of(&point, self.resolution);
        let ids = self.cells.entry(cell).or_default();
        if let Err(idx) = ids.binary_search(&seq_id) {
            ids.insert(idx, seq_id);
        }
        self.points.insert(seq_id, point);
    }

    /// Remove a document's point.
    pub fn remove(&mut self, seq_id: u32) {
        if let Some(point) = self.points.remove(&seq_id) {
            let cell = cell_of(&point, self.resolution);
            if let Some(ids) = self.cells.get_mut(&cell) {
                if let Ok(idx) = ids.binary_search(&seq_id) {
                    ids.remove(idx);
                }
                if ids.is_empty() {
                    self.cells.remove(&cell);
                }
            }
        }
    }

    /// The indexed point of a document, if any.
    pub fn point(&self, seq_id: u32) -> Option<&GeoPoint> {
        self.points.get(&seq_id)
    }

    /// Documents within `radius_m` meters of `center`, post-filtered by
    /// haversine distance. Sorted ascending by `seq_id`.
    pub fn within_radius(&self, center: &GeoPoint, radius_m: f64) -> Vec<u32> {
        let mut ids = Vec::new();
        for cell in covering_cells(center, radius_m, self.resolution) {
            if let Some(cell_ids) = self.cells.get(&cell) {
                for &seq_id in cell_ids {
                    if let Some(point) = self.points.get(&seq_id) {
                        if center.distance_meters(point) <= radius_m {
                            ids.push(seq_id);
                        }
                    }
                }
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(48.85, 2.29).is_ok());
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -181.0).is_err());
    }

    #[test]
    fn test_haversine_distance() {
        let eiffel = GeoPoint::new(48.85821022164442, 2.294239067890161).unwrap();
        let pantheon = GeoPoint::new(48.84620987789056, 2.345152755563131).unwrap();
        let dist = eiffel.distance_meters(&pantheon);
        assert!((3900.0..4100.0).contains(&dist), "got {dist}");
    }

    #[test]
    fn test_cell_resolution_granularity() {
        let p = GeoPoint::new(48.85, 2.29).unwrap();
        let q = GeoPoint::new(48.86, 2.29).unwrap();
        // close points share coarse cells but separate at fine resolutions
        assert_eq!(cell_of(&p, 3), cell_of(&q, 3));
        assert_ne!(cell_of(&p, 15), cell_of(&q, 15));
    }

    #[test]
    fn test_within_radius() {
        let mut index = GeoIndex::new(7);
        let center = GeoPoint::new(48.84442912268208, 2.3490714964332353).unwrap();

        index.insert(GeoPoint::new(48.84620987789056, 2.345152755563131).unwrap(), 9);
        index.insert(GeoPoint::new(48.888286721920934, 2.342340862419206).unwrap(), 1);
        // Marseille, far outside the radius
        index.insert(GeoPoint::new(43.2965, 5.3698).unwrap(), 5);

        let hits = index.within_radius(&center, 20_000.0);
        assert_eq!(hits, vec![1, 9]);

        let close_hits = index.within_radius(&center, 1_000.0);
        assert_eq!(close_hits, vec![9]);
    }

    #[test]
    fn test_remove() {
        let mut index = GeoIndex::new(7);
        let point = GeoPoint::new(48.85, 2.29).unwrap();
        index.insert(point, 3);
        assert!(index.point(3).is_some());

        index.remove(3);
        assert!(index.point(3).is_none());
        assert!(index.within_radius(&point, 1000.0).is_empty());
    }
}
