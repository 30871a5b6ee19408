use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::driver::{GeoPoint, Position};

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Spatial index over drivers' last-known positions.
///
/// Writes lock only the touched entry; `nearest` works on a point-in-time
/// snapshot so queries never hold up location ingestion.
#[derive(Default)]
pub struct GeoIndex {
    positions: DashMap<Uuid, Position>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self {
            positions: DashMap::new(),
        }
    }

    /// Records a position, keeping whichever has the later `recorded_at`.
    /// Concurrent pings for one driver may land here in either order; the
    /// timestamp comparison under the entry lock keeps the index in
    /// agreement with the registry's monotonic history.
    pub fn upsert(&self, driver_id: Uuid, point: GeoPoint, recorded_at: DateTime<Utc>) {
        match self.positions.entry(driver_id) {
            Entry::Occupied(mut slot) => {
                if recorded_at > slot.get().recorded_at {
                    slot.insert(Position { point, recorded_at });
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Position { point, recorded_at });
            }
        }
    }

    pub fn remove(&self, driver_id: Uuid) {
        self.positions.remove(&driver_id);
    }

    pub fn position(&self, driver_id: Uuid) -> Option<Position> {
        self.positions.get(&driver_id).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Up to `k` drivers within `max_radius_km` of `origin`, closest first.
    /// Ties break on ascending driver id so rankings are deterministic.
    pub fn nearest(&self, origin: &GeoPoint, k: usize, max_radius_km: f64) -> Vec<(Uuid, f64)> {
        let mut within: Vec<(Uuid, f64)> = self
            .positions
            .iter()
            .filter_map(|entry| {
                let distance = haversine_km(origin, &entry.value().point);
                (distance <= max_radius_km).then_some((*entry.key(), distance))
            })
            .collect();

        within.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        within.truncate(k);
        within
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{haversine_km, GeoIndex};
    use crate::models::driver::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn nearest_sorts_by_distance_and_respects_radius() {
        let index = GeoIndex::new();
        let origin = GeoPoint { lat: 0.0, lng: 0.0 };

        let near = Uuid::from_u128(1);
        let mid = Uuid::from_u128(2);
        let far = Uuid::from_u128(3);

        index.upsert(near, GeoPoint { lat: 0.0, lng: 0.005 }, Utc::now());
        index.upsert(mid, GeoPoint { lat: 0.0, lng: 0.02 }, Utc::now());
        index.upsert(far, GeoPoint { lat: 1.0, lng: 1.0 }, Utc::now());

        let ranked = index.nearest(&origin, 10, 5.0);
        let ids: Vec<_> = ranked.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![near, mid]);
        assert!(ranked[0].1 <= ranked[1].1);
    }

    #[test]
    fn nearest_breaks_distance_ties_by_driver_id() {
        let index = GeoIndex::new();
        let origin = GeoPoint { lat: 0.0, lng: 0.0 };
        let same_spot = GeoPoint { lat: 0.0, lng: 0.01 };

        let high = Uuid::from_u128(9);
        let low = Uuid::from_u128(4);
        index.upsert(high, same_spot, Utc::now());
        index.upsert(low, same_spot, Utc::now());

        let ranked = index.nearest(&origin, 2, 5.0);
        assert_eq!(ranked[0].0, low);
        assert_eq!(ranked[1].0, high);
    }

    #[test]
    fn nearest_truncates_to_k() {
        let index = GeoIndex::new();
        let origin = GeoPoint { lat: 0.0, lng: 0.0 };
        for i in 0..5u128 {
            index.upsert(
                Uuid::from_u128(i),
                GeoPoint {
                    lat: 0.0,
                    lng: 0.001 * (i as f64 + 1.0),
                },
                Utc::now(),
            );
        }

        assert_eq!(index.nearest(&origin, 2, 5.0).len(), 2);
    }

    #[test]
    fn upsert_keeps_the_newer_position() {
        let index = GeoIndex::new();
        let id = Uuid::from_u128(1);
        let newer = Utc::now();

        index.upsert(id, GeoPoint { lat: 1.0, lng: 1.0 }, newer);
        // An out-of-order write must not roll the position back.
        index.upsert(
            id,
            GeoPoint { lat: 9.0, lng: 9.0 },
            newer - chrono::Duration::seconds(5),
        );

        let stored = index.position(id).unwrap();
        assert_eq!(stored.point.lat, 1.0);
        assert_eq!(stored.recorded_at, newer);
    }

    #[test]
    fn removed_driver_never_appears() {
        let index = GeoIndex::new();
        let origin = GeoPoint { lat: 0.0, lng: 0.0 };
        let id = Uuid::from_u128(7);
        index.upsert(id, GeoPoint { lat: 0.0, lng: 0.001 }, Utc::now());
        index.remove(id);

        assert!(index.nearest(&origin, 5, 5.0).is_empty());
    }
}
