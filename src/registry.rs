use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collaborators::UserDirectory;
use crate::error::DispatchError;
use crate::models::driver::{Availability, DriverState, GeoPoint, Position};

/// Source of truth for driver availability and eligibility.
///
/// Every mutation goes through the entry lock for that driver id, so no
/// caller ever observes a half-applied state for a single driver.
pub struct DriverRegistry {
    drivers: DashMap<Uuid, DriverState>,
    directory: Arc<dyn UserDirectory>,
    freshness_threshold: Duration,
}

impl DriverRegistry {
    pub fn new(directory: Arc<dyn UserDirectory>, freshness_threshold: Duration) -> Self {
        Self {
            drivers: DashMap::new(),
            directory,
            freshness_threshold,
        }
    }

    pub fn register(&self, driver: DriverState) {
        self.drivers.insert(driver.id, driver);
    }

    pub fn get(&self, driver_id: Uuid) -> Option<DriverState> {
        self.drivers.get(&driver_id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<DriverState> {
        self.drivers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Moves a driver to `available`, re-checking their qualification with
    /// the user directory first.
    pub fn set_available(&self, driver_id: Uuid) -> Result<DriverState, DispatchError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))?;

        if driver.availability == Availability::Busy {
            return Err(DispatchError::Conflict(format!(
                "driver {driver_id} has an active trip"
            )));
        }

        let eligibility = self.directory.driver_eligibility(driver_id);
        driver.documents_verified = eligibility.documents_verified;
        driver.vehicle_id = eligibility.active_vehicle_id;

        if !driver.qualified() {
            return Err(DispatchError::IneligibleDriver(driver_id));
        }

        driver.availability = Availability::Available;
        driver.updated_at = Utc::now();
        Ok(driver.clone())
    }

    pub fn set_offline(&self, driver_id: Uuid) -> Result<DriverState, DispatchError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))?;

        if driver.availability == Availability::Busy {
            return Err(DispatchError::Conflict(format!(
                "driver {driver_id} has an active trip"
            )));
        }

        driver.availability = Availability::Offline;
        driver.updated_at = Utc::now();
        Ok(driver.clone())
    }

    /// Binds a driver to a trip. Caller must hold the winning offer.
    pub fn set_busy(&self, driver_id: Uuid, trip_id: Uuid) -> Result<(), DispatchError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))?;

        if driver.availability != Availability::Available {
            return Err(DispatchError::Conflict(format!(
                "driver {driver_id} is not available"
            )));
        }

        driver.availability = Availability::Busy;
        driver.active_trip_id = Some(trip_id);
        driver.updated_at = Utc::now();
        Ok(())
    }

    /// Frees a driver after their trip ends: back to `available` if they
    /// still qualify, otherwise `offline`.
    pub fn release(&self, driver_id: Uuid) -> Result<(), DispatchError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))?;

        driver.active_trip_id = None;
        driver.availability = if driver.qualified() {
            Availability::Available
        } else {
            Availability::Offline
        };
        driver.updated_at = Utc::now();
        Ok(())
    }

    /// Combined matching gate: qualified, available, and position fresh.
    pub fn is_eligible(&self, driver_id: Uuid, now: DateTime<Utc>) -> bool {
        let Some(driver) = self.drivers.get(&driver_id) else {
            return false;
        };

        let fresh = driver.position.is_some_and(|position| {
            let age = now - position.recorded_at;
            age.to_std().map_or(true, |age| age <= self.freshness_threshold)
        });

        driver.qualified() && driver.availability == Availability::Available && fresh
    }

    /// Applies a position ping, rejecting out-of-order timestamps so a
    /// driver's position history stays monotonic.
    pub fn apply_position(
        &self,
        driver_id: Uuid,
        point: GeoPoint,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))?;

        if let Some(previous) = driver.position {
            if recorded_at <= previous.recorded_at {
                return Err(DispatchError::StaleUpdate(driver_id));
            }
        }

        driver.position = Some(Position { point, recorded_at });
        driver.position_fresh = true;
        driver.updated_at = Utc::now();
        Ok(())
    }

    /// Soft-marks drivers whose last ping is too old. Availability is left
    /// untouched; a fresh ping reverses the mark.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        let mut marked = 0;
        for mut entry in self.drivers.iter_mut() {
            let stale = entry.position.is_some_and(|position| {
                (now - position.recorded_at)
                    .to_std()
                    .is_ok_and(|age| age > self.freshness_threshold)
            });
            if stale && entry.position_fresh {
                entry.position_fresh = false;
                marked += 1;
                debug!(driver_id = %entry.id, "driver position went stale");
            }
        }
        if marked > 0 {
            warn!(count = marked, "drivers excluded from matching for stale positions");
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    use super::DriverRegistry;
    use crate::collaborators::{DriverEligibility, InMemoryUserDirectory};
    use crate::error::DispatchError;
    use crate::models::driver::{Availability, DriverState, GeoPoint};

    fn registry_with_driver(documents_verified: bool, vehicle: bool) -> (DriverRegistry, Uuid) {
        let directory = Arc::new(InMemoryUserDirectory::new());
        let driver_id = Uuid::new_v4();
        let vehicle_id = vehicle.then(Uuid::new_v4);
        directory.set(
            driver_id,
            DriverEligibility {
                documents_verified,
                active_vehicle_id: vehicle_id,
            },
        );

        let registry = DriverRegistry::new(directory, Duration::from_secs(300));
        registry.register(DriverState::new(
            driver_id,
            "test-driver".to_string(),
            documents_verified,
            vehicle_id,
            4.5,
        ));
        (registry, driver_id)
    }

    #[test]
    fn unverified_driver_cannot_go_available() {
        let (registry, driver_id) = registry_with_driver(false, true);
        let err = registry.set_available(driver_id).unwrap_err();
        assert!(matches!(err, DispatchError::IneligibleDriver(_)));
        assert_eq!(registry.get(driver_id).unwrap().availability, Availability::Offline);
    }

    #[test]
    fn driver_without_vehicle_cannot_go_available() {
        let (registry, driver_id) = registry_with_driver(true, false);
        assert!(registry.set_available(driver_id).is_err());
    }

    #[test]
    fn stale_position_excludes_from_matching() {
        let (registry, driver_id) = registry_with_driver(true, true);
        registry.set_available(driver_id).unwrap();

        let old = Utc::now() - ChronoDuration::minutes(10);
        registry
            .apply_position(driver_id, GeoPoint { lat: 0.0, lng: 0.0 }, old)
            .unwrap();

        assert!(!registry.is_eligible(driver_id, Utc::now()));

        registry
            .apply_position(driver_id, GeoPoint { lat: 0.0, lng: 0.0 }, Utc::now())
            .unwrap();
        assert!(registry.is_eligible(driver_id, Utc::now()));
    }

    #[test]
    fn out_of_order_ping_is_rejected_and_position_kept() {
        let (registry, driver_id) = registry_with_driver(true, true);
        let first = Utc::now();
        registry
            .apply_position(driver_id, GeoPoint { lat: 1.0, lng: 1.0 }, first)
            .unwrap();

        let err = registry
            .apply_position(
                driver_id,
                GeoPoint { lat: 2.0, lng: 2.0 },
                first - ChronoDuration::seconds(5),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::StaleUpdate(_)));

        let stored = registry.get(driver_id).unwrap().position.unwrap();
        assert_eq!(stored.point.lat, 1.0);
        assert_eq!(stored.recorded_at, first);
    }

    #[test]
    fn busy_requires_available_and_release_restores() {
        let (registry, driver_id) = registry_with_driver(true, true);
        let trip_id = Uuid::new_v4();

        assert!(registry.set_busy(driver_id, trip_id).is_err());

        registry.set_available(driver_id).unwrap();
        registry.set_busy(driver_id, trip_id).unwrap();

        let driver = registry.get(driver_id).unwrap();
        assert_eq!(driver.availability, Availability::Busy);
        assert_eq!(driver.active_trip_id, Some(trip_id));

        registry.release(driver_id).unwrap();
        let driver = registry.get(driver_id).unwrap();
        assert_eq!(driver.availability, Availability::Available);
        assert_eq!(driver.active_trip_id, None);
    }

    #[test]
    fn sweep_marks_stale_drivers_without_touching_availability() {
        let (registry, driver_id) = registry_with_driver(true, true);
        registry.set_available(driver_id).unwrap();
        registry
            .apply_position(
                driver_id,
                GeoPoint { lat: 0.0, lng: 0.0 },
                Utc::now() - ChronoDuration::minutes(20),
            )
            .unwrap();

        assert_eq!(registry.sweep_stale(Utc::now()), 1);

        let driver = registry.get(driver_id).unwrap();
        assert!(!driver.position_fresh);
        assert_eq!(driver.availability, Availability::Available);

        // A fresh ping reverses the soft exclusion.
        registry
            .apply_position(driver_id, GeoPoint { lat: 0.0, lng: 0.0 }, Utc::now())
            .unwrap();
        assert!(registry.get(driver_id).unwrap().position_fresh);
    }
}
