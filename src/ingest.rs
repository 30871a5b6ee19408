//! Location ingestion: applies position pings to the registry and the
//! spatial index, and periodically sweeps for drivers that stopped pinging.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::driver::GeoPoint;
use crate::state::AppState;

/// Applies one ping. The registry enforces timestamp monotonicity, and the
/// index's upsert drops anything older than what it holds, so even racing
/// pings leave both views at the newest recorded position.
pub fn ingest(
    state: &AppState,
    driver_id: Uuid,
    point: GeoPoint,
    recorded_at: DateTime<Utc>,
) -> Result<(), DispatchError> {
    match state.registry.apply_position(driver_id, point, recorded_at) {
        Ok(()) => {
            state.geo.upsert(driver_id, point, recorded_at);
            state
                .metrics
                .location_updates_total
                .with_label_values(&["applied"])
                .inc();
            Ok(())
        }
        Err(err @ DispatchError::StaleUpdate(_)) => {
            state
                .metrics
                .location_updates_total
                .with_label_values(&["stale"])
                .inc();
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Marks drivers stale when their last ping ages past the freshness
/// threshold. Runs at half the threshold so exclusion lags by at most half
/// a window.
pub async fn run_staleness_sweep(state: Arc<AppState>) {
    let interval = state.config.freshness_threshold / 2;
    let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        state.registry.sweep_stale(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::ingest;
    use crate::error::DispatchError;
    use crate::models::driver::{DriverState, GeoPoint};
    use crate::state::AppState;

    fn state_with_driver() -> (AppState, Uuid) {
        let config = crate::config::Config {
            http_port: 0,
            log_level: "info".to_string(),
            trip_queue_size: 8,
            event_buffer_size: 8,
            offer_timeout: std::time::Duration::from_millis(50),
            dispatch_candidates: 5,
            max_search_radius_km: 5.0,
            freshness_threshold: std::time::Duration::from_secs(300),
            base_rate_per_km: 2.0,
            commission_percent: 12.0,
        };
        let (state, _rx) = AppState::new(config);
        let driver_id = Uuid::new_v4();
        state.registry.register(DriverState::new(
            driver_id,
            "pinger".to_string(),
            true,
            Some(Uuid::new_v4()),
            5.0,
        ));
        (state, driver_id)
    }

    #[test]
    fn fresh_ping_lands_in_registry_and_index() {
        let (state, driver_id) = state_with_driver();
        let at = Utc::now();
        ingest(&state, driver_id, GeoPoint { lat: 1.0, lng: 2.0 }, at).unwrap();

        assert_eq!(state.registry.get(driver_id).unwrap().position.unwrap().point.lat, 1.0);
        assert_eq!(state.geo.position(driver_id).unwrap().recorded_at, at);
    }

    #[test]
    fn stale_ping_changes_neither_view() {
        let (state, driver_id) = state_with_driver();
        let at = Utc::now();
        ingest(&state, driver_id, GeoPoint { lat: 1.0, lng: 2.0 }, at).unwrap();

        let err = ingest(
            &state,
            driver_id,
            GeoPoint { lat: 9.0, lng: 9.0 },
            at - Duration::seconds(30),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::StaleUpdate(_)));

        assert_eq!(state.registry.get(driver_id).unwrap().position.unwrap().point.lat, 1.0);
        assert_eq!(state.geo.position(driver_id).unwrap().point.lat, 1.0);
    }
}
