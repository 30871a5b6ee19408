use std::sync::Arc;
use std::time::Instant;

use chrono::Duration as ChronoDuration;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::state_machine;
use crate::error::DispatchError;
use crate::models::offer::{OfferDecision, TripEvent};
use crate::models::trip::TripStatus;
use crate::state::AppState;

enum DispatchOutcome {
    Matched(Uuid),
    Cancelled,
}

pub async fn run_dispatch_engine(state: Arc<AppState>, mut trip_rx: mpsc::Receiver<Uuid>) {
    info!("dispatch engine started");

    // Each trip gets its own task; an offer sequence waiting out its
    // timeouts must not hold up the trips queued behind it.
    while let Some(trip_id) = trip_rx.recv().await {
        state.metrics.trips_in_queue.dec();

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let start = Instant::now();
            let outcome = match dispatch_trip(&state, trip_id).await {
                Ok(DispatchOutcome::Matched(driver_id)) => {
                    info!(trip_id = %trip_id, driver_id = %driver_id, "trip matched");
                    "matched"
                }
                Ok(DispatchOutcome::Cancelled) => "cancelled",
                Err(DispatchError::NoDriverFound(_)) => "no_driver",
                Err(err) => {
                    error!(trip_id = %trip_id, error = %err, "failed to dispatch trip");
                    "error"
                }
            };

            state
                .metrics
                .dispatch_latency_seconds
                .with_label_values(&[outcome])
                .observe(start.elapsed().as_secs_f64());
            state
                .metrics
                .dispatches_total
                .with_label_values(&[outcome])
                .inc();
        });
    }

    warn!("dispatch engine stopped: queue channel closed");
}

async fn dispatch_trip(state: &Arc<AppState>, trip_id: Uuid) -> Result<DispatchOutcome, DispatchError> {
    let (pickup, passenger_id) = {
        let trip = state
            .trips
            .get(&trip_id)
            .ok_or_else(|| DispatchError::NotFound(format!("trip {trip_id} not found")))?;
        if trip.status != TripStatus::Requested {
            return Ok(DispatchOutcome::Cancelled);
        }
        (trip.pickup, trip.passenger_id)
    };

    let now = Utc::now();
    let candidates: Vec<(Uuid, f64)> = state
        .geo
        .nearest(&pickup, state.config.dispatch_candidates, state.config.max_search_radius_km)
        .into_iter()
        .filter(|(driver_id, _)| state.registry.is_eligible(*driver_id, now))
        .collect();

    if candidates.is_empty() {
        warn!(trip_id = %trip_id, "no eligible drivers in range");
    }

    for (driver_id, distance_km) in candidates {
        // A passenger cancellation between offers stops the attempt here.
        if state_machine::current_status(state, trip_id)? != TripStatus::Requested {
            state.offers.close(trip_id);
            return Ok(DispatchOutcome::Cancelled);
        }

        let deadline = Utc::now()
            + ChronoDuration::from_std(state.config.offer_timeout)
                .unwrap_or_else(|_| ChronoDuration::seconds(15));
        let rx = state.offers.open(trip_id, driver_id, deadline);

        if let Err(err) = state.notifier.notify(
            driver_id,
            "trip_offer",
            json!({ "trip_id": trip_id, "distance_km": distance_km, "deadline": deadline }),
        ) {
            warn!(driver_id = %driver_id, error = %err, "offer notification failed");
        }
        let _ = state.trip_events_tx.send(TripEvent::OfferIssued {
            trip_id,
            driver_id,
            deadline,
        });
        info!(trip_id = %trip_id, driver_id = %driver_id, distance_km, "offer issued");

        tokio::select! {
            decision = rx => match decision {
                Ok(OfferDecision::Accepted { driver_id }) => {
                    return Ok(finish_matched(state, trip_id, passenger_id, driver_id));
                }
                Ok(OfferDecision::Rejected) => {
                    info!(trip_id = %trip_id, driver_id = %driver_id, "offer rejected");
                    continue;
                }
                Ok(OfferDecision::TripCancelled) => {
                    return Ok(DispatchOutcome::Cancelled);
                }
                // Slot replaced or dropped; treat like a rejection.
                Err(_) => continue,
            },
            _ = sleep(state.config.offer_timeout) => {
                if state.offers.expire_if_unclaimed(trip_id, driver_id) {
                    info!(trip_id = %trip_id, driver_id = %driver_id, "offer timed out");
                    continue;
                }
                // The acceptance committed right at the deadline; honor it.
                return Ok(finish_matched(state, trip_id, passenger_id, driver_id));
            }
        }
    }

    state.offers.close(trip_id);
    match state_machine::mark_no_driver_found(state, trip_id) {
        Ok(_) => {
            let _ = state.trip_events_tx.send(TripEvent::NoDriverFound { trip_id });
            if let Err(err) = state.notifier.notify(
                passenger_id,
                "no_driver_found",
                json!({ "trip_id": trip_id }),
            ) {
                warn!(passenger_id = %passenger_id, error = %err, "notification failed");
            }
            warn!(trip_id = %trip_id, "candidates exhausted, no driver found");
            Err(DispatchError::NoDriverFound(trip_id))
        }
        // The trip left `requested` while the last offer was in flight.
        Err(DispatchError::InvalidTransition { .. }) => Ok(DispatchOutcome::Cancelled),
        Err(err) => Err(err),
    }
}

fn finish_matched(
    state: &AppState,
    trip_id: Uuid,
    passenger_id: Uuid,
    driver_id: Uuid,
) -> DispatchOutcome {
    state.offers.close(trip_id);
    let _ = state.trip_events_tx.send(TripEvent::TripMatched { trip_id, driver_id });
    if let Err(err) = state.notifier.notify(
        passenger_id,
        "driver_matched",
        json!({ "trip_id": trip_id, "driver_id": driver_id }),
    ) {
        warn!(passenger_id = %passenger_id, error = %err, "notification failed");
    }
    DispatchOutcome::Matched(driver_id)
}
