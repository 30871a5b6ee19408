use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::engine::queue::enqueue_trip;
use crate::engine::state_machine;
use crate::engine::fare;
use crate::error::DispatchError;
use crate::geo::haversine_km;
use crate::models::driver::GeoPoint;
use crate::models::offer::TripEvent;
use crate::models::trip::{CancelActor, Trip, TripStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips", post(request_trip))
        .route("/trips/:id", get(get_trip))
        .route("/trips/:id/accept", post(accept_trip))
        .route("/trips/:id/reject", post(reject_trip))
        .route("/trips/:id/cancel", post(cancel_trip))
        .route("/trips/:id/arriving", post(driver_arriving))
        .route("/trips/:id/start", post(start_trip))
        .route("/trips/:id/complete", post(complete_trip))
}

#[derive(Deserialize)]
pub struct RequestTripRequest {
    pub passenger_id: Uuid,
    pub pickup: GeoPoint,
    pub destination: GeoPoint,
    pub pickup_address: Option<String>,
    pub destination_address: Option<String>,
    pub passenger_notes: Option<String>,
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct CancelTripRequest {
    pub actor: CancelActor,
    pub reason: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct CompleteTripRequest {
    pub final_fare: Option<f64>,
}

async fn request_trip(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RequestTripRequest>,
) -> Result<Json<Trip>, DispatchError> {
    let distance_km = haversine_km(&payload.pickup, &payload.destination);
    let base_fare = fare::compute(
        distance_km,
        state.config.base_rate_per_km,
        state.config.commission_percent,
        0.0,
    )
    .final_fare;

    let trip = Trip {
        id: Uuid::new_v4(),
        passenger_id: payload.passenger_id,
        driver_id: None,
        vehicle_id: None,
        status: TripStatus::Requested,
        pickup: payload.pickup,
        destination: payload.destination,
        pickup_address: payload.pickup_address,
        destination_address: payload.destination_address,
        distance_km,
        requested_at: Utc::now(),
        accepted_at: None,
        started_at: None,
        completed_at: None,
        actual_duration_min: None,
        base_fare,
        final_fare: None,
        discount_applied: 0.0,
        commission: None,
        driver_amount: None,
        passenger_notes: payload.passenger_notes,
        cancellation_reason: None,
    };

    // The passenger's slot in `open_trips` is claimed and the trip stored
    // under one entry lock, so two concurrent requests cannot both slip
    // past the one-open-trip check.
    match state.open_trips.entry(payload.passenger_id) {
        Entry::Occupied(mut slot) => {
            let still_open = state
                .trips
                .get(slot.get())
                .is_some_and(|open| !open.status.is_terminal());
            if still_open {
                return Err(DispatchError::Conflict(format!(
                    "passenger {} already has an active trip",
                    payload.passenger_id
                )));
            }
            state.trips.insert(trip.id, trip.clone());
            slot.insert(trip.id);
        }
        Entry::Vacant(slot) => {
            state.trips.insert(trip.id, trip.clone());
            slot.insert(trip.id);
        }
    }

    enqueue_trip(&state, trip.id).await?;

    Ok(Json(trip))
}

async fn get_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, DispatchError> {
    let trip = state
        .trips
        .get(&id)
        .ok_or_else(|| DispatchError::NotFound(format!("trip {id} not found")))?;

    Ok(Json(trip.value().clone()))
}

/// Resolves the outstanding offer in the accepting driver's favor, if they
/// get there first. Losers of the race get `OfferAlreadyTaken` and keep
/// their availability.
async fn accept_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Trip>, DispatchError> {
    let mut accepted: Option<Trip> = None;
    let resolution = state.offers.resolve_accept(id, payload.driver_id, || {
        accepted = Some(state_machine::commit_acceptance(&state, id, payload.driver_id)?);
        Ok(())
    });

    if let Err(DispatchError::NotFound(_)) = &resolution {
        // The slot is gone. If another driver already took the trip this is
        // a lost race, not a missing trip.
        let taken = matches!(
            state_machine::current_status(&state, id)?,
            TripStatus::Accepted
                | TripStatus::DriverArriving
                | TripStatus::InProgress
                | TripStatus::Completed
        );
        if taken {
            return Err(DispatchError::OfferAlreadyTaken(id));
        }
    }
    resolution?;

    accepted
        .map(Json)
        .ok_or_else(|| DispatchError::Internal("acceptance committed without a trip".to_string()))
}

async fn reject_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<serde_json::Value>, DispatchError> {
    state.offers.resolve_reject(id, payload.driver_id)?;
    Ok(Json(json!({ "trip_id": id, "rejected_by": payload.driver_id })))
}

async fn cancel_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelTripRequest>,
) -> Result<Json<Trip>, DispatchError> {
    let trip = state_machine::cancel_trip(&state, id, payload.actor, payload.reason)?;

    // Void any outstanding offer; drivers merely offered were never held.
    state.offers.cancel(id);

    if let Some(driver_id) = trip.driver_id {
        if let Err(err) = state.registry.release(driver_id) {
            warn!(driver_id = %driver_id, error = %err, "failed to release driver");
        }
        let counterparty = match payload.actor {
            CancelActor::Passenger => driver_id,
            CancelActor::Driver => trip.passenger_id,
        };
        if let Err(err) = state.notifier.notify(
            counterparty,
            "trip_cancelled",
            json!({ "trip_id": id, "by": payload.actor }),
        ) {
            warn!(error = %err, "cancellation notification failed");
        }
    }

    let _ = state.trip_events_tx.send(TripEvent::TripCancelled { trip_id: id });
    Ok(Json(trip))
}

async fn driver_arriving(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, DispatchError> {
    let trip = state_machine::mark_driver_arriving(&state, id)?;
    Ok(Json(trip))
}

async fn start_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, DispatchError> {
    let trip = state_machine::start_trip(&state, id)?;
    Ok(Json(trip))
}

async fn complete_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteTripRequest>,
) -> Result<Json<Trip>, DispatchError> {
    let final_fare = payload.final_fare;

    let (passenger_id, gross) = {
        let trip = state
            .trips
            .get(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("trip {id} not found")))?;
        (trip.passenger_id, final_fare.unwrap_or(trip.base_fare))
    };

    // Promotion lookups degrade to zero discount; they never fail a trip.
    let discount = match state.promotions.applicable_discount(passenger_id, gross) {
        Ok(discount) => discount,
        Err(err) => {
            warn!(passenger_id = %passenger_id, error = %err, "promotion lookup failed");
            0.0
        }
    };

    let trip = state_machine::complete_trip(&state, id, final_fare, discount)?;

    if let Some(driver_id) = trip.driver_id {
        if let Err(err) = state.registry.release(driver_id) {
            warn!(driver_id = %driver_id, error = %err, "failed to release driver");
        }
    }

    let settled_fare = trip.final_fare.unwrap_or(trip.base_fare);
    let commission = trip.commission.unwrap_or(0.0);
    let driver_amount = trip.driver_amount.unwrap_or(settled_fare - commission);
    if let Err(err) = state.payments.record_trip_payment(
        trip.id,
        settled_fare,
        commission,
        driver_amount,
    ) {
        warn!(trip_id = %trip.id, error = %err, "payment recording failed");
    }

    for user_id in [Some(trip.passenger_id), trip.driver_id].into_iter().flatten() {
        if let Err(err) = state.notifier.notify(
            user_id,
            "trip_completed",
            json!({ "trip_id": trip.id, "final_fare": settled_fare }),
        ) {
            warn!(user_id = %user_id, error = %err, "completion notification failed");
        }
    }

    let _ = state.trip_events_tx.send(TripEvent::TripCompleted {
        trip_id: trip.id,
        final_fare: settled_fare,
    });

    Ok(Json(trip))
}
