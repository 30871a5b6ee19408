//! Applies trip transitions against the shared trip store.
//!
//! Every function takes the trip's entry lock for the duration of the
//! transition, so transitions on one trip are linearized and no partial
//! update is ever observable.

use chrono::Utc;
use dashmap::mapref::one::RefMut;
use uuid::Uuid;

use crate::engine::fare;
use crate::error::DispatchError;
use crate::models::trip::{CancelActor, Trip, TripStatus};
use crate::state::AppState;

fn entry<'a>(state: &'a AppState, trip_id: Uuid) -> Result<RefMut<'a, Uuid, Trip>, DispatchError> {
    state
        .trips
        .get_mut(&trip_id)
        .ok_or_else(|| DispatchError::NotFound(format!("trip {trip_id} not found")))
}

pub fn current_status(state: &AppState, trip_id: Uuid) -> Result<TripStatus, DispatchError> {
    state
        .trips
        .get(&trip_id)
        .map(|trip| trip.status)
        .ok_or_else(|| DispatchError::NotFound(format!("trip {trip_id} not found")))
}

/// Binds the winning driver: driver goes busy, then the trip moves
/// `requested -> accepted`. If the trip refuses the transition (e.g. the
/// passenger cancelled in the meantime) the driver is released again, so
/// the losing branch leaves no state behind.
pub fn commit_acceptance(
    state: &AppState,
    trip_id: Uuid,
    driver_id: Uuid,
) -> Result<Trip, DispatchError> {
    let vehicle_id = state
        .registry
        .get(driver_id)
        .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))?
        .vehicle_id
        .ok_or(DispatchError::IneligibleDriver(driver_id))?;

    state.registry.set_busy(driver_id, trip_id)?;

    let mut trip = match entry(state, trip_id) {
        Ok(trip) => trip,
        Err(err) => {
            let _ = state.registry.release(driver_id);
            return Err(err);
        }
    };
    if let Err(err) = trip.accept(driver_id, vehicle_id, Utc::now()) {
        drop(trip);
        let _ = state.registry.release(driver_id);
        return Err(err);
    }
    Ok(trip.clone())
}

pub fn mark_driver_arriving(state: &AppState, trip_id: Uuid) -> Result<Trip, DispatchError> {
    let mut trip = entry(state, trip_id)?;
    trip.driver_arriving()?;
    Ok(trip.clone())
}

pub fn start_trip(state: &AppState, trip_id: Uuid) -> Result<Trip, DispatchError> {
    let mut trip = entry(state, trip_id)?;
    trip.start(Utc::now())?;
    Ok(trip.clone())
}

/// Completes the trip and settles the fare in the same atomic step. An
/// explicit `final_fare` overrides the base fare; the discount comes off
/// before the commission split.
pub fn complete_trip(
    state: &AppState,
    trip_id: Uuid,
    final_fare: Option<f64>,
    discount: f64,
) -> Result<Trip, DispatchError> {
    let completed = {
        let mut trip = entry(state, trip_id)?;
        trip.complete(final_fare, Utc::now())?;

        let gross = trip.final_fare.unwrap_or(trip.base_fare);
        let settled = fare::split((gross - discount).max(0.0), state.config.commission_percent);
        trip.final_fare = Some(settled.final_fare);
        trip.discount_applied = discount.min(gross);
        trip.commission = Some(settled.commission);
        trip.driver_amount = Some(settled.driver_amount);

        trip.clone()
    };
    release_passenger_slot(state, &completed);
    Ok(completed)
}

pub fn cancel_trip(
    state: &AppState,
    trip_id: Uuid,
    actor: CancelActor,
    reason: Option<String>,
) -> Result<Trip, DispatchError> {
    let cancelled = {
        let mut trip = entry(state, trip_id)?;
        trip.cancel(actor, reason)?;
        trip.clone()
    };
    release_passenger_slot(state, &cancelled);
    Ok(cancelled)
}

pub fn mark_no_driver_found(state: &AppState, trip_id: Uuid) -> Result<Trip, DispatchError> {
    let exhausted = {
        let mut trip = entry(state, trip_id)?;
        trip.no_driver_found()?;
        trip.clone()
    };
    release_passenger_slot(state, &exhausted);
    Ok(exhausted)
}

/// Frees the passenger's one-open-trip slot once their trip is terminal.
/// Called after the trip guard is dropped; the slot is only cleared if it
/// still points at this trip, so a newer request is never evicted.
fn release_passenger_slot(state: &AppState, trip: &Trip) {
    state
        .open_trips
        .remove_if(&trip.passenger_id, |_, open| *open == trip.id);
}
