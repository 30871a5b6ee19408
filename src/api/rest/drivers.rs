use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::collaborators::DriverEligibility;
use crate::error::DispatchError;
use crate::ingest;
use crate::models::driver::{Availability, DriverState, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id/availability", patch(update_availability))
        .route("/drivers/:id/location", post(update_location))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub documents_verified: bool,
    pub vehicle_id: Option<Uuid>,
    pub rating: f64,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub availability: Availability,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub lat: f64,
    pub lng: f64,
    pub recorded_at: Option<DateTime<Utc>>,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<DriverState>, DispatchError> {
    if payload.name.trim().is_empty() {
        return Err(DispatchError::BadRequest("name cannot be empty".to_string()));
    }

    let driver_id = Uuid::new_v4();
    state.user_directory.set(
        driver_id,
        DriverEligibility {
            documents_verified: payload.documents_verified,
            active_vehicle_id: payload.vehicle_id,
        },
    );

    let driver = DriverState::new(
        driver_id,
        payload.name,
        payload.documents_verified,
        payload.vehicle_id,
        payload.rating,
    );
    state.registry.register(driver.clone());

    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<DriverState>> {
    Json(state.registry.list())
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<DriverState>, DispatchError> {
    let driver = match payload.availability {
        Availability::Available => state.registry.set_available(id)?,
        Availability::Offline => state.registry.set_offline(id)?,
        Availability::Busy => {
            return Err(DispatchError::BadRequest(
                "busy is set by dispatch, not by the driver".to_string(),
            ));
        }
    };

    Ok(Json(driver))
}

/// Stale pings are dropped and logged, never failed back to the device.
async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<serde_json::Value>, DispatchError> {
    let point = GeoPoint {
        lat: payload.lat,
        lng: payload.lng,
    };
    let recorded_at = payload.recorded_at.unwrap_or_else(Utc::now);

    match ingest::ingest(&state, id, point, recorded_at) {
        Ok(()) => Ok(Json(json!({ "driver_id": id, "applied": true }))),
        Err(DispatchError::StaleUpdate(_)) => {
            warn!(driver_id = %id, "dropped out-of-order location ping");
            Ok(Json(json!({ "driver_id": id, "applied": false })))
        }
        Err(err) => Err(err),
    }
}
