use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Offline,
    Available,
    Busy,
}

/// Last reported position of a driver together with the device timestamp
/// that produced it. Updates with an older timestamp are rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub point: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverState {
    pub id: Uuid,
    pub name: String,
    pub availability: Availability,
    pub documents_verified: bool,
    /// Active vehicle, if any. A driver without one cannot go available.
    pub vehicle_id: Option<Uuid>,
    pub rating: f64,
    pub active_trip_id: Option<Uuid>,
    pub position: Option<Position>,
    /// Set by the staleness sweep; a fresh ping turns it back on.
    pub position_fresh: bool,
    pub updated_at: DateTime<Utc>,
}

impl DriverState {
    pub fn new(id: Uuid, name: String, documents_verified: bool, vehicle_id: Option<Uuid>, rating: f64) -> Self {
        Self {
            id,
            name,
            availability: Availability::Offline,
            documents_verified,
            vehicle_id,
            rating: rating.clamp(0.0, 5.0),
            active_trip_id: None,
            position: None,
            position_fresh: false,
            updated_at: Utc::now(),
        }
    }

    pub fn qualified(&self) -> bool {
        self.documents_verified && self.vehicle_id.is_some()
    }
}
