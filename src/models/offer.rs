use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an outstanding offer was resolved. Sent from the accept/reject/cancel
/// paths back to the dispatch loop waiting on the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    Accepted { driver_id: Uuid },
    Rejected,
    TripCancelled,
}

/// Broadcast to websocket subscribers as the engine moves trips along.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TripEvent {
    OfferIssued {
        trip_id: Uuid,
        driver_id: Uuid,
        deadline: DateTime<Utc>,
    },
    TripMatched {
        trip_id: Uuid,
        driver_id: Uuid,
    },
    NoDriverFound {
        trip_id: Uuid,
    },
    TripCancelled {
        trip_id: Uuid,
    },
    TripCompleted {
        trip_id: Uuid,
        final_fare: f64,
    },
}
