use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Requested,
    Accepted,
    DriverArriving,
    InProgress,
    Completed,
    CancelledByPassenger,
    CancelledByDriver,
    NoDriverFound,
}

impl TripStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TripStatus::Completed
                | TripStatus::CancelledByPassenger
                | TripStatus::CancelledByDriver
                | TripStatus::NoDriverFound
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    Passenger,
    Driver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub status: TripStatus,
    pub pickup: GeoPoint,
    pub destination: GeoPoint,
    pub pickup_address: Option<String>,
    pub destination_address: Option<String>,
    pub distance_km: f64,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub actual_duration_min: Option<i64>,
    pub base_fare: f64,
    pub final_fare: Option<f64>,
    pub discount_applied: f64,
    pub commission: Option<f64>,
    pub driver_amount: Option<f64>,
    pub passenger_notes: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl Trip {
    fn guard(&self, expected: TripStatus, to: TripStatus) -> Result<(), DispatchError> {
        if self.status != expected {
            return Err(DispatchError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// `requested -> accepted`. Driver and vehicle must both be known.
    pub fn accept(&mut self, driver_id: Uuid, vehicle_id: Uuid, now: DateTime<Utc>) -> Result<(), DispatchError> {
        self.guard(TripStatus::Requested, TripStatus::Accepted)?;
        self.driver_id = Some(driver_id);
        self.vehicle_id = Some(vehicle_id);
        self.status = TripStatus::Accepted;
        self.accepted_at = Some(now);
        Ok(())
    }

    /// `accepted -> driver_arriving`.
    pub fn driver_arriving(&mut self) -> Result<(), DispatchError> {
        self.guard(TripStatus::Accepted, TripStatus::DriverArriving)?;
        self.status = TripStatus::DriverArriving;
        Ok(())
    }

    /// `driver_arriving -> in_progress`, records the start timestamp.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), DispatchError> {
        self.guard(TripStatus::DriverArriving, TripStatus::InProgress)?;
        self.status = TripStatus::InProgress;
        self.started_at = Some(now);
        Ok(())
    }

    /// `in_progress -> completed`. Final fare defaults to the base fare.
    pub fn complete(&mut self, final_fare: Option<f64>, now: DateTime<Utc>) -> Result<(), DispatchError> {
        self.guard(TripStatus::InProgress, TripStatus::Completed)?;
        let started_at = self.started_at.ok_or(DispatchError::InvalidTransition {
            from: self.status,
            to: TripStatus::Completed,
        })?;
        self.status = TripStatus::Completed;
        self.completed_at = Some(now);
        self.actual_duration_min = Some((now - started_at).num_minutes());
        self.final_fare = Some(final_fare.unwrap_or(self.base_fare));
        Ok(())
    }

    /// Cancellation is legal from every non-terminal state.
    pub fn cancel(&mut self, actor: CancelActor, reason: Option<String>) -> Result<(), DispatchError> {
        let to = match actor {
            CancelActor::Passenger => TripStatus::CancelledByPassenger,
            CancelActor::Driver => TripStatus::CancelledByDriver,
        };
        if self.status.is_terminal() {
            return Err(DispatchError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.cancellation_reason = reason;
        Ok(())
    }

    /// `requested -> no_driver_found`, emitted on candidate exhaustion.
    pub fn no_driver_found(&mut self) -> Result<(), DispatchError> {
        self.guard(TripStatus::Requested, TripStatus::NoDriverFound)?;
        self.status = TripStatus::NoDriverFound;
        Ok(())
    }
}
