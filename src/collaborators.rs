//! Narrow interfaces to services the engine consumes but does not own.
//! Failures here are logged as warnings and never fail a trip transition.

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("collaborator unavailable: {0}")]
pub struct CollaboratorError(pub String);

#[derive(Debug, Clone, Copy, Default)]
pub struct DriverEligibility {
    pub documents_verified: bool,
    pub active_vehicle_id: Option<Uuid>,
}

pub trait UserDirectory: Send + Sync {
    fn driver_eligibility(&self, driver_id: Uuid) -> DriverEligibility;
}

pub trait PaymentLedger: Send + Sync {
    fn record_trip_payment(
        &self,
        trip_id: Uuid,
        amount: f64,
        commission: f64,
        driver_amount: f64,
    ) -> Result<(), CollaboratorError>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: Uuid, kind: &str, payload: serde_json::Value) -> Result<(), CollaboratorError>;
}

pub trait PromotionService: Send + Sync {
    fn applicable_discount(&self, user_id: Uuid, amount: f64) -> Result<f64, CollaboratorError>;
}

/// In-memory directory seeded at driver registration time.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    entries: DashMap<Uuid, DriverEligibility>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, driver_id: Uuid, eligibility: DriverEligibility) {
        self.entries.insert(driver_id, eligibility);
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn driver_eligibility(&self, driver_id: Uuid) -> DriverEligibility {
        self.entries
            .get(&driver_id)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub trip_id: Uuid,
    pub amount: f64,
    pub commission: f64,
    pub driver_amount: f64,
}

#[derive(Default)]
pub struct InMemoryPaymentLedger {
    records: DashMap<Uuid, PaymentRecord>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_for(&self, trip_id: Uuid) -> Option<PaymentRecord> {
        self.records.get(&trip_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PaymentLedger for InMemoryPaymentLedger {
    fn record_trip_payment(
        &self,
        trip_id: Uuid,
        amount: f64,
        commission: f64,
        driver_amount: f64,
    ) -> Result<(), CollaboratorError> {
        // One payment per trip; completion is guarded upstream so a second
        // write would indicate a transition bug.
        if self.records.contains_key(&trip_id) {
            return Err(CollaboratorError(format!(
                "payment for trip {trip_id} already recorded"
            )));
        }
        self.records.insert(
            trip_id,
            PaymentRecord {
                trip_id,
                amount,
                commission,
                driver_amount,
            },
        );
        Ok(())
    }
}

/// Logs deliveries instead of pushing anywhere.
#[derive(Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, user_id: Uuid, kind: &str, payload: serde_json::Value) -> Result<(), CollaboratorError> {
        tracing::info!(user_id = %user_id, kind, %payload, "notification");
        Ok(())
    }
}

/// No active promotions; every discount is zero.
#[derive(Default)]
pub struct NoPromotions;

impl PromotionService for NoPromotions {
    fn applicable_discount(&self, _user_id: Uuid, _amount: f64) -> Result<f64, CollaboratorError> {
        Ok(0.0)
    }
}
