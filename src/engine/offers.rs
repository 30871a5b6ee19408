use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::offer::OfferDecision;

/// One outstanding offer: a single trip proposed to a single driver until
/// a deadline. The decision sender is consumed by whichever resolution
/// (accept, reject, cancel, expiry) gets to it first.
struct OfferSlot {
    offered_driver: Uuid,
    deadline: DateTime<Utc>,
    claimed: bool,
    decision_tx: Option<oneshot::Sender<OfferDecision>>,
}

/// All in-flight offers, keyed by trip id.
///
/// Resolutions run while holding the slot's entry lock, which is what makes
/// "exactly one driver accepts" enforceable: concurrent accepts serialize
/// here, and only the first can commit. Lock ordering rule: the trip and
/// driver entries may be taken while holding an offer slot, never the
/// other way around.
#[derive(Default)]
pub struct OfferBoard {
    slots: DashMap<Uuid, OfferSlot>,
}

impl OfferBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or re-arms) the offer for `trip_id` towards `driver_id`.
    /// Returns the receiver the dispatch loop waits on.
    pub fn open(
        &self,
        trip_id: Uuid,
        driver_id: Uuid,
        deadline: DateTime<Utc>,
    ) -> oneshot::Receiver<OfferDecision> {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(
            trip_id,
            OfferSlot {
                offered_driver: driver_id,
                deadline,
                claimed: false,
                decision_tx: Some(tx),
            },
        );
        rx
    }

    pub fn outstanding(&self, trip_id: Uuid) -> Option<(Uuid, DateTime<Utc>)> {
        self.slots
            .get(&trip_id)
            .map(|slot| (slot.offered_driver, slot.deadline))
    }

    /// Commits an acceptance. `commit` performs the trip transition and the
    /// driver-busy mark; it runs under the slot lock so a racing accept for
    /// the same trip cannot interleave. Exactly the first successful caller
    /// wins; everyone else gets `OfferAlreadyTaken`.
    pub fn resolve_accept(
        &self,
        trip_id: Uuid,
        driver_id: Uuid,
        commit: impl FnOnce() -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        let mut slot = self
            .slots
            .get_mut(&trip_id)
            .ok_or_else(|| DispatchError::NotFound(format!("no outstanding offer for trip {trip_id}")))?;

        if slot.claimed || slot.offered_driver != driver_id || slot.decision_tx.is_none() {
            return Err(DispatchError::OfferAlreadyTaken(trip_id));
        }

        commit()?;

        slot.claimed = true;
        if let Some(tx) = slot.decision_tx.take() {
            let _ = tx.send(OfferDecision::Accepted { driver_id });
        }
        Ok(())
    }

    /// Declines the outstanding offer so dispatch moves to the next
    /// candidate. Rejecting an offer that is not yours (or no longer live)
    /// is reported as a lost race.
    pub fn resolve_reject(&self, trip_id: Uuid, driver_id: Uuid) -> Result<(), DispatchError> {
        let mut slot = self
            .slots
            .get_mut(&trip_id)
            .ok_or_else(|| DispatchError::NotFound(format!("no outstanding offer for trip {trip_id}")))?;

        if slot.claimed || slot.offered_driver != driver_id || slot.decision_tx.is_none() {
            return Err(DispatchError::OfferAlreadyTaken(trip_id));
        }

        if let Some(tx) = slot.decision_tx.take() {
            let _ = tx.send(OfferDecision::Rejected);
        }
        Ok(())
    }

    /// Voids the offer on passenger cancellation. The waiting dispatch loop
    /// is told before any timeout can fire a second resolution.
    pub fn cancel(&self, trip_id: Uuid) {
        if let Some((_, slot)) = self.slots.remove(&trip_id) {
            if let Some(tx) = slot.decision_tx {
                let _ = tx.send(OfferDecision::TripCancelled);
            }
        }
    }

    /// Timeout path. Returns true if the offer was still unclaimed (the
    /// driver is skipped); false means an acceptance committed right at the
    /// deadline and must be honored.
    pub fn expire_if_unclaimed(&self, trip_id: Uuid, driver_id: Uuid) -> bool {
        let Some(mut slot) = self.slots.get_mut(&trip_id) else {
            return true;
        };
        if slot.claimed {
            return false;
        }
        if slot.offered_driver == driver_id {
            slot.decision_tx = None;
        }
        true
    }

    /// Drops the slot once dispatch for the trip is finished.
    pub fn close(&self, trip_id: Uuid) {
        self.slots.remove(&trip_id);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::OfferBoard;
    use crate::error::DispatchError;
    use crate::models::offer::OfferDecision;

    #[test]
    fn first_accept_wins_second_loses() {
        let board = OfferBoard::new();
        let trip = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let mut rx = board.open(trip, driver, Utc::now() + Duration::seconds(15));

        board.resolve_accept(trip, driver, || Ok(())).unwrap();

        let err = board.resolve_accept(trip, driver, || Ok(())).unwrap_err();
        assert!(matches!(err, DispatchError::OfferAlreadyTaken(_)));

        assert_eq!(rx.try_recv().unwrap(), OfferDecision::Accepted { driver_id: driver });
    }

    #[test]
    fn accept_by_unoffered_driver_is_a_lost_race() {
        let board = OfferBoard::new();
        let trip = Uuid::new_v4();
        let offered = Uuid::new_v4();
        let other = Uuid::new_v4();
        let _rx = board.open(trip, offered, Utc::now() + Duration::seconds(15));

        let err = board.resolve_accept(trip, other, || Ok(())).unwrap_err();
        assert!(matches!(err, DispatchError::OfferAlreadyTaken(_)));
    }

    #[test]
    fn failed_commit_leaves_offer_open() {
        let board = OfferBoard::new();
        let trip = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let _rx = board.open(trip, driver, Utc::now() + Duration::seconds(15));

        let err = board
            .resolve_accept(trip, driver, || Err(DispatchError::Conflict("busy".into())))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));

        // The same driver can still accept afterwards.
        board.resolve_accept(trip, driver, || Ok(())).unwrap();
    }

    #[test]
    fn reject_sends_decision_and_closes_the_window() {
        let board = OfferBoard::new();
        let trip = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let mut rx = board.open(trip, driver, Utc::now() + Duration::seconds(15));

        board.resolve_reject(trip, driver).unwrap();
        assert_eq!(rx.try_recv().unwrap(), OfferDecision::Rejected);

        let err = board.resolve_accept(trip, driver, || Ok(())).unwrap_err();
        assert!(matches!(err, DispatchError::OfferAlreadyTaken(_)));
    }

    #[test]
    fn expiry_defers_to_a_claimed_acceptance() {
        let board = OfferBoard::new();
        let trip = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let _rx = board.open(trip, driver, Utc::now());

        board.resolve_accept(trip, driver, || Ok(())).unwrap();
        assert!(!board.expire_if_unclaimed(trip, driver));
    }

    #[test]
    fn expiry_of_unclaimed_offer_skips_the_driver() {
        let board = OfferBoard::new();
        let trip = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let _rx = board.open(trip, driver, Utc::now());

        assert!(board.expire_if_unclaimed(trip, driver));
        let err = board.resolve_accept(trip, driver, || Ok(())).unwrap_err();
        assert!(matches!(err, DispatchError::OfferAlreadyTaken(_)));
    }

    #[test]
    fn cancel_notifies_the_waiting_dispatcher() {
        let board = OfferBoard::new();
        let trip = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let mut rx = board.open(trip, driver, Utc::now() + Duration::seconds(15));

        board.cancel(trip);
        assert_eq!(rx.try_recv().unwrap(), OfferDecision::TripCancelled);
        assert!(board.outstanding(trip).is_none());
    }
}
