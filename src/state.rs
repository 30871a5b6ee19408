use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::collaborators::{
    InMemoryPaymentLedger, InMemoryUserDirectory, LoggingNotifier, NoPromotions, Notifier,
    PaymentLedger, PromotionService,
};
use crate::config::Config;
use crate::engine::offers::OfferBoard;
use crate::geo::GeoIndex;
use crate::models::offer::TripEvent;
use crate::models::trip::Trip;
use crate::observability::metrics::Metrics;
use crate::registry::DriverRegistry;

pub struct AppState {
    pub config: Config,
    pub trips: DashMap<Uuid, Trip>,
    // Passenger -> their open trip; the entry lock makes the
    // one-open-trip-per-passenger check-and-claim atomic.
    pub open_trips: DashMap<Uuid, Uuid>,
    pub registry: DriverRegistry,
    pub geo: GeoIndex,
    pub offers: OfferBoard,
    pub trip_tx: mpsc::Sender<Uuid>,
    pub trip_events_tx: broadcast::Sender<TripEvent>,
    pub metrics: Metrics,
    // Concrete so driver registration can seed eligibility records.
    pub user_directory: Arc<InMemoryUserDirectory>,
    pub payments: Arc<dyn PaymentLedger>,
    pub notifier: Arc<dyn Notifier>,
    pub promotions: Arc<dyn PromotionService>,
}

impl AppState {
    pub fn new(config: Config) -> (Self, mpsc::Receiver<Uuid>) {
        Self::with_collaborators(
            config,
            Arc::new(InMemoryPaymentLedger::new()),
            Arc::new(LoggingNotifier),
            Arc::new(NoPromotions),
        )
    }

    pub fn with_collaborators(
        config: Config,
        payments: Arc<dyn PaymentLedger>,
        notifier: Arc<dyn Notifier>,
        promotions: Arc<dyn PromotionService>,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (trip_tx, trip_rx) = mpsc::channel(config.trip_queue_size);
        let (trip_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        let user_directory = Arc::new(InMemoryUserDirectory::new());
        let registry = DriverRegistry::new(user_directory.clone(), config.freshness_threshold);

        (
            Self {
                trips: DashMap::new(),
                open_trips: DashMap::new(),
                registry,
                geo: GeoIndex::new(),
                offers: OfferBoard::new(),
                trip_tx,
                trip_events_tx,
                metrics: Metrics::new(),
                user_directory,
                payments,
                notifier,
                promotions,
                config,
            },
            trip_rx,
        )
    }
}
