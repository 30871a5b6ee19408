use uuid::Uuid;

use crate::error::DispatchError;
use crate::state::AppState;

pub async fn enqueue_trip(state: &AppState, trip_id: Uuid) -> Result<(), DispatchError> {
    state
        .trip_tx
        .send(trip_id)
        .await
        .map_err(|err| DispatchError::Internal(format!("trip queue send failed: {err}")))?;

    state.metrics.trips_in_queue.inc();
    Ok(())
}
