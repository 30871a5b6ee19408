pub mod dispatch;
pub mod fare;
pub mod offers;
pub mod queue;
pub mod state_machine;
