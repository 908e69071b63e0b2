pub mod auth;
pub mod callback_gate;
pub mod request_logger;

pub use auth::AuthenticatedAccount;
pub use callback_gate::{CallbackGateLayer, GateRejection};
