mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use error::err;
pub use handlers::recap::auto_refresh_tick;
pub use handlers::reports::complete_export;
pub use router::handle_request;
pub use types::{AppState, LoopEvent, Request};
