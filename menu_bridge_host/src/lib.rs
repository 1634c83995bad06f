pub mod providers;
pub mod session;

pub use session::{run_session, SessionSummary};
