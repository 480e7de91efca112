pub mod handlers;
pub mod rate_limit;
pub mod server;

pub use handlers::{AppState, ChatError};
pub use rate_limit::RateLimiter;
pub use server::{build_router, run_server};
