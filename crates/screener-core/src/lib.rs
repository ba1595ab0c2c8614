pub mod config;
pub mod error;
pub mod rate_limit;
pub mod stats;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use rate_limit::RateLimiter;
pub use traits::*;
pub use types::*;
