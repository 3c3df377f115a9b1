pub(crate) mod health;
pub mod recognize;
pub(crate) mod stats;

pub use health::health_check;
pub use stats::get_stats;
