pub mod core;
pub mod recap;
pub mod reports;
pub mod sheets;
