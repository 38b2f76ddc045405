pub mod health;
pub mod metrics;
pub mod processing;
pub mod upload;
