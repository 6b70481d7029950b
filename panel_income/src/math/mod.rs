pub mod metrics;
pub mod ridge;
pub mod scaler;
