pub mod health;
pub mod poller;
pub mod telemetry;
