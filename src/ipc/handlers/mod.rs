pub mod analytics;
pub mod attendance;
pub mod backup_exchange;
pub mod core;
pub mod fees;
pub mod lookup;
pub mod revenue;
pub mod setup;
pub mod users;
