pub mod auth;
pub mod backup;
pub mod contents;
pub mod core;
pub mod evaluations;
pub mod exercises;
pub mod topics;
pub mod units;
pub mod users;
