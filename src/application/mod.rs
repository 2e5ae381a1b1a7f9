pub mod audit;
pub mod auth;
pub mod error;
pub mod passwords;
pub mod repos;
pub mod sessions;
pub mod units;
