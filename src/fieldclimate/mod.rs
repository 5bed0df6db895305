pub mod auth;
pub mod client;
pub mod models;
pub mod transport;

pub use client::{FieldClimateClient, StationApi};
