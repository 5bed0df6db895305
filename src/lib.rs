//! fieldclimate-db - incremental collector for FieldClimate weather stations
//!
//! Pulls station, sensor and measurement data from the signed FieldClimate
//! API into a local SQLite store, and serves the store read-only over HTTP.

pub mod common;
pub mod config;
pub mod entity;
pub mod error;
pub mod fieldclimate;
pub mod routes;
pub mod services;
pub mod storage;
pub mod sync;
