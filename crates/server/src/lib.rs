pub mod api;
pub mod auth;
pub mod catalog_factory;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gate;
pub mod guard;
pub mod lifecycle;
pub mod telemetry;
