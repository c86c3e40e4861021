// Library exports for testing
pub mod analysis;
pub mod charts;
pub mod config;
pub mod dasha;
pub mod errors;
pub mod geo;
pub mod models;
pub mod providers;
pub mod refine;
pub mod routes;
pub mod state;
pub mod svg;
