pub mod api;
pub mod app;
pub mod channels;
pub mod config;
pub mod dataset;
pub mod db;
pub mod ingest;
pub mod services;
