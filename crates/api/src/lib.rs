pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod queues;
pub mod routes;
pub mod workers;
