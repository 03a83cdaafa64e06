pub mod api;
pub mod batch;
pub mod client;
pub mod gateway;
pub mod models;
pub mod store;

pub use batch::BatchOrchestrator;
pub use client::{AnalysisBackend, HttpAnalysisClient};
pub use gateway::AnalysisGateway;
pub use store::{SearchRepository, SearchStore};
