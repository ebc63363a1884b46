//! HTTP API handlers for fscore

pub mod evidence;
pub mod health;
pub mod pipeline;
pub mod scores;

pub use evidence::evidence_routes;
pub use health::health_routes;
pub use pipeline::pipeline_routes;
pub use scores::score_routes;
