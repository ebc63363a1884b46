//! Scoring service implementations

pub mod http_service;

pub use http_service::HttpScoringService;
