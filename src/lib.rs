// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain layer (template engine)
pub mod cache;
pub mod render;
pub mod selection;
pub mod template;
pub mod tracker;

// Application layer
pub mod bulk;
