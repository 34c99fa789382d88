// multiclerk application: configuration, the coordination event loop, the
// extension bridge adapter and usage analytics.

pub mod analytics;
pub mod app;
pub mod bridge;
pub mod config;
