pub mod config;
pub mod dispatch;
pub mod display;
pub mod errors;
pub mod history;
pub mod metrics_defs;
pub mod orchestrator;
pub mod reconciler;
pub mod record;
pub mod store;
pub mod validate;
