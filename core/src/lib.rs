//! License chargeback core: reconciliation, costing, allocation and
//! forecasting over a shared entity store.

pub mod allocation;
pub mod allocation_stage;
pub mod calendar;
pub mod command;
pub mod config;
pub mod cost_stage;
pub mod demo;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod forecast_model;
pub mod forecast_stage;
pub mod ingest;
pub mod pipeline;
pub mod pricing;
pub mod reconciliation_stage;
pub mod rng;
pub mod similarity;
pub mod stage;
pub mod store;
pub mod types;
