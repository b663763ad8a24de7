//! Relic core library exports

pub mod aggregate;
pub mod builder;
pub mod cache;
pub mod error;
pub mod failures;
pub mod gateway;
pub mod library;
pub mod model;
pub mod output;
pub mod overlay;
pub mod pipeline;
pub mod store;
pub mod walker;
