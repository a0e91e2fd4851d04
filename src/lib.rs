pub mod canonical;
pub mod classify;
pub mod config;
pub mod crawler;
pub mod details;
pub mod download;
pub mod embedded;
mod error;
pub mod eventlog;
pub mod media;
pub mod merge;
pub mod models;
pub mod paths;
pub mod pipeline;
pub mod session;
pub mod srcset;
pub mod store;
pub mod webdriver;

pub use error::{HarvestError, Result};
