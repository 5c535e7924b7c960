//! rowkeeper: multi-tenant store for user-defined entities
//!
//! Administrators define entities (typed properties, native or EAV-stored);
//! tenant members create rows, share them and page through them.
//!
//! - `filters`: free-text/property/tag filters to a condition tree
//! - `permissions`: row visibility + grants to per-actor capabilities
//! - `pagination`: page/sort query state and navigation URLs
//! - `storage`: Sled-backed persistence with transactional grant replacement
//! - `rest`: Axum HTTP API

pub mod auth;
pub mod config;
pub mod error;
pub mod filters;
pub mod logging;
pub mod models;
pub mod pagination;
pub mod permissions;
pub mod rest;
pub mod storage;
