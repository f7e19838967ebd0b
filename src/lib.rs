//! Canopy - document level authorization
//!
//! Policies (roles, static permission maps, per-document grants) are resolved
//! against documents held in pluggable stores. The binary wires the library to
//! KDL policy files and a JSON seed of documents.

pub mod authz;
pub mod errors;
pub mod seed;
pub mod settings;
pub mod store;
