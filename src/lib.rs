// Crate root library declaration and module exports.
pub mod cli;
pub mod config;
pub mod context;
pub mod model;
pub mod reconcile;
pub mod runner;
pub mod sheet;
pub mod source;
pub mod storage;
pub mod store;
