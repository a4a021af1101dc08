//! surfstore-sync: reconciles a local directory with the surfstore services

pub mod engine;

pub use engine::{Reconciler, SyncReport};
