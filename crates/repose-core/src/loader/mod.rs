//! Row loaders

pub mod snapshot;

pub use snapshot::SnapshotLoader;
