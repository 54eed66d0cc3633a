//! View observation

pub mod watcher;

pub use watcher::{ExtentWatcher, ViewExtent};
