//! FastPoints Engine Library
//!
//! Indexed, level-of-detail point and ellipse rendering for interactive map
//! views, with exact selection and debounced view-extent reporting.

pub mod config;
pub mod layer;
pub mod projection;
pub mod protocol;
pub mod render;
pub mod session;
pub mod view;

mod test_utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use layer::{Extent, LayerKind, PointLayer};
pub use protocol::{Command, Event};
pub use render::{Surface, Viewport};
pub use session::MapSession;
