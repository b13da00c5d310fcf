//! Disk usage analysis: a lazily aggregated file tree and a squarified
//! treemap laid out over terminal cells.

pub mod config;
pub mod crawler;
pub mod error;
pub mod extensions;
pub mod format;
pub mod logging;
pub mod snapshot;
pub mod tree;
pub mod treemap;
pub mod watch;

pub use error::{Error, Result};
pub use tree::{FileTree, NodeKind};
pub use treemap::{layout, CellRect, Tile};
