//! # Mask Annotation Store & Compositor
//!
//! Backend pieces of a point-prompt segmentation annotation tool: durable,
//! ordered mask collections per (image, query) pair, an append-only review
//! journal per chunk, and colored overlay rendering for previews.
//!
//! ## Core Features
//!
//! - **Mask Store**: crash-safe per-namespace mask files with an ordered,
//!   duplicate-free index that is replaced atomically on every change
//! - **Review Journal**: JSON-lines log of done/skip decisions replayed into
//!   the latest status per item
//! - **Compositor**: hue-partitioned colors and "over" alpha compositing of
//!   one or many masks, with thumbnail downscaling
//! - **Segmenter trait**: the seam for whichever backend produces masks
//! - **MCP server**: every coordinator operation exposed as a tool
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mask::{Coordinator, CompositorConfig};
//!
//! let coordinator = Coordinator::open("./data", CompositorConfig::default());
//! coordinator.register_image("cat.png", &std::fs::read("cat.png")?)?;
//!
//! let id = coordinator.save_mask("cat.png", 7, &std::fs::read("mask.png")?)?;
//! let listing = coordinator.list_masks("cat.png", 7)?;
//! assert_eq!(listing.ids(), vec![id]);
//!
//! coordinator.log_action(5, 0, "cat.png", 7, "done")?;
//! let status = coordinator.status(5)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Core modules
pub mod error;
pub mod types;
pub mod traits;
pub mod io;
pub mod render;
pub mod store;
pub mod journal;
pub mod locks;
pub mod coordinator;
pub mod mcp;

// Re-exports for convenience
pub use error::{MaskError, Result};
pub use types::*;
pub use traits::Segmenter;
pub use render::{Compositor, CompositorConfig, combined_overlay, distinct_colors, single_overlay};
pub use store::{MaskIndex, MaskStore};
pub use journal::ReviewJournal;
pub use coordinator::{AnnotationCommand, CommandOutput, Coordinator, MaskListing, MaskThumbnail, Prediction};
