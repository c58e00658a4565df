//! Multi-tenant session registry for Waypost.
//!
//! The registry maps caller-chosen ids to live sessions, remembers which
//! one is the default, and keeps the data root in sync with memory.
//!
//! # Key types
//!
//! - [`Registry`]: create / get / delete / list sessions, load and save
//!   them, shut everything down
//! - [`RegistryConfig`]: data root, autosave interval, delete grace
//! - [`LoadReport`]: what a startup scan found
//!
//! # Lifecycle
//!
//! ```text
//!   Registry::new ──→ load_all ──→ (serve requests, autosave ticking) ──→ close
//! ```

mod autosave;
mod config;
mod error;
mod registry;

pub use config::{DEFAULT_DATA_DIR, RegistryConfig};
pub use error::RegistryError;
pub use registry::{LoadReport, Registry, validate_id};
