//! # Waypost
//!
//! A multi-tenant gateway for a messaging network. Many independent
//! identities ("sessions") live in one process; each is paired by QR
//! challenge, kept connected, persisted across restarts and driven through
//! a small set of operations.
//!
//! Waypost itself never speaks the network's wire protocol. A protocol
//! engine does, behind the [`Engine`] / [`EngineFactory`] traits; the
//! `loopback` feature ships an in-memory engine for tests and demos.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use waypost::prelude::*;
//!
//! waypost::init_logging("info");
//! let config = GatewayConfig::load(None).await?;
//! let registry = Registry::new(config.registry_config(), my_engine_factory);
//! registry.load_all().await?;
//!
//! let work = registry.create("work").await?;
//! let code = work.generate_qr().await?;   // show this as a QR code
//! // ... user scans ...
//! registry.get("").await?.send_message("+6281234", "hello").await?;
//!
//! registry.close().await;
//! ```

mod config;
mod error;
mod logging;

pub use config::{ConfigError, GatewayConfig};
pub use error::WaypostError;
pub use logging::init_logging;

pub use waypost_engine as engine;
pub use waypost_protocol as protocol;
pub use waypost_registry as registry;
pub use waypost_session as session;
pub use waypost_store as store;

/// Everything needed to run a registry, in one import.
pub mod prelude {
    pub use crate::{GatewayConfig, WaypostError, init_logging};

    pub use waypost_engine::{ChallengeEvent, Engine, EngineError, EngineEvent, EngineFactory};
    #[cfg(feature = "loopback")]
    pub use waypost_engine::{LoopbackEngine, LoopbackFactory, LoopbackHandle};
    pub use waypost_protocol::{Address, SessionSnapshot, SessionStatus, normalize_recipient};
    pub use waypost_registry::{LoadReport, Registry, RegistryConfig, RegistryError};
    pub use waypost_session::{Session, SessionConfig, SessionError};
    pub use waypost_store::{SessionStore, StoreError};
}
