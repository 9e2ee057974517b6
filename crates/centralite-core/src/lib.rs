//! # Centralite Core Library
//!
//! Serial protocol engine for Centralite lighting control panels.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Line framing and classification of panel output (19200 8N1, CR terminated)
//! - Command encoding for loads, scenes and switches
//! - Request/reply correlation with a bounded wait
//! - Per-device event subscriptions fed by a background reader
//! - Bitmap decoding for bulk load and switch queries
//! - A simulated panel for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use centralite_core::prelude::*;
//!
//! let link = LinkConfig { port_name: "/dev/ttyUSB0".into(), ..Default::default() };
//! let engine = ProtocolEngine::open_serial(&link, EngineConfig::default())?;
//!
//! engine.subscribe_pressed(44, |event| {
//!     println!("{:?}", event);
//!     Ok(())
//! });
//! engine.activate_load(7)?;
//! let level = engine.query_load_level(7)?;
//! ```

pub mod config;
pub mod demo;
pub mod engine;
pub mod events;
pub mod levels;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DeviceRoster, EngineConfig, LinkConfig, PanelConfig};
    pub use crate::demo::SimulatedPanel;
    pub use crate::engine::ProtocolEngine;
    pub use crate::events::{EventBus, EventKey, PanelEvent, Subscription};
    pub use crate::protocol::{Command, DeviceStates, ProtocolError, SceneDirection};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
