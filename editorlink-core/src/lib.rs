//! EditorLink Core Library
//!
//! This crate provides the core functionality for EditorLink:
//! - Single-flight coalescing of duplicate editor operations
//! - Busy marks that reject concurrent edits of one Blueprint
//! - Deterministic coalescing key derivation
//! - Action name routing
//! - Bridge configuration
//! - Client and editor plugin wire messages

pub mod action;
pub mod busy;
pub mod coalescer;
pub mod config;
pub mod error;
pub mod key;
pub mod path_utils;
pub mod protocol;

// Re-export commonly used types
pub use action::{normalize_action, Action, ActionRouter, CoalescePolicy};
pub use busy::{BusyGuard, BusySet};
pub use coalescer::{
    Coalescer, CoalescerStats, Flight, InFlightInfo, LeaderGuard, ResponseSink, Role, Waiter,
};
pub use config::{find_config_file, BridgeConfig, ConfigError, CONFIG_FILE_NAME};
pub use error::{CoalesceError, Outcome};
pub use key::CoalesceKey;
pub use path_utils::{join_asset_path, normalize_content_path, normalize_path};
pub use protocol::{AutomationRequest, AutomationResponse, PluginRequest, PluginResponse};
