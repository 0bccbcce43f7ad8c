//! obsync-core: Shared primitives for the replicator
//!
//! Provides configuration loading, ignore-rule matching, MD5 hashing with a
//! metadata-keyed cache, hot-path tracking, and local-to-remote key mapping.

pub mod config;
pub mod hotset;
pub mod ignore;
pub mod keymap;
pub mod logging;
pub mod md5sum;

pub use config::{Config, SymlinkPolicy};
pub use hotset::HotSet;
pub use ignore::IgnoreMatcher;
pub use keymap::KeyMap;
pub use md5sum::Md5Cache;
