//! Event dispatch to the substrates.
//!
//! A substrate is a consumer of measurement events: the properties pseudo-substrate, tracing,
//! profiling, or a plugin. Every substrate registers plain function callbacks per event. The
//! callbacks of all substrates are packed into cache-aligned tables, one for recording and one
//! for when recording is disabled, plus a table of management callbacks for the lifecycle.
//!
//! Dispatching an event walks one row of the active table:
//!
//! ```
//! use scorep_core::substrates::*;
//!
//! let substrates = Substrates::early_initialize(None, None, vec![]);
//! substrates.dispatch(&EventData::new(SubstrateEvent::EnterRegion, 0, 42));
//! assert!(substrates.is_recording_enabled());
//! ```

mod aligned;
pub mod events;
pub mod management;
pub mod plugins;
pub mod properties;
pub mod table;

pub use self::aligned::CacheAligned;
pub use self::events::*;
pub use self::management::{BuiltinSubstrate, Substrates};
pub use self::plugins::{PluginRegistry, SubstratePlugin, SUBSTRATE_PLUGIN_VERSION};
