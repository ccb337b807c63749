//! Locations and thread team identity.

pub mod fork_join;
pub mod location;

pub use self::location::{Location, LocationType};
