//! Utilities shared by the allocator, the substrates and the thread subsystems.

/// Address arithmetic on arena memory.
pub mod address;
/// Packed bit vector over page indices.
pub mod bitset;
/// Size constants.
pub mod constants;
/// Alignment and size conversions.
pub mod conversions;
/// The built-in logger.
pub mod logger;
/// Runtime options, read from `SCOREP_*` environment variables.
pub mod options;
/// Low-level helpers around the Rust allocator.
pub mod rust_util;

#[cfg(any(test, feature = "test_private"))]
pub mod test_util;

pub use self::address::Address;
