use crate::util::constants::*;
use std::default::Default;
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// How much memory statistics to report at the end of a measurement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MemoryStatsMode {
    /// No statistics.
    None,
    /// One summary per memory type, summed over all locations.
    Aggregated,
    /// One entry per location and memory type.
    Full,
}

/// A size in bytes.
///
/// The format is a decimal number, optionally followed by a binary unit:
/// ```text
/// <size> ::= <digits> | <digits> ("k" | "K" | "m" | "M" | "g" | "G") ["b" | "B"]
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemorySize(pub usize);

impl MemorySize {
    pub fn bytes(self) -> usize {
        self.0
    }
}

impl FromStr for MemorySize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_suffix('b')
            .or_else(|| s.strip_suffix('B'))
            .unwrap_or(s);
        let (digits, shift) = match s.chars().last() {
            Some('k' | 'K') => (&s[..s.len() - 1], LOG_BYTES_IN_KBYTE),
            Some('m' | 'M') => (&s[..s.len() - 1], LOG_BYTES_IN_MBYTE),
            Some('g' | 'G') => (&s[..s.len() - 1], LOG_BYTES_IN_GBYTE),
            _ => (s, 0),
        };
        let value: usize = digits
            .trim()
            .parse()
            .map_err(|_| format!("Failed to parse memory size {:?}", s))?;
        value
            .checked_mul(1 << shift)
            .map(MemorySize)
            .ok_or_else(|| format!("Memory size {:?} overflows", s))
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names of substrate plugins to load, in load order.
///
/// The format is a comma separated list. Empty entries and repeated names are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginList {
    pub names: Vec<String>,
}

impl PluginList {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl FromStr for PluginList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut names: Vec<String> = vec![];
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        Ok(PluginList { names })
    }
}

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option from its snake case name and a string value. Returns whether the
            /// value was taken.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by the embedder) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            eprintln!("Warn: unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        eprintln!("Warn: unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}={:?} ignored", s, val);
                        false
                    }
                }
            }

            /// All options with their defaults, ignoring the environment.
            pub fn defaults() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Self::defaults();

                // If we have env vars that start with SCOREP_ and match any option (such as SCOREP_TOTAL_MEMORY),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "SCOREP_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}
options! {
    // Total memory of the measurement allocator. Truncated to a multiple of the page size.
    total_memory:             MemorySize      [|v: &MemorySize| v.0 > 0] = MemorySize(DEFAULT_TOTAL_MEMORY),
    // Page size of the measurement allocator. Rounded up to a power of two.
    page_size:                MemorySize      [|v: &MemorySize| v.0 > 0] = MemorySize(DEFAULT_PAGE_SIZE),
    // Register the tracing substrate.
    enable_tracing:           bool            [always_valid] = false,
    // Register the profiling substrate.
    enable_profiling:         bool            [always_valid] = true,
    // Comma separated substrate plugin names
    substrate_plugins:        PluginList      [always_valid] = PluginList::default(),
    // Memory statistics reported at finalization
    development_memory_stats: MemoryStatsMode [always_valid] = MemoryStatsMode::None,
    // Buckets in each location's thread team table
    team_table_buckets:       usize           [|v: &usize| v.is_power_of_two()] = DEFAULT_TEAM_TABLE_BUCKETS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::options::Options;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn no_env_var() {
        serial_test(|| {
            let options = Options::default();
            assert_eq!(options.total_memory, MemorySize(DEFAULT_TOTAL_MEMORY));
            assert_eq!(options.page_size, MemorySize(DEFAULT_PAGE_SIZE));
            assert!(!options.enable_tracing);
            assert!(options.enable_profiling);
            assert!(options.substrate_plugins.is_empty());
        })
    }

    #[test]
    fn with_valid_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SCOREP_TOTAL_MEMORY", "4096k");

                    let options = Options::default();
                    assert_eq!(options.total_memory, MemorySize(4 * BYTES_IN_MBYTE));
                },
                || {
                    std::env::remove_var("SCOREP_TOTAL_MEMORY");
                },
            )
        })
    }

    #[test]
    fn with_multiple_valid_env_vars() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SCOREP_PAGE_SIZE", "512");
                    std::env::set_var("SCOREP_ENABLE_TRACING", "true");
                    std::env::set_var("SCOREP_DEVELOPMENT_MEMORY_STATS", "Full");

                    let options = Options::default();
                    assert_eq!(options.page_size, MemorySize(512));
                    assert!(options.enable_tracing);
                    assert_eq!(options.development_memory_stats, MemoryStatsMode::Full);
                },
                || {
                    std::env::remove_var("SCOREP_PAGE_SIZE");
                    std::env::remove_var("SCOREP_ENABLE_TRACING");
                    std::env::remove_var("SCOREP_DEVELOPMENT_MEMORY_STATS");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_value() {
        serial_test(|| {
            with_cleanup(
                || {
                    // cannot parse the value, so use the default value
                    std::env::set_var("SCOREP_TOTAL_MEMORY", "abc");
                    // parses, but is not a power of two
                    std::env::set_var("SCOREP_TEAM_TABLE_BUCKETS", "100");

                    let options = Options::default();
                    assert_eq!(options.total_memory, MemorySize(DEFAULT_TOTAL_MEMORY));
                    assert_eq!(options.team_table_buckets, DEFAULT_TEAM_TABLE_BUCKETS);
                },
                || {
                    std::env::remove_var("SCOREP_TOTAL_MEMORY");
                    std::env::remove_var("SCOREP_TEAM_TABLE_BUCKETS");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_key() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SCOREP_ABC", "42");

                    let options = Options::default();
                    assert_eq!(options.total_memory, MemorySize(DEFAULT_TOTAL_MEMORY));
                },
                || {
                    std::env::remove_var("SCOREP_ABC");
                },
            )
        })
    }

    #[test]
    fn plugin_list_from_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SCOREP_SUBSTRATE_PLUGINS", "foo,,bar,foo");

                    let options = Options::default();
                    assert_eq!(
                        options.substrate_plugins.iter().collect::<Vec<_>>(),
                        vec!["foo", "bar"]
                    );
                },
                || {
                    std::env::remove_var("SCOREP_SUBSTRATE_PLUGINS");
                },
            )
        })
    }

    #[test]
    fn set_from_str() {
        let mut options = Options::defaults();
        assert!(options.set_from_str("page_size", "1m"));
        assert_eq!(options.page_size, MemorySize(BYTES_IN_MBYTE));
        assert!(!options.set_from_str("page_size", "0"));
        assert_eq!(options.page_size, MemorySize(BYTES_IN_MBYTE));
        assert!(!options.set_from_str("no_such_option", "1"));
    }

    #[test]
    fn memory_size_units() {
        assert_eq!("16000k".parse::<MemorySize>(), Ok(MemorySize(16000 * 1024)));
        assert_eq!("2M".parse::<MemorySize>(), Ok(MemorySize(2 << 20)));
        assert_eq!("1GB".parse::<MemorySize>(), Ok(MemorySize(1 << 30)));
        assert_eq!(" 42 ".parse::<MemorySize>(), Ok(MemorySize(42)));
        assert!("k".parse::<MemorySize>().is_err());
        assert!("-1".parse::<MemorySize>().is_err());
    }
}
