use log::SetLoggerError;

/// Filter used when `RUST_LOG` is not set: this crate logs at info level, everything else
/// only warnings.
const DEFAULT_FILTER: &str = "warn,scorep_core=info";

/// Install `env_logger` as the logger of the measurement, unless the `builtin_env_logger`
/// feature is disabled. Fails if a logger is installed already.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(DEFAULT_FILTER),
            )
            .format_timestamp_micros()
            .try_init()
        } else {
            Ok(())
        }
    }
}
