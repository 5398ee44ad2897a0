use env_logger::{Builder, Env};

/// Initialise the global logger. Defaults to `info`, overridable through `RUST_LOG`.
/// Calling it more than once is harmless.
pub fn init_logger() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
