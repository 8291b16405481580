//! Logger setup for binaries embedding the relay.

/// Installs a colored `colog` logger at `level`.
///
/// Fails if another logger has already been installed for this process.
pub fn init_logging(level: log::LevelFilter) -> Result<(), String> {
    let mut clog = colog::default_builder();
    clog.filter(None, level);
    clog.try_init()
        .map_err(|err| format!("failed to install logger: {err}"))
}
