use tracing::Level;

/// Maps a configured `client.log_level` to a tracing level.
///
/// Unknown names fall back to `INFO`.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Installs the fmt subscriber for the client.
///
/// Each line carries the thread name. Dispatcher threads are named
/// `<dispatcher.thread_name_prefix>-<n>`, so handler warnings and panics can
/// be traced back to the dispatcher that raised them.
pub fn init(default_level: &str) {
    // a subscriber may already be installed by tests or the embedding application
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(default_level))
        .with_thread_names(true)
        .with_target(false)
        .try_init();
}
