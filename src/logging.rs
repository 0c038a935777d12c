//! Logging setup
//!
//! Everything logs through `tracing`. On Android the `link_*!` macros also
//! mirror each message to `log` so it reaches logcat via `android_logger`.

#[cfg(feature = "android")]
macro_rules! link_info {
    ($($arg:tt)*) => {{
        tracing::info!($($arg)*);
        log::info!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! link_info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

#[cfg(feature = "android")]
macro_rules! link_debug {
    ($($arg:tt)*) => {{
        tracing::debug!($($arg)*);
        log::debug!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! link_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(feature = "android")]
macro_rules! link_warn {
    ($($arg:tt)*) => {{
        tracing::warn!($($arg)*);
        log::warn!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! link_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(feature = "android")]
macro_rules! link_error {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        log::error!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! link_error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[cfg(feature = "android")]
macro_rules! link_trace {
    ($($arg:tt)*) => {{
        tracing::trace!($($arg)*);
        log::trace!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! link_trace {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

/// Map a config string to a tracing level, defaulting to INFO
pub fn parse_log_level(level: Option<&str>) -> tracing::Level {
    match level.map(|l| l.to_ascii_lowercase()).as_deref() {
        Some("trace") => tracing::Level::TRACE,
        Some("debug") => tracing::Level::DEBUG,
        Some("info") => tracing::Level::INFO,
        Some("warn") => tracing::Level::WARN,
        Some("error") => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Install the global subscriber. Safe to call more than once.
pub fn init_logging(level: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_log_level(level))
        .with_thread_names(true)
        .try_init();

    #[cfg(feature = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("MicrobitLink"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level(Some("DEBUG")), tracing::Level::DEBUG);
        assert_eq!(parse_log_level(Some("warn")), tracing::Level::WARN);
        assert_eq!(parse_log_level(Some("verbose")), tracing::Level::INFO);
        assert_eq!(parse_log_level(None), tracing::Level::INFO);
    }
}
