/// Logs a structured line tagged with a component, pid and tid.
/// Usage:
/// ```rust
/// use log::Level;
/// tracehound::hound_log!(Level::Info, "service", "Service started");
/// tracehound::hound_log!(Level::Error, "config", "Config load failed: {}", "boom");
/// ```
/// Logs like:
/// [service][pid=4568][tid=ThreadId(3)] Service started
///
/// The timestamp and level are added by the `fern` formatter.
#[macro_export]
macro_rules! hound_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(
            $level,
            concat!(
                "[", $component, "]",    // component
                "[pid=", "{}", "]",      // pid
                "[tid=", "{:?}", "] ",   // tid
                $fmt                     // your message
            ),
            std::process::id(),
            std::thread::current().id()
            $(, $($arg)+)?
        );
    };
}

/// Collector-scoped variant of [`hound_log!`]: prefixes the collector id.
#[macro_export]
macro_rules! collector_log {
    ($level:expr, $id:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        $crate::hound_log!(
            $level,
            "collector",
            concat!("collector {}: ", $fmt),
            $id
            $(, $($arg)+)?
        );
    };
}
