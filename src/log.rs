// HPRO LOGGING
// SHORT CALL-SITE MACROS OVER tracing. TELEMETRY LINES DO NOT GO HERE:
// THEY ARE PRINTED TO STDOUT. THESE GO TO THE SUBSCRIBER (STDERR).

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { ::tracing::info!(target: "hpro", $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "hpro", $($arg)*) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "hpro", $($arg)*) };
}
