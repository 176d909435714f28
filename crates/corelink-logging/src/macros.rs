//! ---
//! cl_section: "03-logging-metrics"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Structured logging helpers for bridge components."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---

/// Shared expansion for the level-specific macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __link_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx: &$crate::LogContext = &$ctx;
        tracing::event!(
            $level,
            endpoint = ctx.endpoint.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            correlation_id = ctx.correlation_id.unwrap_or_default(),
            topic = ctx.topic.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with bridge context.
#[macro_export]
macro_rules! link_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__link_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__link_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with bridge context.
#[macro_export]
macro_rules! link_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__link_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__link_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with bridge context.
#[macro_export]
macro_rules! link_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__link_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__link_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with bridge context.
#[macro_export]
macro_rules! link_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__link_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__link_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
