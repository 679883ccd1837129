//! Structured progress events for the depot download cache.
//!
//! Cache operations report what they do as an ordered sequence of
//! [`Event`]s delivered through a lazy [`EventStream`]. Alongside the typed
//! stream, lifecycle milestones are logged through `tracing` using the
//! `emit_*!` macros in this crate, so a subscriber sees the same story in the
//! logs that a consumer sees in the stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use depot_events::{Event, EventStream};
//!
//! let stream: EventStream<MyError> = EventStream::new(|sink| async move {
//!     sink.emit(Event::CacheMiss { path: "/cache/files/ab".into() });
//!     Ok(())
//! });
//! let events = stream.collect_events().await?;
//! ```

pub mod event;
pub mod stream;

pub use event::Event;
pub use stream::{EventSink, EventStream};

// ============================================================================
// Emit Macros
// ============================================================================

/// Emit a cache hit log event.
///
/// # Example
/// ```rust,ignore
/// emit_cache_hit!("3af0...", path.display());
/// ```
#[macro_export]
macro_rules! emit_cache_hit {
    ($key:expr, $path:expr) => {
        ::tracing::info!(
            target: "depot::cache",
            event_type = "cache.hit",
            cache_key = %$key,
            path = %$path,
        )
    };
}

/// Emit a cache miss log event.
#[macro_export]
macro_rules! emit_cache_miss {
    ($key:expr, $path:expr) => {
        ::tracing::info!(
            target: "depot::cache",
            event_type = "cache.miss",
            cache_key = %$key,
            path = %$path,
        )
    };
}

/// Emit a cache busted log event (an invalid entry is being replaced).
#[macro_export]
macro_rules! emit_cache_busted {
    ($key:expr, $path:expr) => {
        ::tracing::warn!(
            target: "depot::cache",
            event_type = "cache.busted",
            cache_key = %$key,
            path = %$path,
        )
    };
}

/// Emit a cache entry published log event.
#[macro_export]
macro_rules! emit_cache_published {
    ($key:expr, $path:expr) => {
        ::tracing::info!(
            target: "depot::cache",
            event_type = "cache.published",
            cache_key = %$key,
            path = %$path,
        )
    };
}

/// Emit a fetch started log event.
///
/// # Example
/// ```rust,ignore
/// emit_fetch_started!("http", url);
/// ```
#[macro_export]
macro_rules! emit_fetch_started {
    ($kind:expr, $source:expr) => {
        ::tracing::info!(
            target: "depot::fetch",
            event_type = "fetch.started",
            kind = $kind,
            source = %$source,
        )
    };
}

/// Emit a fetch completed log event.
#[macro_export]
macro_rules! emit_fetch_completed {
    ($kind:expr, $source:expr, $duration_ms:expr) => {
        ::tracing::info!(
            target: "depot::fetch",
            event_type = "fetch.completed",
            kind = $kind,
            source = %$source,
            duration_ms = $duration_ms,
        )
    };
}

/// Emit a fetch failed log event.
#[macro_export]
macro_rules! emit_fetch_failed {
    ($kind:expr, $source:expr, $error:expr) => {
        ::tracing::warn!(
            target: "depot::fetch",
            event_type = "fetch.failed",
            kind = $kind,
            source = %$source,
            error = %$error,
        )
    };
}
