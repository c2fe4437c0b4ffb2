//! Metrics instrumentation for sonata.
//!
//! Events are recorded through the `metrics` facade. The binary does not
//! install a recorder, so they are no-ops unless an embedding application
//! installs one.

pub mod events;

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding metric.
///
/// # Example
///
/// ```ignore
/// use sonata::metrics::events::RowsWritten;
///
/// emit!(RowsWritten { table: "songs", count: 100 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
