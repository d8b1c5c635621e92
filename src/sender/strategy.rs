use crate::domain::PageLifecycle;

/// Delivery mechanism chosen for a single payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Fire-and-forget, unload-safe, size-capped.
    Beacon,
    /// Asynchronous request whose failure is observed and reported.
    Request,
}

/// Beacons are only worth their size ceiling when the page may be torn down
/// before an async request settles.
pub fn select_delivery(size: usize, lifecycle: PageLifecycle, beacon_bytes_limit: usize) -> Delivery {
    if lifecycle.is_terminating() && size <= beacon_bytes_limit {
        Delivery::Beacon
    } else {
        Delivery::Request
    }
}
