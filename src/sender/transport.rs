use super::payload::PendingPayload;
use super::strategy::{Delivery, select_delivery};
use crate::domain::PageState;
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[cfg(test)]
use mockall::automock;

/// Destination for flushed payloads. `send` never blocks and never reports
/// back: callers must not assume delivery.
#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync {
    fn send(&self, payload: PendingPayload);
}

/// One concrete way of putting a payload on the wire.
#[cfg_attr(test, automock)]
pub trait DeliveryMechanism: Send + Sync {
    fn deliver(&self, endpoint: &Url, payload: PendingPayload);
}

/// Sends to a single endpoint, picking beacon or request per payload from its
/// size and the current page lifecycle.
#[derive(Clone)]
pub struct TransportSender {
    endpoint: Url,
    beacon: Arc<dyn DeliveryMechanism>,
    request: Arc<dyn DeliveryMechanism>,
    beacon_bytes_limit: usize,
    page: PageState,
}

impl TransportSender {
    pub fn new(
        endpoint: Url,
        beacon: Arc<dyn DeliveryMechanism>,
        request: Arc<dyn DeliveryMechanism>,
        beacon_bytes_limit: usize,
        page: PageState,
    ) -> Self {
        Self {
            endpoint,
            beacon,
            request,
            beacon_bytes_limit,
            page,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Transport for TransportSender {
    fn send(&self, payload: PendingPayload) {
        let size = payload.size();
        let lifecycle = self.page.get();
        let delivery = select_delivery(size, lifecycle, self.beacon_bytes_limit);

        debug!(
            "Sending {} payload {} ({} bytes, reason: {}) via {:?}",
            payload.kind, payload.id, size, payload.reason, delivery
        );

        match delivery {
            Delivery::Beacon => self.beacon.deliver(&self.endpoint, payload),
            Delivery::Request => self.request.deliver(&self.endpoint, payload),
        }
    }
}

impl std::fmt::Debug for TransportSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSender")
            .field("endpoint", &self.endpoint.as_str())
            .field("beacon_bytes_limit", &self.beacon_bytes_limit)
            .field("page", &self.page.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PageLifecycle, PayloadKind};
    use crate::sender::payload::FlushReason;
    use bytes::Bytes;

    fn payload(size: usize) -> PendingPayload {
        PendingPayload::batch(
            PayloadKind::Logs,
            FlushReason::Timeout,
            Bytes::from(vec![b'x'; size]),
            None,
            1,
        )
    }

    fn sender(beacon: MockDeliveryMechanism, request: MockDeliveryMechanism, page: PageState) -> TransportSender {
        TransportSender::new(
            Url::parse("http://collector.local/v1/input").unwrap(),
            Arc::new(beacon),
            Arc::new(request),
            64,
            page,
        )
    }

    #[test]
    fn test_active_page_sends_requests() {
        let mut beacon = MockDeliveryMechanism::new();
        beacon.expect_deliver().never();
        let mut request = MockDeliveryMechanism::new();
        request
            .expect_deliver()
            .withf(|endpoint, payload| endpoint.path() == "/v1/input" && payload.size() == 10)
            .times(1)
            .return_const(());

        sender(beacon, request, PageState::new()).send(payload(10));
    }

    #[test]
    fn test_unloading_page_sends_small_payloads_as_beacons() {
        let page = PageState::new();
        page.set(PageLifecycle::Unloading);

        let mut beacon = MockDeliveryMechanism::new();
        beacon.expect_deliver().times(1).return_const(());
        let mut request = MockDeliveryMechanism::new();
        request
            .expect_deliver()
            .withf(|_, payload| payload.size() == 65)
            .times(1)
            .return_const(());

        let sender = sender(beacon, request, page);
        sender.send(payload(64));
        sender.send(payload(65));
    }
}
