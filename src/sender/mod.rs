pub mod client;
pub mod payload;
pub mod replica;
pub mod stats;
pub mod strategy;
pub mod transport;

pub use client::{ClientConfig, ClientError, HttpClient, build_request};
pub use payload::{ContentEncoding, FlushReason, PayloadBody, PendingPayload};
pub use replica::ReplicaFanout;
pub use stats::{DeliverySnapshot, DeliveryStats};
pub use strategy::{Delivery, select_delivery};
pub use transport::{DeliveryMechanism, Transport, TransportSender};
