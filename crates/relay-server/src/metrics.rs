//! Metric name constants.
//!
//! Recorded through the `metrics` facade; installing an exporter is up to the
//! embedding binary.

/// Connections attached total (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections detached total (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Registered connections on this process (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Messages persisted and dispatched total (counter).
pub const MESSAGES_SENT_TOTAL: &str = "relay_messages_sent_total";
/// Notifications written directly to a local connection (counter, labels: kind).
pub const LOCAL_DELIVERIES_TOTAL: &str = "relay_local_deliveries_total";
/// Envelopes published on the fanout channel (counter).
pub const BUS_PUBLISHES_TOTAL: &str = "relay_bus_publishes_total";
/// Failed fanout publishes (counter).
pub const BUS_PUBLISH_ERRORS_TOTAL: &str = "relay_bus_publish_errors_total";
/// Envelopes received from the bus and delivered here (counter).
pub const BUS_DELIVERIES_TOTAL: &str = "relay_bus_deliveries_total";
/// Envelopes received from the bus and dropped (counter, labels: reason).
pub const BUS_DROPS_TOTAL: &str = "relay_bus_drops_total";
/// Presence reads answered from the local registry after a backend error (counter).
pub const PRESENCE_FALLBACKS_TOTAL: &str = "relay_presence_fallbacks_total";
/// Failed presence writes (counter, labels: op).
pub const PRESENCE_WRITE_ERRORS_TOTAL: &str = "relay_presence_write_errors_total";
