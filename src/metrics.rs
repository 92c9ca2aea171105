//! Prometheus counters for the notification hub. Each hub owns its own registry.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct HubMetrics {
    registry: Registry,
    pub connections: IntGauge,
    pub delivered: IntCounter,
    pub dropped_offline: IntCounter,
    pub dropped_intake: IntCounter,
    pub evictions: IntCounter,
}

impl HubMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let connections = IntGauge::new("hub_connections", "Live registered connection handles")?;
        let delivered = IntCounter::new(
            "hub_events_delivered_total",
            "Events placed in a connection mailbox",
        )?;
        let dropped_offline = IntCounter::new(
            "hub_events_dropped_offline_total",
            "Events dropped because the target user had no connection",
        )?;
        let dropped_intake = IntCounter::new(
            "hub_events_dropped_intake_total",
            "Events dropped because the dispatch queue was full",
        )?;
        let evictions = IntCounter::new(
            "hub_evictions_total",
            "Connections evicted for a full or closed mailbox",
        )?;

        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(delivered.clone()))?;
        registry.register(Box::new(dropped_offline.clone()))?;
        registry.register(Box::new(dropped_intake.clone()))?;
        registry.register(Box::new(evictions.clone()))?;

        Ok(Self {
            registry,
            connections,
            delivered,
            dropped_offline,
            dropped_intake,
            evictions,
        })
    }

    /// Text exposition format, as served on `/metrics`.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
