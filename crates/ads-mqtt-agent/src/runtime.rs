//! Agent runtime orchestration.

use crate::config::AgentConfig;
use ads_mqtt_client::{
    AdsClient, AdsError, ChangeEvent, ChangeKind, Inbound, MqttTransport, PublishOptions,
    SumReadResult, SymbolCache, SymbolVersionMonitor, Transport,
};
use ads_mqtt_proto::InfoPayload;
use anyhow::{Context, Result};
use rumqttc::{Event, EventLoop, Packet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Bytes of payload shown in debug topic logs.
const DEBUG_PREVIEW_LEN: usize = 64;

/// Signals from the MQTT event loop to the main loop.
#[derive(Debug)]
enum Signal {
    Connected,
    Liveness(bool),
}

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Run the agent's main loop.
    ///
    /// # Errors
    ///
    /// Returns error if the broker connection cannot be set up.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting agent runtime");

        let settings = self.config.mqtt_settings();
        let (transport, eventloop) =
            MqttTransport::new(&settings).context("Failed to create MQTT client")?;
        let client = AdsClient::new(
            transport.clone(),
            self.config.connection(),
            Arc::new(SymbolCache::new()),
        );

        tracing::info!(
            client_id = %settings.client_id,
            broker = %settings.broker_url,
            target = %client.config().target,
            layout = ?client.config().layout,
            "Bridge configured"
        );

        let (signals_tx, mut signals) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_events(
            eventloop,
            transport.clone(),
            client.clone(),
            self.config.debug_topics.clone(),
            signals_tx,
        ));

        let mut monitor = SymbolVersionMonitor::new();
        let mut monitor_tick = ticker(self.config.schedule.monitor_interval);
        let mut poll_tick = (!self.config.schedule.poll_groups.is_empty())
            .then(|| ticker(self.config.schedule.poll_interval));

        tracing::info!("Agent running, press Ctrl+C to stop");

        loop {
            tokio::select! {
                Some(signal) = signals.recv() => match signal {
                    Signal::Connected => self.on_connected(&client, &mut monitor).await,
                    Signal::Liveness(online) => {
                        if let Some(event) = monitor.observe_online(online) {
                            on_change(&client, &event).await;
                        }
                    }
                },

                _ = monitor_tick.tick(), if transport.is_connected() => {
                    if let Ok(Some(event)) = monitor.poll(&client).await {
                        on_change(&client, &event).await;
                    }
                }

                _ = next_tick(&mut poll_tick), if transport.is_connected() => {
                    match client.sum_read(&self.config.schedule.poll_groups).await {
                        Ok(Some(result)) => report(&result),
                        Ok(None) => {}
                        Err(AdsError::SymbolVersionChanged { .. }) => {
                            tracing::warn!("Handles invalidated by symbol version change");
                            reload(&client).await;
                        }
                        Err(e) => tracing::warn!(error = %e, "Cyclic sum read failed"),
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        match client.release_handles().await {
            Ok(0) => {}
            Ok(released) => tracing::info!(released, "Released sum read handles"),
            Err(e) => tracing::warn!(error = %e, "Handle release on shutdown failed"),
        }
        if let Err(e) = client.unsubscribe() {
            tracing::debug!(error = %e, "Unsubscribe on shutdown failed");
        }
        pump.abort();
        tracing::info!("Agent stopped");
        Ok(())
    }

    async fn on_connected(
        &self,
        client: &AdsClient<MqttTransport>,
        monitor: &mut SymbolVersionMonitor,
    ) {
        if let Err(e) = client.subscribe() {
            tracing::error!(error = %e, "Failed to subscribe to ADS topics");
            return;
        }
        for topic in &self.config.debug_topics {
            if let Err(e) = client.transport().subscribe(topic) {
                tracing::warn!(topic = %topic, error = %e, "Failed to subscribe to debug topic");
            }
        }

        let info = InfoPayload::new(&self.config.info_name, false).to_xml();
        let topic = client.config().local_info_topic();
        if let Err(e) = client
            .transport()
            .publish(&topic, info.into_bytes(), PublishOptions::retained())
        {
            tracing::warn!(topic = %topic, error = %e, "Failed to publish bridge info");
        }

        reload(client).await;
        if let Err(e) = monitor.restart(client).await {
            tracing::warn!(error = %e, "Monitor restart failed");
        }
    }
}

/// Poll the MQTT event loop, feeding deliveries to the client.
async fn pump_events(
    mut eventloop: EventLoop,
    transport: MqttTransport,
    client: AdsClient<MqttTransport>,
    debug_topics: Vec<String>,
    signals: mpsc::UnboundedSender<Signal>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                transport.set_connected(true);
                let _ = signals.send(Signal::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if debug_topics
                    .iter()
                    .any(|filter| rumqttc::matches(&publish.topic, filter))
                {
                    let preview = &publish.payload[..publish.payload.len().min(DEBUG_PREVIEW_LEN)];
                    tracing::info!(
                        topic = %publish.topic,
                        len = publish.payload.len(),
                        preview = %hex::encode(preview),
                        "Debug topic delivery"
                    );
                }
                if let Inbound::Liveness(Some(online)) =
                    client.handle_message(&publish.topic, &publish.payload)
                {
                    let _ = signals.send(Signal::Liveness(online));
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => transport.set_connected(false),
            Ok(_) => {}
            Err(e) => {
                transport.set_connected(false);
                tracing::error!(error = %e, "MQTT error");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

async fn on_change(client: &AdsClient<MqttTransport>, event: &ChangeEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        tracing::debug!(event = %json, "Change event");
    }
    match event.kind {
        ChangeKind::SymbolVersion { previous, current } => {
            tracing::info!(previous, current, "Reloading symbols after version change");
        }
        ChangeKind::CameOnline => tracing::info!("Reloading symbols after device came online"),
    }
    reload(client).await;
}

async fn reload(client: &AdsClient<MqttTransport>) {
    if let Err(e) = client.load_symbols().await {
        tracing::warn!(error = %e, "Symbol table load failed");
    }
}

fn report(result: &SumReadResult) {
    for (name, value) in result.values() {
        if let Ok(value) = value {
            tracing::info!(symbol = %name, value = %value.to_json(), "Value");
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending().await,
    }
}
