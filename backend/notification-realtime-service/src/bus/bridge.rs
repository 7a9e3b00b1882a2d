//! Event Bus Bridge
//!
//! Subscribes to the notification channel and forwards every event to the
//! live connections of its recipient. A bad payload only drops that message;
//! a lost subscription is re-established with capped backoff until shutdown.

use async_trait::async_trait;
use event_schema::NotificationEvent;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use rand::Rng;
use redis::{aio::PubSub, Client};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::metrics;
use crate::websocket::registry::{ConnectionRegistry, DeliveryReport};

const RESUBSCRIBE_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Raw payload as read off the bus
pub type BusPayload = Result<String, BusError>;

/// Opens subscriptions on the bus
#[async_trait]
pub trait BusSubscriber: Send + Sync {
    type Subscription: BusSubscription;

    async fn subscribe(&self, channel: &str) -> Result<Self::Subscription, BusError>;
}

/// One live subscription
#[async_trait]
pub trait BusSubscription: Send {
    /// Payload stream; ends when the bus connection is lost
    fn messages(&mut self) -> BoxStream<'_, BusPayload>;

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), BusError>;
}

#[async_trait]
impl BusSubscriber for Client {
    type Subscription = PubSub;

    async fn subscribe(&self, channel: &str) -> Result<PubSub, BusError> {
        let mut pubsub = self.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }
}

#[async_trait]
impl BusSubscription for PubSub {
    fn messages(&mut self) -> BoxStream<'_, BusPayload> {
        self.on_message()
            .map(|msg| msg.get_payload::<String>().map_err(BusError::from))
            .boxed()
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), BusError> {
        PubSub::unsubscribe(self, channel).await?;
        Ok(())
    }
}

enum PumpExit {
    Shutdown,
    StreamEnded,
}

#[derive(Clone)]
pub struct EventBusBridge {
    registry: ConnectionRegistry,
    channel: String,
}

impl EventBusBridge {
    pub fn new(registry: ConnectionRegistry, channel: impl Into<String>) -> Self {
        Self {
            registry,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Open a dedicated subscription to the bridge's channel
    pub async fn subscribe<B: BusSubscriber>(&self, bus: &B) -> Result<B::Subscription, BusError> {
        let subscription = bus.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Subscribed to notification bus");
        Ok(subscription)
    }

    /// Route one raw bus payload to its recipient's connections
    pub async fn dispatch(&self, payload: &str) -> Result<DeliveryReport, BusError> {
        let event = NotificationEvent::from_json(payload)?;
        let user_id = event.user_id.clone();
        let kind = event.kind.clone();
        let frame = event.into_server_message()?;

        let report = self.registry.send_to(&user_id, frame).await;
        debug!(
            user_id = %user_id,
            kind = %kind,
            delivered = report.delivered,
            skipped = report.skipped.len(),
            "Bus event dispatched"
        );
        Ok(report)
    }

    /// Dispatch, logging and dropping anything that fails
    pub async fn handle_payload(&self, payload: &str) {
        match self.dispatch(payload).await {
            Ok(report) if report.delivered > 0 => metrics::observe_bus_message("delivered"),
            Ok(_) => metrics::observe_bus_message("no_recipient"),
            Err(e) => {
                metrics::observe_bus_message("dropped");
                warn!(channel = %self.channel, error = %e, "Dropping bus message");
            }
        }
    }

    /// Consume the subscription until `shutdown` flips to true
    ///
    /// `subscription` is the one opened at startup; if its stream ends the
    /// bridge resubscribes through `bus`.
    pub async fn run<B: BusSubscriber>(
        self,
        bus: B,
        subscription: B::Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut current = Some(subscription);
        let mut backoff = RESUBSCRIBE_INITIAL_BACKOFF;

        loop {
            let mut subscription = match current.take() {
                Some(subscription) => subscription,
                None => match self.subscribe(&bus).await {
                    Ok(subscription) => {
                        backoff = RESUBSCRIBE_INITIAL_BACKOFF;
                        subscription
                    }
                    Err(e) => {
                        warn!(
                            channel = %self.channel,
                            error = %e,
                            retry_in_ms = backoff.as_millis() as u64,
                            "Resubscribe failed"
                        );
                        if sleep_or_shutdown(jittered(backoff), &mut shutdown).await {
                            break;
                        }
                        backoff = (backoff * 2).min(RESUBSCRIBE_MAX_BACKOFF);
                        continue;
                    }
                },
            };

            match self.pump(&mut subscription, &mut shutdown).await {
                PumpExit::Shutdown => {
                    if let Err(e) = subscription.unsubscribe(&self.channel).await {
                        warn!(channel = %self.channel, error = %e, "Unsubscribe failed");
                    }
                    break;
                }
                PumpExit::StreamEnded => {
                    warn!(
                        channel = %self.channel,
                        error = %BusError::SubscriptionClosed,
                        "Bus subscription lost, resubscribing"
                    );
                }
            }
        }

        info!(channel = %self.channel, "Event bus bridge stopped");
    }

    async fn pump<S: BusSubscription>(
        &self,
        subscription: &mut S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PumpExit {
        if *shutdown.borrow() {
            return PumpExit::Shutdown;
        }

        let mut messages = subscription.messages();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return PumpExit::Shutdown;
                    }
                }
                msg = messages.next() => {
                    match msg {
                        Some(Ok(payload)) => self.handle_payload(&payload).await,
                        Some(Err(e)) => {
                            metrics::observe_bus_message("dropped");
                            warn!(channel = %self.channel, error = %e, "Unreadable bus payload");
                        }
                        None => return PumpExit::StreamEnded,
                    }
                }
            }
        }
    }
}

/// Spread reconnect attempts by +/-20%
fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    delay.mul_f64(factor)
}

/// Returns true when shutdown was requested while waiting
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
