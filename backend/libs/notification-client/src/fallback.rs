//! Polling fallback
//!
//! Watches the live connection state. Once the connection has been anything
//! but open for `fallback_after`, the notification list is fetched every
//! `poll_interval` until the connection opens again.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::agent::ConnectionState;
use crate::api::NotificationApi;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::feed::SharedFeed;

enum Wait {
    Ready,
    Shutdown,
}

pub struct PollingFallback {
    api: Arc<dyn NotificationApi>,
    feed: SharedFeed,
    state: watch::Receiver<ConnectionState>,
    fallback_after: Duration,
    poll_interval: Duration,
    page_size: usize,
}

impl PollingFallback {
    pub fn new(
        api: Arc<dyn NotificationApi>,
        feed: SharedFeed,
        state: watch::Receiver<ConnectionState>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            api,
            feed,
            state,
            fallback_after: config.fallback_after,
            poll_interval: config.poll_interval,
            page_size: config.page_size,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let is_open = |s: ConnectionState| s == ConnectionState::Open;

        loop {
            if let Wait::Shutdown = wait_until(&mut self.state, &mut shutdown, |s| !is_open(s)).await {
                break;
            }

            let grace = tokio::time::sleep(self.fallback_after);
            tokio::select! {
                _ = grace => {}
                wait = wait_until(&mut self.state, &mut shutdown, is_open) => match wait {
                    Wait::Shutdown => break,
                    Wait::Ready => continue,
                }
            }

            info!(
                poll_interval_secs = self.poll_interval.as_secs(),
                "Live connection unavailable, polling notifications"
            );

            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.poll_once().await,
                    wait = wait_until(&mut self.state, &mut shutdown, is_open) => match wait {
                        Wait::Shutdown => return,
                        Wait::Ready => {
                            info!("Live connection restored, polling suspended");
                            break;
                        }
                    }
                }
            }
        }

        debug!("Polling fallback stopped");
    }

    async fn poll_once(&self) {
        match load_feed(self.api.as_ref(), &self.feed, self.page_size).await {
            Ok(count) => debug!(count, "Polled notifications"),
            Err(e) => warn!(error = %e, "Notification poll failed"),
        }
    }
}

/// Replace the feed with the newest `limit` notifications from the API
pub(crate) async fn load_feed(
    api: &dyn NotificationApi,
    feed: &SharedFeed,
    limit: usize,
) -> Result<usize, ClientError> {
    let items = api.fetch_notifications(limit).await?;
    let count = items.len();
    feed.write().await.replace_all(items);
    Ok(count)
}

async fn wait_until(
    state: &mut watch::Receiver<ConnectionState>,
    shutdown: &mut watch::Receiver<bool>,
    predicate: impl Fn(ConnectionState) -> bool,
) -> Wait {
    loop {
        if *shutdown.borrow() {
            return Wait::Shutdown;
        }
        let current = *state.borrow_and_update();
        if predicate(current) {
            return Wait::Ready;
        }

        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    return Wait::Shutdown;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return Wait::Shutdown;
                }
            }
        }
    }
}
