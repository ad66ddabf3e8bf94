//! Fiat price of the native token.
//!
//! A [`PricePoller`] asks a [`PriceSource`] on an interval and writes the
//! answer to `state.price`, where send-calls estimates pick it up.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::context::Teardown;
use crate::error::Error;
use crate::store::Store;

/// Where the USD price of the native token comes from.
pub trait PriceSource: Send + Sync {
    /// Current price, `None` if unknown.
    fn fetch(&self) -> BoxFuture<'_, Result<Option<f64>, Error>>;
}

/// A fixed price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticPrice(pub f64);

impl PriceSource for StaticPrice {
    fn fetch(&self) -> BoxFuture<'_, Result<Option<f64>, Error>> {
        Box::pin(async move { Ok(Some(self.0)) })
    }
}

/// Refreshes `state.price` periodically.
pub struct PricePoller {
    source: Arc<dyn PriceSource>,
    interval: Duration,
}

impl PricePoller {
    pub fn new(source: Arc<dyn PriceSource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Poll until the returned [`Teardown`] is dropped. The first poll happens
    /// right away.
    pub fn spawn(self, store: Arc<Store>) -> Teardown {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.source.fetch().await {
                    Ok(price) => {
                        debug!(?price, "price updated");
                        store.update(|state| state.price = price);
                    }
                    // keep the last known price
                    Err(err) => warn!(error = %err, "price fetch failed"),
                }
            }
        });
        Teardown::noop().task(task)
    }
}

impl std::fmt::Debug for PricePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricePoller")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
