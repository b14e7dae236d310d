//! Connectivity probes.
//!
//! The check is advisory: it only decides whether a save starts. A flap
//! right after the check surfaces as an upload or record-write failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::ConnectivityProbe;

/// Fixed answer, switchable at runtime
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Probes a URL; any HTTP response counts as online
pub struct HttpConnectivity {
    probe_url: String,
    client: reqwest::Client,
}

impl HttpConnectivity {
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            probe_url: probe_url.into(),
            client,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivity {
    async fn is_online(&self) -> bool {
        match self.client.head(&self.probe_url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %self.probe_url, error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}
