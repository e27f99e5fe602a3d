//! Network reachability monitoring
//!
//! [`ConnectivityMonitor`] polls a [`ReachabilityProbe`] and publishes the
//! current state through a `watch` channel. Subscribers only wake on
//! transitions (online to offline or back), never while the state persists.
//!
//! ```rust,ignore
//! let monitor = ConnectivityMonitor::new(Arc::new(probe), Duration::from_secs(5));
//! let handle = monitor.spawn(cancel.child_token());
//! let mut changes = monitor.subscribe();
//! while changes.changed().await.is_ok() {
//!     let online = *changes.borrow_and_update();
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Answers whether the remote side is currently reachable
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Reachable when a TCP connection to `host:port` succeeds in time
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// Probe the host of a service URL, defaulting the port from the scheme
    pub fn for_url(url: &str) -> Option<Self> {
        let url = Url::parse(url).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(format!("{host}:{port}"), Duration::from_secs(3)))
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await,
            Ok(Ok(_))
        )
    }
}

/// Probe for local-only mode: never reachable
pub struct NeverReachable;

#[async_trait]
impl ReachabilityProbe for NeverReachable {
    async fn is_reachable(&self) -> bool {
        false
    }
}

struct Inner {
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    state: watch::Sender<bool>,
}

/// Shared handle to the connectivity state
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Create a monitor that starts out offline
    pub fn new(probe: Arc<dyn ReachabilityProbe>, interval: Duration) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                probe,
                interval,
                state,
            }),
        }
    }

    /// Monitor that is never online
    pub fn offline() -> Self {
        Self::new(Arc::new(NeverReachable), Duration::from_secs(60))
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Receiver that wakes on each transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// Record a new state; returns true if it changed
    pub fn set_connected(&self, connected: bool) -> bool {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == connected {
                return false;
            }
            *current = connected;
            true
        });

        if changed {
            if connected {
                info!("Connectivity restored");
            } else {
                info!("Connectivity lost");
            }
        }
        changed
    }

    /// Probe once and record the result
    pub async fn check_now(&self) -> bool {
        let reachable = self.inner.probe.is_reachable().await;
        self.set_connected(reachable);
        reachable
    }

    /// Poll the probe until `cancel` fires
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            debug!(interval = ?monitor.inner.interval, "Connectivity monitor started");
            loop {
                monitor.check_now().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(monitor.inner.interval) => {}
                }
            }
            debug!("Connectivity monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Toggle(AtomicBool);

    #[async_trait]
    impl ReachabilityProbe for Toggle {
        async fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_transitions_only() {
        let monitor = ConnectivityMonitor::offline();
        assert!(!monitor.is_connected());

        assert!(!monitor.set_connected(false));
        assert!(monitor.set_connected(true));
        assert!(!monitor.set_connected(true));
        assert!(monitor.is_connected());
    }

    #[tokio::test]
    async fn test_subscribers_wake_on_change() {
        let monitor = ConnectivityMonitor::offline();
        let mut rx = monitor.subscribe();

        monitor.set_connected(false);
        assert!(!rx.has_changed().unwrap());

        monitor.set_connected(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_polling_follows_probe() {
        let probe = Arc::new(Toggle(AtomicBool::new(true)));
        let monitor = ConnectivityMonitor::new(probe.clone(), Duration::from_millis(10));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();
        let handle = monitor.spawn(cancel.clone());

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*rx.borrow_and_update());

        probe.0.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!*rx.borrow_and_update());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let probe = TcpProbe::new(address, Duration::from_secs(1));
        assert!(probe.is_reachable().await);

        drop(listener);
        let closed = TcpProbe::new(probe.address().to_string(), Duration::from_secs(1));
        assert!(!closed.is_reachable().await);
    }

    #[test]
    fn test_probe_for_url() {
        let probe = TcpProbe::for_url("https://api.example.com/v1").unwrap();
        assert_eq!(probe.address(), "api.example.com:443");
        assert!(TcpProbe::for_url("not a url").is_none());
    }
}
