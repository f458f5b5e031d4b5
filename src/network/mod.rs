//! Network reachability
//!
//! `NetworkGate` turns a platform `ConnectivityMonitor` into a boolean
//! signal: a point-in-time check plus push subscriptions that see every
//! transition.

pub mod monitor;

pub use monitor::{ConnectivityMonitor, ManualMonitor, SysfsMonitor, Transport, TransportSet};

use monitor::ListenerId;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct NetworkGate {
    monitor: Arc<dyn ConnectivityMonitor>,
}

impl NetworkGate {
    pub fn new(monitor: Arc<dyn ConnectivityMonitor>) -> Self {
        Self { monitor }
    }

    pub fn is_reachable_now(&self) -> bool {
        self.monitor.snapshot().is_reachable()
    }

    /// Register for reachability transitions.
    ///
    /// The subscription starts at the actual state at the time of the call.
    pub fn subscribe(&self) -> ReachabilitySubscription {
        let (sender, mut receiver) = watch::channel(false);
        let sender = Arc::new(sender);

        // Register before sampling so no transition slips between the two
        let listener_sender = Arc::clone(&sender);
        let id = self.monitor.register(Box::new(move |transports| {
            let reachable = transports.is_reachable();
            listener_sender.send_if_modified(|current| {
                if *current == reachable {
                    false
                } else {
                    *current = reachable;
                    true
                }
            });
        }));

        sender.send_replace(self.monitor.snapshot().is_reachable());
        receiver.borrow_and_update();
        tracing::debug!(?id, "reachability subscription registered");

        ReachabilitySubscription {
            receiver,
            registration: Some((Arc::clone(&self.monitor), id)),
        }
    }
}

impl std::fmt::Debug for NetworkGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkGate")
            .field("reachable", &self.is_reachable_now())
            .finish()
    }
}

/// Live reachability signal.
///
/// Released by `unsubscribe` or on drop, whichever comes first; the
/// platform registration is removed exactly once.
pub struct ReachabilitySubscription {
    receiver: watch::Receiver<bool>,
    registration: Option<(Arc<dyn ConnectivityMonitor>, ListenerId)>,
}

impl ReachabilitySubscription {
    /// Latest known value
    pub fn is_reachable(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Independent receiver of the same signal
    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.receiver.clone()
    }

    /// Wait for the next transition. `None` once the subscription is released.
    pub async fn changed(&mut self) -> Option<bool> {
        if self.registration.is_none() {
            return None;
        }
        self.receiver.changed().await.ok()?;
        Some(*self.receiver.borrow_and_update())
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some((monitor, id)) = self.registration.take() {
            monitor.unregister(id);
            tracing::debug!(?id, "reachability subscription released");
        }
    }
}

impl Drop for ReachabilitySubscription {
    fn drop(&mut self) {
        self.release();
    }
}
