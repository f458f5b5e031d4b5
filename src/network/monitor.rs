use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Kind of link carrying the default route
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Transport {
    Wifi,
    Cellular,
    Ethernet,
    Vpn,
    Other,
}

/// Transports currently up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportSet(BTreeSet<Transport>);

impl TransportSet {
    pub fn new(transports: impl IntoIterator<Item = Transport>) -> Self {
        Self(transports.into_iter().collect())
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, transport: Transport) -> bool {
        self.0.contains(&transport)
    }

    /// Only Wi-Fi and cellular count; ethernet, VPN and the rest are ignored
    pub fn is_reachable(&self) -> bool {
        self.contains(Transport::Wifi) || self.contains(Transport::Cellular)
    }

    pub fn iter(&self) -> impl Iterator<Item = Transport> + '_ {
        self.0.iter().copied()
    }
}

pub type Listener = Box<dyn Fn(TransportSet) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Platform connectivity registration.
///
/// `register` hands back an id that must be passed to `unregister` exactly
/// once to stop callbacks and free the registration.
pub trait ConnectivityMonitor: Send + Sync {
    /// Point-in-time view of the current transports
    fn snapshot(&self) -> TransportSet;

    fn register(&self, listener: Listener) -> ListenerId;

    /// Returns false when the id was not registered
    fn unregister(&self, id: ListenerId) -> bool;
}

/// Listener bookkeeping shared by the monitors
#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn Fn(TransportSet) + Send + Sync>)>>,
}

impl ListenerRegistry {
    fn register(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::from(listener)));
        }
        id
    }

    fn unregister(&self, id: ListenerId) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Call every listener outside the lock so a listener may unregister itself
    fn notify(&self, transports: &TransportSet) {
        let snapshot: Vec<_> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(transports.clone());
        }
    }
}

/// Monitor driven by the host application (or a test) pushing transitions
#[derive(Default)]
pub struct ManualMonitor {
    current: Mutex<TransportSet>,
    listeners: ListenerRegistry,
}

impl ManualMonitor {
    pub fn new(initial: TransportSet) -> Self {
        Self {
            current: Mutex::new(initial),
            listeners: ListenerRegistry::default(),
        }
    }

    /// Wi-Fi when `reachable`, nothing otherwise
    pub fn reachable(reachable: bool) -> Self {
        Self::new(Self::transports_for(reachable))
    }

    fn transports_for(reachable: bool) -> TransportSet {
        if reachable {
            TransportSet::new([Transport::Wifi])
        } else {
            TransportSet::none()
        }
    }

    /// Replace the current transports, notifying listeners when they change
    pub fn set_transports(&self, transports: TransportSet) {
        let changed = match self.current.lock() {
            Ok(mut current) if *current != transports => {
                *current = transports.clone();
                true
            }
            _ => false,
        };
        if changed {
            tracing::debug!(reachable = transports.is_reachable(), "connectivity changed");
            self.listeners.notify(&transports);
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.set_transports(Self::transports_for(reachable));
    }

    /// Live registrations; zero once every subscriber has been released
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl ConnectivityMonitor for ManualMonitor {
    fn snapshot(&self) -> TransportSet {
        self.current.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn register(&self, listener: Listener) -> ListenerId {
        self.listeners.register(listener)
    }

    fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }
}

/// Linux monitor reading interface state from `/sys/class/net`.
///
/// Interfaces count only when their `operstate` is `up`. Names decide the
/// transport: `wl*` is Wi-Fi, `ww*` and `rmnet*` are cellular.
pub struct SysfsMonitor {
    root: PathBuf,
    current: Mutex<TransportSet>,
    listeners: ListenerRegistry,
    poller: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SysfsMonitor {
    pub const DEFAULT_ROOT: &'static str = "/sys/class/net";

    /// Start polling `root` every `interval`. Must be called inside a tokio runtime.
    pub fn spawn(root: impl Into<PathBuf>, interval: Duration) -> Arc<Self> {
        let root = root.into();
        let monitor = Arc::new(Self {
            current: Mutex::new(read_transports(&root)),
            root,
            listeners: ListenerRegistry::default(),
            poller: Mutex::new(None),
        });

        let weak = Arc::downgrade(&monitor);
        let handle = tokio::spawn(poll_loop(weak, interval));
        if let Ok(mut poller) = monitor.poller.lock() {
            *poller = Some(handle);
        }
        monitor
    }

    fn poll(&self) {
        let transports = read_transports(&self.root);
        let changed = match self.current.lock() {
            Ok(mut current) if *current != transports => {
                *current = transports.clone();
                true
            }
            _ => false,
        };
        if changed {
            tracing::info!(
                reachable = transports.is_reachable(),
                transports = ?transports.iter().collect::<Vec<_>>(),
                "🌐 connectivity changed"
            );
            self.listeners.notify(&transports);
        }
    }
}

async fn poll_loop(monitor: Weak<SysfsMonitor>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match monitor.upgrade() {
            Some(monitor) => monitor.poll(),
            None => break,
        }
    }
}

impl ConnectivityMonitor for SysfsMonitor {
    fn snapshot(&self) -> TransportSet {
        read_transports(&self.root)
    }

    fn register(&self, listener: Listener) -> ListenerId {
        self.listeners.register(listener)
    }

    fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }
}

impl Drop for SysfsMonitor {
    fn drop(&mut self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(handle) = poller.take() {
                handle.abort();
            }
        }
    }
}

fn classify(interface: &str) -> Option<Transport> {
    if interface == "lo" {
        return None;
    }
    let transport = if interface.starts_with("wl") {
        Transport::Wifi
    } else if interface.starts_with("ww") || interface.starts_with("rmnet") {
        Transport::Cellular
    } else if interface.starts_with("en") || interface.starts_with("eth") {
        Transport::Ethernet
    } else if ["tun", "tap", "wg", "ppp", "ipsec"]
        .iter()
        .any(|prefix| interface.starts_with(prefix))
    {
        Transport::Vpn
    } else {
        Transport::Other
    };
    Some(transport)
}

/// Unreadable roots and entries are treated as "no transport"
fn read_transports(root: &Path) -> TransportSet {
    let Ok(entries) = std::fs::read_dir(root) else {
        return TransportSet::none();
    };

    let up = entries.filter_map(|e| e.ok()).filter_map(|entry| {
        let name = entry.file_name().to_string_lossy().to_string();
        let state = std::fs::read_to_string(entry.path().join("operstate")).ok()?;
        if state.trim() == "up" {
            classify(&name)
        } else {
            None
        }
    });
    TransportSet::new(up)
}
