//! Network state observer.
//!
//! The observer is the only writer of the connectivity flag. Every flip
//! updates the flag, closes or opens the transport's offline gate, notifies
//! listeners and, when coming back online, starts a replay pass, in that
//! order.

use crate::state::{ReplayReport, SyncEngine};
use crate::transport::Transport;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fetch behavior a cache client should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Fetch from the network.
    Online,
    /// Serve from cache and pause network fetches.
    OfflineFirst,
}

/// Read handle on the connectivity flag. Starts online.
#[derive(Debug, Clone, Default)]
pub struct Connectivity {
    offline: Arc<AtomicBool>,
}

impl Connectivity {
    /// Creates a flag in the online state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the device is offline.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Returns the fetch mode matching the current flag.
    pub fn network_mode(&self) -> NetworkMode {
        if self.is_offline() {
            NetworkMode::OfflineFirst
        } else {
            NetworkMode::Online
        }
    }

    /// Stores `offline` and returns the previous value.
    pub(crate) fn swap(&self, offline: bool) -> bool {
        self.offline.swap(offline, Ordering::SeqCst)
    }
}

/// Callback invoked with the new offline value on every flip.
pub type NetworkListener = Arc<dyn Fn(bool) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, NetworkListener)>>;

/// Registration returned by [`NetworkObserver::on_change`].
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl ListenerHandle {
    /// Removes the listener. A no-op if the observer is gone.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Bridges platform connectivity signals into the core.
pub struct NetworkObserver {
    connectivity: Connectivity,
    transport: Arc<Transport>,
    sync: Arc<SyncEngine>,
    listeners: Arc<ListenerList>,
    next_id: AtomicU64,
}

impl NetworkObserver {
    /// Creates an observer writing to `connectivity`.
    pub fn new(connectivity: Connectivity, transport: Arc<Transport>, sync: Arc<SyncEngine>) -> Self {
        transport.set_offline_mode(connectivity.is_offline());
        Self {
            connectivity,
            transport,
            sync,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Returns true if the device is offline.
    pub fn is_offline(&self) -> bool {
        self.connectivity.is_offline()
    }

    /// Returns the fetch mode matching the current flag.
    pub fn network_mode(&self) -> NetworkMode {
        self.connectivity.network_mode()
    }

    /// Returns a read handle on the flag.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Registers a listener called on every flip.
    pub fn on_change(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Applies a platform connectivity reading.
    ///
    /// Does nothing unless the value actually changes. On an offline to
    /// online flip the replay pass is spawned on the current tokio runtime
    /// and its handle returned.
    pub fn set_offline(&self, offline: bool) -> Option<JoinHandle<ReplayReport>> {
        if self.connectivity.swap(offline) == offline {
            return None;
        }
        info!(offline, "connectivity changed");

        self.transport.set_offline_mode(offline);

        let listeners: Vec<NetworkListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(offline);
        }

        if offline {
            return None;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let sync = Arc::clone(&self.sync);
                Some(runtime.spawn(async move { sync.on_connected().await }))
            }
            Err(_) => {
                warn!("back online outside a tokio runtime, replay not started");
                None
            }
        }
    }

    /// Feeds a stream of platform readings (true = offline) into
    /// [`set_offline`](Self::set_offline).
    ///
    /// Each triggered replay is awaited before the next reading is applied.
    pub fn spawn_bridge<S>(self: &Arc<Self>, mut signals: S) -> JoinHandle<()>
    where
        S: Stream<Item = bool> + Send + Unpin + 'static,
    {
        let observer = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(offline) = signals.next().await {
                if let Some(replay) = observer.set_offline(offline) {
                    if let Err(e) = replay.await {
                        warn!(error = %e, "replay task failed");
                    }
                }
            }
            debug!("connectivity bridge closed");
        })
    }
}
