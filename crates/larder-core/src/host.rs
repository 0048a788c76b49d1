use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// What the hosting runtime tells the telemetry buffer about itself.
pub trait HostEnvironment: Send + Sync {
    /// Current connectivity belief. Best-effort; may be stale.
    fn is_online(&self) -> bool;
    /// Location the process is currently serving or showing.
    fn current_url(&self) -> String;
    /// Descriptor of the client build and platform.
    fn client_info(&self) -> String;
}

/// A host environment whose values are set explicitly.
pub struct StaticHost {
    url: RwLock<String>,
    client_info: String,
    online: AtomicBool,
}

impl StaticHost {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: RwLock::new(url.into()),
            client_info: default_client_info(),
            online: AtomicBool::new(true),
        }
    }

    pub fn with_client_info(mut self, client_info: impl Into<String>) -> Self {
        self.client_info = client_info.into();
        self
    }

    pub fn with_online(self, online: bool) -> Self {
        self.online.store(online, Ordering::Relaxed);
        self
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.write() = url.into();
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}

impl HostEnvironment for StaticHost {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn current_url(&self) -> String {
        self.url.read().clone()
    }

    fn client_info(&self) -> String {
        self.client_info.clone()
    }
}

/// `larder/<version> (<os>; <arch>)`
pub fn default_client_info() -> String {
    format!(
        "larder/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Notifications published by the host runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostSignal {
    ConnectivityRestored,
    ConnectivityLost,
    /// A panic nobody caught.
    UncaughtError {
        message: String,
        stack: Option<String>,
    },
    /// A spawned fallible task finished with an error nobody observed.
    UnhandledRejection { reason: String },
}

/// Broadcast fan-out of host signals.
#[derive(Clone)]
pub struct HostSignals {
    tx: broadcast::Sender<HostSignal>,
}

impl HostSignals {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostSignal> {
        self.tx.subscribe()
    }

    /// Publish a signal. Returns how many subscribers received it.
    pub fn publish(&self, signal: HostSignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }

    pub fn connectivity_restored(&self) -> usize {
        self.publish(HostSignal::ConnectivityRestored)
    }

    pub fn connectivity_lost(&self) -> usize {
        self.publish(HostSignal::ConnectivityLost)
    }

    /// Chain a panic hook that publishes [`HostSignal::UncaughtError`] before
    /// delegating to the previously installed hook.
    pub fn install_panic_hook(&self) {
        let tx = self.tx.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let message = panic_message(info.payload());
            let stack = info
                .location()
                .map(|loc| format!("at {}:{}:{}", loc.file(), loc.line(), loc.column()));
            let _ = tx.send(HostSignal::UncaughtError { message, stack });
            previous(info);
        }));
    }

    /// Spawn a fallible task. If it resolves to `Err`, publish
    /// [`HostSignal::UnhandledRejection`].
    pub fn spawn_monitored<F, E>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                tracing::debug!(task = name, error = %e, "monitored task failed");
                let _ = tx.send(HostSignal::UnhandledRejection {
                    reason: format!("{name}: {e}"),
                });
            }
        })
    }
}

impl Default for HostSignals {
    fn default() -> Self {
        Self::new(256)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
