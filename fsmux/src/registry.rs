//! Scheme → provider registry with on-demand activation.
//!
//! Activation follows a join protocol: listeners registered with
//! [`ProviderRegistry::on_will_activate`] receive a [`WillActivateEvent`] for
//! the scheme and may `join` futures that will register a provider. When no
//! provider exists yet, activation awaits every joined future; a failing
//! joiner is logged and does not stop the others from being awaited. Joined
//! futures are spawned, so they run to completion even when activation
//! returns early or times out. Every lookup activates, so a joiner must not
//! replace a provider that is already registered.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::capability::unsupported_claims;
use crate::config::FileServiceConfig;
use crate::error::FsError;
use crate::events::{FileChange, ProviderCapabilitiesEvent, ProviderRegistrationEvent};
use crate::provider::FileSystemProvider;

pub type ActivationListener = Arc<dyn Fn(&mut WillActivateEvent) + Send + Sync>;

/// Sent to activation listeners before a scheme is resolved.
pub struct WillActivateEvent {
    scheme: String,
    joiners: Vec<BoxFuture<'static, anyhow::Result<()>>>,
}

impl WillActivateEvent {
    fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            joiners: Vec::new(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Asks activation to wait for `fut`, typically one that registers a
    /// provider for [`WillActivateEvent::scheme`].
    pub fn join<F>(&mut self, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.joiners.push(fut.boxed());
    }
}

struct Registered {
    id: u64,
    provider: Arc<dyn FileSystemProvider>,
    forwarders: Vec<AbortHandle>,
}

impl Registered {
    fn stop_forwarding(&self) {
        for handle in &self.forwarders {
            handle.abort();
        }
    }
}

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Registered>>,
    listeners: RwLock<Vec<(u64, ActivationListener)>>,
    next_id: AtomicU64,
    activation_timeout: Option<Duration>,
    file_changes: broadcast::Sender<Vec<FileChange>>,
    registrations: broadcast::Sender<ProviderRegistrationEvent>,
    capability_changes: broadcast::Sender<ProviderCapabilitiesEvent>,
}

impl ProviderRegistry {
    pub fn new(config: &FileServiceConfig) -> Self {
        let capacity = config.event_capacity.max(1);
        let (file_changes, _) = broadcast::channel(capacity);
        let (registrations, _) = broadcast::channel(capacity);
        let (capability_changes, _) = broadcast::channel(capacity);
        Self {
            providers: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            activation_timeout: config.activation_timeout,
            file_changes,
            registrations,
            capability_changes,
        }
    }

    /// Installs `provider` for `scheme`, replacing any previous registration.
    ///
    /// The returned handle removes the provider on
    /// [`ProviderRegistration::dispose`]; dropping it keeps the provider
    /// registered.
    pub fn register(
        self: &Arc<Self>,
        scheme: &str,
        provider: Arc<dyn FileSystemProvider>,
    ) -> Result<ProviderRegistration, FsError> {
        let missing = unsupported_claims(provider.as_ref());
        if !missing.is_empty() {
            return Err(FsError::CapabilityMismatch {
                scheme: scheme.to_string(),
                claimed: missing,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let forwarders = self.spawn_forwarders(scheme, provider.as_ref());
        let previous = {
            let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
            providers.insert(
                scheme.to_string(),
                Registered {
                    id,
                    provider,
                    forwarders,
                },
            )
        };
        if let Some(previous) = previous {
            previous.stop_forwarding();
            info!(scheme, "replaced file system provider");
        } else {
            info!(scheme, "registered file system provider");
        }
        let _ = self.registrations.send(ProviderRegistrationEvent {
            scheme: scheme.to_string(),
            added: true,
        });

        Ok(ProviderRegistration {
            scheme: scheme.to_string(),
            id,
            registry: Arc::downgrade(self),
        })
    }

    fn spawn_forwarders(
        &self,
        scheme: &str,
        provider: &dyn FileSystemProvider,
    ) -> Vec<AbortHandle> {
        let mut forwarders = Vec::new();
        let changes = provider.watch_changes();
        let capabilities = provider.watch_capabilities();
        if changes.is_none() && capabilities.is_none() {
            return forwarders;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(scheme, "no tokio runtime, provider events will not be forwarded");
            return forwarders;
        };

        if let Some(mut rx) = changes {
            let tx = self.file_changes.clone();
            let scheme = scheme.to_string();
            let task = runtime.spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(batch) => {
                            let _ = tx.send(batch);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(%scheme, skipped, "dropped file change events");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });
            forwarders.push(task.abort_handle());
        }

        if let Some(mut rx) = capabilities {
            let tx = self.capability_changes.clone();
            let scheme = scheme.to_string();
            let task = runtime.spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(capabilities) => {
                            debug!(%scheme, ?capabilities, "provider capabilities changed");
                            let _ = tx.send(ProviderCapabilitiesEvent {
                                scheme: scheme.clone(),
                                capabilities,
                            });
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });
            forwarders.push(task.abort_handle());
        }
        forwarders
    }

    fn unregister(&self, scheme: &str, id: u64) {
        let removed = {
            let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
            match providers.get(scheme) {
                Some(current) if current.id == id => providers.remove(scheme),
                _ => None,
            }
        };
        match removed {
            Some(registered) => {
                registered.stop_forwarding();
                info!(scheme, "disposed file system provider");
                let _ = self.registrations.send(ProviderRegistrationEvent {
                    scheme: scheme.to_string(),
                    added: false,
                });
            }
            None => debug!(scheme, "stale provider registration disposed, ignoring"),
        }
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn FileSystemProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scheme)
            .map(|registered| registered.provider.clone())
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(scheme)
    }

    pub fn on_will_activate<F>(self: &Arc<Self>, listener: F) -> ActivationListenerHandle
    where
        F: Fn(&mut WillActivateEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        ActivationListenerHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    pub async fn activate(&self, scheme: &str) {
        let listeners: Vec<ActivationListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        let mut event = WillActivateEvent::new(scheme);
        for listener in &listeners {
            listener(&mut event);
        }

        // joiners run as tasks so they finish even when nobody waits for them
        let tasks: Vec<JoinHandle<()>> = event
            .joiners
            .into_iter()
            .map(|joiner| {
                let scheme = scheme.to_string();
                tokio::spawn(async move {
                    if let Err(err) = joiner.await {
                        warn!(%scheme, "provider activation participant failed: {err:#}");
                    }
                })
            })
            .collect();

        if self.contains(scheme) || tasks.is_empty() {
            return;
        }

        debug!(scheme, joiners = tasks.len(), "waiting for provider activation");
        let wait = async {
            for result in future::join_all(tasks).await {
                if let Err(err) = result {
                    warn!(scheme, "provider activation participant panicked: {err}");
                }
            }
        };
        match self.activation_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, wait).await.is_err() {
                    warn!(scheme, ?limit, "provider activation timed out");
                }
            }
            None => wait.await,
        }
    }

    pub fn subscribe_file_changes(&self) -> broadcast::Receiver<Vec<FileChange>> {
        self.file_changes.subscribe()
    }

    pub fn subscribe_registrations(&self) -> broadcast::Receiver<ProviderRegistrationEvent> {
        self.registrations.subscribe()
    }

    pub fn subscribe_capability_changes(&self) -> broadcast::Receiver<ProviderCapabilitiesEvent> {
        self.capability_changes.subscribe()
    }
}

/// Handle returned by [`ProviderRegistry::register`].
#[derive(Debug)]
pub struct ProviderRegistration {
    scheme: String,
    id: u64,
    registry: Weak<ProviderRegistry>,
}

impl ProviderRegistration {
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Removes the provider unless it was replaced by a later registration.
    pub fn dispose(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.scheme, self.id);
        }
    }
}

#[derive(Debug)]
pub struct ActivationListenerHandle {
    id: u64,
    registry: Weak<ProviderRegistry>,
}

impl ActivationListenerHandle {
    pub fn dispose(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}
