//! In-process service directory.
//!
//! Servers advertise themselves under a human-readable name
//! (`"<document> @ <host>"`); peers resolve the name to an [`Endpoint`].
//! The advertisement lives as long as its handle.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

use crate::transport::{Endpoint, TransportError};

/// Name a server advertises a document under.
pub fn advertised_name(document: &str, host: &str) -> String {
    format!("{document} @ {host}")
}

/// Name → endpoint table shared by every transport in the process.
#[derive(Default)]
pub struct ServiceDirectory {
    services: Mutex<HashMap<String, Endpoint>>,
    changed: Notify,
}

impl ServiceDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish `endpoint` under `name` until the returned handle is dropped.
    pub fn advertise(
        self: &Arc<Self>,
        name: &str,
        endpoint: Endpoint,
    ) -> Result<Advertisement, TransportError> {
        {
            let mut services = self.services.lock();
            if services.contains_key(name) {
                return Err(TransportError::NameTaken(name.to_owned()));
            }
            services.insert(name.to_owned(), endpoint.clone());
        }
        log::info!("advertising '{name}' at {endpoint}");
        self.changed.notify_waiters();
        Ok(Advertisement {
            name: name.to_owned(),
            endpoint,
            directory: Arc::downgrade(self),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Endpoint> {
        self.services.lock().get(name).cloned()
    }

    /// Advertised names, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Wait up to `timeout` for `name` to be advertised. A zero timeout
    /// only checks what is advertised right now.
    pub async fn resolve(&self, name: &str, timeout: Duration) -> Result<Endpoint, TransportError> {
        if timeout.is_zero() {
            return self
                .lookup(name)
                .ok_or_else(|| TransportError::ServiceNotFound(name.to_owned()));
        }

        let wait = async {
            loop {
                // Register interest before looking, so an advertisement
                // landing in between still wakes us.
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(endpoint) = self.lookup(name) {
                    return endpoint;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TransportError::ResolveTimeout(name.to_owned()))
    }

    fn withdraw(&self, name: &str) {
        if self.services.lock().remove(name).is_some() {
            log::info!("withdrew '{name}'");
            self.changed.notify_waiters();
        }
    }
}

/// A live advertisement. Dropping it withdraws the service.
#[derive(Debug)]
pub struct Advertisement {
    name: String,
    endpoint: Endpoint,
    directory: Weak<ServiceDirectory>,
}

impl Advertisement {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        if let Some(directory) = self.directory.upgrade() {
            directory.withdraw(&self.name);
        }
    }
}
