//! Membership-backed provider registry
//!
//! Providers are the members advertising a service name in the cluster
//! membership. Each registration owns a notification task that turns
//! topology changes into ordered, deduplicated listener callbacks.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ProviderListener, Registration, ServiceProviderRegistry};
use crate::cluster::{ClusterMembership, Node, Topology};
use crate::error::{Error, Result};

/// Provider registry for one member, backed by [`ClusterMembership`]
pub struct MembershipProviderRegistry {
    local: Node,
    membership: Arc<ClusterMembership>,
    registered: Arc<Mutex<HashSet<String>>>,
}

impl MembershipProviderRegistry {
    /// Create a registry for `local`. The member must already be joined.
    pub fn new(local: Node, membership: Arc<ClusterMembership>) -> Self {
        Self {
            local,
            membership,
            registered: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn membership(&self) -> &Arc<ClusterMembership> {
        &self.membership
    }
}

#[async_trait::async_trait]
impl ServiceProviderRegistry for MembershipProviderRegistry {
    fn local_node(&self) -> &Node {
        &self.local
    }

    async fn register(
        &self,
        service: &str,
        listener: Arc<dyn ProviderListener>,
    ) -> Result<Box<dyn Registration>> {
        if !self.registered.lock().await.insert(service.to_string()) {
            return Err(Error::AlreadyRegistered(service.to_string()));
        }

        // Subscribe before advertising so no change slips between the two
        let mut rx = self.membership.subscribe();
        if let Err(e) = self.membership.advertise(&self.local, service).await {
            self.registered.lock().await.remove(service);
            return Err(e);
        }

        let (candidates, epoch) = snapshot(&mut rx, service);
        tracing::info!(
            "Registered {} as provider of {} ({} candidates)",
            self.local,
            service,
            candidates.len()
        );
        listener.providers_changed(candidates.clone(), epoch).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(notify_loop(
            service.to_string(),
            rx,
            listener,
            candidates,
            cancel.clone(),
        ));

        Ok(Box::new(MembershipRegistration {
            service: service.to_string(),
            local: self.local.clone(),
            membership: Arc::clone(&self.membership),
            registered: Arc::clone(&self.registered),
            cancel,
            task: Mutex::new(Some(task)),
        }))
    }
}

/// Candidates and epoch of the latest topology, marking it seen
fn snapshot(rx: &mut watch::Receiver<Topology>, service: &str) -> (Vec<Node>, u64) {
    let topology = rx.borrow_and_update();
    (topology.candidates(service), topology.view.id())
}

/// Deliver candidate changes to the listener until cancelled
async fn notify_loop(
    service: String,
    mut rx: watch::Receiver<Topology>,
    listener: Arc<dyn ProviderListener>,
    mut last: Vec<Node>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let (candidates, epoch) = snapshot(&mut rx, &service);
        if candidates == last {
            continue;
        }

        tracing::debug!(
            "Providers of {} changed at epoch {}: {:?}",
            service,
            epoch,
            candidates.iter().map(Node::name).collect::<Vec<_>>()
        );
        last = candidates.clone();
        listener.providers_changed(candidates, epoch).await;
    }

    tracing::debug!("Provider notifications for {} stopped", service);
}

struct MembershipRegistration {
    service: String,
    local: Node,
    membership: Arc<ClusterMembership>,
    registered: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait::async_trait]
impl Registration for MembershipRegistration {
    fn service(&self) -> &str {
        &self.service
    }

    fn providers(&self) -> BTreeSet<Node> {
        self.membership.topology().providers(&self.service)
    }

    fn candidates(&self) -> Vec<Node> {
        self.membership.topology().candidates(&self.service)
    }

    async fn close(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        self.membership.withdraw(&self.local, &self.service).await;
        self.registered.lock().await.remove(&self.service);
        tracing::info!("Withdrew {} as provider of {}", self.local, self.service);
    }
}

impl Drop for MembershipRegistration {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
