//! Cluster Membership Management
//!
//! Tracks members, the services each advertises, and heartbeat health.
//! Every change that affects the view or the provider sets is published as a
//! new [`Topology`] on a watch channel.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use super::{Node, View};
use crate::error::{Error, Result};

/// Member status in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Member is heartbeating normally
    Active,
    /// Member missed heartbeats but has not been dropped yet
    Suspect,
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberStatus::Active => write!(f, "ACTIVE"),
            MemberStatus::Suspect => write!(f, "SUSPECT"),
        }
    }
}

/// State of a single member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberState {
    /// Member identity
    pub node: Node,
    /// Current status
    pub status: MemberStatus,
    /// Names of the singleton services this member can run
    pub services: BTreeSet<String>,
    /// Last heartbeat time (not serialized)
    #[serde(skip)]
    pub last_heartbeat: Option<Instant>,
    /// When the member joined the current view
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

impl MemberState {
    /// Create a new member state
    pub fn new(node: Node, services: BTreeSet<String>) -> Self {
        Self {
            node,
            status: MemberStatus::Active,
            services,
            last_heartbeat: None,
            joined_at: chrono::Utc::now(),
        }
    }

    /// Check if the member is healthy (received heartbeat recently)
    pub fn is_healthy(&self, timeout: Duration) -> bool {
        match self.last_heartbeat {
            Some(last) => last.elapsed() < timeout,
            None => false,
        }
    }

    /// Update heartbeat time
    pub fn touch(&mut self) {
        self.last_heartbeat = Some(Instant::now());
    }

    /// Time since last heartbeat
    pub fn time_since_heartbeat(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }
}

/// Published membership snapshot: the view plus who provides what
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub view: View,
    pub providers: BTreeMap<String, BTreeSet<Node>>,
}

impl Topology {
    /// Members of the view that advertise `service`
    pub fn providers(&self, service: &str) -> BTreeSet<Node> {
        self.providers.get(service).cloned().unwrap_or_default()
    }

    /// Providers of `service` in view order
    pub fn candidates(&self, service: &str) -> Vec<Node> {
        match self.providers.get(service) {
            Some(providers) => self.view.candidates(providers),
            None => Vec::new(),
        }
    }
}

/// Cluster membership tracker
pub struct ClusterMembership {
    /// Members in join order (this is the view order)
    members: RwLock<Vec<MemberState>>,
    /// Membership epoch, bumped on every publish and merged with remote epochs
    epoch: AtomicU64,
    /// Topology feed
    topology: watch::Sender<Topology>,
    /// Heartbeat timeout before a member is suspected
    heartbeat_timeout: Duration,
    /// Silence after which a member is dropped from the view
    drop_timeout: Duration,
}

impl ClusterMembership {
    /// Create a new membership tracker with an empty view
    pub fn new(heartbeat_timeout: Duration, drop_timeout: Duration) -> Self {
        let (topology, _) = watch::channel(Topology::default());
        Self {
            members: RwLock::new(Vec::new()),
            epoch: AtomicU64::new(0),
            topology,
            heartbeat_timeout,
            drop_timeout,
        }
    }

    /// Current membership epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Merge an epoch seen from a remote member
    pub fn observe_epoch(&self, remote: u64) {
        self.epoch.fetch_max(remote, Ordering::SeqCst);
    }

    /// Latest published topology
    pub fn topology(&self) -> Topology {
        self.topology.borrow().clone()
    }

    /// Latest published view
    pub fn view(&self) -> View {
        self.topology.borrow().view.clone()
    }

    /// Subscribe to topology changes
    pub fn subscribe(&self) -> watch::Receiver<Topology> {
        self.topology.subscribe()
    }

    /// Add a member (or refresh its advertised services). Returns true if it was new.
    pub async fn join(&self, node: Node, services: BTreeSet<String>) -> bool {
        let mut members = self.members.write().await;

        if let Some(member) = members.iter_mut().find(|m| m.node == node) {
            if member.services != services {
                member.services = services;
                self.publish(&members);
            }
            return false;
        }

        tracing::info!("Member {} joined ({})", node, node.address());
        members.push(MemberState::new(node, services));
        self.publish(&members);
        true
    }

    /// Remove a member from the view
    pub async fn leave(&self, node: &Node) -> Option<MemberState> {
        let mut members = self.members.write().await;
        let index = members.iter().position(|m| &m.node == node)?;
        let removed = members.remove(index);
        tracing::info!("Member {} left", node);
        self.publish(&members);
        Some(removed)
    }

    /// Advertise that `node` can run `service`
    pub async fn advertise(&self, node: &Node, service: &str) -> Result<()> {
        let mut members = self.members.write().await;
        let member = members
            .iter_mut()
            .find(|m| &m.node == node)
            .ok_or_else(|| Error::NodeNotFound(node.to_string()))?;

        if member.services.insert(service.to_string()) {
            tracing::debug!("{} now provides {}", node, service);
            self.publish(&members);
        }
        Ok(())
    }

    /// Withdraw a service advertisement. A member that already left is ignored.
    pub async fn withdraw(&self, node: &Node, service: &str) {
        let mut members = self.members.write().await;
        let changed = members
            .iter_mut()
            .find(|m| &m.node == node)
            .map(|m| m.services.remove(service))
            .unwrap_or(false);

        if changed {
            tracing::debug!("{} no longer provides {}", node, service);
            self.publish(&members);
        }
    }

    /// Services currently advertised by `node`
    pub async fn services_of(&self, node: &Node) -> BTreeSet<String> {
        let members = self.members.read().await;
        members
            .iter()
            .find(|m| &m.node == node)
            .map(|m| m.services.clone())
            .unwrap_or_default()
    }

    /// Record a heartbeat, joining the member if it is unknown. Returns true on join.
    pub async fn record_heartbeat(&self, node: &Node, services: BTreeSet<String>) -> bool {
        let mut members = self.members.write().await;

        if let Some(member) = members.iter_mut().find(|m| &m.node == node) {
            member.touch();
            let mut changed = false;
            if member.status == MemberStatus::Suspect {
                tracing::info!("Member {} is responsive again", node);
                member.status = MemberStatus::Active;
            }
            if member.services != services {
                member.services = services;
                changed = true;
            }
            if changed {
                self.publish(&members);
            }
            return false;
        }

        tracing::info!("Member {} joined ({})", node, node.address());
        let mut member = MemberState::new(node.clone(), services);
        member.touch();
        members.push(member);
        self.publish(&members);
        true
    }

    /// Suspect silent members and drop the ones silent for too long.
    /// Members that never heartbeated (the local node) are skipped.
    pub async fn check_timeouts(&self) -> Vec<Node> {
        let mut members = self.members.write().await;
        let mut dropped = Vec::new();

        for member in members.iter_mut() {
            let Some(since) = member.time_since_heartbeat() else {
                continue;
            };

            if member.is_healthy(self.heartbeat_timeout) {
                continue;
            }

            if since > self.drop_timeout {
                dropped.push(member.node.clone());
            } else if member.status == MemberStatus::Active {
                tracing::warn!("Member {} missed heartbeats for {:?}", member.node, since);
                member.status = MemberStatus::Suspect;
            }
        }

        if !dropped.is_empty() {
            members.retain(|m| !dropped.contains(&m.node));
            for node in &dropped {
                tracing::warn!("Member {} dropped from view", node);
            }
            self.publish(&members);
        }

        dropped
    }

    /// Get a member by name
    pub async fn get_member(&self, name: &str) -> Option<MemberState> {
        let members = self.members.read().await;
        members.iter().find(|m| m.node.name() == name).cloned()
    }

    /// All members in view order
    pub async fn members(&self) -> Vec<MemberState> {
        self.members.read().await.clone()
    }

    /// Number of members in the view
    pub async fn size(&self) -> usize {
        self.members.read().await.len()
    }

    /// Membership summary
    pub async fn summary(&self) -> MembershipSummary {
        let members = self.members.read().await;
        let suspect = members
            .iter()
            .filter(|m| m.status == MemberStatus::Suspect)
            .count();

        MembershipSummary {
            epoch: self.epoch(),
            total_members: members.len(),
            active_members: members.len() - suspect,
            suspect_members: suspect,
            coordinator: members.first().map(|m| m.node.name().to_string()),
        }
    }

    /// Publish a new topology; caller holds the members write lock
    fn publish(&self, members: &[MemberState]) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let view = View::new(epoch, members.iter().map(|m| m.node.clone()).collect());

        let mut providers: BTreeMap<String, BTreeSet<Node>> = BTreeMap::new();
        for member in members {
            for service in &member.services {
                providers
                    .entry(service.clone())
                    .or_default()
                    .insert(member.node.clone());
            }
        }

        tracing::debug!("Published view {} with {} members", epoch, view.len());
        self.topology.send_replace(Topology { view, providers });
    }
}

/// Membership summary information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipSummary {
    pub epoch: u64,
    pub total_members: usize,
    pub active_members: usize,
    pub suspect_members: usize,
    pub coordinator: Option<String>,
}
