//! Singleton Coordinator
//!
//! One coordinator per member and service. The first candidate in view order
//! runs elections: it stops every member except the one the policy picks,
//! then starts that one. Every coordinator answers Start, Stop and value
//! queries for its own member, and any coordinator can read the value from
//! whichever member is primary.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::query::{Backoff, QueryRound};
use super::{
    CommandResponse, QueryConfig, Quorum, Round, SingletonCommand, SingletonService, Transition,
    ValueReply,
};
use crate::cluster::Node;
use crate::dispatcher::{self, CommandDispatcher, CommandDispatcherFactory, CommandHandler};
use crate::election::ElectionPolicy;
use crate::error::{Error, Result};
use crate::provider::{ProviderListener, Registration, ServiceProviderRegistry};

/// Lifecycle role of the local member for one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    Stopped = 0,
    Starting = 1,
    Primary = 2,
    Stopping = 3,
}

impl From<u8> for Role {
    fn from(value: u8) -> Self {
        match value {
            1 => Role::Starting,
            2 => Role::Primary,
            3 => Role::Stopping,
            _ => Role::Stopped,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Stopped => write!(f, "STOPPED"),
            Role::Starting => write!(f, "STARTING"),
            Role::Primary => write!(f, "PRIMARY"),
            Role::Stopping => write!(f, "STOPPING"),
        }
    }
}

/// Outcome of the last election this member ran
#[derive(Debug, Clone, Serialize)]
pub struct ElectionRecord {
    pub epoch: u64,
    pub candidates: Vec<String>,
    /// `None` when quorum was not reached
    pub elected: Option<String>,
    pub at: DateTime<Utc>,
}

/// Snapshot of a coordinator for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SingletonStatus {
    pub service: String,
    pub node: String,
    pub role: Role,
    pub quorum: usize,
    pub candidates: usize,
    pub providers: Vec<String>,
    pub start_failed: bool,
    pub last_election: Option<ElectionRecord>,
}

/// Keeps a [`SingletonService`] running on exactly one member
pub struct SingletonCoordinator<S: SingletonService> {
    inner: Arc<Inner<S>>,
    registration: Box<dyn Registration>,
}

struct Inner<S: SingletonService> {
    name: String,
    local: Node,
    service: Arc<S>,
    policy: Arc<dyn ElectionPolicy>,
    quorum: Quorum,
    query: QueryConfig,
    dispatcher: Arc<dyn CommandDispatcher>,

    role: AtomicU8,
    /// Bumped on every accepted provider change
    generation: AtomicU64,
    /// Candidate count of the latest provider change
    candidates: AtomicUsize,
    /// Set when this member was elected but its service failed to start
    start_failed: AtomicBool,

    /// Lifecycle lock. Held across every call into the service; guards the
    /// epoch of the newest Start/Stop round applied here.
    applied: Mutex<u64>,
    elections: Mutex<Elections>,
    last_election: RwLock<Option<ElectionRecord>>,
}

/// Provider changes accepted so far
struct Elections {
    /// Epoch of the newest accepted change
    epoch: u64,
    /// Election of the newest change. Each election waits for the one
    /// before it.
    task: Option<JoinHandle<()>>,
}

impl<S: SingletonService> SingletonCoordinator<S> {
    /// Register the command handler and provider listener for `name`, then
    /// wait for the initial election round to settle.
    pub(crate) async fn activate(
        name: String,
        service: Arc<S>,
        policy: Arc<dyn ElectionPolicy>,
        quorum: Quorum,
        query: QueryConfig,
        registry: &dyn ServiceProviderRegistry,
        dispatchers: &dyn CommandDispatcherFactory,
    ) -> Result<Self> {
        let local = registry.local_node().clone();

        let endpoint = Arc::new(CommandEndpoint::<S> {
            coordinator: OnceLock::new(),
        });
        let dispatcher = dispatchers
            .create_dispatcher(&name, Arc::clone(&endpoint) as Arc<dyn CommandHandler>)
            .await?;

        let inner = Arc::new(Inner {
            name,
            local,
            service,
            policy,
            quorum,
            query,
            dispatcher,
            role: AtomicU8::new(Role::Stopped as u8),
            generation: AtomicU64::new(0),
            candidates: AtomicUsize::new(0),
            start_failed: AtomicBool::new(false),
            applied: Mutex::new(0),
            elections: Mutex::new(Elections {
                epoch: 0,
                task: None,
            }),
            last_election: RwLock::new(None),
        });
        // The cell was created above and is set exactly once
        if endpoint.coordinator.set(Arc::downgrade(&inner)).is_err() {
            inner.dispatcher.close().await;
            return Err(Error::Internal(format!("{} handler bound twice", inner.name)));
        }

        let listener = Arc::new(ElectionListener(Arc::downgrade(&inner)));
        let registration = match registry.register(&inner.name, listener).await {
            Ok(registration) => registration,
            Err(e) => {
                inner.dispatcher.close().await;
                return Err(e);
            }
        };

        inner.settle().await;
        tracing::info!(
            "Singleton coordinator for {} active on {} (quorum {}, {:?})",
            inner.name,
            inner.local,
            inner.quorum,
            inner.policy
        );

        Ok(Self {
            inner,
            registration,
        })
    }

    /// Singleton service name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn local_node(&self) -> &Node {
        &self.inner.local
    }

    /// Check if the local member currently runs the service
    pub fn is_primary(&self) -> bool {
        self.inner.is_primary()
    }

    pub fn role(&self) -> Role {
        self.inner.role()
    }

    pub fn quorum(&self) -> Quorum {
        self.inner.quorum
    }

    /// Registered providers in the current view
    pub fn providers(&self) -> BTreeSet<Node> {
        self.registration.providers()
    }

    pub async fn status(&self) -> SingletonStatus {
        SingletonStatus {
            service: self.inner.name.clone(),
            node: self.inner.local.name().to_string(),
            role: self.role(),
            quorum: self.inner.quorum.get(),
            candidates: self.inner.candidates.load(Ordering::SeqCst),
            providers: self
                .providers()
                .iter()
                .map(|node| node.name().to_string())
                .collect(),
            start_failed: self.inner.start_failed.load(Ordering::SeqCst),
            last_election: self.inner.last_election.read().await.clone(),
        }
    }

    /// Read the value from the primary, wherever it runs.
    ///
    /// Gives up with [`Error::ServiceUnavailable`] after the configured
    /// query timeout.
    pub async fn value(&self) -> Result<S::Value> {
        self.value_until(&CancellationToken::new()).await
    }

    /// [`value`](Self::value), abandoning the lookup when `cancel` fires
    pub async fn value_until(&self, cancel: &CancellationToken) -> Result<S::Value> {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.query.timeout;
        let mut backoff = Backoff::new(&inner.query);

        loop {
            if inner.is_primary() {
                return inner.service.value().await;
            }

            let pending = inner
                .dispatcher
                .submit_on_group(SingletonCommand::ValueQuery, &[]);
            let replies = tokio::select! {
                replies = dispatcher::collect(pending) => replies,
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep_until(deadline) => return Err(inner.unavailable()),
            };

            let mut round = QueryRound::from_replies(replies);
            if round.primaries.len() > 1 {
                let providers: Vec<String> = round
                    .primaries
                    .iter()
                    .map(|(node, _)| node.name().to_string())
                    .collect();
                tracing::error!(
                    "Multiple primary providers of {} answered: {:?}",
                    inner.name,
                    providers
                );
                return Err(Error::MultiplePrimaries {
                    service: inner.name.clone(),
                    providers,
                });
            }
            if let Some((node, bytes)) = round.primaries.pop() {
                tracing::trace!("Value of {} served by {}", inner.name, node);
                return Ok(bincode::deserialize(&bytes)?);
            }

            let candidates = inner.candidates.load(Ordering::SeqCst);
            if !inner.quorum.is_reached(candidates) {
                return Err(Error::QuorumNotReached {
                    service: inner.name.clone(),
                    reached: candidates,
                    required: inner.quorum.get(),
                });
            }
            if !round.start_failed.is_empty() {
                return Err(Error::NotStarted(inner.name.clone()));
            }

            let delay = backoff.next_delay();
            tracing::debug!(
                "No primary provider of {} answered ({} silent); retrying in {:?}",
                inner.name,
                round.unanswered,
                delay
            );
            tokio::select! {
                _ = sleep_until((Instant::now() + delay).min(deadline)) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
            if Instant::now() >= deadline {
                return Err(inner.unavailable());
            }
        }
    }

    /// Withdraw as a provider, stop the local service if it runs, and
    /// unregister the command handler. The remaining providers re-elect.
    pub async fn close(&self) {
        self.registration.close().await;
        self.inner.settle().await;
        {
            let _lifecycle = self.inner.applied.lock().await;
            self.inner.stop_local().await;
        }
        self.inner.dispatcher.close().await;
        tracing::info!("Singleton coordinator for {} closed on {}", self.inner.name, self.inner.local);
    }
}

impl<S: SingletonService> Inner<S> {
    fn role(&self) -> Role {
        Role::from(self.role.load(Ordering::SeqCst))
    }

    fn is_primary(&self) -> bool {
        self.role() == Role::Primary
    }

    fn transition(&self, from: Role, to: Role) -> bool {
        self.role
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn unavailable(&self) -> Error {
        Error::ServiceUnavailable {
            service: self.name.clone(),
            reason: format!("no primary answered within {:?}", self.query.timeout),
        }
    }

    /// Wait for every spawned election to finish
    async fn settle(&self) {
        let task = self.elections.lock().await.task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Election task for {} failed: {}", self.name, e);
            }
        }
    }

    async fn handle(&self, command: SingletonCommand) -> Result<CommandResponse> {
        match command {
            SingletonCommand::Start(round) => self.start(round).await.map(CommandResponse::Started),
            SingletonCommand::Stop(round) => Ok(CommandResponse::Stopped(self.stop(round).await)),
            SingletonCommand::ValueQuery => self.query_local().await.map(CommandResponse::Value),
        }
    }

    async fn start(&self, round: Round) -> Result<Transition> {
        let mut applied = self.applied.lock().await;
        if is_stale(&mut applied, &round) {
            tracing::debug!(
                "Ignoring stale Start for {} from {} at epoch {} (applied {})",
                self.name,
                round.origin,
                round.epoch,
                *applied
            );
            return Ok(Transition::Stale);
        }

        self.start_failed.store(false, Ordering::SeqCst);
        if !self.transition(Role::Stopped, Role::Starting) {
            return Ok(Transition::Unchanged);
        }

        match self.service.start().await {
            Ok(()) => {
                self.role.store(Role::Primary as u8, Ordering::SeqCst);
                tracing::info!(
                    "{} is now the primary provider of {} (elected by {} at epoch {})",
                    self.local,
                    self.name,
                    round.origin,
                    round.epoch
                );
                Ok(Transition::Applied)
            }
            Err(e) => {
                tracing::error!("Failed to start {} on {}: {}", self.name, self.local, e);
                self.service.stop().await;
                self.role.store(Role::Stopped as u8, Ordering::SeqCst);
                self.start_failed.store(true, Ordering::SeqCst);
                Err(Error::StartFailed {
                    service: self.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn stop(&self, round: Round) -> Transition {
        let mut applied = self.applied.lock().await;
        if is_stale(&mut applied, &round) {
            tracing::debug!(
                "Ignoring stale Stop for {} from {} at epoch {} (applied {})",
                self.name,
                round.origin,
                round.epoch,
                *applied
            );
            return Transition::Stale;
        }
        self.stop_local().await
    }

    /// Stop the service if it runs. Caller holds the lifecycle lock.
    async fn stop_local(&self) -> Transition {
        if !self.transition(Role::Primary, Role::Stopping) {
            return Transition::Unchanged;
        }

        self.service.stop().await;
        self.role.store(Role::Stopped as u8, Ordering::SeqCst);
        tracing::info!("{} is no longer the primary provider of {}", self.local, self.name);
        Transition::Applied
    }

    async fn query_local(&self) -> Result<ValueReply> {
        if self.is_primary() {
            let value = self.service.value().await?;
            return Ok(ValueReply::Primary(bincode::serialize(&value)?));
        }
        if self.start_failed.load(Ordering::SeqCst) {
            return Ok(ValueReply::StartFailed);
        }
        Ok(ValueReply::NotPrimary)
    }

    /// Accept a provider change and queue its election behind the previous
    /// one. Changes older than the newest accepted are dropped.
    async fn trigger(self: &Arc<Self>, candidates: Vec<Node>, epoch: u64) {
        let mut elections = self.elections.lock().await;
        if epoch < elections.epoch {
            tracing::debug!(
                "Ignoring provider change of {} at epoch {} (newest {})",
                self.name,
                epoch,
                elections.epoch
            );
            return;
        }
        elections.epoch = epoch;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.candidates.store(candidates.len(), Ordering::SeqCst);

        let previous = elections.task.take();
        let inner = Arc::clone(self);
        elections.task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::error!("Election task for {} failed: {}", inner.name, e);
                }
            }
            inner.providers_changed(candidates, epoch, generation).await;
        }));
    }

    async fn providers_changed(&self, candidates: Vec<Node>, epoch: u64, generation: u64) {
        if self.is_superseded(generation) {
            tracing::debug!("Provider change of {} at epoch {} superseded", self.name, epoch);
            return;
        }
        self.start_failed.store(false, Ordering::SeqCst);

        if !candidates.contains(&self.local) {
            let _lifecycle = self.applied.lock().await;
            if self.stop_local().await == Transition::Applied {
                tracing::warn!(
                    "{} dropped out of the providers of {}; stopped locally",
                    self.local,
                    self.name
                );
            }
            return;
        }

        if candidates.first() != Some(&self.local) {
            tracing::trace!(
                "Election of {} at epoch {} is run by {}",
                self.name,
                epoch,
                candidates[0]
            );
            return;
        }

        self.elect(candidates, epoch, generation).await;
    }

    async fn elect(&self, candidates: Vec<Node>, epoch: u64, generation: u64) {
        let round = Round::new(self.local.clone(), epoch);
        let count = candidates.len();

        let elected = if !self.quorum.is_reached(count) {
            tracing::warn!(
                "Quorum not reached for {}: {} of {} required providers; stopping all",
                self.name,
                count,
                self.quorum
            );
            None
        } else {
            if self.quorum.is_exact(count) {
                tracing::info!(
                    "Quorum of {} just reached for {}; losing one provider stops it",
                    self.quorum,
                    self.name
                );
            }
            self.policy.elect(&candidates).cloned()
        };

        *self.last_election.write().await = Some(ElectionRecord {
            epoch,
            candidates: candidates.iter().map(|n| n.name().to_string()).collect(),
            elected: elected.as_ref().map(|n| n.name().to_string()),
            at: Utc::now(),
        });

        let Some(elected) = elected else {
            self.stop_all(&round, &[]).await;
            return;
        };

        tracing::info!(
            "Elected {} as primary provider of {} at epoch {} from {} candidates",
            elected,
            self.name,
            epoch,
            count
        );
        self.stop_all(&round, std::slice::from_ref(&elected)).await;

        if self.is_superseded(generation) {
            tracing::debug!("Election of {} at epoch {} superseded before start", self.name, epoch);
            return;
        }

        let start = self
            .dispatcher
            .submit_on_member(SingletonCommand::Start(round), &elected);
        match start.await {
            Ok(CommandResponse::Started(transition)) => {
                tracing::debug!("Start of {} on {}: {:?}", self.name, elected, transition);
            }
            Ok(other) => {
                tracing::warn!("Unexpected reply to Start from {}: {:?}", elected, other);
            }
            Err(e) => {
                tracing::error!("Failed to start {} on {}: {}", self.name, elected, e);
            }
        }
    }

    /// Best-effort Stop to every member not in `exclude`
    async fn stop_all(&self, round: &Round, exclude: &[Node]) {
        let pending = self
            .dispatcher
            .submit_on_group(SingletonCommand::Stop(round.clone()), exclude);

        for (node, result) in dispatcher::collect(pending).await {
            match result {
                Ok(CommandResponse::Stopped(Transition::Applied)) => {
                    tracing::info!("Stopped {} on {}", self.name, node);
                }
                Ok(_) => {}
                Err(e) if e.is_member_unreachable() => {
                    tracing::debug!("Stop of {} not delivered to {}: {}", self.name, node, e);
                }
                Err(e) => {
                    tracing::warn!("Failed to stop {} on {}: {}", self.name, node, e);
                }
            }
        }
    }
}

/// Record `round` as the newest applied unless it is older
fn is_stale(applied: &mut u64, round: &Round) -> bool {
    if round.epoch < *applied {
        return true;
    }
    *applied = round.epoch;
    false
}

/// Command handler registered with the dispatcher
struct CommandEndpoint<S: SingletonService> {
    coordinator: OnceLock<Weak<Inner<S>>>,
}

#[async_trait::async_trait]
impl<S: SingletonService> CommandHandler for CommandEndpoint<S> {
    async fn handle(&self, command: SingletonCommand) -> Result<CommandResponse> {
        let inner = self
            .coordinator
            .get()
            .and_then(Weak::upgrade)
            .ok_or(Error::ShuttingDown)?;
        inner.handle(command).await
    }
}

/// Provider listener that queues an election per change
struct ElectionListener<S: SingletonService>(Weak<Inner<S>>);

#[async_trait::async_trait]
impl<S: SingletonService> ProviderListener for ElectionListener<S> {
    async fn providers_changed(&self, candidates: Vec<Node>, epoch: u64) {
        if let Some(inner) = self.0.upgrade() {
            inner.trigger(candidates, epoch).await;
        }
    }
}
