//! Multi-node election and failover scenarios over the in-process transport

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wolfsingleton::cluster::{ClusterMembership, Node};
use wolfsingleton::dispatcher::LocalTransport;
use wolfsingleton::error::{Error, Result};
use wolfsingleton::provider::MembershipProviderRegistry;
use wolfsingleton::singleton::{
    QueryConfig, Role, SingletonBuilder, SingletonCoordinator, SingletonService,
};

const SERVICE: &str = "scheduler";

/// Serves the name of the member it runs on
struct NamedService {
    name: String,
    running: AtomicBool,
    refuse: AtomicBool,
}

#[async_trait::async_trait]
impl SingletonService for NamedService {
    type Value = String;

    async fn start(&self) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Internal(format!("{} refused to start", self.name)));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn value(&self) -> Result<String> {
        Ok(self.name.clone())
    }
}

struct Member {
    node: Node,
    service: Arc<NamedService>,
    coordinator: SingletonCoordinator<NamedService>,
}

impl Member {
    fn running(&self) -> bool {
        self.service.running.load(Ordering::SeqCst)
    }
}

struct Cluster {
    membership: Arc<ClusterMembership>,
    transport: Arc<LocalTransport>,
    quorum: usize,
    query: QueryConfig,
}

impl Cluster {
    fn new(quorum: usize) -> Self {
        let membership = Arc::new(ClusterMembership::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        Self {
            transport: LocalTransport::new(Arc::clone(&membership)),
            membership,
            quorum,
            query: QueryConfig {
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(50),
                timeout: Duration::from_secs(2),
            },
        }
    }

    async fn start(&self, name: &str) -> Member {
        self.start_with(name, false).await
    }

    async fn start_with(&self, name: &str, refuse: bool) -> Member {
        let node = Node::new(name, format!("{}:7654", name));
        self.membership.join(node.clone(), BTreeSet::new()).await;

        let service = Arc::new(NamedService {
            name: name.to_string(),
            running: AtomicBool::new(false),
            refuse: AtomicBool::new(refuse),
        });
        let registry = MembershipProviderRegistry::new(node.clone(), Arc::clone(&self.membership));
        let coordinator = SingletonBuilder::from_arc(SERVICE, Arc::clone(&service))
            .require_quorum(self.quorum)
            .query_config(self.query)
            .build(&registry, &self.transport.factory(node.clone()))
            .await
            .unwrap();

        Member {
            node,
            service,
            coordinator,
        }
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn primaries(members: &[&Member]) -> Vec<String> {
    members
        .iter()
        .filter(|m| m.coordinator.is_primary())
        .map(|m| m.node.name().to_string())
        .collect()
}

fn provided() -> BTreeSet<String> {
    [SERVICE.to_string()].into_iter().collect()
}

/// Exactly one primary, and every member reads its value
async fn settled_on(members: &[&Member]) -> Option<String> {
    let [primary] = primaries(members).try_into().ok()?;
    for member in members {
        match member.coordinator.value().await {
            Ok(value) if value == primary => {}
            _ => return None,
        }
    }
    Some(primary)
}

/// Wait until the cluster settles, then check it stays that way
async fn assert_settles(members: &[&Member], expected: &str) {
    eventually("exactly one primary", || async {
        settled_on(members).await.as_deref() == Some(expected)
    })
    .await;

    for _ in 0..20 {
        assert_eq!(primaries(members), vec![expected.to_string()]);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_first_candidate_elected_and_read_remotely() {
    let cluster = Cluster::new(1);
    let a = cluster.start("a").await;
    let b = cluster.start("b").await;
    let c = cluster.start("c").await;

    eventually("all three providers registered", || async {
        a.coordinator.providers().len() == 3
    })
    .await;

    assert_eq!(primaries(&[&a, &b, &c]), vec!["a".to_string()]);
    assert!(a.running());
    assert!(!b.running() && !c.running());

    assert_eq!(b.coordinator.value().await.unwrap(), "a");
    assert_eq!(c.coordinator.value().await.unwrap(), "a");
    assert_eq!(a.coordinator.value().await.unwrap(), "a");
}

#[tokio::test]
async fn test_quorum_not_reached_fails_fast() {
    let cluster = Cluster::new(2);
    let a = cluster.start("a").await;

    assert_eq!(a.coordinator.role(), Role::Stopped);
    match a.coordinator.value().await {
        Err(Error::QuorumNotReached { reached, required, .. }) => {
            assert_eq!((reached, required), (1, 2));
        }
        other => panic!("unexpected result {:?}", other),
    }

    // A second provider completes the quorum
    let b = cluster.start("b").await;
    eventually("a elected once quorum is reached", || async {
        a.coordinator.is_primary()
    })
    .await;
    assert_eq!(b.coordinator.value().await.unwrap(), "a");
    assert!(!b.running());
}

#[tokio::test]
async fn test_failover_when_primary_leaves_view() {
    let cluster = Cluster::new(1);
    let a = cluster.start("a").await;
    let b = cluster.start("b").await;
    let c = cluster.start("c").await;
    eventually("a elected", || async { a.coordinator.is_primary() }).await;

    cluster.membership.leave(&a.node).await;

    eventually("b takes over", || async {
        b.coordinator.is_primary() && !a.coordinator.is_primary()
    })
    .await;
    assert!(!a.running());
    assert_eq!(c.coordinator.value().await.unwrap(), "b");

    // The old primary rejoins at the end of the view and stays a backup
    let services: BTreeSet<String> = [SERVICE.to_string()].into_iter().collect();
    cluster.membership.join(a.node.clone(), services).await;
    eventually("a visible as provider again", || async {
        b.coordinator.providers().contains(&a.node)
    })
    .await;

    assert_eq!(a.coordinator.value().await.unwrap(), "b");
    assert_eq!(primaries(&[&a, &b, &c]), vec!["b".to_string()]);
}

#[tokio::test]
async fn test_close_hands_over() {
    let cluster = Cluster::new(1);
    let a = cluster.start("a").await;
    let b = cluster.start("b").await;
    eventually("a elected", || async { a.coordinator.is_primary() }).await;

    a.coordinator.close().await;
    assert_eq!(a.coordinator.role(), Role::Stopped);
    assert!(!a.running());

    eventually("b takes over", || async { b.coordinator.is_primary() }).await;
    assert_eq!(b.coordinator.value().await.unwrap(), "b");
}

#[tokio::test]
async fn test_start_failure_reported_until_next_trigger() {
    let cluster = Cluster::new(1);
    let a = cluster.start_with("a", true).await;
    let b = cluster.start("b").await;

    eventually("a re-elected with both candidates and failed", || async {
        let status = a.coordinator.status().await;
        status.start_failed
            && status
                .last_election
                .map(|election| election.candidates.len() == 2)
                .unwrap_or(false)
    })
    .await;
    assert_eq!(a.coordinator.role(), Role::Stopped);
    assert!(!a.running());

    assert!(matches!(b.coordinator.value().await, Err(Error::NotStarted(_))));
    assert!(matches!(a.coordinator.value().await, Err(Error::NotStarted(_))));

    // A fresh provider change runs a new election
    a.service.refuse.store(false, Ordering::SeqCst);
    let c = cluster.start("c").await;
    eventually("a elected after recovery", || async { a.coordinator.is_primary() }).await;
    assert_eq!(c.coordinator.value().await.unwrap(), "a");
}

#[tokio::test]
async fn test_unreachable_primary_times_out() {
    let mut cluster = Cluster::new(1);
    cluster.query.timeout = Duration::from_millis(200);
    let a = cluster.start("a").await;
    let b = cluster.start("b").await;
    eventually("a elected", || async { a.coordinator.is_primary() }).await;

    cluster.transport.isolate(&a.node).await;
    assert!(matches!(
        b.coordinator.value().await,
        Err(Error::ServiceUnavailable { .. })
    ));

    cluster.transport.heal(&a.node).await;
    assert_eq!(b.coordinator.value().await.unwrap(), "a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_primary_leaves_and_rejoins_back_to_back() {
    let cluster = Cluster::new(1);
    let a = cluster.start("a").await;
    let b = cluster.start("b").await;
    let c = cluster.start("c").await;
    eventually("a elected", || async { a.coordinator.is_primary() }).await;

    cluster.membership.leave(&a.node).await;
    cluster.membership.join(a.node.clone(), provided()).await;

    assert_settles(&[&a, &b, &c], "b").await;
    assert!(!a.running());
    assert!(b.running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_membership_churn_settles_on_one_primary() {
    let cluster = Cluster::new(2);
    let a = cluster.start("a").await;
    let b = cluster.start("b").await;
    let c = cluster.start("c").await;
    eventually("a elected", || async { a.coordinator.is_primary() }).await;

    for member in [&b, &a, &c, &b] {
        cluster.membership.leave(&member.node).await;
        cluster.membership.join(member.node.clone(), provided()).await;
    }

    // View order is now a, c, b
    assert_settles(&[&a, &b, &c], "a").await;
    let running = [&a, &b, &c].iter().filter(|m| m.running()).count();
    assert_eq!(running, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_below_quorum_and_back() {
    let cluster = Cluster::new(2);
    let a = cluster.start("a").await;
    let b = cluster.start("b").await;
    eventually("a elected", || async { a.coordinator.is_primary() }).await;

    cluster.membership.leave(&b.node).await;
    cluster.membership.leave(&a.node).await;
    cluster.membership.join(a.node.clone(), provided()).await;
    cluster.membership.join(b.node.clone(), provided()).await;

    assert_settles(&[&a, &b], "a").await;
}
