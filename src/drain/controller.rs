//! Per-scope drain controller
//!
//! One controller owns all drain work inside a namespace scope. A watch
//! task translates Pod and StatefulSet events into queue items; a processor
//! task consumes the queue and walks each departing pod through
//! Detected, Draining, Drained, and Released.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::watcher::{watcher, Config as WatcherConfig, Event as WatchEvent};
use kube::{Client, ResourceExt};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::management::{DrainRequester, DrainResponse};
use super::registry::ScopeKey;

/// Finalizer holding a departing pod until its drain completes
pub const DRAIN_FINALIZER: &str = "relaymq.io/drain-protection";

/// Ceiling for the delay between drain polls
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(60);

/// Pod identity within the cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle of one departing pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainPhase {
    /// Scale-down observed, drain not yet underway
    Detected,
    /// Broker instructed to move its messages, backlog being polled
    Draining,
    /// Backlog reached zero
    Drained,
    /// Finalizer removed, Kubernetes free to complete the deletion
    Released,
}

/// Tuning for drain orchestration
#[derive(Clone, Debug)]
pub struct DrainConfig {
    /// Management API port on every broker pod
    pub management_port: i32,
    /// Timeout for a single management HTTP call
    pub request_timeout: Duration,
    /// Base delay between backlog polls
    pub poll_interval: Duration,
    /// Unsuccessful steps tolerated before a drain is parked
    pub max_attempts: u32,
    /// Rest period for a parked drain before it starts a fresh budget
    pub park_delay: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            management_port: 8161,
            request_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            max_attempts: 30,
            park_delay: Duration::from_secs(120),
        }
    }
}

/// One tracked scale-down request served by this controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl Instance {
    /// Whether a pod with these labels falls under this instance
    fn governs(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        if let Some(ns) = &self.namespace {
            if ns != namespace {
                return false;
            }
        }
        self.labels.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Work items consumed by the processor task
#[derive(Clone, Debug, PartialEq, Eq)]
enum DrainEvent {
    /// A fleet is shrinking; the named pod leaves once drained
    ScaleDownDetected { pod: PodKey, statefulset: String },
    /// A governed pod disappeared from the API
    PodRemoved { pod: PodKey },
    /// Re-examine an in-flight drain
    Poll { pod: PodKey },
}

struct TrackedPod {
    phase: DrainPhase,
    statefulset: String,
    attempts: u32,
}

/// Drain controller for a single namespace scope.
///
/// State transitions happen only on the processor task, so events for the
/// same pod are applied in receipt order. The ledger and instance list are
/// behind locks solely for registration and observation from outside.
pub struct DrainController {
    client: Client,
    scope: ScopeKey,
    config: DrainConfig,
    instances: RwLock<Vec<Instance>>,
    ledger: RwLock<HashMap<PodKey, TrackedPod>>,
    queue_tx: mpsc::UnboundedSender<DrainEvent>,
    queue_rx: StdMutex<Option<mpsc::UnboundedReceiver<DrainEvent>>>,
}

impl DrainController {
    pub fn new(client: Client, scope: ScopeKey, config: DrainConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Self {
            client,
            scope,
            config,
            instances: RwLock::new(Vec::new()),
            ledger: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: StdMutex::new(Some(queue_rx)),
        }
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    /// Register a scale-down request with this controller.
    ///
    /// Instances accumulate for the lifetime of the controller; registering
    /// the same request again updates its labels in place.
    pub async fn add_instance(&self, instance: Instance) {
        let mut instances = self.instances.write().await;

        if let Some(existing) = instances
            .iter_mut()
            .find(|i| i.name == instance.name && i.namespace == instance.namespace)
        {
            *existing = instance;
            return;
        }

        info!(
            "Scale-down request {} registered with drain scope {}",
            instance.name, self.scope
        );
        instances.push(instance);
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Whether any tracked request governs a pod with these labels
    pub async fn governs(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        self.instances
            .read()
            .await
            .iter()
            .any(|i| i.governs(namespace, labels))
    }

    pub async fn phase_of(&self, pod: &PodKey) -> Option<DrainPhase> {
        self.ledger.read().await.get(pod).map(|t| t.phase)
    }

    /// Spawn the watch translator and the queue processor
    pub fn start(self: &Arc<Self>, requester: Arc<dyn DrainRequester>) {
        let watches = Arc::clone(self);
        tokio::spawn(async move { watches.run_watches().await });

        let processor = Arc::clone(self);
        tokio::spawn(async move { processor.run_queue(requester).await });
    }

    // ------------------------------------------------------------------
    // Watch translation
    // ------------------------------------------------------------------

    async fn run_watches(&self) {
        let (pods, statefulsets): (Api<Pod>, Api<StatefulSet>) = match &self.scope {
            ScopeKey::Wildcard => (
                Api::all(self.client.clone()),
                Api::all(self.client.clone()),
            ),
            ScopeKey::Namespace(ns) => (
                Api::namespaced(self.client.clone(), ns),
                Api::namespaced(self.client.clone(), ns),
            ),
        };

        let mut pod_stream = watcher(pods, WatcherConfig::default()).boxed();
        let mut sts_stream = watcher(statefulsets, WatcherConfig::default()).boxed();

        info!("Drain watches started for scope {}", self.scope);

        loop {
            tokio::select! {
                Some(event) = pod_stream.next() => match event {
                    Ok(event) => self.on_pod_event(event).await,
                    Err(e) => warn!("Pod watch error in scope {}: {}", self.scope, e),
                },
                Some(event) = sts_stream.next() => match event {
                    Ok(event) => self.on_statefulset_event(event).await,
                    Err(e) => warn!("StatefulSet watch error in scope {}: {}", self.scope, e),
                },
                else => {
                    warn!("Drain watches for scope {} ended", self.scope);
                    break;
                }
            }
        }
    }

    async fn on_statefulset_event(&self, event: WatchEvent<StatefulSet>) {
        match event {
            WatchEvent::Apply(sts) | WatchEvent::InitApply(sts) => {
                self.inspect_statefulset(&sts).await;
            }
            WatchEvent::Delete(_) | WatchEvent::Init | WatchEvent::InitDone => {}
        }
    }

    async fn inspect_statefulset(&self, sts: &StatefulSet) {
        let namespace = sts.namespace().unwrap_or_default();
        let labels = sts.metadata.labels.clone().unwrap_or_default();
        if !self.governs(&namespace, &labels).await {
            return;
        }

        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        let current = sts.status.as_ref().map(|s| s.replicas).unwrap_or(0);
        if desired >= current {
            return;
        }

        info!(
            "Fleet {}/{} is shrinking from {} to {}",
            namespace,
            sts.name_any(),
            current,
            desired
        );

        for pod in removal_targets(&namespace, &sts.name_any(), desired, current) {
            self.enqueue(DrainEvent::ScaleDownDetected {
                pod,
                statefulset: sts.name_any(),
            });
        }
    }

    async fn on_pod_event(&self, event: WatchEvent<Pod>) {
        match event {
            WatchEvent::Apply(pod) | WatchEvent::InitApply(pod) => {
                self.inspect_pod(&pod).await;
            }
            WatchEvent::Delete(pod) => {
                let key = PodKey::new(&pod.namespace().unwrap_or_default(), &pod.name_any());
                self.enqueue(DrainEvent::PodRemoved { pod: key });
            }
            WatchEvent::Init | WatchEvent::InitDone => {}
        }
    }

    /// Recovery path: a pod still carrying the drain finalizer with a
    /// deletion timestamp re-enters the state machine. Watch replay after a
    /// restart lands here, so half-finished drains resume instead of
    /// leaking protected pods.
    async fn inspect_pod(&self, pod: &Pod) {
        if pod.metadata.deletion_timestamp.is_none() {
            return;
        }
        if !pod.finalizers().iter().any(|f| *f == DRAIN_FINALIZER) {
            return;
        }

        let namespace = pod.namespace().unwrap_or_default();
        let labels = pod.metadata.labels.clone().unwrap_or_default();
        if !self.governs(&namespace, &labels).await {
            return;
        }

        let key = PodKey::new(&namespace, &pod.name_any());
        let statefulset =
            owner_statefulset(pod).unwrap_or_else(|| fleet_name_of(&pod.name_any()));

        self.enqueue(DrainEvent::ScaleDownDetected {
            pod: key,
            statefulset,
        });
    }

    fn enqueue(&self, event: DrainEvent) {
        if self.queue_tx.send(event).is_err() {
            warn!("Drain queue for scope {} is closed", self.scope);
        }
    }

    // ------------------------------------------------------------------
    // Queue processing
    // ------------------------------------------------------------------

    async fn run_queue(&self, requester: Arc<dyn DrainRequester>) {
        let receiver = self.queue_rx.lock().unwrap().take();
        let Some(mut queue) = receiver else {
            warn!("Drain processor for scope {} already running", self.scope);
            return;
        };

        info!("Drain processor started for scope {}", self.scope);

        while let Some(event) = queue.recv().await {
            self.handle_event(event, requester.as_ref()).await;
        }
    }

    async fn handle_event(&self, event: DrainEvent, requester: &dyn DrainRequester) {
        match event {
            DrainEvent::ScaleDownDetected { pod, statefulset } => {
                let known = self.phase_of(&pod).await;
                if should_ignore_detection(known) {
                    debug!(
                        "Pod {} already {:?}, ignoring duplicate detection",
                        pod,
                        known.unwrap_or(DrainPhase::Detected)
                    );
                    return;
                }

                self.ledger.write().await.insert(
                    pod.clone(),
                    TrackedPod {
                        phase: DrainPhase::Detected,
                        statefulset,
                        attempts: 0,
                    },
                );
                self.advance(pod, requester).await;
            }
            DrainEvent::Poll { pod } => self.advance(pod, requester).await,
            DrainEvent::PodRemoved { pod } => {
                if self.ledger.write().await.remove(&pod).is_some() {
                    info!("Pod {} is gone, drain record dropped", pod);
                }
            }
        }
    }

    async fn advance(&self, pod: PodKey, requester: &dyn DrainRequester) {
        let snapshot = {
            let ledger = self.ledger.read().await;
            ledger
                .get(&pod)
                .map(|t| (t.phase, t.statefulset.clone(), t.attempts))
        };
        let Some((phase, statefulset, attempts)) = snapshot else {
            return;
        };

        match phase {
            DrainPhase::Detected => {
                self.start_drain(pod, &statefulset, attempts, requester).await;
            }
            DrainPhase::Draining => {
                self.poll_drain(pod, &statefulset, attempts, requester).await;
            }
            DrainPhase::Drained => self.release(pod).await,
            DrainPhase::Released => {}
        }
    }

    async fn start_drain(
        &self,
        pod: PodKey,
        statefulset: &str,
        attempts: u32,
        requester: &dyn DrainRequester,
    ) {
        if let Err(e) = self.protect(&pod).await {
            warn!("Could not attach drain protection to {}: {}", pod, e);
        }

        match requester.request_drain(&pod, statefulset).await {
            Ok(DrainResponse::Acknowledged) => {
                info!("Drain started for pod {}", pod);
                self.transition(&pod, DrainPhase::Draining, 0).await;
                self.requeue_after(pod, self.config.poll_interval);
            }
            Ok(DrainResponse::Pending) => {
                debug!("Pod {} was already draining", pod);
                self.transition(&pod, DrainPhase::Draining, attempts).await;
                self.requeue_after(pod, self.config.poll_interval);
            }
            Ok(DrainResponse::Failed(reason)) => {
                warn!("Broker on {} rejected the drain: {}", pod, reason);
                self.retry(pod, attempts).await;
            }
            Err(e) => {
                warn!("Drain request to {} failed: {}", pod, e);
                self.retry(pod, attempts).await;
            }
        }
    }

    async fn poll_drain(
        &self,
        pod: PodKey,
        statefulset: &str,
        attempts: u32,
        requester: &dyn DrainRequester,
    ) {
        match requester.remaining_messages(&pod, statefulset).await {
            Ok(0) => {
                info!("Pod {} reports an empty backlog", pod);
                self.transition(&pod, DrainPhase::Drained, 0).await;
                self.release(pod).await;
            }
            Ok(remaining) => {
                debug!("Pod {} still holds {} messages", pod, remaining);
                self.retry(pod, attempts).await;
            }
            Err(e) => {
                warn!("Could not read the backlog of {}: {}", pod, e);
                self.retry(pod, attempts).await;
            }
        }
    }

    /// A drain is never abandoned: once the retry budget is spent the pod
    /// keeps its finalizer and the drain parks before starting over.
    /// Blocking termination is preferable to losing messages.
    async fn retry(&self, pod: PodKey, attempts: u32) {
        let next = attempts + 1;

        if next >= self.config.max_attempts {
            warn!(
                "Drain of {} not confirmed after {} attempts, parking while it stays protected",
                pod, next
            );
            self.set_attempts(&pod, 0).await;
            self.requeue_after(pod, self.config.park_delay);
        } else {
            self.set_attempts(&pod, next).await;
            let delay = poll_backoff(self.config.poll_interval, next);
            self.requeue_after(pod, delay);
        }
    }

    async fn release(&self, pod: PodKey) {
        match self.unprotect(&pod).await {
            Ok(()) => {
                info!("Pod {} released", pod);
                self.transition(&pod, DrainPhase::Released, 0).await;
            }
            Err(e) => {
                warn!("Could not release pod {}: {}", pod, e);
                self.requeue_after(pod, self.config.poll_interval);
            }
        }
    }

    async fn transition(&self, pod: &PodKey, phase: DrainPhase, attempts: u32) {
        if let Some(tracked) = self.ledger.write().await.get_mut(pod) {
            tracked.phase = phase;
            tracked.attempts = attempts;
        }
    }

    async fn set_attempts(&self, pod: &PodKey, attempts: u32) {
        if let Some(tracked) = self.ledger.write().await.get_mut(pod) {
            tracked.attempts = attempts;
        }
    }

    fn requeue_after(&self, pod: PodKey, delay: Duration) {
        let tx = self.queue_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DrainEvent::Poll { pod });
        });
    }

    // ------------------------------------------------------------------
    // Finalizer plumbing
    // ------------------------------------------------------------------

    async fn protect(&self, pod: &PodKey) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);

        let current = match api.get(&pod.name).await {
            Ok(p) => p,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(Error::KubeError(e)),
        };

        if current.finalizers().iter().any(|f| *f == DRAIN_FINALIZER) {
            return Ok(());
        }
        if current.metadata.deletion_timestamp.is_some() {
            // Kubernetes refuses new finalizers on terminating objects
            warn!(
                "Pod {} is already terminating, drain proceeds unprotected",
                pod
            );
            return Ok(());
        }

        let mut finalizers = current.finalizers().to_vec();
        finalizers.push(DRAIN_FINALIZER.to_string());
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(&pod.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }

    async fn unprotect(&self, pod: &PodKey) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);

        let current = match api.get(&pod.name).await {
            Ok(p) => p,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(Error::KubeError(e)),
        };

        let finalizers: Vec<String> = current
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != DRAIN_FINALIZER)
            .cloned()
            .collect();
        if finalizers.len() == current.finalizers().len() {
            return Ok(());
        }

        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        match api
            .patch(&pod.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

/// Pods a shrinking StatefulSet will retire, highest ordinals first
fn removal_targets(namespace: &str, statefulset: &str, desired: i32, current: i32) -> Vec<PodKey> {
    if desired >= current {
        return Vec::new();
    }
    (desired.max(0)..current)
        .rev()
        .map(|ordinal| PodKey::new(namespace, &format!("{statefulset}-{ordinal}")))
        .collect()
}

/// Fleet name for a pod created by a StatefulSet ("fleet-a-2" -> "fleet-a")
fn fleet_name_of(pod_name: &str) -> String {
    match pod_name.rsplit_once('-') {
        Some((prefix, ordinal))
            if !ordinal.is_empty() && ordinal.chars().all(|c| c.is_ascii_digit()) =>
        {
            prefix.to_string()
        }
        _ => pod_name.to_string(),
    }
}

fn owner_statefulset(pod: &Pod) -> Option<String> {
    pod.owner_references()
        .iter()
        .find(|o| o.kind == "StatefulSet")
        .map(|o| o.name.clone())
}

fn should_ignore_detection(phase: Option<DrainPhase>) -> bool {
    matches!(
        phase,
        Some(DrainPhase::Draining | DrainPhase::Drained | DrainPhase::Released)
    )
}

fn poll_backoff(base: Duration, attempts: u32) -> Duration {
    let backoff = base * 2u32.saturating_pow(attempts.min(6));
    backoff.min(MAX_POLL_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    fn test_client() -> Client {
        let config = kube::Config::new("http://127.0.0.1:8080".try_into().unwrap());
        Client::try_from(config).unwrap()
    }

    fn controller(config: DrainConfig) -> DrainController {
        DrainController::new(
            test_client(),
            ScopeKey::Namespace("messaging".to_string()),
            config,
        )
    }

    fn instance(labels: &[(&str, &str)]) -> Instance {
        Instance {
            name: "fleet-a-drain".to_string(),
            namespace: Some("messaging".to_string()),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Scripted management endpoint: responses pop in order, then repeat
    /// the fallback (Acknowledged / empty backlog).
    struct ScriptedRequester {
        drains: Mutex<VecDeque<DrainResponse>>,
        counts: Mutex<VecDeque<u64>>,
    }

    impl ScriptedRequester {
        fn new(drains: Vec<DrainResponse>, counts: Vec<u64>) -> Self {
            Self {
                drains: Mutex::new(drains.into()),
                counts: Mutex::new(counts.into()),
            }
        }
    }

    #[async_trait]
    impl DrainRequester for ScriptedRequester {
        async fn request_drain(&self, _pod: &PodKey, _sts: &str) -> crate::error::Result<DrainResponse> {
            Ok(self
                .drains
                .lock()
                .await
                .pop_front()
                .unwrap_or(DrainResponse::Acknowledged))
        }

        async fn remaining_messages(&self, _pod: &PodKey, _sts: &str) -> crate::error::Result<u64> {
            Ok(self.counts.lock().await.pop_front().unwrap_or(0))
        }
    }

    fn detected(pod: &PodKey) -> DrainEvent {
        DrainEvent::ScaleDownDetected {
            pod: pod.clone(),
            statefulset: "fleet-a".to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Pure helpers
    // ------------------------------------------------------------------

    #[test]
    fn test_removal_targets_highest_ordinals_first() {
        let targets = removal_targets("messaging", "fleet-a", 1, 3);
        let names: Vec<_> = targets.iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["fleet-a-2".to_string(), "fleet-a-1".to_string()]);

        assert!(removal_targets("messaging", "fleet-a", 3, 3).is_empty());
        assert!(removal_targets("messaging", "fleet-a", 5, 3).is_empty());
    }

    #[test]
    fn test_fleet_name_strips_trailing_ordinal() {
        assert_eq!(fleet_name_of("fleet-a-12"), "fleet-a");
        assert_eq!(fleet_name_of("web-0"), "web");
        assert_eq!(fleet_name_of("solo"), "solo");
        assert_eq!(fleet_name_of("fleet-beta"), "fleet-beta");
    }

    #[test]
    fn test_duplicate_detection_filter() {
        assert!(!should_ignore_detection(None));
        assert!(!should_ignore_detection(Some(DrainPhase::Detected)));
        assert!(should_ignore_detection(Some(DrainPhase::Draining)));
        assert!(should_ignore_detection(Some(DrainPhase::Drained)));
        assert!(should_ignore_detection(Some(DrainPhase::Released)));
    }

    #[test]
    fn test_poll_backoff_caps_out() {
        let base = Duration::from_secs(10);
        assert_eq!(poll_backoff(base, 1), Duration::from_secs(20));
        assert_eq!(poll_backoff(base, 2), Duration::from_secs(40));
        assert_eq!(poll_backoff(base, 3), MAX_POLL_BACKOFF);
        assert_eq!(poll_backoff(base, 30), MAX_POLL_BACKOFF);
    }

    #[test]
    fn test_instance_governs_label_subset() {
        let instance = instance(&[("app.kubernetes.io/instance", "fleet-a")]);

        let mut pod_labels = BTreeMap::new();
        pod_labels.insert(
            "app.kubernetes.io/instance".to_string(),
            "fleet-a".to_string(),
        );
        pod_labels.insert("extra".to_string(), "ignored".to_string());

        assert!(instance.governs("messaging", &pod_labels));
        assert!(!instance.governs("other-ns", &pod_labels));

        pod_labels.insert(
            "app.kubernetes.io/instance".to_string(),
            "fleet-b".to_string(),
        );
        assert!(!instance.governs("messaging", &pod_labels));
    }

    #[test]
    fn test_unscoped_instance_governs_any_namespace() {
        let mut instance = instance(&[("app", "relay")]);
        instance.namespace = None;

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "relay".to_string());

        assert!(instance.governs("team-a", &labels));
        assert!(instance.governs("team-b", &labels));
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_acknowledged_drain_enters_draining() {
        let controller = controller(DrainConfig::default());
        let requester = ScriptedRequester::new(vec![DrainResponse::Acknowledged], vec![]);
        let pod = PodKey::new("messaging", "fleet-a-2");

        controller.handle_event(detected(&pod), &requester).await;

        assert_eq!(controller.phase_of(&pod).await, Some(DrainPhase::Draining));
    }

    #[tokio::test]
    async fn test_duplicate_detection_does_not_restart_drain() {
        let controller = controller(DrainConfig::default());
        let requester = ScriptedRequester::new(
            vec![
                DrainResponse::Acknowledged,
                DrainResponse::Failed("second request must never fire".to_string()),
            ],
            vec![],
        );
        let pod = PodKey::new("messaging", "fleet-a-2");

        controller.handle_event(detected(&pod), &requester).await;
        controller.handle_event(detected(&pod), &requester).await;

        assert_eq!(controller.phase_of(&pod).await, Some(DrainPhase::Draining));
        assert_eq!(
            controller.ledger.read().await.get(&pod).unwrap().attempts,
            0,
            "duplicate detection must not consume the scripted failure"
        );
    }

    #[tokio::test]
    async fn test_rejected_drain_counts_an_attempt() {
        let controller = controller(DrainConfig::default());
        let requester =
            ScriptedRequester::new(vec![DrainResponse::Failed("broker busy".to_string())], vec![]);
        let pod = PodKey::new("messaging", "fleet-a-1");

        controller.handle_event(detected(&pod), &requester).await;

        assert_eq!(controller.phase_of(&pod).await, Some(DrainPhase::Detected));
        assert_eq!(controller.ledger.read().await.get(&pod).unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_nonzero_backlog_keeps_draining() {
        let controller = controller(DrainConfig::default());
        let requester = ScriptedRequester::new(vec![DrainResponse::Acknowledged], vec![17]);
        let pod = PodKey::new("messaging", "fleet-a-2");

        controller.handle_event(detected(&pod), &requester).await;
        controller
            .handle_event(DrainEvent::Poll { pod: pod.clone() }, &requester)
            .await;

        assert_eq!(controller.phase_of(&pod).await, Some(DrainPhase::Draining));
        assert_eq!(controller.ledger.read().await.get(&pod).unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_empty_backlog_reaches_drained_and_stays_protected_on_release_failure() {
        // The offline client makes the finalizer removal fail, which must
        // leave the pod in Drained rather than faking a release.
        let controller = controller(DrainConfig::default());
        let requester = ScriptedRequester::new(vec![DrainResponse::Acknowledged], vec![0]);
        let pod = PodKey::new("messaging", "fleet-a-2");

        controller.handle_event(detected(&pod), &requester).await;
        controller
            .handle_event(DrainEvent::Poll { pod: pod.clone() }, &requester)
            .await;

        assert_eq!(controller.phase_of(&pod).await, Some(DrainPhase::Drained));
    }

    #[tokio::test]
    async fn test_exhausted_budget_parks_and_resets_attempts() {
        let config = DrainConfig {
            max_attempts: 2,
            ..DrainConfig::default()
        };
        let controller = controller(config);
        let requester = ScriptedRequester::new(vec![DrainResponse::Acknowledged], vec![9, 9]);
        let pod = PodKey::new("messaging", "fleet-a-2");

        controller.handle_event(detected(&pod), &requester).await;
        controller
            .handle_event(DrainEvent::Poll { pod: pod.clone() }, &requester)
            .await;
        controller
            .handle_event(DrainEvent::Poll { pod: pod.clone() }, &requester)
            .await;

        let ledger = controller.ledger.read().await;
        let tracked = ledger.get(&pod).unwrap();
        assert_eq!(tracked.phase, DrainPhase::Draining, "parked drains stay protected");
        assert_eq!(tracked.attempts, 0, "a parked drain starts a fresh budget");
    }

    #[tokio::test]
    async fn test_pod_removal_drops_the_record() {
        let controller = controller(DrainConfig::default());
        let requester = ScriptedRequester::new(vec![DrainResponse::Acknowledged], vec![]);
        let pod = PodKey::new("messaging", "fleet-a-2");

        controller.handle_event(detected(&pod), &requester).await;
        controller
            .handle_event(DrainEvent::PodRemoved { pod: pod.clone() }, &requester)
            .await;

        assert_eq!(controller.phase_of(&pod).await, None);
    }

    #[tokio::test]
    async fn test_add_instance_upserts_by_name() {
        let controller = controller(DrainConfig::default());

        controller.add_instance(instance(&[("app", "relay")])).await;
        controller.add_instance(instance(&[("app", "relay-v2")])).await;

        assert_eq!(controller.instance_count().await, 1);

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "relay-v2".to_string());
        assert!(controller.governs("messaging", &labels).await);
    }

    #[tokio::test]
    async fn test_distinct_requests_accumulate() {
        let controller = controller(DrainConfig::default());

        controller.add_instance(instance(&[("app", "relay")])).await;
        let mut second = instance(&[("app", "other")]);
        second.name = "fleet-b-drain".to_string();
        controller.add_instance(second).await;

        assert_eq!(controller.instance_count().await, 2);
    }
}
