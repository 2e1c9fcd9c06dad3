//! Discovery: keeps the host's device nodes in line with the configuration.
//!
//! A discovery resolves the parameters into a device directory, then runs one
//! reconciliation pass over it:
//!
//! ```text
//!   Planned ──create──► Created ──prune──► Pruned ──finish──► DiscoveryReport
//!   snapshot of        new nodes created   stale nodes and
//!   existing nodes     one at a time,      their topics removed
//!                      kept nodes rebound
//! ```
//!
//! Only one pass runs at a time. A second request while one is in flight is
//! rejected with [`DiscoveryError::AlreadyRunning`] before anything is touched.
//! Node creation is asynchronous on the host side, so every new node is
//! awaited through [`PendingCreations`] before the next one is requested.

mod pending;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use statum::{machine, state};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{self, BridgeSettings, ConfigError, DeviceDirectory, ResolvedConfig};
use crate::devices::{DeviceSpec, DeviceType, DeviceTypeRegistry, NodeContext, SpecError};
use crate::host::{HostError, HostPlatform, NodeRegistration, CONTROLLER_ADDRESS};
use crate::mqtt::CommandGateway;
use crate::state::{BridgeState, Shared};
use crate::topics::{self, RegistryError};

pub use pending::{Creation, PendingCreations, PendingError};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery is already running")]
    AlreadyRunning,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error(transparent)]
    Pending(#[from] PendingError),
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Nodes created in this pass, in directory order.
    pub created: Vec<String>,
    /// Nodes that already existed and were rebound.
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    pub removed_topics: Vec<String>,
    /// One message per skipped directory entry.
    pub skipped: Vec<String>,
}

impl DiscoveryReport {
    pub fn device_count(&self) -> usize {
        self.created.len() + self.kept.len()
    }
}

/// Resets the running flag when the pass ends, whatever the outcome.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler {
    host: Arc<dyn HostPlatform>,
    state: Shared<BridgeState>,
    registry: Arc<DeviceTypeRegistry>,
    gateway: CommandGateway,
    pending: PendingCreations,
    running: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(
        host: Arc<dyn HostPlatform>,
        state: Shared<BridgeState>,
        registry: Arc<DeviceTypeRegistry>,
        gateway: CommandGateway,
    ) -> Self {
        Self {
            host,
            state,
            registry,
            gateway,
            pending: PendingCreations::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that is set while a pass is in flight.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Forwards a host creation acknowledgment to the waiting pass.
    pub fn acknowledge(&self, address: &str) -> bool {
        let resolved = self.pending.acknowledge(address);
        if !resolved {
            debug!("Node {address} added without a pending creation");
        }
        resolved
    }

    /// Re-reads the host parameters and reconciles against them.
    pub async fn discover(&self) -> Result<DiscoveryReport, DiscoveryError> {
        let _guard = self.begin()?;
        info!("Starting discovery");

        let params = self.host.params()?;
        let resolved = config::resolve(&params)?;
        Ok(self.reconcile(&resolved).await)
    }

    /// Reconciles against an already resolved configuration.
    pub async fn run(&self, resolved: &ResolvedConfig) -> Result<DiscoveryReport, DiscoveryError> {
        let _guard = self.begin()?;
        Ok(self.reconcile(resolved).await)
    }

    fn begin(&self) -> Result<RunGuard, DiscoveryError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Discovery already in progress, request rejected");
            return Err(DiscoveryError::AlreadyRunning);
        }
        Ok(RunGuard(self.running.clone()))
    }

    async fn reconcile(&self, resolved: &ResolvedConfig) -> DiscoveryReport {
        {
            let mut state = self.state.lock();
            state.connection = resolved.connection.clone();
            state.settings = resolved.settings.clone();
        }
        self.gateway
            .set_cmd_prefix(resolved.connection.cmd_prefix.clone());

        let report = DiscoveryPass::plan(self.host.as_ref())
            .create(self, &resolved.directory, &resolved.settings)
            .await
            .prune(self)
            .finish(self);

        info!(
            "Discovery done: {} created, {} kept, {} removed, {} skipped",
            report.created.len(),
            report.kept.len(),
            report.removed.len(),
            report.skipped.len()
        );
        report
    }

    async fn create_node(
        &self,
        address: &str,
        spec: &DeviceSpec,
        device_type: &dyn DeviceType,
        settings: &BridgeSettings,
    ) -> Result<(), DiscoveryError> {
        let ctx = NodeContext::new(address, &spec.name, self.host.clone(), self.gateway.clone());
        let registration = NodeRegistration {
            address: address.to_string(),
            name: spec.name.clone(),
            node_def: device_type.node_def(),
            drivers: device_type.drivers(),
            handler: device_type.new_handler(ctx, spec),
        };

        let creation = self.pending.expect(address);
        if let Err(err) = self.host.add_node(registration) {
            self.pending.cancel(address);
            return Err(err.into());
        }
        debug!("Waiting for node {address} to be created");
        creation
            .wait(settings.creation_poll, settings.node_create_timeout)
            .await?;
        Ok(())
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum PassState {
    Planned,
    Created,
    Pruned,
}

#[machine]
#[derive(Debug)]
pub struct DiscoveryPass<S: PassState> {
    // Device nodes on the host when the pass started
    existing: BTreeSet<String>,

    // Addresses claimed by directory entries in this pass
    seen: BTreeSet<String>,

    // Specs that made it into the topic index
    accepted: Vec<DeviceSpec>,

    // Topics a sensor device could not own because a sibling sensor did
    shared: Vec<(String, Vec<String>)>,

    report: DiscoveryReport,
}

impl DiscoveryPass<Planned> {
    pub fn plan(host: &dyn HostPlatform) -> Self {
        let existing: BTreeSet<String> = host
            .node_addresses()
            .into_iter()
            .filter(|address| address != CONTROLLER_ADDRESS)
            .collect();
        debug!("Existing nodes: {existing:?}");
        Self::new(
            existing,
            BTreeSet::new(),
            Vec::new(),
            Vec::new(),
            DiscoveryReport::default(),
        )
    }

    pub async fn create(
        mut self,
        reconciler: &Reconciler,
        directory: &DeviceDirectory,
        settings: &BridgeSettings,
    ) -> DiscoveryPass<Created> {
        let prefix = reconciler.state.lock().connection.status_prefix.clone();

        for entry in directory.entries() {
            let (spec, device_type, address) = match self.admit(&reconciler.registry, entry) {
                Ok(admitted) => admitted,
                Err(err) => {
                    self.skip(err.to_string());
                    continue;
                }
            };

            let topics = topics::topics_for(&spec, device_type, prefix.as_deref());
            let exists = self.existing.contains(&address);
            let sensor = spec.sensor_id.is_some();
            match bind(&reconciler.state, &address, topics.clone(), exists, sensor) {
                Ok(shared) if shared.is_empty() => {}
                Ok(shared) => {
                    debug!("{address} shares {shared:?} with another sensor");
                    self.shared.push((address.clone(), shared));
                }
                Err(err) => {
                    self.skip(format!("device {}: {err}", spec.id));
                    continue;
                }
            }

            if exists {
                debug!("Node {address} exists, rebound {} topics", topics.len());
                self.report.kept.push(address);
                self.accepted.push(spec);
                continue;
            }

            info!("Creating node {address} ({}) for {}", spec.kind, spec.id);
            match reconciler
                .create_node(&address, &spec, device_type, settings)
                .await
            {
                Ok(()) => {
                    self.report.created.push(address);
                    self.accepted.push(spec);
                }
                Err(err) => {
                    reconciler.state.lock().topics.unbind(&address);
                    self.skip(format!("device {}: node {address} not created: {err}", spec.id));
                }
            }
        }

        self.transition()
    }

    /// Validates one entry and claims its address.
    fn admit<'r>(
        &mut self,
        registry: &'r DeviceTypeRegistry,
        entry: &Value,
    ) -> Result<(DeviceSpec, &'r dyn DeviceType, String), SpecError> {
        let spec = DeviceSpec::from_entry(entry)?;
        let Some(device_type) = registry.get(&spec.kind) else {
            return Err(SpecError::UnknownType {
                id: spec.id,
                kind: spec.kind,
            });
        };

        let address = topics::address_for(&spec.id);
        if address.is_empty() {
            return Err(SpecError::EmptyAddress { id: spec.id });
        }
        if address == CONTROLLER_ADDRESS || !self.seen.insert(address.clone()) {
            return Err(SpecError::DuplicateAddress { id: spec.id, address });
        }
        Ok((spec, device_type, address))
    }

    fn skip(&mut self, reason: String) {
        error!("Skipping device: {reason}");
        self.report.skipped.push(reason);
    }
}

impl DiscoveryPass<Created> {
    pub fn prune(mut self, reconciler: &Reconciler) -> DiscoveryPass<Pruned> {
        let stale: Vec<String> = self.existing.difference(&self.seen).cloned().collect();
        for address in stale {
            let topics = reconciler.state.lock().topics.unbind(&address);
            info!("Removing node {address} with {} topics", topics.len());
            if let Err(err) = reconciler.host.remove_node(&address) {
                warn!("Failed to remove node {address}: {err}");
            }
            self.report.removed.push(address);
            self.report.removed_topics.extend(topics);
        }

        // Bindings left behind by nodes that never made it to the host
        let mut state = reconciler.state.lock();
        let orphans: BTreeSet<String> = state
            .topics
            .topics()
            .filter_map(|topic| state.topics.lookup(topic))
            .filter(|address| !self.seen.contains(*address))
            .map(str::to_string)
            .collect();
        for address in orphans {
            let topics = state.topics.unbind(&address);
            debug!("Dropped {} orphaned topics of {address}", topics.len());
            self.report.removed_topics.extend(topics);
        }

        // Shared topics whose owner went away move to the next sensor
        for (address, topics) in self.shared.drain(..) {
            let free: Vec<String> = topics
                .into_iter()
                .filter(|topic| state.topics.lookup(topic).is_none())
                .collect();
            if free.is_empty() {
                continue;
            }
            if let Err(err) = state.topics.bind(&address, free) {
                warn!("Could not hand shared topics to {address}: {err}");
            }
        }
        drop(state);

        self.transition()
    }
}

impl DiscoveryPass<Pruned> {
    pub fn finish(self, reconciler: &Reconciler) -> DiscoveryReport {
        reconciler.state.lock().devices = self.accepted;
        self.report
    }
}

/// Binds `topics` to `address`, replacing its previous bindings when
/// `rebind` is set. Sensor devices leave topics owned by another device to
/// that owner; those are returned.
fn bind(
    state: &Shared<BridgeState>,
    address: &str,
    topics: Vec<String>,
    rebind: bool,
    sensor: bool,
) -> Result<Vec<String>, RegistryError> {
    let mut state = state.lock();
    if rebind {
        state.topics.unbind(address);
    }

    let (owned, shared): (Vec<String>, Vec<String>) = if sensor {
        topics.into_iter().partition(|topic| {
            state
                .topics
                .lookup(topic)
                .map_or(true, |owner| owner == address)
        })
    } else {
        (topics, Vec::new())
    };

    state.topics.bind(address, owned)?;
    Ok(shared)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::ParamSource;
    use crate::host::LocalHost;

    fn reconciler() -> Reconciler {
        let (host, _events) = LocalHost::with_params(ParamSource::new());
        Reconciler::new(
            Arc::new(host),
            BridgeState::new(),
            Arc::new(DeviceTypeRegistry::builtin()),
            CommandGateway::detached(),
        )
    }

    #[test]
    fn second_begin_is_rejected_until_guard_drops() {
        let reconciler = reconciler();

        let guard = reconciler.begin().unwrap();
        assert!(reconciler.is_running());
        assert!(matches!(
            reconciler.begin(),
            Err(DiscoveryError::AlreadyRunning)
        ));

        drop(guard);
        assert!(!reconciler.is_running());
        assert!(reconciler.begin().is_ok());
    }

    #[test]
    fn admit_rejects_unknown_types_and_duplicates() {
        let registry = DeviceTypeRegistry::builtin();
        let mut pass = DiscoveryPass::<Planned>::new(
            BTreeSet::new(),
            BTreeSet::new(),
            Vec::new(),
            Vec::new(),
            DiscoveryReport::default(),
        );
        let entry = |id: &str, kind: &str| {
            json!({"id": id, "type": kind, "status_topic": "stat/x/POWER", "cmd_topic": "cmnd/x/POWER"})
        };

        assert!(pass.admit(&registry, &entry("Kitchen_Light", "switch")).is_ok());
        assert!(matches!(
            pass.admit(&registry, &entry("Kitchen-Light", "switch")),
            Err(SpecError::DuplicateAddress { address, .. }) if address == "kitchenlight"
        ));
        assert!(matches!(
            pass.admit(&registry, &entry("toaster", "oven")),
            Err(SpecError::UnknownType { .. })
        ));
        assert!(matches!(
            pass.admit(&registry, &entry("MQ_CTRL", "switch")),
            Err(SpecError::DuplicateAddress { .. })
        ));
        assert!(matches!(
            pass.admit(&registry, &entry("__", "switch")),
            Err(SpecError::EmptyAddress { .. })
        ));
    }

    #[tokio::test]
    async fn discover_without_device_source_fails() {
        let reconciler = reconciler();
        assert!(matches!(
            reconciler.discover().await,
            Err(DiscoveryError::Host(HostError::Params(_)) | DiscoveryError::Config(_))
        ));
        assert!(!reconciler.is_running());
    }
}
