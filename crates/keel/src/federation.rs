//! Federation status for replicating backends.
//!
//! The replicated backend exposes its peer operations through
//! [`FederationPort`]; the [`Coordinator`] turns them into per-peer
//! accounting. Backends without a port (memory, embedded) make the whole
//! component report "not applicable" instead of failing.
//!
//! Every call into the port and every reachability probe runs under the
//! configured timeout. A timeout counts as "unreachable".

use crate::domain::IssueId;
use crate::error::{Error, Result};
use crate::storage::IssueStorage;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Default bound on each peer call and probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Remote that is treated as a plain git remote rather than a replication peer.
pub const ORIGIN: &str = "origin";

/// A configured remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remote {
    /// Remote name
    pub name: String,

    /// Where it lives
    pub endpoint: String,
}

/// Commit counts relative to one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Local commits the peer lacks
    pub local_ahead: u32,

    /// Peer commits not yet merged locally
    pub local_behind: u32,
}

/// One conflicting field of one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldConflict {
    /// Issue with concurrent writes
    pub issue_id: IssueId,

    /// Field that diverged
    pub field: String,

    /// Peer whose write conflicts
    pub peer: String,
}

/// Bulk conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Keep local values
    Ours,
    /// Take the peer's values
    Theirs,
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ours" => Ok(Self::Ours),
            "theirs" => Ok(Self::Theirs),
            other => Err(Error::Validation(format!(
                "unknown resolution strategy '{other}' (expected 'ours' or 'theirs')"
            ))),
        }
    }
}

/// Peer operations of a replicating backend.
#[async_trait]
pub trait FederationPort: Send + Sync {
    /// Every configured remote, `origin` included.
    async fn list_remotes(&self) -> Result<Vec<Remote>>;

    /// Ahead/behind counts against one remote.
    async fn sync_status(&self, peer: &str) -> Result<SyncStatus>;

    /// Open field-level conflicts.
    async fn conflicts(&self) -> Result<Vec<FieldConflict>>;

    /// Resolve every open conflict with one strategy, returning how many
    /// were resolved.
    async fn resolve_conflicts(&self, strategy: ResolutionStrategy) -> Result<usize>;

    /// `host:port` of the replication server, if one is configured.
    fn server_endpoint(&self) -> Option<String>;
}

/// Coordinator knobs.
#[derive(Debug, Clone)]
pub struct FederationSettings {
    /// Bound on each port call and probe
    pub probe_timeout: Duration,

    /// Remotes left out of peer accounting
    pub excluded_peers: Vec<String>,
}

impl Default for FederationSettings {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            excluded_peers: vec![ORIGIN.to_string()],
        }
    }
}

/// Health of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PeerState {
    /// In sync, no conflicts
    Ok,
    /// No conflicts, but the peer has commits not merged yet
    OkStale {
        /// Commits behind
        behind: u32,
    },
    /// Open conflicts attributed to this peer
    Conflicted {
        /// Conflicting fields
        count: usize,
    },
    /// The peer did not answer in time or failed
    Unreachable {
        /// What went wrong
        reason: String,
    },
}

impl PeerState {
    /// `Ok` and `OkStale` are healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Ok | Self::OkStale { .. })
    }
}

/// Accounting for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerReport {
    /// The remote
    pub remote: Remote,

    /// Counts, when the peer answered
    pub sync: Option<SyncStatus>,

    /// Derived state
    pub state: PeerState,
}

/// Full federation status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FederationReport {
    /// The backend replicates at all
    pub applicable: bool,

    /// One entry per replication peer, sorted by name
    pub peers: Vec<PeerReport>,

    /// Remotes present but excluded from accounting
    pub excluded: Vec<String>,

    /// Conflicts attributed to replication peers
    pub conflicts: Vec<FieldConflict>,

    /// Peers are configured but no replication server is reachable
    pub mode_mismatch: bool,

    /// Port failures that did not belong to a single peer
    pub errors: Vec<String>,
}

/// Peer accounting over an optional [`FederationPort`].
pub struct Coordinator<'a> {
    port: Option<&'a dyn FederationPort>,
    settings: FederationSettings,
}

impl std::fmt::Debug for Coordinator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("applicable", &self.port.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl<'a> Coordinator<'a> {
    /// Coordinator for whatever port the storage backend exposes.
    #[must_use]
    pub fn for_storage(storage: &'a dyn IssueStorage, settings: FederationSettings) -> Self {
        Self::new(storage.federation(), settings)
    }

    /// Coordinator over an explicit port.
    #[must_use]
    pub fn new(port: Option<&'a dyn FederationPort>, settings: FederationSettings) -> Self {
        Self { port, settings }
    }

    /// Whether the backend replicates.
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        self.port.is_some()
    }

    fn port(&self) -> Result<&'a dyn FederationPort> {
        self.port.ok_or_else(|| {
            Error::Unsupported("federation requires a replicating storage backend".to_string())
        })
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.settings.excluded_peers.iter().any(|p| p == name)
    }

    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.settings.probe_timeout, call)
            .await
            .map_err(|_| {
                Error::Unavailable(format!(
                    "{what} timed out after {}s",
                    self.settings.probe_timeout.as_secs_f32()
                ))
            })?
    }

    /// Replication peers, excluded remotes left out, sorted by name.
    ///
    /// # Errors
    ///
    /// - `Error::Unsupported` without a port
    /// - `Error::Unavailable` on timeout
    pub async fn list_peers(&self) -> Result<Vec<Remote>> {
        let port = self.port()?;
        let mut peers: Vec<Remote> = self
            .bounded("listing remotes", port.list_remotes())
            .await?
            .into_iter()
            .filter(|remote| !self.is_excluded(&remote.name))
            .collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(peers)
    }

    /// Ahead/behind counts against one peer.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` for an excluded peer
    /// - `Error::Unsupported` without a port
    /// - `Error::Unavailable` on timeout
    pub async fn sync_status(&self, peer: &str) -> Result<SyncStatus> {
        let port = self.port()?;
        if self.is_excluded(peer) {
            return Err(Error::NotFound {
                entity: "federation peer",
                key: peer.to_string(),
            });
        }
        self.bounded("sync status", port.sync_status(peer)).await
    }

    /// Open conflicts attributed to replication peers.
    ///
    /// # Errors
    ///
    /// - `Error::Unsupported` without a port
    /// - `Error::Unavailable` on timeout
    pub async fn conflicts(&self) -> Result<Vec<FieldConflict>> {
        let port = self.port()?;
        let mut conflicts: Vec<FieldConflict> = self
            .bounded("listing conflicts", port.conflicts())
            .await?
            .into_iter()
            .filter(|c| !self.is_excluded(&c.peer))
            .collect();
        conflicts.sort_by(|a, b| {
            a.issue_id
                .cmp(&b.issue_id)
                .then_with(|| a.field.cmp(&b.field))
                .then_with(|| a.peer.cmp(&b.peer))
        });
        Ok(conflicts)
    }

    /// Resolve every open conflict with `strategy`.
    ///
    /// # Errors
    ///
    /// - `Error::Unsupported` without a port
    /// - `Error::Unavailable` on timeout
    pub async fn resolve(&self, strategy: ResolutionStrategy) -> Result<usize> {
        let port = self.port()?;
        self.bounded("resolving conflicts", port.resolve_conflicts(strategy))
            .await
    }

    /// Gather everything into one report. Never fails: unanswered calls
    /// become unreachable peers or report errors.
    pub async fn status(&self) -> FederationReport {
        let Some(port) = self.port else {
            return FederationReport::default();
        };
        let mut report = FederationReport {
            applicable: true,
            ..FederationReport::default()
        };

        let remotes = match self.bounded("listing remotes", port.list_remotes()).await {
            Ok(remotes) => remotes,
            Err(e) => {
                warn!(error = %e, "Could not list federation remotes");
                report.errors.push(e.to_string());
                return report;
            }
        };

        let (excluded, mut peers): (Vec<Remote>, Vec<Remote>) = remotes
            .into_iter()
            .partition(|remote| self.is_excluded(&remote.name));
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        report.excluded = excluded.into_iter().map(|r| r.name).collect();

        match self.conflicts().await {
            Ok(conflicts) => report.conflicts = conflicts,
            Err(e) => {
                warn!(error = %e, "Could not list federation conflicts");
                report.errors.push(e.to_string());
            }
        }
        let mut per_peer: HashMap<&str, usize> = HashMap::new();
        for conflict in &report.conflicts {
            *per_peer.entry(conflict.peer.as_str()).or_default() += 1;
        }

        let mut peer_reports = Vec::with_capacity(peers.len());
        for remote in peers {
            let (sync, state) = match self.sync_status(&remote.name).await {
                Ok(sync) => {
                    let state = match per_peer.get(remote.name.as_str()) {
                        Some(&count) if count > 0 => PeerState::Conflicted { count },
                        _ if sync.local_behind > 0 => PeerState::OkStale {
                            behind: sync.local_behind,
                        },
                        _ => PeerState::Ok,
                    };
                    (Some(sync), state)
                }
                Err(e) => {
                    warn!(peer = %remote.name, error = %e, "Federation peer unreachable");
                    (None, PeerState::Unreachable {
                        reason: e.to_string(),
                    })
                }
            };
            debug!(peer = %remote.name, ?state, "Peer status");
            peer_reports.push(PeerReport {
                remote,
                sync,
                state,
            });
        }
        report.peers = peer_reports;

        if !report.peers.is_empty() {
            report.mode_mismatch = match port.server_endpoint() {
                Some(endpoint) => !probe_endpoint(&endpoint, self.settings.probe_timeout).await,
                None => true,
            };
        }
        report
    }
}

/// Whether a TCP connection to `endpoint` succeeds within `timeout`.
///
/// Accepts `host:port`, optionally with a URL scheme and path
/// (`http://host:port/db`).
pub async fn probe_endpoint(endpoint: &str, timeout: Duration) -> bool {
    let address = endpoint
        .split_once("://")
        .map_or(endpoint, |(_, rest)| rest);
    let address = address.split('/').next().unwrap_or(address);

    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(%address, error = %e, "Probe failed");
            false
        }
        Err(_) => {
            debug!(%address, "Probe timed out");
            false
        }
    }
}

/// Canned [`FederationPort`] for tests.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Default)]
pub struct FakeFederation {
    /// Remotes returned by `list_remotes`
    pub remotes: Vec<Remote>,
    /// Per-peer counts; a missing peer answers `Unavailable`
    pub status: HashMap<String, SyncStatus>,
    /// Open conflicts
    pub conflicts: Vec<FieldConflict>,
    /// Returned by `server_endpoint`
    pub server: Option<String>,
    /// Peers whose status call never completes
    pub hanging: Vec<String>,
}

#[cfg(any(test, feature = "test-util"))]
impl FakeFederation {
    /// Add a remote with its counts.
    #[must_use]
    pub fn with_peer(mut self, name: &str, ahead: u32, behind: u32) -> Self {
        self.remotes.push(Remote {
            name: name.to_string(),
            endpoint: format!("{name}.example:3306"),
        });
        self.status.insert(
            name.to_string(),
            SyncStatus {
                local_ahead: ahead,
                local_behind: behind,
            },
        );
        self
    }

    /// Add a conflict.
    #[must_use]
    pub fn with_conflict(mut self, issue_id: &str, field: &str, peer: &str) -> Self {
        self.conflicts.push(FieldConflict {
            issue_id: IssueId::new(issue_id),
            field: field.to_string(),
            peer: peer.to_string(),
        });
        self
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl FederationPort for FakeFederation {
    async fn list_remotes(&self) -> Result<Vec<Remote>> {
        Ok(self.remotes.clone())
    }

    async fn sync_status(&self, peer: &str) -> Result<SyncStatus> {
        if self.hanging.iter().any(|p| p == peer) {
            std::future::pending::<()>().await;
        }
        self.status
            .get(peer)
            .copied()
            .ok_or_else(|| Error::Unavailable(format!("peer {peer} did not answer")))
    }

    async fn conflicts(&self) -> Result<Vec<FieldConflict>> {
        Ok(self.conflicts.clone())
    }

    async fn resolve_conflicts(&self, _strategy: ResolutionStrategy) -> Result<usize> {
        Ok(self.conflicts.len())
    }

    fn server_endpoint(&self) -> Option<String> {
        self.server.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::id_generation::IdGeneratorConfig;
    use crate::storage::{MemoryStorage, MockStorage};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn fast() -> FederationSettings {
        FederationSettings {
            probe_timeout: Duration::from_millis(200),
            ..FederationSettings::default()
        }
    }

    #[tokio::test]
    async fn origin_is_excluded_from_accounting() {
        let fake = FakeFederation::default()
            .with_peer("origin", 3, 7)
            .with_peer("alice", 0, 2)
            .with_conflict("p-1", "title", "origin");
        let coordinator = Coordinator::new(Some(&fake), fast());

        let peers = coordinator.list_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "alice");
        assert!(coordinator.conflicts().await.unwrap().is_empty());
        assert_eq!(
            coordinator.sync_status("origin").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let report = coordinator.status().await;
        assert_eq!(report.excluded, vec!["origin".to_string()]);
        assert_eq!(report.peers.len(), 1);
        assert!(report.conflicts.is_empty());
    }

    #[tokio::test]
    async fn behind_peer_without_conflicts_is_stale_not_error() {
        let fake = FakeFederation::default().with_peer("alice", 1, 4);
        let report = Coordinator::new(Some(&fake), fast()).status().await;

        assert_eq!(report.peers[0].state, PeerState::OkStale { behind: 4 });
        assert!(report.peers[0].state.is_healthy());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn conflicts_are_counted_per_peer() {
        let fake = FakeFederation::default()
            .with_peer("alice", 0, 0)
            .with_peer("bob", 0, 3)
            .with_conflict("p-1", "title", "bob")
            .with_conflict("p-1", "priority", "bob");
        let report = Coordinator::new(Some(&fake), fast()).status().await;

        assert_eq!(report.peers[0].state, PeerState::Ok);
        assert_eq!(report.peers[1].state, PeerState::Conflicted { count: 2 });
        assert_eq!(report.conflicts.len(), 2);
    }

    #[tokio::test]
    async fn silent_peer_times_out_as_unreachable() {
        let mut fake = FakeFederation::default().with_peer("alice", 0, 0);
        fake.hanging.push("alice".to_string());
        let report = Coordinator::new(Some(&fake), fast()).status().await;

        assert!(matches!(
            report.peers[0].state,
            PeerState::Unreachable { .. }
        ));
    }

    #[tokio::test]
    async fn peers_without_server_are_a_mode_mismatch() {
        let fake = FakeFederation::default().with_peer("alice", 0, 0);
        let report = Coordinator::new(Some(&fake), fast()).status().await;
        assert!(report.mode_mismatch);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut fake = fake;
        fake.server = Some(listener.local_addr().unwrap().to_string());
        let report = Coordinator::new(Some(&fake), fast()).status().await;
        assert!(!report.mode_mismatch);
    }

    #[tokio::test]
    async fn probe_handles_schemes_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(probe_endpoint(&format!("http://{addr}/db"), Duration::from_secs(1)).await);

        drop(listener);
        assert!(!probe_endpoint(&addr.to_string(), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn embedded_backends_are_not_applicable() {
        let storage = MemoryStorage::new(IdGeneratorConfig::new("p"));
        let coordinator = Coordinator::for_storage(&storage, fast());

        assert!(!coordinator.is_applicable());
        assert!(!coordinator.status().await.applicable);
        assert_eq!(
            coordinator.list_peers().await.unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }

    #[tokio::test]
    async fn mock_storage_exposes_its_port() {
        let fake = FakeFederation::default().with_peer("alice", 0, 0);
        let storage = MockStorage::new("p").with_federation(Arc::new(fake));
        let coordinator = Coordinator::for_storage(&storage, fast());

        assert!(coordinator.is_applicable());
        assert_eq!(coordinator.resolve(ResolutionStrategy::Theirs).await.unwrap(), 0);
    }

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!("Ours".parse::<ResolutionStrategy>().unwrap(), ResolutionStrategy::Ours);
        assert!("mine".parse::<ResolutionStrategy>().is_err());
    }
}
