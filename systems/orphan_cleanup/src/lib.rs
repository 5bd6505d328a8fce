#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Orphan reconciliation: cleans up runner entities that outlived a crash.
//!
//! The entity store is crash-unsafe: if the process dies between a spawn
//! and its despawn, the entity survives with no owning record. Identities
//! of entities that might be in that state are tracked in memory, written
//! to a ledger file at shutdown, and read back at startup. A detection
//! scan over the store's live entities then flags every tracked identity
//! that no current runner claims, and removal runs through the owning
//! world's task queue with a single retry.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use pacer_core::{EntityHandle, RunnerIdentity, WorldId, WorldTask};
use thiserror::Error;
use tracing::warn;

/// Failures raised while reading or writing the orphan ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger file could not be read or written.
    #[error("ledger io failure at {path}: {source}")]
    Io {
        /// Path of the ledger file.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
    /// The ledger contents could not be serialised.
    #[error("ledger serialisation failure: {0}")]
    Serialise(#[from] serde_json::Error),
}

/// Durable file holding the identities awaiting cleanup across restarts.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Creates a ledger backed by the given file path.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Reads and consumes the ledger left by the previous process.
    ///
    /// The file is deleted after a successful read so identities are
    /// handed over exactly once. Entries that do not parse as UUIDs are
    /// skipped with a warning rather than failing the whole load. A
    /// missing file simply yields an empty set.
    pub fn consume(&self) -> Result<BTreeSet<RunnerIdentity>, LedgerError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeSet::new())
            }
            Err(err) => {
                return Err(LedgerError::Io {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };

        let entries: Vec<String> = serde_json::from_str(&raw)?;
        let mut identities = BTreeSet::new();
        for entry in entries {
            match entry.parse::<uuid::Uuid>() {
                Ok(value) => {
                    let _ = identities.insert(RunnerIdentity::new(value));
                }
                Err(err) => warn!(entry = %entry, %err, "skipping malformed ledger entry"),
            }
        }

        fs::remove_file(&self.path).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(identities)
    }

    /// Writes the identities still awaiting cleanup.
    ///
    /// An empty set deletes the file instead of leaving an empty ledger
    /// behind. The write goes through a temporary file renamed into place
    /// so a crash mid-write never corrupts an existing ledger.
    pub fn store(&self, identities: &BTreeSet<RunnerIdentity>) -> Result<(), LedgerError> {
        if identities.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(LedgerError::Io {
                    path: self.path.clone(),
                    source,
                }),
            };
        }

        let entries: Vec<String> = identities
            .iter()
            .map(|identity| identity.get().to_string())
            .collect();
        let serialised = serde_json::to_string_pretty(&entries)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, serialised).map_err(|source| LedgerError::Io {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    awaiting: BTreeSet<RunnerIdentity>,
    retried: BTreeSet<RunnerIdentity>,
    parked: BTreeSet<RunnerIdentity>,
}

/// In-memory set of identities that may denote abandoned entities.
///
/// Shared between the tick loop, which adopts identities and resolves
/// removals, and the detection scan, which reads the awaiting set.
#[derive(Clone, Debug, Default)]
pub struct Tracker {
    state: Arc<Mutex<TrackerState>>,
}

impl Tracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts an identity into the awaiting set.
    pub fn adopt(&self, identity: RunnerIdentity) {
        let mut state = self.lock();
        let _ = state.awaiting.insert(identity);
    }

    /// Adopts every identity from a consumed ledger.
    pub fn adopt_all(&self, identities: BTreeSet<RunnerIdentity>) {
        let mut state = self.lock();
        state.awaiting.extend(identities);
    }

    /// Copies every tracked identity, for shutdown persistence.
    #[must_use]
    pub fn awaiting(&self) -> BTreeSet<RunnerIdentity> {
        self.lock().awaiting.clone()
    }

    /// Copies the identities a detection scan should still flag.
    ///
    /// Parked identities stay in the awaiting set for persistence but are
    /// excluded here, so a permanently stuck entity cannot wedge the scan.
    #[must_use]
    pub fn pending(&self) -> BTreeSet<RunnerIdentity> {
        let state = self.lock();
        state.awaiting.difference(&state.parked).copied().collect()
    }

    /// Applies the outcome of a removal task.
    ///
    /// A failed removal is retried once: the identity stays flagged for
    /// the next scan. A second failure parks the identity as possibly
    /// still present, leaving it to a later session via the ledger.
    pub fn resolve(&self, identity: RunnerIdentity, removed: bool) {
        let mut state = self.lock();
        if removed {
            let _ = state.awaiting.remove(&identity);
            let _ = state.retried.remove(&identity);
            let _ = state.parked.remove(&identity);
            return;
        }
        if state.retried.insert(identity) {
            warn!(identity = %identity.get(), "orphan removal failed, will retry once");
        } else {
            let _ = state.parked.insert(identity);
            warn!(
                identity = %identity.get(),
                "orphan removal failed twice, leaving it for the next session"
            );
        }
    }

    /// Number of identities currently awaiting cleanup.
    #[must_use]
    pub fn awaiting_len(&self) -> usize {
        self.lock().awaiting.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One entity encountered by a detection scan over the store.
#[derive(Clone, Debug, PartialEq)]
pub struct EncounteredEntity {
    /// Durable identity the store reports for the entity.
    pub identity: RunnerIdentity,
    /// Handle for driving the entity.
    pub handle: EntityHandle,
    /// World the entity lives in.
    pub world: WorldId,
}

/// Flags encountered entities that are tracked but unclaimed.
///
/// An entity is an orphan only when its identity sits in the awaiting set
/// and no live runner or in-flight despawn claims it. Removal tasks run
/// on the owning world's queue like every other entity mutation.
pub fn inspect(
    encountered: &[EncounteredEntity],
    awaiting: &BTreeSet<RunnerIdentity>,
    active: &BTreeSet<RunnerIdentity>,
    out_tasks: &mut Vec<WorldTask>,
) {
    let mut flagged = BTreeSet::new();
    for entity in encountered {
        if !awaiting.contains(&entity.identity) || active.contains(&entity.identity) {
            continue;
        }
        if !flagged.insert(entity.identity) {
            continue;
        }
        out_tasks.push(WorldTask::RemoveOrphan {
            world: entity.world.clone(),
            identity: entity.identity,
            handle: entity.handle,
        });
    }
}
