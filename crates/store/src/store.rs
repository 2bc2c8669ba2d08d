// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Artifact Store (component C): durable CRUD over [`Artifact`] rows
//! with optimistic locking, soft delete, TTL-based expiry, and compose.
//!
//! Every mutating call takes a single lock covering both the WAL append
//! (the durability point) and the in-memory index apply (the visibility
//! point), so a caller observing a successful `store`/`delete` is always
//! looking at durable state.

use crate::checkpoint::{load_compressed_snapshot, CheckpointError, Checkpointer};
use crate::index::ArtifactIndex;
use crate::policy::TtlPolicy;
use crate::wal::{ArtifactMutation, Wal, WalError};
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;
use wf_core::{normalize, Artifact, ArtifactOrderBy, ArtifactStoreError, Clock, IdGen, StoreMode, SystemClock, UlidIdGen};

const DEFAULT_WORKSPACE: &str = "default";
const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 100;
const EXPIRED_SWEEP_INTERVAL_MS: i64 = 5 * 60 * 1000;
const EXPIRED_SWEEP_BATCH: usize = 100;

/// Errors opening a store at rest (snapshot/WAL recovery).
#[derive(Debug, Error)]
pub enum StoreOpenError {
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Snapshot(#[from] crate::snapshot::SnapshotError),
}

/// Inputs to [`ArtifactStore::store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub workspace: Option<String>,
    pub name: Option<String>,
    pub kind: String,
    pub data: serde_json::Value,
    pub text: Option<String>,
    pub run_id: Option<String>,
    pub phase: Option<String>,
    pub role: Option<String>,
    pub tags: Option<Vec<String>>,
    pub schema_version: Option<String>,
    /// `None` = omitted (create: no expiry; update: clears expiry).
    /// `Some(None)` = explicit `null` (no expiry).
    /// `Some(Some(secs))` = expires `secs` seconds from the write.
    pub ttl_seconds: Option<Option<i64>>,
    pub expected_version: Option<u64>,
    pub mode: StoreMode,
}

/// Inputs to [`ArtifactStore::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub id: Option<String>,
    pub workspace: Option<String>,
    pub name: Option<String>,
    pub include_expired: bool,
    pub include_deleted: bool,
}

/// Inputs to [`ArtifactStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub workspace: Option<String>,
    pub kind: Option<String>,
    pub run_id: Option<String>,
    pub phase: Option<String>,
    pub role: Option<String>,
    pub include_expired: bool,
    pub include_deleted: bool,
    pub order_by: ArtifactOrderBy,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Result of [`ArtifactStore::list`]. `items` never carry `text`.
#[derive(Debug, Clone)]
pub struct ListResult {
    pub items: Vec<Artifact>,
    pub has_more: bool,
}

/// One reference to resolve in a [`ComposeOptions::refs`] list.
#[derive(Debug, Clone, Default)]
pub struct ComposeRef {
    pub id: Option<String>,
    pub workspace: Option<String>,
    pub name: Option<String>,
}

/// Inputs to [`ArtifactStore::compose`].
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub refs: Vec<ComposeRef>,
    pub format: ComposeFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposeFormat {
    #[default]
    Markdown,
    Json,
}

#[derive(Debug, Clone)]
pub struct ComposeItem {
    pub id: String,
    pub name: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum ComposeResult {
    Json { parts: Vec<ComposeItem> },
    Markdown { text: String },
}

/// Inputs to [`ArtifactStore::delete`].
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub id: Option<String>,
    pub workspace: Option<String>,
    pub name: Option<String>,
}

enum Address {
    Id(String),
    Name(String, String),
}

fn resolve_address(
    id: &Option<String>,
    workspace: &Option<String>,
    name: &Option<String>,
) -> Result<Address, ArtifactStoreError> {
    match (id, workspace, name) {
        (Some(_), None, None) => Ok(Address::Id(id.clone().unwrap_or_default())),
        (Some(_), _, _) => Err(ArtifactStoreError::AmbiguousAddressing),
        (None, Some(ws), Some(n)) => Ok(Address::Name(normalize(ws), normalize(n))),
        (None, None, Some(_)) => Err(ArtifactStoreError::InvalidRequest {
            message: "name requires workspace".to_string(),
        }),
        (None, _, None) => Err(ArtifactStoreError::InvalidRequest {
            message: "must address by id or (workspace, name)".to_string(),
        }),
    }
}

struct Inner {
    index: ArtifactIndex,
    wal: Wal,
    last_sweep_ms: Option<i64>,
}

/// The durable artifact store. Generic over the clock and id generator so
/// tests can swap in [`wf_core::FakeClock`] / a deterministic [`IdGen`].
pub struct ArtifactStore<C: Clock = SystemClock, G: IdGen = UlidIdGen> {
    inner: Mutex<Inner>,
    checkpointer: Checkpointer,
    clock: C,
    id_gen: G,
    policy: TtlPolicy,
}

impl ArtifactStore<SystemClock, UlidIdGen> {
    /// Open (or create) a store backed by `dir`, replaying WAL entries on
    /// top of the last snapshot.
    pub fn open(dir: &Path) -> Result<Self, StoreOpenError> {
        Self::open_with(dir, SystemClock, UlidIdGen)
    }
}

impl<C: Clock, G: IdGen> ArtifactStore<C, G> {
    pub fn open_with(dir: &Path, clock: C, id_gen: G) -> Result<Self, StoreOpenError> {
        let snapshot_path = dir.join("snapshot.zst");
        let wal_path = dir.join("wal.jsonl");

        let snapshot = load_compressed_snapshot(&snapshot_path)?;
        let (mut index, snapshot_seq) = match snapshot {
            Some(s) => (s.state, s.seq),
            None => (ArtifactIndex::new(), 0),
        };

        let wal = Wal::open(&wal_path, snapshot_seq)?;
        for entry in wal.entries_after(snapshot_seq)? {
            index.apply(entry.mutation);
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                index,
                wal,
                last_sweep_ms: None,
            }),
            checkpointer: Checkpointer::new(snapshot_path),
            clock,
            id_gen,
            policy: TtlPolicy,
        })
    }

    /// Durably compact: write a fresh snapshot and truncate the WAL entries
    /// it now covers. Safe to call at any time; not required for
    /// correctness, only for bounding WAL growth and restart time.
    pub fn checkpoint(&self) -> Result<(), CheckpointError> {
        let mut inner = self.inner.lock();
        let seq = inner.wal.write_seq();
        let now = self.clock.now_ms();
        self.checkpointer.checkpoint_sync(seq, &inner.index, now)?;
        inner.wal.truncate_before(seq + 1)?;
        Ok(())
    }

    fn serialized_len(data: &serde_json::Value) -> Result<usize, ArtifactStoreError> {
        serde_json::to_string(data)
            .map(|s| s.chars().count())
            .map_err(|e| ArtifactStoreError::InvalidRequest {
                message: format!("data not serializable: {e}"),
            })
    }

    fn append_and_apply(&self, inner: &mut Inner, mutation: ArtifactMutation) -> Result<(), ArtifactStoreError> {
        inner.wal.append(&mutation).map_err(wal_err)?;
        inner.wal.flush().map_err(wal_err)?;
        inner.index.apply(mutation);
        Ok(())
    }

    /// Create or update an artifact. See §4.1 for the full decision table.
    pub fn store(&self, opts: StoreOptions) -> Result<Artifact, ArtifactStoreError> {
        let size_cap = self.policy.size_cap_for(&opts.kind);
        let data_len = Self::serialized_len(&opts.data)?;
        if data_len > size_cap {
            return Err(ArtifactStoreError::DataTooLarge {
                kind: opts.kind.clone(),
                len: data_len,
                limit: size_cap,
            });
        }
        if let Some(text) = &opts.text {
            let text_len = text.chars().count();
            if text_len > crate::policy::TEXT_SIZE_CAP {
                return Err(ArtifactStoreError::TextTooLarge {
                    len: text_len,
                    limit: crate::policy::TEXT_SIZE_CAP,
                });
            }
        }

        let workspace = opts.workspace.clone().unwrap_or_else(|| DEFAULT_WORKSPACE.to_string());
        let workspace_norm = normalize(&workspace);

        let ttl_seconds = opts.ttl_seconds.unwrap_or(None);
        self.policy
            .validate_required_ttl(&opts.kind, ttl_seconds.map(|v| v as f64))?;

        let mut inner = self.inner.lock();
        let now = self.clock.now_ms();

        let artifact = if let Some(expected_version) = opts.expected_version {
            self.build_update(&mut inner, &opts, &workspace, &workspace_norm, expected_version, now)?
        } else {
            self.build_create_or_collide(&mut inner, &opts, &workspace, &workspace_norm, now)?
        };

        self.maybe_sweep_expired(&mut inner, now);

        Ok(artifact)
    }

    fn build_update(
        &self,
        inner: &mut Inner,
        opts: &StoreOptions,
        workspace: &str,
        workspace_norm: &str,
        expected_version: u64,
        now: i64,
    ) -> Result<Artifact, ArtifactStoreError> {
        let Some(name) = &opts.name else {
            return Err(ArtifactStoreError::InvalidRequest {
                message: "expected_version requires name".to_string(),
            });
        };
        let name_norm = normalize(name);

        let existing_id = inner.index.active_id_by_name(workspace_norm, &name_norm).map(str::to_string);
        let existing = existing_id.as_deref().and_then(|id| inner.index.get(id)).cloned();

        let Some(existing) = existing else {
            return Err(ArtifactStoreError::NotFound {
                addr: format!("{workspace_norm}/{name_norm}"),
            });
        };
        if existing.is_expired(now) {
            return Err(ArtifactStoreError::NotFound {
                addr: format!("{workspace_norm}/{name_norm}"),
            });
        }
        if existing.version != expected_version {
            return Err(ArtifactStoreError::VersionMismatch {
                id: existing.id.0.clone(),
                expected: expected_version,
                found: existing.version,
            });
        }

        let new_version = expected_version + 1;
        let artifact = self.replace_row(opts, workspace, workspace_norm, existing.id.0.clone(), existing.created_at, new_version, now);

        self.append_and_apply(inner, ArtifactMutation::Put { artifact: artifact.clone() })?;
        Ok(artifact)
    }

    fn build_create_or_collide(
        &self,
        inner: &mut Inner,
        opts: &StoreOptions,
        workspace: &str,
        workspace_norm: &str,
        now: i64,
    ) -> Result<Artifact, ArtifactStoreError> {
        if let Some(name) = &opts.name {
            let name_norm = normalize(name);
            let existing_id = inner.index.active_id_by_name(workspace_norm, &name_norm).map(str::to_string);
            let existing = existing_id.as_deref().and_then(|id| inner.index.get(id)).cloned();

            if let Some(existing) = existing {
                if existing.is_expired(now) {
                    let delete = ArtifactMutation::SoftDelete {
                        id: existing.id.0.clone(),
                        deleted_at: now,
                    };
                    self.append_and_apply(inner, delete)?;

                    let artifact = self.new_row(opts, workspace, workspace_norm, now);
                    self.append_and_apply(inner, ArtifactMutation::Put { artifact: artifact.clone() })?;
                    return Ok(artifact);
                }

                if opts.mode == StoreMode::Replace {
                    let new_version = existing.version + 1;
                    let artifact = self.replace_row(
                        opts,
                        workspace,
                        workspace_norm,
                        existing.id.0.clone(),
                        existing.created_at,
                        new_version,
                        now,
                    );
                    self.append_and_apply(inner, ArtifactMutation::Put { artifact: artifact.clone() })?;
                    return Ok(artifact);
                }

                return Err(ArtifactStoreError::NameAlreadyExists {
                    workspace: workspace.to_string(),
                    name: name.clone(),
                });
            }
        }

        let artifact = self.new_row(opts, workspace, workspace_norm, now);
        self.append_and_apply(inner, ArtifactMutation::Put { artifact: artifact.clone() })?;
        Ok(artifact)
    }

    fn new_row(&self, opts: &StoreOptions, workspace: &str, workspace_norm: &str, now: i64) -> Artifact {
        let ttl_seconds = opts.ttl_seconds.unwrap_or(None);
        let name = opts.name.clone();
        let name_norm = name.as_deref().map(normalize);
        Artifact {
            id: wf_core::ArtifactId::new(self.id_gen.next()),
            workspace: workspace.to_string(),
            workspace_norm: workspace_norm.to_string(),
            name,
            name_norm,
            kind: opts.kind.clone(),
            data: opts.data.clone(),
            text: opts.text.clone(),
            run_id: opts.run_id.clone(),
            phase: opts.phase.clone(),
            role: opts.role.clone(),
            tags: opts.tags.clone().unwrap_or_default(),
            schema_version: opts.schema_version.clone(),
            version: 1,
            ttl_seconds,
            expires_at: ttl_seconds.map(|secs| now + secs * 1000),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn replace_row(
        &self,
        opts: &StoreOptions,
        workspace: &str,
        workspace_norm: &str,
        id: String,
        created_at: i64,
        new_version: u64,
        now: i64,
    ) -> Artifact {
        let ttl_seconds = opts.ttl_seconds.unwrap_or(None);
        let name = opts.name.clone();
        let name_norm = name.as_deref().map(normalize);
        Artifact {
            id: wf_core::ArtifactId::new(id),
            workspace: workspace.to_string(),
            workspace_norm: workspace_norm.to_string(),
            name,
            name_norm,
            kind: opts.kind.clone(),
            data: opts.data.clone(),
            text: opts.text.clone(),
            run_id: opts.run_id.clone(),
            phase: opts.phase.clone(),
            role: opts.role.clone(),
            tags: opts.tags.clone().unwrap_or_default(),
            schema_version: opts.schema_version.clone(),
            version: new_version,
            ttl_seconds,
            expires_at: ttl_seconds.map(|secs| now + secs * 1000),
            created_at,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Fetch a single artifact by id or by `(workspace, name)`.
    pub fn fetch(&self, opts: FetchOptions) -> Result<Option<Artifact>, ArtifactStoreError> {
        let address = resolve_address(&opts.id, &opts.workspace, &opts.name)?;
        let inner = self.inner.lock();
        let now = self.clock.now_ms();

        let row = match address {
            Address::Id(id) => inner.index.get(&id).cloned(),
            Address::Name(workspace_norm, name_norm) => {
                if !opts.include_deleted {
                    inner
                        .index
                        .active_id_by_name(&workspace_norm, &name_norm)
                        .and_then(|id| inner.index.get(id))
                        .cloned()
                } else {
                    let mut candidates: Vec<Artifact> = inner
                        .index
                        .iter()
                        .filter(|a| a.workspace_norm == workspace_norm && a.name_norm.as_deref() == Some(name_norm.as_str()))
                        .cloned()
                        .collect();
                    candidates.sort_by(|a, b| {
                        a.is_deleted()
                            .cmp(&b.is_deleted())
                            .then(b.updated_at.cmp(&a.updated_at))
                            .then(b.id.0.cmp(&a.id.0))
                    });
                    candidates.into_iter().next()
                }
            }
        };

        let Some(row) = row else {
            return Ok(None);
        };
        if row.is_deleted() && !opts.include_deleted {
            return Ok(None);
        }
        if row.is_expired(now) && !opts.include_expired {
            return Ok(None);
        }
        Ok(Some(row))
    }

    /// List artifacts matching the given filters, newest first.
    pub fn list(&self, opts: ListOptions) -> Result<ListResult, ArtifactStoreError> {
        let inner = self.inner.lock();
        let now = self.clock.now_ms();

        let workspace_norm = opts.workspace.as_deref().map(normalize);

        let mut items: Vec<Artifact> = inner
            .index
            .iter()
            .filter(|a| workspace_norm.as_deref().is_none_or(|ws| a.workspace_norm == ws))
            .filter(|a| opts.kind.as_deref().is_none_or(|k| a.kind == k))
            .filter(|a| opts.run_id.as_deref().is_none_or(|r| a.run_id.as_deref() == Some(r)))
            .filter(|a| opts.phase.as_deref().is_none_or(|p| a.phase.as_deref() == Some(p)))
            .filter(|a| opts.role.as_deref().is_none_or(|r| a.role.as_deref() == Some(r)))
            .filter(|a| opts.include_deleted || !a.is_deleted())
            .filter(|a| opts.include_expired || !a.is_expired(now))
            .cloned()
            .collect();

        items.sort_by(|a, b| {
            let key = |x: &Artifact| match opts.order_by {
                ArtifactOrderBy::UpdatedAt => x.updated_at,
                ArtifactOrderBy::CreatedAt => x.created_at,
            };
            key(b).cmp(&key(a)).then(b.id.0.cmp(&a.id.0))
        });

        let offset = opts.offset.unwrap_or(0);
        let limit = opts.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);

        let windowed: Vec<Artifact> = items.into_iter().skip(offset).take(limit + 1).collect();
        let has_more = windowed.len() > limit;
        let mut page: Vec<Artifact> = windowed.into_iter().take(limit).collect();
        for item in &mut page {
            item.text = None;
        }

        Ok(ListResult { items: page, has_more })
    }

    /// Resolve and combine multiple artifacts into one document.
    pub fn compose(&self, opts: ComposeOptions) -> Result<ComposeResult, ArtifactStoreError> {
        let inner = self.inner.lock();
        let now = self.clock.now_ms();

        let mut resolved = Vec::with_capacity(opts.refs.len());
        for r in &opts.refs {
            let address = resolve_address(&r.id, &r.workspace, &r.name)?;
            let row = match &address {
                Address::Id(id) => inner.index.get(id).cloned(),
                Address::Name(workspace_norm, name_norm) => inner
                    .index
                    .active_id_by_name(workspace_norm, name_norm)
                    .and_then(|id| inner.index.get(id))
                    .cloned(),
            };
            let addr_label = match &address {
                Address::Id(id) => id.clone(),
                Address::Name(ws, n) => format!("{ws}/{n}"),
            };
            let row = row.filter(|a| !a.is_deleted() && !a.is_expired(now));
            let row = row.ok_or(ArtifactStoreError::NotFound { addr: addr_label })?;
            resolved.push(row);
        }

        match opts.format {
            ComposeFormat::Json => {
                let parts = resolved
                    .into_iter()
                    .map(|a| ComposeItem {
                        id: a.id.0,
                        name: a.name,
                        data: a.data,
                    })
                    .collect();
                Ok(ComposeResult::Json { parts })
            }
            ComposeFormat::Markdown => {
                let mut sections = Vec::with_capacity(resolved.len());
                for a in &resolved {
                    let Some(text) = &a.text else {
                        return Err(ArtifactStoreError::ComposeMissingText { id: a.id.0.clone() });
                    };
                    let header = match (&a.role, &a.name) {
                        (Some(role), Some(name)) => format!("## {}: {role} ({name})", a.kind),
                        (Some(role), None) => format!("## {}: {role} ({})", a.kind, a.id.0),
                        (None, Some(name)) => format!("## {} ({name})", a.kind),
                        (None, None) => format!("## {} ({})", a.kind, a.id.0),
                    };
                    sections.push(format!("{header}\n\n{text}\n---"));
                }
                Ok(ComposeResult::Markdown { text: sections.join("\n\n") })
            }
        }
    }

    /// Soft-delete an artifact. Idempotent: a missing row is a silent
    /// success, and a second delete leaves `deleted_at` unchanged.
    pub fn delete(&self, opts: DeleteOptions) -> Result<(), ArtifactStoreError> {
        let address = resolve_address(&opts.id, &opts.workspace, &opts.name)?;
        let mut inner = self.inner.lock();
        let now = self.clock.now_ms();

        let id = match address {
            Address::Id(id) => Some(id),
            Address::Name(workspace_norm, name_norm) => inner
                .index
                .active_id_by_name(&workspace_norm, &name_norm)
                .map(str::to_string),
        };

        let Some(id) = id else {
            return Ok(());
        };
        let Some(row) = inner.index.get(&id) else {
            return Ok(());
        };
        if row.is_deleted() {
            return Ok(());
        }

        self.append_and_apply(&mut inner, ArtifactMutation::SoftDelete { id, deleted_at: now })
    }

    fn maybe_sweep_expired(&self, inner: &mut Inner, now: i64) {
        let due = match inner.last_sweep_ms {
            Some(last) => now - last >= EXPIRED_SWEEP_INTERVAL_MS,
            None => true,
        };
        if !due {
            return;
        }
        inner.last_sweep_ms = Some(now);

        let expired_ids: Vec<String> = inner
            .index
            .iter()
            .filter(|a| !a.is_deleted() && a.is_expired(now))
            .take(EXPIRED_SWEEP_BATCH)
            .map(|a| a.id.0.clone())
            .collect();

        for id in expired_ids {
            let mutation = ArtifactMutation::SoftDelete { id, deleted_at: now };
            // Best-effort: a WAL write failure here must not fail the
            // caller's store() — the row is simply swept on a later pass.
            if inner.wal.append(&mutation).is_ok() {
                let _ = inner.wal.flush();
                inner.index.apply(mutation);
            }
        }
    }
}

fn wal_err(e: WalError) -> ArtifactStoreError {
    ArtifactStoreError::InvalidRequest {
        message: format!("wal error: {e}"),
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
