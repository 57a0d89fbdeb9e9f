//! Browser pool — the facade clients drive.
//!
//! [`BrowserPool`] is an explicitly owned value (a cheap `Arc` handle, no
//! process-wide singleton) that composes the slot table, the lifecycle
//! supervision in `supervisor`, and the container runtime behind the
//! [`ContainerRuntime`] trait. Agent links feed a single dispatch task;
//! everything else is a direct async call into the table's write lock.

pub mod slot;
pub mod table;

mod supervisor;
mod webhook;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent::{AgentLink, LinkSignal};
use crate::config::PoolSettings;
use crate::docker::{ensure_available, ContainerRuntime, DockerError};

use slot::{SessionInfo, Slot, SlotState, Viewport};
use table::SlotTable;

pub use webhook::WebhookReport;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Docker(#[from] DockerError),
    #[error("unknown slot: {0}")]
    UnknownSlot(String),
    #[error("slot {0} is not leased")]
    NotLeased(String),
    #[error("resolution not allowed: {0}")]
    InvalidResolution(String),
    #[error("a lifecycle operation is already in flight for {0}")]
    Busy(String),
}

/// Whether this instance owns container lifecycles or merely adopts
/// containers someone else started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoolMode {
    Full,
    ManageOnly,
}

impl PoolMode {
    /// Read once at construction; the rest of the code branches on the
    /// field, never on the environment.
    pub fn from_env() -> Self {
        let value = std::env::var("MANAGE_ONLY").unwrap_or_default();
        if is_truthy(&value) {
            PoolMode::ManageOnly
        } else {
            PoolMode::Full
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "true" | "1")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub capacity: usize,
    pub used: usize,
}

pub(crate) struct PoolInner {
    pub(crate) settings: PoolSettings,
    pub(crate) mode: PoolMode,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) table: SlotTable,
    /// Agent links, keyed by slot name. Written only by the supervisor.
    pub(crate) links: DashMap<String, AgentLink>,
    /// Lease timers, keyed by slot name. At most one per slot.
    pub(crate) timers: DashMap<String, JoinHandle<()>>,
    pub(crate) signals: mpsc::UnboundedSender<LinkSignal>,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) http: reqwest::Client,
    pub(crate) default_viewport: RwLock<Viewport>,
}

#[derive(Clone)]
pub struct BrowserPool {
    pub(crate) inner: Arc<PoolInner>,
}

impl BrowserPool {
    pub fn new(settings: PoolSettings, mode: PoolMode, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let (signals, receiver) = mpsc::unbounded_channel();
        let default_viewport = settings.resolution;
        let inner = Arc::new(PoolInner {
            settings,
            mode,
            runtime,
            table: SlotTable::new(),
            links: DashMap::new(),
            timers: DashMap::new(),
            signals,
            shutting_down: AtomicBool::new(false),
            http: reqwest::Client::new(),
            default_viewport: RwLock::new(default_viewport),
        });
        tokio::spawn(dispatch_signals(Arc::downgrade(&inner), receiver));
        Self { inner }
    }

    pub fn mode(&self) -> PoolMode {
        self.inner.mode
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    // ── Init ────────────────────────────────────────────────────

    /// Bring the pool up: wait for the runtime, optionally pull the image,
    /// then create (full mode) or adopt (manage-only) every slot.
    pub async fn init(&self, pull_on_start: bool) -> Result<(), PoolError> {
        ensure_available(self.inner.runtime.as_ref()).await?;
        if pull_on_start {
            let image = self.inner.settings.browser_image_name.clone();
            info!("pulling image {}", image);
            self.inner.runtime.pull_image(&image).await?;
        }
        match self.inner.mode {
            PoolMode::Full => self.init_full().await,
            PoolMode::ManageOnly => self.init_discover().await,
        }
    }

    // ── Inspection ──────────────────────────────────────────────

    /// Snapshot of the slot table, in index order.
    pub async fn browsers(&self) -> Vec<Slot> {
        self.inner.table.snapshot().await
    }

    pub async fn summary(&self) -> PoolSummary {
        let slots = self.browsers().await;
        PoolSummary {
            capacity: slots.len(),
            used: slots
                .iter()
                .filter(|slot| matches!(slot.state, SlotState::Leased | SlotState::Expiring))
                .count(),
        }
    }

    /// Diagnostic view built from `ps` + `inspect`, bypassing the table.
    pub async fn browsers_from_runtime(&self) -> Result<Vec<Slot>, PoolError> {
        self.slots_from_runtime().await
    }

    pub async fn find_by_id(&self, id: &str) -> Option<Slot> {
        self.inner.table.find_by_agent_id(id).await
    }

    pub async fn find_by_session(&self, session_id: &str) -> Option<Slot> {
        self.inner.table.find_by_session(session_id).await
    }

    // ── Leasing ─────────────────────────────────────────────────

    /// Lease the first Ready slot in index order for `lease_minutes`.
    /// `None` when the pool is at capacity; that is not an error.
    pub async fn reserve(&self, lease_minutes: u64) -> Option<Slot> {
        let now = Utc::now();
        let deadline = now + chrono::Duration::seconds(lease_minutes as i64 * 60);
        let picked = self
            .inner
            .table
            .with_write(|slots| {
                let mut candidates: Vec<&mut Slot> = slots
                    .values_mut()
                    .filter(|slot| slot.state == SlotState::Ready && !slot.is_removing)
                    .collect();
                candidates.sort_by_key(|slot| slot.index);
                let slot = candidates.into_iter().next()?;
                slot.state = SlotState::Leased;
                slot.lease_deadline = Some(deadline);
                slot.last_used = Some(now);
                Some(slot.clone())
            })
            .await?;
        self.arm_lease_timer(&picked.name, lease_minutes);
        info!("reserved {} for {} minutes", picked.name, lease_minutes);
        Some(picked)
    }

    /// Reset a live lease's timer. Pure timer surgery: session fields are
    /// untouched.
    pub async fn extend(&self, name: &str, lease_minutes: u64) -> Result<Slot, PoolError> {
        let deadline = Utc::now() + chrono::Duration::seconds(lease_minutes as i64 * 60);
        let updated = self
            .inner
            .table
            .update(name, |slot| {
                if slot.state != SlotState::Leased {
                    return None;
                }
                slot.lease_deadline = Some(deadline);
                Some(slot.clone())
            })
            .await
            .ok_or_else(|| PoolError::UnknownSlot(name.to_string()))?;
        let slot = updated.ok_or_else(|| PoolError::NotLeased(name.to_string()))?;
        // Arming replaces (and thereby cancels) the previous timer.
        self.arm_lease_timer(name, lease_minutes);
        Ok(slot)
    }

    /// End a slot's tenancy. Repeated releases of the same slot are no-ops.
    pub async fn release(&self, name: &str) -> Result<(), PoolError> {
        self.release_slot(name, false).await
    }

    // ── Metadata ────────────────────────────────────────────────

    /// Replace the session block wholesale.
    pub async fn set_internals(&self, name: &str, session: SessionInfo) -> Result<Slot, PoolError> {
        self.update_slot(name, move |slot| slot.session = session)
            .await
    }

    pub async fn set_vnc_password(&self, name: &str, password: String) -> Result<Slot, PoolError> {
        self.update_slot(name, move |slot| slot.vnc_password = Some(password))
            .await
    }

    pub async fn set_debug(&self, name: &str, debug: bool) -> Result<Slot, PoolError> {
        self.update_slot(name, move |slot| slot.debug = debug).await
    }

    /// Record a viewport on the slot; it takes effect at the next launch.
    pub async fn set_viewport(&self, name: &str, viewport: Viewport) -> Result<Slot, PoolError> {
        self.update_slot(name, move |slot| slot.viewport = viewport)
            .await
    }

    /// Viewport applied to slots as they are recycled.
    pub async fn set_default_viewport(&self, viewport: Viewport) {
        *self.inner.default_viewport.write().await = viewport;
    }

    async fn update_slot(
        &self,
        name: &str,
        mutate: impl FnOnce(&mut Slot),
    ) -> Result<Slot, PoolError> {
        self.inner
            .table
            .update(name, |slot| {
                mutate(slot);
                slot.clone()
            })
            .await
            .ok_or_else(|| PoolError::UnknownSlot(name.to_string()))
    }

    // ── Resolution change ───────────────────────────────────────

    /// Atomic release-then-create with a new `XVFB_RESOLUTION`. Only
    /// whitelisted resolutions are accepted.
    pub async fn reinit_with_resolution(
        &self,
        name: &str,
        resolution: &str,
    ) -> Result<Slot, PoolError> {
        let viewport: Viewport = resolution
            .parse()
            .map_err(|_| PoolError::InvalidResolution(resolution.to_string()))?;
        if !viewport.is_allowed() {
            return Err(PoolError::InvalidResolution(resolution.to_string()));
        }

        let claimed = self
            .inner
            .table
            .update(name, |slot| {
                if slot.is_removing || slot.state == SlotState::Creating {
                    return None;
                }
                slot.is_removing = true;
                slot.state = SlotState::Expiring;
                slot.lease_deadline = None;
                Some(())
            })
            .await
            .ok_or_else(|| PoolError::UnknownSlot(name.to_string()))?;
        if claimed.is_none() {
            return Err(PoolError::Busy(name.to_string()));
        }

        self.cancel_lease_timer(name);
        let result = self.reinit_container(name, viewport).await;
        if let Err(e) = &result {
            warn!("resolution change failed for {}: {}", name, e);
        }
        result
    }

    // ── Shutdown ────────────────────────────────────────────────

    /// Flip the is-killing flag, then release every slot sequentially.
    /// Disconnect handlers observe the flag and never issue a new `run`.
    pub async fn shutdown(&self) {
        info!("pool shutdown requested");
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        for name in self.inner.table.names().await {
            if let Err(e) = self.release_slot(&name, true).await {
                warn!("shutdown release failed for {}: {}", name, e);
            }
        }

        // Sweep anything the per-slot releases did not own.
        let timer_names: Vec<String> =
            self.inner.timers.iter().map(|e| e.key().clone()).collect();
        for name in timer_names {
            self.cancel_lease_timer(&name);
        }
        let link_names: Vec<String> = self.inner.links.iter().map(|e| e.key().clone()).collect();
        for name in link_names {
            if let Some((_, link)) = self.inner.links.remove(&name) {
                link.close();
            }
        }
        info!("pool shutdown complete");
    }
}

async fn dispatch_signals(
    weak: Weak<PoolInner>,
    mut receiver: mpsc::UnboundedReceiver<LinkSignal>,
) {
    // Single consumer: events from one link are handled strictly in
    // arrival order.
    while let Some(signal) = receiver.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        BrowserPool { inner }.handle_signal(signal).await;
    }
}
