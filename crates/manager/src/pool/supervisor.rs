//! Lifecycle supervision — the per-slot state machine.
//!
//! Empty → Creating → Ready → Leased → Expiring → Empty. Creation and
//! release drive the container runtime; the Creating → Ready edge belongs
//! to the agent alone, via `node:setState`. All slot mutation funnels
//! through the table's write lock, and a slot whose `state` is Creating or
//! whose `is_removing` flag is set has exactly one runtime command in
//! flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentEvent, AgentLink, LinkSignal};
use crate::docker::container::{
    RunRequest, INTERNAL_APP_PORT, INTERNAL_DEBUGGER_PORT, INTERNAL_VNC_PORT,
};
use crate::docker::inventory::parse_ports_line;

use super::slot::{SessionInfo, Slot, SlotState, Viewport, LABEL_ID, LABEL_IP};
use super::{webhook, BrowserPool, PoolError, PoolMode};

/// Grace period between a disconnect and the replacement `run`, and after a
/// manage-only `restart` before the agent accepts connections again.
const RECREATE_DELAY: Duration = Duration::from_secs(2);
const RESTART_SETTLE: Duration = Duration::from_secs(2);

// ── Event dispatch ──────────────────────────────────────────────

impl BrowserPool {
    pub(crate) async fn handle_signal(&self, signal: LinkSignal) {
        match signal {
            LinkSignal::Connected { slot } => info!("agent connected for {}", slot),
            LinkSignal::Event { slot, event } => self.handle_event(&slot, event).await,
            LinkSignal::Disconnected { slot } => self.on_disconnect(&slot).await,
        }
    }

    async fn handle_event(&self, name: &str, event: AgentEvent) {
        let Some(slot) = self.inner.table.get(name).await else {
            warn!("agent event for unknown slot {}, ignoring", name);
            return;
        };

        match event {
            AgentEvent::SetState { id, ip } => {
                info!("slot {} is ready (agent id {}, ip {})", name, id, ip);
                let _ = self
                    .inner
                    .table
                    .update(name, |slot| {
                        slot.labels.insert(LABEL_ID.to_string(), id);
                        slot.labels.insert(LABEL_IP.to_string(), ip);
                        match slot.state {
                            // A live lease outranks a re-announcement.
                            SlotState::Leased | SlotState::Expiring => {}
                            _ => slot.state = SlotState::Ready,
                        }
                    })
                    .await;
            }
            AgentEvent::SetLabel { name: label, value }
            | AgentEvent::SetParam { name: label, value } => {
                if slot.agent_id().is_none() {
                    debug!(
                        "label event for {} before the agent announced itself, ignoring",
                        name
                    );
                    return;
                }
                let _ = self
                    .inner
                    .table
                    .update(name, |slot| {
                        slot.labels.insert(label, value);
                    })
                    .await;
            }
            AgentEvent::Deleted {
                is_error,
                message,
                session_data,
            } => {
                if slot.agent_id().is_none() {
                    debug!(
                        "deleted event for {} before the agent announced itself, ignoring",
                        name
                    );
                    return;
                }
                info!(
                    "slot {} reported deletion (is_error={}): {}",
                    name, is_error, message
                );
                if let Some((url, report)) =
                    webhook::eligible_report(&slot, is_error, &message, session_data.as_deref())
                {
                    let pool = self.clone();
                    tokio::spawn(async move { pool.dispatch_webhook(url, report).await });
                }
                if let Err(e) = self.release_slot(name, false).await {
                    warn!("release after node:deleted failed for {}: {}", name, e);
                }
            }
        }
    }

    async fn on_disconnect(&self, name: &str) {
        let Some(slot) = self.inner.table.get(name).await else {
            warn!("disconnect for unknown slot {}, ignoring", name);
            return;
        };
        info!("agent disconnected for {}", name);

        self.cancel_lease_timer(name);
        let _ = self
            .inner
            .table
            .update(name, |slot| {
                if matches!(slot.state, SlotState::Ready | SlotState::Leased) {
                    // An Empty slot holds no tenancy and no agent identity.
                    slot.state = SlotState::Empty;
                    slot.lease_deadline = None;
                    slot.session = SessionInfo::default();
                    slot.labels.clear();
                }
            })
            .await;

        if self.is_shutting_down() {
            debug!("shutting down, not replacing {}", name);
            return;
        }
        if self.inner.mode == PoolMode::ManageOnly {
            // Not our container to replace; the link reconnects on its own
            // and the agent re-announces once the container is back.
            return;
        }
        if slot.is_removing || matches!(slot.state, SlotState::Creating | SlotState::Expiring) {
            // A lifecycle operation owns this slot and will open a new link.
            return;
        }

        let pool = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(RECREATE_DELAY).await;
            if pool.is_shutting_down() {
                return;
            }
            if let Err(e) = pool.create_slot_container(&name).await {
                error!("re-create after disconnect failed for {}: {}", name, e);
            }
        });
    }
}

// ── Creation ────────────────────────────────────────────────────

impl BrowserPool {
    pub(crate) async fn init_full(&self) -> Result<(), PoolError> {
        let settings = self.inner.settings.clone();
        for index in 0..settings.num_browsers {
            self.inner.table.insert(Slot::new(&settings, index)).await;
        }

        for (position, name) in self.inner.table.names().await.into_iter().enumerate() {
            // Sweep leftovers from a previous incarnation.
            if let Err(e) = self.inner.runtime.kill(&name).await {
                debug!("pre-init kill of {} failed: {}", name, e);
            }
            match self.create_slot_container(&name).await {
                Ok(()) => {}
                Err(e) if position == 0 => {
                    // The operator learns immediately that the image or
                    // runtime is broken instead of N retries later.
                    error!("failed to create first slot {}: {}", name, e);
                    return Err(e);
                }
                Err(e) => error!("failed to create slot {}: {}", name, e),
            }
        }
        Ok(())
    }

    pub(crate) async fn init_discover(&self) -> Result<(), PoolError> {
        let settings = self.inner.settings.clone();
        let names = self
            .inner
            .runtime
            .list_by_prefix(&settings.browser_prefix)
            .await?;
        if names.len() > settings.num_browsers {
            warn!(
                "found {} containers with prefix {}, adopting the first {}",
                names.len(),
                settings.browser_prefix,
                settings.num_browsers
            );
        }

        for (position, name) in names.into_iter().take(settings.num_browsers).enumerate() {
            let index = derive_index(&name, settings.base_browser_port, settings.num_browsers)
                .unwrap_or(position);
            let mut slot = Slot::new(&settings, index);
            // Adopt the container's actual name; ports still derive from
            // the index.
            slot.name = name.clone();
            slot.state = SlotState::Creating;
            match self.inner.runtime.inspect(&name).await {
                Ok(details) => slot.created_at = details.created_at,
                Err(e) => debug!("inspect failed for adopted {}: {}", name, e),
            }
            info!("adopted container {} as slot index {}", name, index);
            self.inner.table.insert(slot.clone()).await;
            self.open_link(&slot);
        }
        Ok(())
    }

    /// Launch the container for one slot, retrying up to `max_retries`
    /// times. The slot is claimed by moving it to Creating under the write
    /// lock; a slot already claimed by another operation is left alone.
    pub(crate) async fn create_slot_container(&self, name: &str) -> Result<(), PoolError> {
        let claimed = self
            .inner
            .table
            .update(name, |slot| {
                if slot.state == SlotState::Creating || slot.is_removing {
                    return None;
                }
                slot.state = SlotState::Creating;
                slot.session = SessionInfo::default();
                slot.labels.clear();
                slot.lease_deadline = None;
                Some(slot.clone())
            })
            .await
            .ok_or_else(|| PoolError::UnknownSlot(name.to_string()))?;

        let Some(slot) = claimed else {
            debug!("create already in flight for {}, skipping", name);
            return Ok(());
        };

        let settings = &self.inner.settings;
        let password = generate_password();
        let request = self.run_request_for(&slot, &password);

        let mut attempt = 1;
        loop {
            match self.inner.runtime.run(&request).await {
                Ok(()) => break,
                Err(e) if attempt < settings.max_retries => {
                    warn!(
                        "run failed for {} (attempt {}/{}): {}",
                        name, attempt, settings.max_retries, e
                    );
                    tokio::time::sleep(Duration::from_millis(settings.kill_wait_time_ms)).await;
                    attempt += 1;
                }
                Err(e) => {
                    // No retry storm: the slot stays Empty until an
                    // operator or a disconnect cycle touches it again.
                    let _ = self
                        .inner
                        .table
                        .update(name, |slot| slot.state = SlotState::Empty)
                        .await;
                    return Err(e.into());
                }
            }
        }

        let _ = self
            .inner
            .table
            .update(name, |slot| {
                slot.created_at = Some(Utc::now());
                slot.vnc_password = Some(password.clone());
            })
            .await;
        self.open_link(&slot);
        info!("launched container for {}", name);
        Ok(())
    }

    fn run_request_for(&self, slot: &Slot, vnc_password: &str) -> RunRequest {
        let settings = &self.inner.settings;
        let mut env: Vec<(String, String)> = vec![
            ("XVFB_RESOLUTION".to_string(), slot.viewport.to_string()),
            ("VNC_PASSWORD".to_string(), vnc_password.to_string()),
        ];
        if let Some(pod_ip) = &settings.pod_ip {
            env.push(("BROWSER_POD_IP".to_string(), pod_ip.clone()));
        }
        // Sorted so the emitted command is stable across launches.
        let mut launch_args: Vec<_> = settings.launch_args.iter().collect();
        launch_args.sort_by_key(|(key, _)| key.as_str());
        for (key, value) in launch_args {
            env.push((key.clone(), value.clone()));
        }

        RunRequest {
            name: slot.name.clone(),
            image: settings.browser_image_name.clone(),
            env,
            ports: vec![
                (slot.ports.app, INTERNAL_APP_PORT),
                (slot.ports.debugger, INTERNAL_DEBUGGER_PORT),
                (slot.ports.vnc, INTERNAL_VNC_PORT),
            ],
            extra_args: settings.additional_docker_args.clone(),
        }
    }

    pub(crate) fn open_link(&self, slot: &Slot) {
        let host = match &self.inner.settings.connection_host {
            Some(host) => host.clone(),
            None => match self.inner.mode {
                PoolMode::Full => "localhost".to_string(),
                PoolMode::ManageOnly => slot.name.clone(),
            },
        };
        let url = format!("ws://{}:{}/events", host, slot.ports.app);
        let link = AgentLink::open(slot.name.clone(), url, self.inner.signals.clone());
        if let Some(previous) = self.inner.links.insert(slot.name.clone(), link) {
            previous.close();
        }
    }
}

// ── Release ─────────────────────────────────────────────────────

impl BrowserPool {
    /// Tear down a slot's current tenancy. `forced` releases even idle
    /// slots (used by shutdown); otherwise a slot with no lease and no
    /// session is a no-op, which also makes double-release harmless.
    pub(crate) async fn release_slot(&self, name: &str, forced: bool) -> Result<(), PoolError> {
        let claimed = self
            .inner
            .table
            .update(name, |slot| {
                if slot.is_removing {
                    return None;
                }
                let leased = matches!(slot.state, SlotState::Leased | SlotState::Expiring);
                if !leased && slot.session.is_clear() && !forced {
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
            debug!("nothing to release for {}", name);
            return Ok(());
        }

        self.cancel_lease_timer(name);
        match self.inner.mode {
            PoolMode::Full => self.release_full(name).await,
            PoolMode::ManageOnly => self.release_manage_only(name).await,
        }
    }

    async fn release_full(&self, name: &str) -> Result<(), PoolError> {
        info!("releasing {} (stop and replace)", name);
        let stop_result = self.stop_with_retries(name).await;
        // Even on a surfaced stop failure the record is reset, so the slot
        // is never stranded with is_removing set.
        self.reset_slot_record(name).await;
        stop_result?;

        if !self.is_shutting_down() {
            if let Err(e) = self.create_slot_container(name).await {
                error!("re-create after release failed for {}: {}", name, e);
            }
        }
        Ok(())
    }

    async fn release_manage_only(&self, name: &str) -> Result<(), PoolError> {
        info!("releasing {} (restart in place)", name);
        let settings = &self.inner.settings;
        let mut attempt = 1;
        loop {
            match self.inner.runtime.restart(name).await {
                Ok(()) => break,
                Err(e) if attempt < settings.max_retries => {
                    warn!(
                        "restart failed for {} (attempt {}/{}): {}",
                        name, attempt, settings.max_retries, e
                    );
                    tokio::time::sleep(Duration::from_millis(settings.kill_wait_time_ms)).await;
                    attempt += 1;
                }
                Err(e) => {
                    let _ = self
                        .inner
                        .table
                        .update(name, |slot| {
                            slot.is_removing = false;
                            slot.state = SlotState::Empty;
                        })
                        .await;
                    return Err(e.into());
                }
            }
        }

        // The restarted container needs a moment before its agent accepts
        // connections again.
        tokio::time::sleep(RESTART_SETTLE).await;

        if let Some((_, link)) = self.inner.links.remove(name) {
            link.close();
        }
        let slot = self
            .inner
            .table
            .update(name, |slot| {
                slot.session = SessionInfo::default();
                slot.lease_deadline = None;
                slot.labels.clear();
                // created_at and last_used survive a restart.
                slot.state = SlotState::Creating;
                slot.is_removing = false;
                slot.clone()
            })
            .await
            .ok_or_else(|| PoolError::UnknownSlot(name.to_string()))?;
        if !self.is_shutting_down() {
            self.open_link(&slot);
        }
        Ok(())
    }

    async fn stop_with_retries(&self, name: &str) -> Result<(), PoolError> {
        let settings = &self.inner.settings;
        let mut attempt = 1;
        loop {
            match self.inner.runtime.stop(name).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < settings.max_retries => {
                    warn!(
                        "stop failed for {} (attempt {}/{}): {}",
                        name, attempt, settings.max_retries, e
                    );
                    tokio::time::sleep(Duration::from_millis(settings.kill_wait_time_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The release half of a resolution change, followed immediately by a
    /// launch with the new viewport. The caller has already claimed the
    /// slot via `is_removing`.
    pub(crate) async fn reinit_container(
        &self,
        name: &str,
        viewport: Viewport,
    ) -> Result<Slot, PoolError> {
        let stop_result = self.stop_with_retries(name).await;
        self.reset_slot_record(name).await;
        stop_result?;

        let _ = self
            .inner
            .table
            .update(name, |slot| slot.viewport = viewport)
            .await;
        self.create_slot_container(name).await?;
        self.inner
            .table
            .get(name)
            .await
            .ok_or_else(|| PoolError::UnknownSlot(name.to_string()))
    }

    /// Full-mode post-stop reset: the record forgets everything about the
    /// tenancy and the dead container.
    async fn reset_slot_record(&self, name: &str) {
        if let Some((_, link)) = self.inner.links.remove(name) {
            link.close();
        }
        let default_viewport = *self.inner.default_viewport.read().await;
        let _ = self
            .inner
            .table
            .update(name, |slot| {
                slot.session = SessionInfo::default();
                slot.labels.clear();
                slot.lease_deadline = None;
                slot.last_used = None;
                slot.created_at = None;
                slot.vnc_password = None;
                slot.viewport = default_viewport;
                slot.state = SlotState::Empty;
                slot.is_removing = false;
            })
            .await;
    }
}

// ── Lease timers ────────────────────────────────────────────────

impl BrowserPool {
    /// Arm the single-shot expiry timer for a slot, replacing any timer
    /// already armed for it.
    pub(crate) fn arm_lease_timer(&self, name: &str, lease_minutes: u64) {
        let wait = Duration::from_secs(lease_minutes * 60);
        let weak = Arc::downgrade(&self.inner);
        let slot = name.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.timers.remove(&slot);
            let pool = BrowserPool { inner };
            info!("lease expired for {}", slot);
            // Release in its own task so aborting the timer handle can
            // never cancel a release midway.
            tokio::spawn(async move {
                if let Err(e) = pool.release_slot(&slot, false).await {
                    warn!("expiry release failed for {}: {}", slot, e);
                }
            });
        });
        if let Some(previous) = self.inner.timers.insert(name.to_string(), handle) {
            previous.abort();
        }
    }

    /// Idempotent: cancelling a missing or already-fired timer is a no-op.
    pub(crate) fn cancel_lease_timer(&self, name: &str) {
        if let Some((_, handle)) = self.inner.timers.remove(name) {
            handle.abort();
        }
    }
}

// ── Runtime-derived view ────────────────────────────────────────

impl BrowserPool {
    /// Diagnostic view built straight from `ps` + `inspect`, independent of
    /// the in-memory table and tolerant of stale or partial data.
    pub(crate) async fn slots_from_runtime(&self) -> Result<Vec<Slot>, PoolError> {
        let settings = self.inner.settings.clone();
        let rows = self.inner.runtime.ps_rows().await?;

        let mut slots = Vec::new();
        let matching = rows
            .into_iter()
            .filter(|row| row.name.starts_with(&settings.browser_prefix));
        for (position, row) in matching.enumerate() {
            let index = derive_index(&row.name, settings.base_browser_port, settings.num_browsers)
                .unwrap_or(position);
            let mut slot = Slot::new(&settings, index);
            slot.name = row.name.clone();
            slot.state = if row.state == "running" {
                SlotState::Ready
            } else {
                SlotState::Empty
            };

            let parsed = parse_ports_line(&row.ports_column);
            if let Some(app) = parsed.app {
                slot.ports.app = app;
            }
            if let Some(debugger) = parsed.debugger {
                slot.ports.debugger = debugger;
            }
            if let Some(vnc) = parsed.vnc {
                slot.ports.vnc = vnc;
            }

            match self.inner.runtime.inspect(&row.name).await {
                Ok(details) => {
                    slot.created_at = details.created_at;
                    slot.labels = details.labels;
                }
                Err(e) => debug!("inspect failed for {}: {}", row.name, e),
            }
            slots.push(slot);
        }
        slots.sort_by_key(|slot| slot.index);
        Ok(slots)
    }
}

/// Recover a slot index from the trailing numeric suffix of a container
/// name, e.g. `bx-10223` with base port 10222 is index 1.
pub(crate) fn derive_index(name: &str, base_port: u16, capacity: usize) -> Option<usize> {
    let suffix: usize = name.rsplit('-').next()?.parse().ok()?;
    let index = suffix.checked_sub(base_port as usize)?;
    (index < capacity).then_some(index)
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_index_from_suffix() {
        assert_eq!(derive_index("bx-10222", 10222, 2), Some(0));
        assert_eq!(derive_index("bx-10223", 10222, 2), Some(1));
    }

    #[test]
    fn test_derive_index_out_of_range() {
        assert_eq!(derive_index("bx-10224", 10222, 2), None);
        assert_eq!(derive_index("bx-99", 10222, 2), None);
    }

    #[test]
    fn test_derive_index_non_numeric_suffix() {
        assert_eq!(derive_index("bx-abc", 10222, 2), None);
        assert_eq!(derive_index("plainname", 10222, 2), None);
    }

    #[test]
    fn test_generated_password_shape() {
        let password = generate_password();
        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate_password());
    }
}
