//! Session orchestration: intents in, commands out, broadcasts applied.
//!
//! The session owns the transport manager, the reconciler and the removal
//! cache, and is the only place destructive intents pass a confirmation
//! gate. A declined gate leaves every piece of state untouched.

use tokio::sync::mpsc;
use tracing::{info, warn};

use foc_core::{Command, CommandError, DeviceId};

use crate::cache::QueueCache;
use crate::reconciler::{Reconciler, Renderer};
use crate::transport::{Transport, TransportManager};

/// Last-chance prompt before a destructive command. Implementations block
/// until the operator answers.
pub trait ConfirmGate {
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Gate that never asks, for non-interactive use.
pub struct AlwaysConfirm;

impl ConfirmGate for AlwaysConfirm {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }
}

/// One operator action against a device (or the fleet).
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Rename { id: DeviceId, name: String },
    Power { id: DeviceId, save: bool },
    Deactivate { id: DeviceId },
    Activate { id: DeviceId },
    Release { id: DeviceId },
    RestoreRemoved { id: DeviceId },
    Role { id: DeviceId, role: String },
    Reporting { id: DeviceId, interval: u64 },
    SleepDuration { id: DeviceId, seconds: u64 },
    Gpio { id: DeviceId, pin: u8, state: u8 },
    Analog { id: DeviceId, pin: u8 },
    TxPower { id: DeviceId, power: i32 },
    Ping { id: DeviceId },
    Debug { id: DeviceId, enable: bool },
    Reset { id: DeviceId },
    FactoryReset { id: DeviceId },
    TriggerReport { id: DeviceId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Command accepted into the outbox (delivery may still be pending).
    Sent,
    /// The operator declined the confirmation prompt. Nothing changed.
    Declined,
}

pub struct Session<T: Transport, R: Renderer, G: ConfirmGate> {
    manager: TransportManager<T>,
    reconciler: Reconciler<R>,
    cache: QueueCache,
    gate: G,
}

impl<T: Transport, R: Renderer, G: ConfirmGate> Session<T, R, G> {
    pub fn new(
        manager: TransportManager<T>,
        reconciler: Reconciler<R>,
        cache: QueueCache,
        gate: G,
    ) -> Self {
        Self {
            manager,
            reconciler,
            cache,
            gate,
        }
    }

    pub fn manager(&self) -> &TransportManager<T> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut TransportManager<T> {
        &mut self.manager
    }

    pub fn reconciler(&self) -> &Reconciler<R> {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler<R> {
        &mut self.reconciler
    }

    pub fn cache(&self) -> &QueueCache {
        &self.cache
    }

    /// Validates, gates and enqueues one intent. Validation failures never
    /// reach the outbox, and a declined gate mutates nothing.
    pub async fn dispatch(&mut self, intent: Intent) -> Result<Dispatch, CommandError> {
        let command = match intent {
            Intent::Rename { id, name } => Command::rename(id, &name)?,
            Intent::Power { id, save } => Command::power(id, save),
            Intent::Deactivate { id } => {
                let prompt = format!("Move device #{id} to the queue?");
                if !self.gate.confirm(&prompt) {
                    return Ok(Dispatch::Declined);
                }
                self.record_removal(&id);
                Command::deactivate(id)
            }
            Intent::Activate { id } => Command::activate(id),
            Intent::Release { id } => {
                let prompt = format!("Permanently remove device #{id}?");
                if !self.gate.confirm(&prompt) {
                    return Ok(Dispatch::Declined);
                }
                self.record_removal(&id);
                Command::release(id)
            }
            Intent::RestoreRemoved { id } => {
                match self.cache.restore(&id) {
                    Ok(Some(entry)) => {
                        info!(device = %id, name = %entry.name, "restoring removed device")
                    }
                    Ok(None) => {}
                    Err(err) => warn!(device = %id, "removal cache update failed: {err}"),
                }
                // the hub keeps its own removal list; restore is sent even
                // when we have no local record
                Command::restore(id)
            }
            Intent::Role { id, role } => Command::role(id, &role)?,
            Intent::Reporting { id, interval } => Command::reporting(id, interval)?,
            Intent::SleepDuration { id, seconds } => Command::sleep_duration(id, seconds)?,
            Intent::Gpio { id, pin, state } => Command::gpio(id, pin, state),
            Intent::Analog { id, pin } => Command::analog(id, pin),
            Intent::TxPower { id, power } => Command::tx_power(id, power),
            Intent::Ping { id } => Command::ping(id),
            Intent::Debug { id, enable } => Command::debug(id, enable),
            Intent::Reset { id } => {
                let prompt = format!("Reset device #{id}?");
                if !self.gate.confirm(&prompt) {
                    return Ok(Dispatch::Declined);
                }
                Command::reset(id)
            }
            Intent::FactoryReset { id } => {
                let prompt = format!("Factory reset device #{id}? This erases all settings.");
                if !self.gate.confirm(&prompt) {
                    return Ok(Dispatch::Declined);
                }
                Command::factory_reset(id)
            }
            Intent::TriggerReport { id } => Command::trigger_report(id),
        };
        self.manager.send(&command).await;
        Ok(Dispatch::Sent)
    }

    /// Snapshot the device's name and counter into the removal cache before
    /// a deactivate or release goes out, so the record survives the hub
    /// dropping the device from later broadcasts.
    fn record_removal(&mut self, id: &DeviceId) {
        let (name, counter) = self
            .reconciler
            .snapshot(id)
            .or_else(|| self.reconciler.queued_snapshot(id))
            .map(|snapshot| (snapshot.name.clone(), snapshot.counter))
            .unwrap_or_else(|| (id.to_string(), 0));
        if let Err(err) = self.cache.mark_removed(id.clone(), name, counter) {
            warn!(device = %id, "removal cache write failed: {err}");
        }
    }

    /// Main loop: connects, then multiplexes inbound frames, operator
    /// intents and the reconnect timer until the intent channel closes.
    pub async fn run(&mut self, mut intents: mpsc::Receiver<Intent>) {
        self.manager.ensure_connected().await;
        loop {
            // read the delay before the select so the timer branch does not
            // borrow the manager while recv() holds it mutably
            let delay = self.manager.reconnect_delay();
            tokio::select! {
                frame = self.manager.recv(), if self.manager.is_open() => {
                    if let Some(text) = frame {
                        self.reconciler.ingest(&text);
                    }
                }
                intent = intents.recv() => {
                    match intent {
                        Some(intent) => {
                            if let Err(err) = self.dispatch(intent).await {
                                warn!("rejected command: {err}");
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(delay), if self.manager.reconnect_pending() => {
                    self.manager.reconnect_now().await;
                }
            }
        }
    }
}
