//! Online and symbol-version monitoring.
//!
//! Two signals arrive independently: the symbol version counter, read on each
//! poll tick, and the online flag pushed on the device's info topic. The
//! monitor records both and emits a [`ChangeEvent`] when the version rises
//! or the device comes back online. It never reloads anything itself.

use crate::client::AdsClient;
use crate::error::AdsError;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Monitor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// Version or online flag not observed yet
    AwaitingFirstSignal,
    /// Both signals observed at least once
    Monitoring,
}

/// What changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    /// Symbol version increased; the symbol table should be reloaded
    SymbolVersion {
        /// Last recorded version
        previous: u32,
        /// Newly read version
        current: u32,
    },
    /// Online flag went from false to true
    CameOnline,
}

/// Change reported by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// What changed
    #[serde(flatten)]
    pub kind: ChangeKind,
    /// When the change was observed
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    fn now(kind: ChangeKind) -> Self {
        Self {
            kind,
            at: Utc::now(),
        }
    }
}

/// Snapshot of the recorded signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    /// Symbol version
    pub version: Option<u32>,
    /// Online flag
    pub online: Option<bool>,
    /// Lifecycle state
    pub state: MonitorState,
}

/// Tracks the symbol version and online flag of one device.
#[derive(Debug, Clone, Default)]
pub struct SymbolVersionMonitor {
    version: Option<u32>,
    online: Option<bool>,
}

impl SymbolVersionMonitor {
    /// Monitor with nothing observed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        if self.version.is_some() && self.online.is_some() {
            MonitorState::Monitoring
        } else {
            MonitorState::AwaitingFirstSignal
        }
    }

    /// Recorded signals.
    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            version: self.version,
            online: self.online,
            state: self.state(),
        }
    }

    /// Record a symbol version read.
    ///
    /// The first read only records. Later reads emit an event and record
    /// when strictly greater; the recorded version never decreases.
    pub fn observe_version(&mut self, version: u32) -> Option<ChangeEvent> {
        match self.version {
            None => {
                self.version = Some(version);
                None
            }
            Some(previous) if version > previous => {
                self.version = Some(version);
                tracing::info!(previous, current = version, "Symbol version changed");
                Some(ChangeEvent::now(ChangeKind::SymbolVersion {
                    previous,
                    current: version,
                }))
            }
            Some(previous) => {
                if version < previous {
                    tracing::debug!(previous, current = version, "Ignoring lower symbol version");
                }
                None
            }
        }
    }

    /// Record a liveness notification; emits on a false to true edge.
    pub fn observe_online(&mut self, online: bool) -> Option<ChangeEvent> {
        let previous = self.online.replace(online);
        if previous == Some(false) && online {
            tracing::info!("Device came online");
            Some(ChangeEvent::now(ChangeKind::CameOnline))
        } else {
            if previous == Some(true) && !online {
                tracing::warn!("Device went offline");
            }
            None
        }
    }

    /// Forget both signals.
    pub fn reset(&mut self) {
        self.version = None;
        self.online = None;
    }

    /// Read the version from the device and record it.
    ///
    /// # Errors
    ///
    /// Returns the read error; the recorded version is left unchanged.
    pub async fn poll<T: Transport>(
        &mut self,
        client: &AdsClient<T>,
    ) -> Result<Option<ChangeEvent>, AdsError> {
        match client.read_symbol_version().await {
            Ok(version) => Ok(self.observe_version(version)),
            Err(e) => {
                tracing::warn!(error = %e, "Symbol version poll failed");
                Err(e)
            }
        }
    }

    /// Reset, then poll right away.
    ///
    /// # Errors
    ///
    /// Returns the read error of the immediate poll.
    pub async fn restart<T: Transport>(&mut self, client: &AdsClient<T>) -> Result<(), AdsError> {
        self.reset();
        self.poll(client).await.map(|_| ())
    }

    /// Read the current version without recording it, paired with the last
    /// online flag.
    ///
    /// # Errors
    ///
    /// Returns the read error.
    pub async fn query<T: Transport>(
        &self,
        client: &AdsClient<T>,
    ) -> Result<MonitorStatus, AdsError> {
        let version = client.read_symbol_version().await?;
        Ok(MonitorStatus {
            version: Some(version),
            online: self.online,
            state: self.state(),
        })
    }
}
