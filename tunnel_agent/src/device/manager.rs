use alloc::sync::Arc;
use core::time::Duration;
use std::{collections::HashMap, path::PathBuf, sync::OnceLock};

use eyre::WrapErr as _;
use secrecy::SecretString;
use thiserror::Error as ThisError;
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tracing::{Instrument as _, debug, error, info, warn};
use tunlease_common::{DeviceConfig, KeyPair, TunnelDriver, TunnelError};

use super::reconfigure::{AppliedConfig, ReconfigureError, reconfigure};
use crate::{
    health::{Checker, HealthMonitor, MonitorError},
    lease_client::{LeaseProvider, ProtocolError},
    netcfg::NetConfigurator,
    trigger::{TriggerReceiver, TriggerSender, rendezvous},
};

/// Pause between failed automatic renewal attempts.
pub const RENEW_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// One lease server the agent may use.
#[derive(Clone)]
pub struct Candidate {
    pub name: String,
    pub lease_url: String,
    pub checker: Arc<dyn Checker>,
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub key_path: PathBuf,
    pub listen_port: Option<u16>,
    pub monitor_interval: Duration,
    pub failure_threshold: u32,
    pub retry_interval: Duration,
}

#[derive(Debug, ThisError)]
pub enum RenewError {
    #[error("device manager was not started")]
    NotStarted,
    #[error("no credential available for renewal")]
    NoCredential,
    #[error("no candidate server is healthy")]
    NoHealthyServer,
    #[error("lease request to {server} failed")]
    Protocol {
        server: String,
        #[source]
        source: ProtocolError,
    },
    #[error(transparent)]
    Reconfigure(#[from] ReconfigureError),
    #[error("failed to sync tunnel peers")]
    PeerSync(#[from] TunnelError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

impl RenewError {
    /// Whether retrying later can help.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(*self, Self::NotStarted | Self::NoCredential)
    }
}

/// Keeps one tunnel interface attached to a healthy lease server.
pub struct DeviceManager {
    tunnel: Arc<dyn TunnelDriver>,
    net: Arc<dyn NetConfigurator>,
    leases: Arc<dyn LeaseProvider>,
    candidates: Vec<Candidate>,
    settings: ManagerSettings,
    keys: OnceLock<KeyPair>,
    /// Held across a whole renewal, which serializes renewals.
    applied: Mutex<HashMap<String, AppliedConfig>>,
    monitors: Mutex<Vec<Arc<HealthMonitor>>>,
    credential: Mutex<Option<SecretString>>,
    trigger_tx: TriggerSender,
    trigger_rx: Mutex<Option<TriggerReceiver>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceManager {
    #[must_use]
    pub fn new(
        tunnel: Arc<dyn TunnelDriver>,
        net: Arc<dyn NetConfigurator>,
        leases: Arc<dyn LeaseProvider>,
        candidates: Vec<Candidate>,
        settings: ManagerSettings,
    ) -> Self {
        let (trigger_tx, trigger_rx) = rendezvous();
        Self {
            tunnel,
            net,
            leases,
            candidates,
            settings,
            keys: OnceLock::new(),
            applied: Mutex::new(HashMap::new()),
            monitors: Mutex::new(Vec::new()),
            credential: Mutex::new(None),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            consumer: Mutex::new(None),
        }
    }

    /// Bring the interface up with the local key and start consuming renewal triggers.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface cannot be started, the key pair cannot
    /// be loaded or created, or the manager was already started.
    #[tracing::instrument(skip_all, fields(interface = %self.tunnel.name()))]
    pub async fn start(self: &Arc<Self>) -> eyre::Result<()> {
        let Some(trigger_rx) = self.trigger_rx.lock().await.take() else {
            eyre::bail!("device manager already started");
        };

        self.tunnel
            .start()
            .await
            .wrap_err(format!("Failed to start interface {}", self.tunnel.name()))?;

        let keys = KeyPair::load_or_generate(&self.settings.key_path).wrap_err(format!(
            "Failed to load key pair from {}",
            self.settings.key_path.display()
        ))?;
        info!(public_key = %keys.public_key, "Using tunnel key pair");

        self.tunnel
            .configure(&DeviceConfig {
                private_key: keys.private_key.clone(),
                listen_port: self.settings.listen_port,
                peers: Vec::new(),
            })
            .await
            .wrap_err("Failed to apply the interface key")?;
        drop(self.keys.set(keys));

        let manager = self.clone();
        let handle = tokio::spawn(manager.consume_triggers(trigger_rx).in_current_span());
        *self.consumer.lock().await = Some(handle);
        Ok(())
    }

    /// The local public key, once started.
    pub fn public_key(&self) -> Option<&str> {
        self.keys.get().map(|k| k.public_key.as_str())
    }

    /// Applied configuration per server name.
    pub async fn applied(&self) -> HashMap<String, AppliedConfig> {
        self.applied.lock().await.clone()
    }

    /// Targets of the monitors currently owned by the manager.
    pub async fn monitored_targets(&self) -> Vec<String> {
        self.monitors
            .lock()
            .await
            .iter()
            .map(|m| m.target().to_string())
            .collect()
    }

    /// Move the interface to a freshly leased configuration from the first healthy candidate.
    ///
    /// `credential` replaces the cached one; `None` reuses it. Returns the selected server's name.
    ///
    /// # Errors
    ///
    /// See [`RenewError`]. The peer table is updated even if installing the
    /// address failed, in which case the address error is returned.
    #[tracing::instrument(skip_all, fields(interface = %self.tunnel.name()))]
    pub async fn renew_lease(&self, credential: Option<SecretString>) -> Result<String, RenewError> {
        let keys = self.keys.get().ok_or(RenewError::NotStarted)?;
        let credential = {
            let mut cached = self.credential.lock().await;
            if let Some(fresh) = credential {
                *cached = Some(fresh);
            }
            cached.clone().ok_or(RenewError::NoCredential)?
        };

        let mut applied = self.applied.lock().await;

        for monitor in self.monitors.lock().await.drain(..) {
            monitor.stop();
        }

        let candidate = self.select_candidate().await?;
        let previous = applied.get(&candidate.name).cloned();

        let lease = self
            .leases
            .request_lease(&candidate.lease_url, &keys.public_key, &credential)
            .await
            .map_err(|source| RenewError::Protocol {
                server: candidate.name.clone(),
                source,
            })?;
        info!(server = %candidate.name, address = %lease.ip, "Lease granted");

        let new = AppliedConfig::from_lease(&lease);
        let installed =
            reconfigure(self.net.as_ref(), self.tunnel.name(), previous.as_ref(), &new).await;

        let mut peers: Vec<_> = applied
            .iter()
            .filter(|&(name, _)| *name != candidate.name)
            .map(|(_, cfg)| cfg.peer.clone())
            .collect();
        peers.push(new.peer.clone());
        if installed.is_ok() {
            applied.insert(candidate.name.clone(), new);
        }

        let synced = self
            .tunnel
            .configure(&DeviceConfig {
                private_key: keys.private_key.clone(),
                listen_port: self.settings.listen_port,
                peers,
            })
            .await;

        match (installed, synced) {
            (Err(e), synced) => {
                if let Err(sync_err) = synced {
                    warn!("Failed to sync tunnel peers: {sync_err}");
                }
                return Err(e.into());
            }
            (Ok(()), Err(e)) => return Err(e.into()),
            (Ok(()), Ok(())) => {}
        }

        let monitor = Arc::new(HealthMonitor::new(
            candidate.checker.clone(),
            self.settings.monitor_interval,
            self.settings.failure_threshold,
            self.trigger_tx.clone(),
        ));
        monitor.start()?;
        self.monitors.lock().await.push(monitor);
        drop(applied);

        Ok(candidate.name.clone())
    }

    /// Renew until a renewal succeeds, pausing a fixed interval between attempts.
    ///
    /// # Errors
    ///
    /// Only errors that retrying cannot fix are returned.
    pub async fn renew_until_success(
        &self,
        credential: Option<SecretString>,
    ) -> Result<String, RenewError> {
        let mut credential = credential;
        loop {
            match self.renew_lease(credential.take()).await {
                Ok(server) => return Ok(server),
                Err(e) if e.is_transient() => {
                    warn!(
                        retry_in = ?self.settings.retry_interval,
                        "Lease renewal failed: {}",
                        eyre::Report::new(e)
                    );
                    sleep(self.settings.retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stop every monitor and the trigger consumer. The interface is left as is.
    pub async fn stop(&self) {
        for monitor in self.monitors.lock().await.drain(..) {
            monitor.stop();
        }
        if let Some(consumer) = self.consumer.lock().await.take() {
            consumer.abort();
        }
        debug!("Device manager stopped");
    }

    async fn select_candidate(&self) -> Result<&Candidate, RenewError> {
        for candidate in &self.candidates {
            match candidate.checker.check().await {
                Ok(()) => return Ok(candidate),
                Err(e) => debug!(
                    server = %candidate.name,
                    probe = %candidate.checker.target_description(),
                    "Candidate unhealthy: {e}"
                ),
            }
        }
        Err(RenewError::NoHealthyServer)
    }

    async fn consume_triggers(self: Arc<Self>, mut trigger_rx: TriggerReceiver) {
        while let Some(source) = trigger_rx.recv().await {
            warn!(%source, "Active server unhealthy, renewing lease");
            match self.renew_until_success(None).await {
                Ok(server) => info!(%server, "Lease renewed"),
                Err(e) => error!("Giving up on automatic renewal: {e}"),
            }
        }
    }
}
