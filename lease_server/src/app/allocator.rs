//! Address leasing: maps owner identities to stable addresses from the pool and
//! keeps the tunnel's peer table and the lease file in line with the live record set.

use alloc::sync::Arc;
use core::net::Ipv4Addr;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use secrecy::SecretString;
use thiserror::Error as ThisError;
use tokio::sync::Mutex;
use tracing::{debug, info};
use tunlease_common::{DeviceConfig, PeerConfig, TunnelDriver, TunnelError};

use super::store::{LeaseFile, LeaseRecord, StoreError};

/// `owner` => record. Ordered so every derived view is deterministic.
pub(crate) type RecordMap = BTreeMap<String, LeaseRecord>;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub(crate) enum AllocError {
    #[error("no free address left in {0}")]
    PoolExhausted(Ipv4Net),
    #[error("lease expiry {0} is not in the future")]
    ExpiryNotInFuture(DateTime<Utc>),
}

/// Failure of a complete lease grant.
#[derive(Debug, ThisError)]
pub(crate) enum GrantError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("failed to synchronize tunnel peers")]
    PeerSync(#[source] TunnelError),
    #[error("lease granted but not persisted")]
    Persist(#[source] StoreError),
}

/// Failure of a reclamation pass.
#[derive(Debug, ThisError)]
pub(crate) enum ReclaimError {
    #[error("failed to synchronize tunnel peers")]
    PeerSync(#[source] TunnelError),
    #[error("failed to persist leases")]
    Persist(#[source] StoreError),
}

/// The subnet addresses are handed out from.
///
/// The network address, the final address and the gateway are never allocable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AddressPool {
    prefix: Ipv4Net,
}

impl AddressPool {
    /// `prefix` carries the gateway as its host part, e.g. `10.90.0.1/20`.
    pub(crate) const fn new(prefix: Ipv4Net) -> Self {
        Self { prefix }
    }

    pub(crate) fn gateway(&self) -> Ipv4Addr {
        self.prefix.addr()
    }

    pub(crate) fn is_reserved(&self, addr: Ipv4Addr) -> bool {
        addr == self.prefix.network() || addr == self.prefix.broadcast() || addr == self.gateway()
    }

    pub(crate) fn contains(&self, addr: Ipv4Addr) -> bool {
        self.prefix.contains(&addr)
    }

    /// Allocable addresses not in `leased`, ascending.
    pub(crate) fn available<'a>(
        &'a self,
        leased: &'a HashSet<Ipv4Addr>,
    ) -> impl Iterator<Item = Ipv4Addr> + 'a {
        (u32::from(self.prefix.network())..=u32::from(self.prefix.broadcast()))
            .map(Ipv4Addr::from)
            .filter(move |addr| !self.is_reserved(*addr) && !leased.contains(addr))
    }

    /// The numerically lowest allocable address not in `leased`.
    pub(crate) fn next_available(&self, leased: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
        self.available(leased).next()
    }
}

/// Allocate or refresh the lease of `owner` within `records`.
///
/// An owner keeps its address across re-leases as long as no other active
/// record holds it. Expired records do not hold their address.
///
/// # Errors
///
/// Returns [`AllocError::PoolExhausted`] if a new address is needed and none is free,
/// [`AllocError::ExpiryNotInFuture`] if `expiry` is not after `now`.
pub(crate) fn allocate_in(
    records: &mut RecordMap,
    pool: &AddressPool,
    owner: &str,
    public_key: &str,
    expiry: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<LeaseRecord, AllocError> {
    // Whole seconds only, matching what the lease file can represent.
    let expiry = DateTime::from_timestamp(expiry.timestamp(), 0).unwrap_or(expiry);
    if expiry <= now {
        return Err(AllocError::ExpiryNotInFuture(expiry));
    }

    let held_by_others: HashSet<Ipv4Addr> = records
        .values()
        .filter(|r| r.owner != owner && r.is_active(now))
        .map(|r| r.address)
        .collect();

    if let Some(existing) = records.get_mut(owner)
        && pool.contains(existing.address)
        && !pool.is_reserved(existing.address)
        && !held_by_others.contains(&existing.address)
    {
        existing.public_key = public_key.to_string();
        existing.expiry = expiry;
        return Ok(existing.clone());
    }

    let address = pool
        .next_available(&held_by_others)
        .ok_or(AllocError::PoolExhausted(pool.prefix))?;
    let record = LeaseRecord {
        owner: owner.to_string(),
        public_key: public_key.to_string(),
        address,
        expiry,
    };
    records.insert(owner.to_string(), record.clone());
    Ok(record)
}

/// Remove records that expired at `now`. Returns whether anything was removed.
pub(crate) fn drop_expired(records: &mut RecordMap, now: DateTime<Utc>) -> bool {
    let before = records.len();
    records.retain(|_, r| r.is_active(now));
    records.len() != before
}

/// One peer per active record, each restricted to its `/32`.
pub(crate) fn peers_of(records: &RecordMap, now: DateTime<Utc>) -> Vec<PeerConfig> {
    records
        .values()
        .filter(|r| r.is_active(now))
        .map(|r| PeerConfig::single_host(&r.public_key, r.address))
        .collect()
}

/// The server's own interface settings, combined with the peer set on every sync.
#[derive(Debug, Clone)]
pub(crate) struct InterfaceBase {
    pub private_key: SecretString,
    pub listen_port: u16,
}

/// Owns the record set, the lease file and the server's tunnel interface.
///
/// Every read-modify-write of the record set, including the resulting peer
/// sync and persistence, happens under one lock.
pub(crate) struct LeaseAllocator {
    pool: AddressPool,
    records: Mutex<RecordMap>,
    file: LeaseFile,
    tunnel: Arc<dyn TunnelDriver>,
    base: InterfaceBase,
}

impl LeaseAllocator {
    pub(crate) fn new(
        pool: AddressPool,
        initial: Vec<LeaseRecord>,
        file: LeaseFile,
        tunnel: Arc<dyn TunnelDriver>,
        base: InterfaceBase,
    ) -> Self {
        let records = initial
            .into_iter()
            .map(|r| (r.owner.clone(), r))
            .collect();
        Self {
            pool,
            records: Mutex::new(records),
            file,
            tunnel,
            base,
        }
    }

    pub(crate) const fn pool(&self) -> &AddressPool {
        &self.pool
    }

    /// Allocate in memory only.
    ///
    /// # Errors
    ///
    /// See [`allocate_in`].
    pub(crate) async fn allocate(
        &self,
        owner: &str,
        public_key: &str,
        expiry: DateTime<Utc>,
    ) -> Result<LeaseRecord, AllocError> {
        let mut records = self.records.lock().await;
        allocate_in(&mut records, &self.pool, owner, public_key, expiry, Utc::now())
    }

    /// Allocate, push the new peer set to the tunnel and persist.
    ///
    /// A persistence failure leaves the lease in memory; the next successful save catches up.
    ///
    /// # Errors
    ///
    /// Returns the first failing step.
    #[tracing::instrument(skip(self, public_key, expiry))]
    pub(crate) async fn grant(
        &self,
        owner: &str,
        public_key: &str,
        expiry: DateTime<Utc>,
    ) -> Result<LeaseRecord, GrantError> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let record = allocate_in(&mut records, &self.pool, owner, public_key, expiry, now)?;
        info!(address = %record.address, expiry = %record.expiry, "Lease granted");

        self.sync_locked(&records, now)
            .await
            .map_err(GrantError::PeerSync)?;
        self.file
            .save(records.values(), now)
            .await
            .map_err(GrantError::Persist)?;
        Ok(record)
    }

    /// Write all active records to the lease file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub(crate) async fn persist(&self) -> Result<(), StoreError> {
        let records = self.records.lock().await;
        self.file.save(records.values(), Utc::now()).await
    }

    /// Replace the tunnel's peer table with one peer per active record.
    ///
    /// # Errors
    ///
    /// Returns an error if the tunnel rejects the configuration.
    pub(crate) async fn sync_peers(&self) -> Result<(), TunnelError> {
        let records = self.records.lock().await;
        self.sync_locked(&records, Utc::now()).await
    }

    async fn sync_locked(&self, records: &RecordMap, now: DateTime<Utc>) -> Result<(), TunnelError> {
        let config = DeviceConfig {
            private_key: self.base.private_key.clone(),
            listen_port: Some(self.base.listen_port),
            peers: peers_of(records, now),
        };
        self.tunnel.configure(&config).await
    }

    /// Drop expired records; if any were dropped, re-sync peers and persist.
    ///
    /// Returns whether the record set changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer sync or the save fails.
    pub(crate) async fn reclaim(&self, now: DateTime<Utc>) -> Result<bool, ReclaimError> {
        let mut records = self.records.lock().await;
        if !drop_expired(&mut records, now) {
            debug!("No expired leases");
            return Ok(false);
        }
        info!(remaining = records.len(), "Reclaimed expired leases");
        self.sync_locked(&records, now)
            .await
            .map_err(ReclaimError::PeerSync)?;
        self.file
            .save(records.values(), now)
            .await
            .map_err(ReclaimError::Persist)?;
        Ok(true)
    }

    /// Snapshot of the record set.
    pub(crate) async fn records(&self) -> RecordMap {
        self.records.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use chrono::{Duration as ChronoDuration, TimeZone as _};
    use tunlease_common::{BackendKind, TunnelDevice};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn pool(prefix: &str) -> AddressPool {
        AddressPool::new(prefix.parse().unwrap())
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn first_allocation_skips_network_and_gateway() {
        let pool = pool("10.90.0.1/20");
        let mut records = RecordMap::new();
        let rec = allocate_in(&mut records, &pool, "alice", "a=", now() + ChronoDuration::hours(1), now())
            .unwrap();
        assert_eq!(rec.address, ip("10.90.0.2"));
    }

    #[test]
    fn available_excludes_reserved_and_leased() {
        let pool = pool("10.10.10.1/29");
        let leased: HashSet<_> = [ip("10.10.10.2"), ip("10.10.10.4")].into_iter().collect();
        let available: Vec<_> = pool.available(&leased).collect();
        assert_eq!(
            available,
            vec![ip("10.10.10.3"), ip("10.10.10.5"), ip("10.10.10.6")]
        );
        // Deterministic order on repeated calls.
        assert_eq!(pool.available(&leased).collect::<Vec<_>>(), available);
    }

    #[test]
    fn re_lease_keeps_address_and_updates_key_and_expiry() {
        let pool = pool("10.90.0.1/20");
        let mut records = RecordMap::new();
        let first = allocate_in(&mut records, &pool, "alice", "old=", now() + ChronoDuration::hours(1), now())
            .unwrap();
        allocate_in(&mut records, &pool, "bob", "b=", now() + ChronoDuration::hours(1), now()).unwrap();

        let new_expiry = now() + ChronoDuration::hours(5);
        let second = allocate_in(&mut records, &pool, "alice", "new=", new_expiry, now()).unwrap();
        assert_eq!(second.address, first.address);
        assert_eq!(second.public_key, "new=");
        assert_eq!(second.expiry, new_expiry);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        // /30 with the gateway at .1 leaves exactly one address.
        let pool = pool("10.0.0.1/30");
        let mut records = RecordMap::new();
        let later = now() + ChronoDuration::hours(1);
        assert_eq!(
            allocate_in(&mut records, &pool, "a", "a=", later, now()).unwrap().address,
            ip("10.0.0.2")
        );
        assert_eq!(
            allocate_in(&mut records, &pool, "b", "b=", later, now()),
            Err(AllocError::PoolExhausted("10.0.0.1/30".parse().unwrap()))
        );
    }

    #[test]
    fn expired_records_release_their_address() {
        let pool = pool("10.0.0.1/30");
        let mut records = RecordMap::new();
        allocate_in(&mut records, &pool, "a", "a=", now() + ChronoDuration::minutes(1), now()).unwrap();

        let later = now() + ChronoDuration::minutes(2);
        let b = allocate_in(&mut records, &pool, "b", "b=", later + ChronoDuration::hours(1), later).unwrap();
        assert_eq!(b.address, ip("10.0.0.2"));

        // The former holder comes back while `b` is active: no free address for it.
        assert!(matches!(
            allocate_in(&mut records, &pool, "a", "a=", later + ChronoDuration::hours(1), later),
            Err(AllocError::PoolExhausted(_))
        ));
    }

    #[test]
    fn expiry_must_be_in_the_future() {
        let pool = pool("10.90.0.1/20");
        let mut records = RecordMap::new();
        assert_eq!(
            allocate_in(&mut records, &pool, "a", "a=", now(), now()),
            Err(AllocError::ExpiryNotInFuture(now()))
        );
        assert!(records.is_empty());
    }

    #[test]
    fn drop_expired_reports_changes() {
        let pool = pool("10.90.0.1/20");
        let mut records = RecordMap::new();
        allocate_in(&mut records, &pool, "a", "a=", now() + ChronoDuration::minutes(1), now()).unwrap();
        allocate_in(&mut records, &pool, "b", "b=", now() + ChronoDuration::hours(1), now()).unwrap();

        assert!(!drop_expired(&mut records, now()));
        assert!(drop_expired(&mut records, now() + ChronoDuration::minutes(5)));
        assert_eq!(records.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    fn detached_allocator(dir: &str, prefix: &str) -> (LeaseAllocator, Arc<TunnelDevice>, LeaseFile) {
        let path = env::temp_dir()
            .join(format!("tunlease_alloc_{dir}_{}", std::process::id()))
            .join("leases.txt");
        drop(std::fs::remove_file(&path));
        let file = LeaseFile::new(path);
        let tunnel = Arc::new(TunnelDevice::new(BackendKind::Detached, "tl0", ""));
        let allocator = LeaseAllocator::new(
            pool(prefix),
            Vec::new(),
            file.clone(),
            tunnel.clone(),
            InterfaceBase {
                private_key: SecretString::from("c2VydmVy"),
                listen_port: 51820,
            },
        );
        (allocator, tunnel, file)
    }

    fn applied_peers(tunnel: &TunnelDevice) -> Vec<PeerConfig> {
        let TunnelDevice::Detached(ref dev) = *tunnel else {
            panic!("expected detached backend");
        };
        dev.applied_peers()
    }

    #[tokio::test]
    async fn grant_syncs_peers_and_persists() {
        let (allocator, tunnel, file) = detached_allocator("grant", "10.90.0.1/20");
        let expiry = Utc::now() + ChronoDuration::hours(1);

        let alice = allocator.grant("alice", "YWxpY2U=", expiry).await.unwrap();
        let bob = allocator.grant("bob", "Ym9i", expiry).await.unwrap();
        assert_eq!(alice.address, ip("10.90.0.2"));
        assert_eq!(bob.address, ip("10.90.0.3"));

        let peers = applied_peers(&tunnel);
        assert_eq!(
            peers,
            vec![
                PeerConfig::single_host("YWxpY2U=", alice.address),
                PeerConfig::single_host("Ym9i", bob.address),
            ]
        );

        let stored = file.load(Utc::now()).await.unwrap();
        assert_eq!(stored, vec![alice, bob]);
    }

    #[tokio::test]
    async fn reclaim_removes_stale_peers_and_persists() {
        let (allocator, tunnel, file) = detached_allocator("reclaim", "10.90.0.1/20");
        let short = Utc::now() + ChronoDuration::seconds(30);
        let long = Utc::now() + ChronoDuration::hours(1);
        allocator.grant("alice", "YWxpY2U=", short).await.unwrap();
        let bob = allocator.grant("bob", "Ym9i", long).await.unwrap();

        assert!(!allocator.reclaim(Utc::now()).await.unwrap());

        let later = Utc::now() + ChronoDuration::minutes(1);
        assert!(allocator.reclaim(later).await.unwrap());
        assert_eq!(
            applied_peers(&tunnel),
            vec![PeerConfig::single_host("Ym9i", bob.address)],
            "expired peers must be removed from the tunnel"
        );
        assert_eq!(file.load(later).await.unwrap(), vec![bob]);
        assert_eq!(allocator.records().await.len(), 1);
    }

    #[tokio::test]
    async fn persist_failure_keeps_lease_in_memory() {
        let tunnel = Arc::new(TunnelDevice::new(BackendKind::Detached, "tl0", ""));
        // The parent "directory" is a regular file, so nothing can be written below it.
        let blocker = env::temp_dir().join(format!("tunlease_alloc_blocker_{}", std::process::id()));
        std::fs::write(&blocker, "").unwrap();
        let file = LeaseFile::new(blocker.join("leases.txt"));
        let allocator = LeaseAllocator::new(
            pool("10.90.0.1/20"),
            Vec::new(),
            file,
            tunnel,
            InterfaceBase {
                private_key: SecretString::from("c2VydmVy"),
                listen_port: 51820,
            },
        );
        let err = allocator
            .grant("alice", "YWxpY2U=", Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::Persist(_)), "{err}");
        assert!(allocator.records().await.contains_key("alice"));

        // Re-leasing from memory still works and keeps the address.
        let again = allocator
            .allocate("alice", "YWxpY2U=", Utc::now() + ChronoDuration::hours(2))
            .await
            .unwrap();
        assert_eq!(again.address, ip("10.90.0.2"));
        drop(std::fs::remove_file(&blocker));
    }
}
