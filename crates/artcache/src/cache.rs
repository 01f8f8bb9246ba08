use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use crate::codec::ResourceCodec;
use crate::config::CacheConfig;
use crate::coordinator::FetchCoordinator;
use crate::disk::{DiskCache, DiskUsage};
use crate::download::Downloader;
use crate::error::{CacheContents, CacheError};
use crate::key::ResourceKey;
use crate::memory::MemoryCache;

/// A two-tier cache of remote resources: decoded values in memory, encoded
/// bytes on disk, network fetches coalesced per key to fill misses.
///
/// One `ResourceCache` serves one resource class, with a [`ResourceCodec`]
/// translating between raw bytes and the host's resource type. The value is
/// a cheap handle over shared state; clone it freely and hand it to every
/// consumer. Cached state lives for the process lifetime, and the disk tier
/// additionally survives restarts.
///
/// Failures never surface as errors: a resource that cannot be produced for
/// any reason comes back as `None`, with the cause recorded in logs and
/// metrics. Under storage or network malfunction the cache degrades to
/// acting like no cache at all.
#[derive(Clone)]
pub struct ResourceCache<C: ResourceCodec> {
    codec: C,
    memory: Arc<MemoryCache<C::Resource>>,
    disk: Option<DiskCache>,
    coordinator: FetchCoordinator<C::Resource>,
    downloader: Downloader,
}

/// A point-in-time snapshot of both tiers' occupancy, for host diagnostics
/// and settings screens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUsage {
    /// Entries resident in the memory tier.
    pub memory_entries: usize,
    /// Their summed cost.
    pub memory_cost: u64,
    /// Disk tier occupancy. Empty when the disk tier is disabled.
    pub disk: DiskUsage,
}

impl<C: ResourceCodec> fmt::Debug for ResourceCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .finish_non_exhaustive()
    }
}

impl<C: ResourceCodec> ResourceCache<C> {
    /// Creates a cache from `config`.
    ///
    /// The disk cache directory is created if absent; opening the same
    /// directory again later is fine. With `cache_dir` unset the disk tier
    /// is disabled and the cache serves from memory and network only.
    pub fn new(config: CacheConfig, codec: C) -> anyhow::Result<Self> {
        let disk = match config.cache_dir {
            Some(ref cache_dir) => {
                let disk = DiskCache::new(cache_dir.clone()).with_context(|| {
                    format!("failed to create cache directory `{}`", cache_dir.display())
                })?;
                Some(disk)
            }
            None => None,
        };

        Ok(Self {
            codec,
            memory: Arc::new(MemoryCache::new(config.max_entries, config.max_total_cost)),
            disk,
            coordinator: FetchCoordinator::new(),
            downloader: Downloader::new(&config)?,
        })
    }

    /// Looks up a resource in the memory tier alone.
    ///
    /// Never touches disk or network and completes without blocking on I/O,
    /// so it is safe on a UI hot path. A hit refreshes the entry's recency.
    pub fn lookup_sync(&self, locator: &str) -> Option<C::Resource> {
        let key = ResourceKey::from_locator(locator);
        metric!(counter("caches.access") += 1);

        self.lookup_memory(&key)
    }

    /// Fetches a resource, consulting memory, then disk, then the network.
    ///
    /// A disk hit is promoted into memory; a network fetch is written
    /// through both tiers before this returns. Concurrent calls for the same
    /// locator share a single network request and observe the same outcome.
    ///
    /// `None` means the resource is unavailable right now and the caller
    /// should fall back to a placeholder; the cause has already been logged.
    /// Nothing negative is cached, so a later call may well succeed.
    pub async fn fetch(&self, locator: &str) -> Option<C::Resource> {
        let key = ResourceKey::from_locator(locator);
        metric!(counter("caches.access") += 1);

        match self.fetch_resource(&key).await {
            Ok(resource) => Some(resource),
            Err(err) => {
                tracing::debug!("Resource `{key}` unavailable: {err}");
                None
            }
        }
    }

    /// Starts fetching a resource without waiting for it.
    ///
    /// Useful when the host can predict upcoming lookups, like artwork for
    /// a list about to scroll in or for the next queued track. The warm-up
    /// shares in-flight fetches with regular callers; its outcome is logged
    /// and dropped.
    pub fn prefetch(&self, locator: &str) {
        let key = ResourceKey::from_locator(locator);
        if self.memory.get(&key).is_some() {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.fetch_resource(&key).await {
                tracing::debug!("Prefetch of `{key}` failed: {err}");
            }
        });
    }

    /// Empties the memory tier.
    ///
    /// In-flight fetches are unaffected and still write their results
    /// through afterwards.
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    /// Deletes all disk tier contents, leaving an empty cache directory.
    pub fn clear_disk(&self) {
        if let Some(disk) = &self.disk {
            disk.clear();
        }
    }

    /// Clears both tiers.
    pub fn clear_all(&self) {
        self.clear_memory();
        self.clear_disk();
    }

    /// Reports the current occupancy of both tiers.
    pub fn usage(&self) -> CacheUsage {
        CacheUsage {
            memory_entries: self.memory.len(),
            memory_cost: self.memory.total_cost(),
            disk: self.disk.as_ref().map(DiskCache::usage).unwrap_or_default(),
        }
    }

    async fn fetch_resource(&self, key: &ResourceKey) -> CacheContents<C::Resource> {
        if let Some(resource) = self.lookup_memory(key) {
            return Ok(resource);
        }
        if let Some(resource) = self.lookup_disk(key) {
            return Ok(resource);
        }

        let task = self.clone().coordinated_fetch(key.clone());
        self.coordinator.coordinate(key, task).await
    }

    fn lookup_memory(&self, key: &ResourceKey) -> Option<C::Resource> {
        let resource = self.memory.get(key)?;
        metric!(counter("caches.memory.hit") += 1);
        tracing::trace!("Memory tier hit for `{key}`");

        Some(resource)
    }

    /// Checks the disk tier, promoting a decodable hit into memory.
    fn lookup_disk(&self, key: &ResourceKey) -> Option<C::Resource> {
        let contents = self.disk.as_ref()?.get(key)?;

        match self.codec.decode(contents) {
            Ok(resource) => {
                metric!(counter("caches.file.hit") += 1);
                tracing::trace!("Disk tier hit for `{key}`");

                self.memory
                    .put(key.clone(), resource.clone(), C::cost(&resource));
                Some(resource)
            }
            Err(err) => {
                // An entry that no longer decodes is as good as absent; the
                // next write-through replaces the file.
                tracing::debug!("Discarding undecodable cache file for `{key}`: {err}");
                None
            }
        }
    }

    /// The fetch task handed to the coordinator: the single download for a
    /// key plus the write-through to both tiers.
    async fn coordinated_fetch(self, key: ResourceKey) -> CacheContents<C::Resource> {
        // This task may have raced a fetch that completed and unregistered
        // before this one was spawned. Re-check the tiers so a resource that
        // landed in the meantime is not downloaded twice.
        if let Some(resource) = self.lookup_memory(&key) {
            return Ok(resource);
        }
        if let Some(resource) = self.lookup_disk(&key) {
            return Ok(resource);
        }

        metric!(counter("caches.download") += 1);
        let start = Instant::now();
        let result = self.downloader.download(&key).await;
        metric!(timer("caches.download.duration") = start.elapsed());

        if let Err(CacheError::DownloadError(_)) = &result {
            metric!(counter("caches.download.failure") += 1);
        }

        let resource = self.codec.decode(result?)?;

        if let Some(disk) = &self.disk {
            match self.codec.encode(&resource) {
                Ok(encoded) => disk.put(&key, &encoded),
                Err(err) => {
                    tracing::warn!("Failed to encode `{key}` for the disk tier: {err}");
                }
            }
        }
        self.memory
            .put(key, resource.clone(), C::cost(&resource));

        Ok(resource)
    }
}
