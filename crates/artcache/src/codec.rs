use bytes::Bytes;

use crate::error::CacheContents;

/// The seam between raw cached bytes and the host's resource type.
///
/// One codec serves one resource class (a facade holds exactly one). It is
/// invoked on every boundary crossing: decoding network payloads and disk
/// files into resources, encoding resources for the disk tier, and
/// estimating the in-memory cost used for eviction accounting.
pub trait ResourceCodec: 'static + Send + Sync + Clone {
    /// The decoded type handed out by the cache.
    ///
    /// Resources are cloned on every hit, so this should be a cheap handle,
    /// like [`Bytes`] or an `Arc` around a decoded image.
    type Resource: 'static + Send + Sync + Clone;

    /// Turns a raw payload (from network or disk) into a resource.
    ///
    /// A payload that cannot be interpreted must produce
    /// [`Malformed`](crate::CacheError::Malformed); the cache treats that as
    /// a miss.
    fn decode(&self, bytes: Bytes) -> CacheContents<Self::Resource>;

    /// Turns a resource into the byte stream persisted by the disk tier.
    ///
    /// A fixed-quality lossy re-encode is fine here; the disk tier stores
    /// opaque blobs and round-trips them only through [`decode`](Self::decode).
    fn encode(&self, resource: &Self::Resource) -> CacheContents<Vec<u8>>;

    /// The cost of keeping this resource in the in-memory cache.
    fn cost(resource: &Self::Resource) -> u32 {
        std::mem::size_of_val(resource) as u32
    }
}

/// A codec that performs no interpretation at all: the resource is the raw
/// payload.
///
/// The right choice when callers decode elsewhere, or when the cached data is
/// genuinely opaque.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobCodec;

impl ResourceCodec for BlobCodec {
    type Resource = Bytes;

    fn decode(&self, bytes: Bytes) -> CacheContents<Self::Resource> {
        Ok(bytes)
    }

    fn encode(&self, resource: &Self::Resource) -> CacheContents<Vec<u8>> {
        Ok(resource.to_vec())
    }

    fn cost(resource: &Self::Resource) -> u32 {
        resource.len().try_into().unwrap_or(u32::MAX)
    }
}
