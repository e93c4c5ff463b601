use std::io::Write;

use anyhow::{Context, Error};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::container_specs::LayerType;
use crate::digest::Digest;

/// A filesystem layer handed to the appender by the layer builder.
///
/// The appender never looks inside the content; it only needs the descriptors
/// and, when the destination lacks the blob, the compressed bytes.
pub trait Layer: Send + Sync {
    /// Digest of the compressed blob.
    fn digest(&self) -> Digest;

    /// Digest of the uncompressed tar.
    fn diff_id(&self) -> Digest;

    /// Size in bytes of the compressed blob.
    fn size(&self) -> u64;

    fn media_type(&self) -> LayerType;

    fn compressed(&self) -> Result<Bytes, Error>;
}

impl std::fmt::Debug for dyn Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("digest", &self.digest().to_string())
            .field("size", &self.size())
            .field("media_type", &self.media_type())
            .finish()
    }
}

/// A layer held fully in memory, gzip compressed.
#[derive(Debug, Clone)]
pub struct StaticLayer {
    compressed: Bytes,
    digest: Digest,
    diff_id: Digest,
    layer_type: LayerType,
}

impl StaticLayer {
    pub fn from_tar(tar_bytes: &[u8], layer_type: LayerType) -> Result<StaticLayer, Error> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(tar_bytes)
            .context("Compressing layer content")?;
        let compressed = encoder.finish().context("Finishing layer compression")?;

        Ok(StaticLayer {
            digest: Digest::sha256(&compressed),
            diff_id: Digest::sha256(tar_bytes),
            compressed: Bytes::from(compressed),
            layer_type,
        })
    }
}

impl Layer for StaticLayer {
    fn digest(&self) -> Digest {
        self.digest.clone()
    }

    fn diff_id(&self) -> Digest {
        self.diff_id.clone()
    }

    fn size(&self) -> u64 {
        self.compressed.len() as u64
    }

    fn media_type(&self) -> LayerType {
        self.layer_type
    }

    fn compressed(&self) -> Result<Bytes, Error> {
        Ok(self.compressed.clone())
    }
}
