use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Error};
use bytes::Bytes;

use crate::container_specs::image_config::append_diff_ids;
use crate::container_specs::{Descriptor, Manifest, MediaType};
use crate::digest::Digest;
use crate::layer::Layer;
use crate::registry::Registry;

/// One entry of an image's layer list.
#[derive(Clone)]
pub enum ImageLayer {
    /// Layer inherited from the base image; the blob stays on the base registry.
    Base {
        descriptor: Descriptor,
        source: Arc<dyn Registry>,
    },
    Appended(Arc<dyn Layer>),
}

impl ImageLayer {
    pub fn digest(&self) -> Digest {
        match self {
            ImageLayer::Base { descriptor, .. } => descriptor.digest.clone(),
            ImageLayer::Appended(layer) => layer.digest(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            ImageLayer::Base { descriptor, .. } => descriptor.size,
            ImageLayer::Appended(layer) => layer.size(),
        }
    }
}

impl std::fmt::Debug for ImageLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageLayer::Base { descriptor, source } => f
                .debug_struct("Base")
                .field("digest", &descriptor.digest.to_string())
                .field("source", &source.registry_name())
                .finish(),
            ImageLayer::Appended(layer) => f.debug_tuple("Appended").field(layer).finish(),
        }
    }
}

/// An image value. Mutations return a new `Image`; unchanged layers are
/// shared with the original.
#[derive(Clone, Debug)]
pub struct Image {
    media_type: MediaType,
    manifest: Manifest,
    // bytes exactly as pulled, dropped by any mutation
    raw_manifest: Option<Bytes>,
    config: Bytes,
    layers: Vec<ImageLayer>,
}

impl Image {
    pub(crate) fn from_remote(
        media_type: MediaType,
        raw_manifest: Bytes,
        config: Bytes,
        source: Arc<dyn Registry>,
    ) -> Result<Image, Error> {
        let manifest = Manifest::parse(&raw_manifest)?;
        let config_digest = Digest::sha256(&config);
        if config_digest != manifest.config.digest {
            bail!(
                "Config blob digest {} does not match manifest config digest {}",
                config_digest,
                manifest.config.digest
            );
        }
        let layers = manifest
            .layers
            .iter()
            .map(|descriptor| ImageLayer::Base {
                descriptor: descriptor.clone(),
                source: Arc::clone(&source),
            })
            .collect();

        Ok(Image {
            media_type,
            manifest,
            raw_manifest: Some(raw_manifest),
            config,
            layers,
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn config_bytes(&self) -> &Bytes {
        &self.config
    }

    pub fn layers(&self) -> &[ImageLayer] {
        &self.layers
    }

    /// The manifest bytes this image is published as.
    pub fn raw_manifest(&self) -> Result<Bytes, Error> {
        match &self.raw_manifest {
            Some(raw) => Ok(raw.clone()),
            None => Ok(Bytes::from(
                self.manifest.to_bytes().context("Serializing manifest")?,
            )),
        }
    }

    /// Recomputed from the manifest bytes on every call.
    pub fn digest(&self) -> Result<Digest, Error> {
        Ok(Digest::sha256(&self.raw_manifest()?))
    }

    /// Returns a new image with `layers` appended, in order, after the
    /// existing ones. The config gains the layers' diff ids.
    pub fn append_layers(&self, layers: &[Arc<dyn Layer>]) -> Result<Image, Error> {
        let expected = self.media_type.layer_type();
        for layer in layers {
            if layer.media_type() != expected {
                bail!(
                    "Layer {} has media type {}, but a {} image requires {}",
                    layer.digest(),
                    layer.media_type(),
                    self.media_type,
                    expected
                );
            }
        }

        let mut next = self.clone();
        next.raw_manifest = None;
        if layers.is_empty() {
            return Ok(next);
        }

        let diff_ids: Vec<Digest> = layers.iter().map(|l| l.diff_id()).collect();
        let config = Bytes::from(append_diff_ids(&self.config, &diff_ids)?);
        next.manifest.config = Descriptor {
            size: config.len() as u64,
            digest: Digest::sha256(&config),
            ..self.manifest.config.clone()
        };
        next.config = config;

        for layer in layers {
            next.manifest.layers.push(Descriptor::new(
                layer.media_type().as_str(),
                layer.size(),
                layer.digest(),
            ));
            next.layers.push(ImageLayer::Appended(Arc::clone(layer)));
        }
        Ok(next)
    }

    /// Returns a new image with `annotations` merged into the manifest annotations.
    pub fn with_annotations(&self, annotations: BTreeMap<String, String>) -> Image {
        let mut next = self.clone();
        next.raw_manifest = None;
        next.manifest
            .annotations
            .get_or_insert_with(Default::default)
            .extend(annotations);
        next
    }
}
