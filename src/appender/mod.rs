//! Appends layers onto a pulled base image and publishes the result.
//!
//! An [`Appender`] is good for one build: resolve the base once, append, annotate,
//! push. Calling things out of order gives a [`MisuseError`], never a panic.

mod base;
mod publish;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::Instrument;

use crate::config::ContainConfig;
use crate::container_specs::manifest::{ANNOTATION_BASE_IMAGE_DIGEST, ANNOTATION_BASE_IMAGE_NAME};
use crate::container_specs::{LayerType, MediaType};
use crate::digest::Digest;
use crate::error::{AppendError, MisuseError};
use crate::image::Image;
use crate::layer::Layer;
use crate::reference::Reference;
use crate::registry::{HttpRegistryProvider, RegistryProvider};

pub use base::{DEFAULT_ARCHITECTURE, DEFAULT_OS};

enum State {
    Unresolved,
    Resolved {
        base: Image,
        media_type: MediaType,
        layer_type: LayerType,
    },
}

pub struct Appender {
    config: ContainConfig,
    base_ref: Reference,
    tag_ref: Option<Reference>,
    state: State,
    provider: Arc<dyn RegistryProvider>,
    span: tracing::Span,
}

impl std::fmt::Debug for Appender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appender")
            .field("base", &self.base_ref.to_string())
            .field("tag", &self.tag_ref.as_ref().map(|t| t.to_string()))
            .field("resolved", &matches!(self.state, State::Resolved { .. }))
            .finish()
    }
}

impl Appender {
    /// Appender talking to registries over http(s).
    pub fn new(config: ContainConfig) -> Result<Appender, AppendError> {
        Appender::with_provider(config, Arc::new(HttpRegistryProvider))
    }

    pub fn with_provider(
        config: ContainConfig,
        provider: Arc<dyn RegistryProvider>,
    ) -> Result<Appender, AppendError> {
        let base_ref = Reference::parse(&config.base).map_err(|e| {
            tracing::error!(reference = %config.base, error = %e, "Failed to parse base");
            e
        })?;

        // An absent destination is only an error once something is pushed.
        let tag_ref = match config.tag.as_deref().filter(|t| !t.is_empty()) {
            Some(tag) => Some(Reference::parse(tag).map_err(|e| {
                tracing::error!(reference = %tag, error = %e, "Failed to parse result image ref");
                e
            })?),
            None => None,
        };

        let span = tracing::info_span!(
            "appender",
            base = %base_ref,
            tag = tracing::field::Empty
        );
        span.in_scope(|| tracing::debug!(reference = %base_ref, "base image"));
        if let Some(tag_ref) = &tag_ref {
            span.record("tag", tracing::field::display(tag_ref));
            span.in_scope(|| tracing::debug!(reference = %tag_ref, "target image"));
        }

        Ok(Appender {
            config,
            base_ref,
            tag_ref,
            state: State::Unresolved,
            provider,
            span,
        })
    }

    pub fn base_ref(&self) -> &Reference {
        &self.base_ref
    }

    pub fn tag_ref(&self) -> Option<&Reference> {
        self.tag_ref.as_ref()
    }

    /// Pulls the base image. Allowed once per appender.
    pub async fn resolve_base(&mut self) -> Result<&Image, AppendError> {
        if let State::Resolved { .. } = self.state {
            self.span.in_scope(|| {
                tracing::error!(reference = %self.base_ref, "Base image has already been resolved")
            });
            return Err(MisuseError::AlreadyResolved.into());
        }

        let span = self.span.clone();
        let base = async {
            let registry = self
                .provider
                .connect(&self.base_ref)
                .await
                .map_err(|source| AppendError::Pull {
                    reference: self.base_ref.to_string(),
                    source,
                })?;
            base::fetch_base(registry, &self.base_ref).await
        }
        .instrument(span)
        .await?;

        let media_type = base.media_type();
        self.state = State::Resolved {
            base,
            media_type,
            layer_type: media_type.layer_type(),
        };
        self.base_image()
    }

    pub fn base_image(&self) -> Result<&Image, AppendError> {
        match &self.state {
            State::Resolved { base, .. } => Ok(base),
            State::Unresolved => Err(MisuseError::NotResolved.into()),
        }
    }

    pub fn media_type(&self) -> Result<MediaType, AppendError> {
        match &self.state {
            State::Resolved { media_type, .. } => Ok(*media_type),
            State::Unresolved => Err(MisuseError::NotResolved.into()),
        }
    }

    /// The media type every appended layer must carry.
    pub fn layer_type(&self) -> Result<LayerType, AppendError> {
        match &self.state {
            State::Resolved { layer_type, .. } => Ok(*layer_type),
            State::Unresolved => {
                self.span.in_scope(|| {
                    tracing::error!("Can not return layer type before the base has been resolved")
                });
                Err(MisuseError::NotResolved.into())
            }
        }
    }

    /// Writes `image` to the destination reference.
    pub async fn publish(&self, image: &Image) -> Result<Digest, AppendError> {
        let destination = match &self.tag_ref {
            Some(tag_ref) => tag_ref,
            None => {
                return Err(AppendError::invalid_reference(
                    self.config.tag.clone().unwrap_or_default(),
                    "no destination reference to push to",
                ))
            }
        };
        publish::publish(&self.provider, destination, image)
            .instrument(self.span.clone())
            .await
    }

    /// Appends `layers` to the base, annotates, and publishes. Resolves the
    /// base first if that has not happened yet.
    pub async fn append(mut self, layers: Vec<Arc<dyn Layer>>) -> Result<Digest, AppendError> {
        let span = self.span.clone();
        async move {
            self.warn_on_platforms();

            if let State::Unresolved = self.state {
                if let Err(e) = self.resolve_base().await {
                    tracing::error!(error = ?e, "Failed to get base image");
                    return Err(e);
                }
            }
            let base = self.base_image()?;

            let base_digest = base.digest().map_err(|e| {
                tracing::error!(error = ?e, "Failed to get base image digest");
                AppendError::Digest(e)
            })?;

            let appended = append_layers(base, &layers).map_err(|e| {
                tracing::error!(error = ?e, "Failed to append layers");
                e
            })?;
            let annotated = annotate(&appended, &self.base_ref, &base_digest);

            let digest = self.publish(&annotated).await.map_err(|e| {
                tracing::error!(error = ?e, "Failed to push");
                e
            })?;
            tracing::info!(digest = %digest, "pushed");
            Ok(digest)
        }
        .instrument(span)
        .await
    }

    fn warn_on_platforms(&self) {
        match self.config.platforms.as_slice() {
            [] => (),
            [platform] => tracing::warn!(
                platform = %platform,
                "unsupported single platform, falling back to all"
            ),
            platforms => tracing::warn!(
                platforms = ?platforms,
                "unsupported multiple platforms, falling back to all"
            ),
        }
    }
}

/// Returns a new image with `layers` after the base layers.
pub fn append_layers(base: &Image, layers: &[Arc<dyn Layer>]) -> Result<Image, AppendError> {
    base.append_layers(layers).map_err(AppendError::AppendLayers)
}

/// Records where `image` came from. The name annotation is only written for
/// tag references, a digest has no tag to name.
pub fn annotate(image: &Image, base_ref: &Reference, base_digest: &Digest) -> Image {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        ANNOTATION_BASE_IMAGE_DIGEST.to_string(),
        base_digest.to_string(),
    );
    if base_ref.is_tag() {
        annotations.insert(
            ANNOTATION_BASE_IMAGE_NAME.to_string(),
            format!("/{}:{}", base_ref.repository_str(), base_ref.identifier()),
        );
    }
    image.with_annotations(annotations)
}
