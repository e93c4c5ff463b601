use std::sync::Arc;

use anyhow::{anyhow, Error};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::digest::Digest;
use crate::error::AppendError;
use crate::image::Image;
use crate::progress::{
    drain_updates, ProgressReporter, PROGRESS_REPORT_MIN_INTERVAL, RESULT_CHANNEL_CAPACITY,
    UPDATE_CHANNEL_CAPACITY,
};
use crate::reference::{Identifier, Reference};
use crate::registry::{ops, RegistryProvider};

/// Writes `image` to `destination`, logging progress while the write runs on
/// its own task. Returns the digest of the manifest that was written.
pub(super) async fn publish(
    provider: &Arc<dyn RegistryProvider>,
    destination: &Reference,
    image: &Image,
) -> Result<Digest, AppendError> {
    let push_error = |source: Error| AppendError::Push {
        reference: destination.to_string(),
        source,
    };

    let digest = image.digest().map_err(AppendError::Digest)?;
    if let Identifier::Digest(expected) = destination.identifier() {
        if expected != &digest {
            return Err(push_error(anyhow!(
                "Destination is pinned to {}, but the image digest is {}",
                expected,
                digest
            )));
        }
    }

    tracing::info!(media_type = %image.media_type(), "pushing");

    let registry = provider.connect(destination).await.map_err(push_error)?;

    let (update_tx, mut update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
    let (result_tx, mut result_rx) = mpsc::channel::<Result<(), Error>>(RESULT_CHANNEL_CAPACITY);

    let writer_result_tx = result_tx.clone();
    let writer_image = image.clone();
    let identifier = destination.identifier().to_string();
    let writer = tokio::spawn(
        async move {
            let outcome =
                match ops::write_image(registry, &writer_image, &identifier, update_tx).await {
                    Ok(actions) => {
                        tracing::info!("Blob actions taken:\n{}", actions);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
            let _ = writer_result_tx.send(outcome).await;
        }
        .in_current_span(),
    );

    let mut reporter = ProgressReporter::new(PROGRESS_REPORT_MIN_INTERVAL);
    drain_updates(&mut update_rx, &result_tx, &mut reporter).await;
    // lets a writer blocked on a full update channel carry on to its result
    drop(update_rx);
    drop(result_tx);

    let outcome = match result_rx.recv().await {
        Some(outcome) => outcome,
        None => match writer.await {
            Err(join_error) => Err(Error::from(join_error).context("Registry writer failed")),
            Ok(()) => Err(anyhow!("Registry writer exited without reporting an outcome")),
        },
    };
    outcome.map_err(push_error)?;

    Ok(digest)
}
