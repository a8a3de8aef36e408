use super::recorder::RepetitionRecord;
use crate::error::{FormcoachError, Result};
use crate::frame::decode_image_payload;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Write the frames of one repetition as `rep<NNN>_<IIII>.jpg` files under `dir`.
///
/// Frames whose payload cannot be decoded are skipped.
pub async fn export_record(record: &RepetitionRecord, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).await.map_err(|e| {
        FormcoachError::system(format!(
            "Failed to create replay directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let mut written = Vec::with_capacity(record.frames.len());
    for (index, frame) in record.frames.iter().enumerate() {
        let bytes = match decode_image_payload(&frame.image) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping frame {} of repetition {}: {}", index, record.number, e);
                continue;
            }
        };

        let path = dir.join(format!("rep{:03}_{:04}.jpg", record.number, index));
        fs::write(&path, bytes).await?;
        written.push(path);
    }

    debug!(
        "Exported {} frames of repetition {} to {}",
        written.len(),
        record.number,
        dir.display()
    );
    Ok(written)
}
