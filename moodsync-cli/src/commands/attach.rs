use clap::Args;
use moodsync_core::{stage_attachment, EntryId};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::device::Device;

/// Largest photo accepted, matching the server's body limit.
const MAX_PHOTO_BYTES: u64 = 16 * 1024 * 1024;

/// Attach a photo to an entry
#[derive(Args)]
pub struct AttachCommand {
    /// Entry ID
    pub id: EntryId,

    /// Photo file (jpeg, png, heic or webp)
    pub photo: PathBuf,
}

impl AttachCommand {
    pub async fn run(
        &self,
        device: &Device,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (content_type, data) = read_photo(&self.photo)?;

        // Offline: keep the photo until the next sync uploads it
        let session = match device.session(&config.sync) {
            Ok(session) => session,
            Err(_) => {
                stage_attachment(&device.store, self.id, content_type, &data).await?;
                println!("Photo saved. It will upload on the next sync.");
                return Ok(());
            }
        };

        let uploader = session.uploader.clone().with_max_attempts(1);
        let (_, upload) = uploader.attach(self.id, content_type, data).await?;
        match upload.await {
            Ok(Ok(reference)) => println!("Photo uploaded: {}", reference),
            Ok(Err(e)) => {
                println!("Photo saved. Upload will be retried on the next sync ({})", e)
            }
            Err(e) => return Err(format!("Upload task failed: {}", e).into()),
        }
        Ok(())
    }
}

/// Load a photo and guess its content type from the extension.
pub(crate) fn read_photo(path: &Path) -> Result<(&'static str, Vec<u8>), Box<dyn std::error::Error>> {
    let content_type = content_type_for(path)
        .ok_or_else(|| format!("Unsupported photo type: {}", path.display()))?;

    let size = std::fs::metadata(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?
        .len();
    if size > MAX_PHOTO_BYTES {
        return Err(format!(
            "Photo is {} bytes, at most {} allowed",
            size, MAX_PHOTO_BYTES
        )
        .into());
    }

    let data =
        std::fs::read(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    Ok((content_type, data))
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "heic" => Some("image/heic"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
