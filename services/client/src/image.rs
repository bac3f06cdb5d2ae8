//! Images shared from the local disk.

use parley_core::Command;
use std::path::Path;
use tracing::warn;

/// Largest image accepted for sharing.
pub const MAX_IMAGE_SIZE: u64 = 10 * 1024 * 1024;

/// Checks the file at `path` and returns the command that shows it, or a
/// note explaining why it was refused.
pub async fn share_image(path: &str) -> Command {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Command::Note(format!("{path} is not a file")),
        Err(err) => {
            warn!(%path, error = %err, "Cannot read shared image");
            return Command::Note(format!("Could not read image {path}: {err}"));
        }
    };
    if metadata.len() > MAX_IMAGE_SIZE {
        return Command::Note("Image size exceeds 10MB limit".to_string());
    }

    let caption = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    Command::ShareImage {
        location: path.to_string(),
        caption,
    }
}
