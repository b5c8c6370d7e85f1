use std::future::Future;
use std::path::Path;

use crate::{error::Result, types::PointPrompt};

/// Anything that turns an image plus point prompts into a mask image.
///
/// Implementations return encoded image bytes (PNG or any format the `image`
/// crate decodes). Every failure is reported as
/// [`MaskError::CollaboratorUnavailable`](crate::MaskError::CollaboratorUnavailable).
pub trait Segmenter: Send + Sync {
    fn segment(
        &self,
        image_path: &Path,
        points: &[PointPrompt],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}
