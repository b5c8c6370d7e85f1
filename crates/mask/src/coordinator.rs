use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, GrayImage, RgbaImage};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::{
    error::{MaskError, Result},
    io::{decode_mask, encode_png, from_base64, to_base64_png},
    journal::ReviewJournal,
    render::{Compositor, CompositorConfig, distinct_colors, transparent_overlay},
    store::MaskStore,
    traits::Segmenter,
    types::{
        ChunkId, ImageInfo, ItemIndex, MaskColor, MaskId, PointPrompt, QueryId, ReviewEvent,
        StatusProjection, validate_image_name,
    },
};

/// Color and alpha of the overlay returned for a fresh prediction.
pub const PREDICTION_COLOR: MaskColor = [0, 255, 0];
pub const PREDICTION_ALPHA: u8 = 120;

#[derive(
    Debug, Clone,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq
)]
#[serde(tag = "type", content = "params")]
#[strum(serialize_all = "snake_case")]
pub enum AnnotationCommand {
    /// Register a source image under a name
    #[serde(rename = "register_image")]
    RegisterImage {
        #[schemars(length(min = 1, max = 255))]
        name: String,
        image_b64: String,
    },

    /// Store a mask for an (image, query) pair
    #[serde(rename = "save_mask")]
    SaveMask {
        image_name: String,
        query_id: QueryId,
        mask_png_b64: String,
    },

    /// Remove a mask; unknown ids succeed
    #[serde(rename = "delete_mask")]
    DeleteMask {
        image_name: String,
        query_id: QueryId,
        mask_id: String,
    },

    /// Render the combined and per-mask thumbnails
    #[serde(rename = "list_masks")]
    ListMasks {
        image_name: String,
        query_id: QueryId,
    },

    /// Record a review decision
    #[serde(rename = "log_action")]
    LogAction {
        chunk_id: ChunkId,
        index: ItemIndex,
        image_name: String,
        query_id: QueryId,
        action: String,
    },

    /// Current status of every item in a chunk
    #[serde(rename = "get_status")]
    GetStatus { chunk_id: ChunkId },
}

impl AnnotationCommand {
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AnnotationCommand)
    }

    pub fn command_names() -> &'static [&'static str] {
        <Self as VariantNames>::VARIANTS
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::RegisterImage { .. } => "Register a base64 source image and return its dimensions",
            Self::SaveMask { .. } => "Save a base64 PNG mask and return its new id",
            Self::DeleteMask { .. } => "Delete a mask by id (idempotent)",
            Self::ListMasks { .. } => "Combined thumbnail plus one thumbnail per stored mask",
            Self::LogAction { .. } => "Append a done/skip decision to a chunk journal",
            Self::GetStatus { .. } => "Replay a chunk journal into the latest status per item",
        }
    }
}

/// Serializable result of [`Coordinator::execute`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandOutput {
    Image(ImageInfo),
    Saved { mask_id: MaskId },
    Deleted { mask_id: String },
    Listing {
        /// Absent when no mask could be rendered.
        combined_png_b64: Option<String>,
        masks: Vec<EncodedThumbnail>,
    },
    Logged(ReviewEvent),
    Status {
        chunk_id: ChunkId,
        statuses: StatusProjection,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodedThumbnail {
    pub mask_id: MaskId,
    pub thumbnail_png_b64: String,
}

/// One rendered mask from a listing.
#[derive(Debug, Clone)]
pub struct MaskThumbnail {
    pub id: MaskId,
    pub color: MaskColor,
    pub image: RgbaImage,
}

#[derive(Debug, Clone)]
pub struct MaskListing {
    /// `None` when the collection is empty or no mask loaded.
    pub combined: Option<RgbaImage>,
    /// Only masks whose files loaded, in collection order.
    pub masks: Vec<MaskThumbnail>,
}

impl MaskListing {
    pub fn ids(&self) -> Vec<MaskId> {
        self.masks.iter().map(|m| m.id.clone()).collect()
    }
}

/// Output of a point-prompt prediction.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub mask: GrayImage,
    pub mask_png: Vec<u8>,
    /// Mask painted on a transparent canvas.
    pub overlay_png: Vec<u8>,
}

/// Wires requests to the mask store, review journal and compositor.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<MaskStore>,
    journal: Arc<ReviewJournal>,
    images_dir: PathBuf,
    compositor: Compositor,
}

impl Coordinator {
    pub fn new(
        store: Arc<MaskStore>,
        journal: Arc<ReviewJournal>,
        images_dir: impl Into<PathBuf>,
        compositor: Compositor,
    ) -> Self {
        Self {
            store,
            journal,
            images_dir: images_dir.into(),
            compositor,
        }
    }

    /// Standard layout under one data root: `masks/`, `logs/`, `images/`.
    pub fn open(data_root: impl AsRef<Path>, config: CompositorConfig) -> Self {
        let root = data_root.as_ref();
        Self::new(
            Arc::new(MaskStore::new(root.join("masks"))),
            Arc::new(ReviewJournal::new(root.join("logs"))),
            root.join("images"),
            Compositor::new(config),
        )
    }

    pub fn store(&self) -> &MaskStore {
        &self.store
    }

    pub fn journal(&self) -> &ReviewJournal {
        &self.journal
    }

    /// Validate and keep an uploaded source image.
    pub fn register_image(&self, name: &str, bytes: &[u8]) -> Result<ImageInfo> {
        validate_image_name(name)?;
        let image = image::load_from_memory(bytes)
            .map_err(|e| MaskError::Decode(format!("image {name}: {e}")))?;

        fs::create_dir_all(&self.images_dir)?;
        // replaced whole or not at all
        let mut tmp = NamedTempFile::new_in(&self.images_dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.images_dir.join(name))?;

        let info = ImageInfo {
            name: name.to_string(),
            width: image.width(),
            height: image.height(),
        };
        info!("Registered image {} ({}x{})", name, info.width, info.height);
        Ok(info)
    }

    pub fn image_path(&self, name: &str) -> Result<PathBuf> {
        validate_image_name(name)?;
        let path = self.images_dir.join(name);
        if !path.is_file() {
            return Err(MaskError::not_found(format!("image {name}")));
        }
        Ok(path)
    }

    pub fn load_image(&self, name: &str) -> Result<DynamicImage> {
        let bytes = fs::read(self.image_path(name)?)?;
        image::load_from_memory(&bytes).map_err(|e| MaskError::Decode(format!("image {name}: {e}")))
    }

    /// Decode `mask_bytes` and store them as a new mask.
    pub fn save_mask(&self, image_name: &str, query_id: QueryId, mask_bytes: &[u8]) -> Result<MaskId> {
        let mask = decode_mask(mask_bytes)?;
        self.store.save(image_name, query_id, &mask)
    }

    pub fn delete_mask(&self, image_name: &str, query_id: QueryId, mask_id: &str) -> Result<()> {
        match MaskId::parse(mask_id) {
            Ok(id) => self.store.delete(image_name, query_id, &id),
            // could never have been stored
            Err(_) => Ok(()),
        }
    }

    /// Thumbnails for every loadable mask plus the combined overlay.
    pub fn list_masks(&self, image_name: &str, query_id: QueryId) -> Result<MaskListing> {
        let ids = self.store.list(image_name, query_id)?;
        if ids.is_empty() {
            return Ok(MaskListing {
                combined: None,
                masks: Vec::new(),
            });
        }
        let base = self.load_image(image_name)?;

        let loaded: Vec<Result<GrayImage>> = ids
            .iter()
            .map(|id| self.store.load(image_name, query_id, id))
            .collect();
        let colors = distinct_colors(ids.len());

        let mut masks = Vec::new();
        for ((id, mask), color) in ids.iter().zip(&loaded).zip(colors) {
            match mask {
                Ok(mask) => masks.push(MaskThumbnail {
                    id: id.clone(),
                    color,
                    image: self.compositor.preview(&base, mask, color),
                }),
                Err(e) => warn!("Skipping mask {} of {}#{}: {}", id, image_name, query_id, e),
            }
        }

        let combined = self.compositor.combined_preview(&base, loaded);
        debug!(
            "Listed {} of {} masks for {}#{}",
            masks.len(),
            ids.len(),
            image_name,
            query_id
        );
        Ok(MaskListing { combined, masks })
    }

    pub fn log_action(
        &self,
        chunk_id: ChunkId,
        index: ItemIndex,
        image_name: &str,
        query_id: QueryId,
        action: &str,
    ) -> Result<ReviewEvent> {
        self.journal.append(chunk_id, index, image_name, query_id, action)
    }

    pub fn status(&self, chunk_id: ChunkId) -> Result<StatusProjection> {
        self.journal.replay(chunk_id)
    }

    /// Ask `segmenter` for a mask from point prompts on a registered image.
    pub async fn predict<S: Segmenter>(
        &self,
        segmenter: &S,
        image_name: &str,
        points: &[PointPrompt],
    ) -> Result<Prediction> {
        if points.is_empty() {
            return Err(MaskError::NoPoints);
        }
        let path = self.image_path(image_name)?;
        debug!("Predicting {} with {} points via {}", image_name, points.len(), segmenter.name());

        let bytes = segmenter.segment(&path, points).await?;
        let mask = decode_mask(&bytes)?;
        let overlay = transparent_overlay(&mask, PREDICTION_COLOR, PREDICTION_ALPHA);

        Ok(Prediction {
            mask_png: encode_png(&DynamicImage::ImageLuma8(mask.clone()))?,
            overlay_png: encode_png(&DynamicImage::ImageRgba8(overlay))?,
            mask,
        })
    }

    pub fn execute(&self, command: AnnotationCommand) -> Result<CommandOutput> {
        match command {
            AnnotationCommand::RegisterImage { name, image_b64 } => {
                let bytes = from_base64(&image_b64)?;
                self.register_image(&name, &bytes).map(CommandOutput::Image)
            }
            AnnotationCommand::SaveMask { image_name, query_id, mask_png_b64 } => {
                let bytes = from_base64(&mask_png_b64)?;
                let mask_id = self.save_mask(&image_name, query_id, &bytes)?;
                Ok(CommandOutput::Saved { mask_id })
            }
            AnnotationCommand::DeleteMask { image_name, query_id, mask_id } => {
                self.delete_mask(&image_name, query_id, &mask_id)?;
                Ok(CommandOutput::Deleted { mask_id })
            }
            AnnotationCommand::ListMasks { image_name, query_id } => {
                let listing = self.list_masks(&image_name, query_id)?;
                let combined_png_b64 = listing
                    .combined
                    .map(|img| to_base64_png(&DynamicImage::ImageRgba8(img)))
                    .transpose()?;
                let masks = listing
                    .masks
                    .into_iter()
                    .map(|m| -> Result<EncodedThumbnail> {
                        Ok(EncodedThumbnail {
                            mask_id: m.id,
                            thumbnail_png_b64: to_base64_png(&DynamicImage::ImageRgba8(m.image))?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CommandOutput::Listing { combined_png_b64, masks })
            }
            AnnotationCommand::LogAction { chunk_id, index, image_name, query_id, action } => self
                .log_action(chunk_id, index, &image_name, query_id, &action)
                .map(CommandOutput::Logged),
            AnnotationCommand::GetStatus { chunk_id } => Ok(CommandOutput::Status {
                chunk_id,
                statuses: self.status(chunk_id)?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReviewAction;
    use image::{Luma, Rgb, RgbImage};
    use tempfile::TempDir;

    struct FixedSegmenter(Vec<u8>);

    impl Segmenter for FixedSegmenter {
        async fn segment(&self, _image_path: &Path, _points: &[PointPrompt]) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct DownSegmenter;

    impl Segmenter for DownSegmenter {
        async fn segment(&self, _image_path: &Path, _points: &[PointPrompt]) -> Result<Vec<u8>> {
            Err(MaskError::CollaboratorUnavailable("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "down"
        }
    }

    fn coordinator(dir: &TempDir) -> Coordinator {
        Coordinator::open(dir.path(), CompositorConfig { opacity: 1.0, thumbnail_width: None })
    }

    fn png_image(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
    }

    fn png_mask(width: u32, height: u32, x0: u32, x1: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(width, height, |x, _| Luma([if x >= x0 && x < x1 { 255 } else { 0 }]));
        encode_png(&DynamicImage::ImageLuma8(img)).unwrap()
    }

    #[test]
    fn test_register_image_reports_dimensions() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        let info = coordinator.register_image("cat.png", &png_image(12, 8)).unwrap();
        assert_eq!((info.width, info.height), (12, 8));
        assert!(coordinator.image_path("cat.png").is_ok());
        assert!(matches!(
            coordinator.register_image("bad.png", b"nope"),
            Err(MaskError::Decode(_))
        ));
    }

    #[test]
    fn test_reregister_replaces_image_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.register_image("cat.png", &png_image(12, 8)).unwrap();
        coordinator.register_image("cat.png", &png_image(4, 6)).unwrap();
        // an undecodable upload never touches the stored image
        assert!(coordinator.register_image("cat.png", b"nope").is_err());

        let image = coordinator.load_image("cat.png").unwrap();
        assert_eq!((image.width(), image.height()), (4, 6));
        let entries: Vec<_> = fs::read_dir(dir.path().join("images")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_save_mask_rejects_undecodable_bytes() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        assert!(matches!(
            coordinator.save_mask("cat.png", 1, b"garbage"),
            Err(MaskError::Decode(_))
        ));
        assert!(coordinator.store().list("cat.png", 1).unwrap().is_empty());
    }

    #[test]
    fn test_listing_skips_missing_files() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.register_image("cat.png", &png_image(8, 8)).unwrap();
        let a = coordinator.save_mask("cat.png", 3, &png_mask(8, 8, 0, 4)).unwrap();
        let b = coordinator.save_mask("cat.png", 3, &png_mask(8, 8, 4, 8)).unwrap();

        fs::remove_file(dir.path().join("masks/cat.png/3").join(format!("{a}.png"))).unwrap();

        let listing = coordinator.list_masks("cat.png", 3).unwrap();
        assert_eq!(listing.ids(), vec![b]);
        let combined = listing.combined.expect("one mask still loads");
        assert_eq!(combined.get_pixel(6, 0).0[..3], distinct_colors(2)[1]);
    }

    #[test]
    fn test_listing_without_loadable_masks_has_no_combined() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.register_image("cat.png", &png_image(8, 8)).unwrap();
        let listing = coordinator.list_masks("cat.png", 1).unwrap();
        assert!(listing.combined.is_none());
        assert!(listing.masks.is_empty());
    }

    #[test]
    fn test_listing_unknown_image_is_not_found() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.save_mask("ghost.png", 1, &png_mask(4, 4, 0, 2)).unwrap();
        assert!(coordinator.list_masks("ghost.png", 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_execute_roundtrip_through_commands() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        use base64::Engine as _;
        let b64 = |bytes: Vec<u8>| base64::engine::general_purpose::STANDARD.encode(bytes);

        coordinator
            .execute(AnnotationCommand::RegisterImage { name: "cat.png".into(), image_b64: b64(png_image(4, 4)) })
            .unwrap();
        let saved = coordinator
            .execute(AnnotationCommand::SaveMask {
                image_name: "cat.png".into(),
                query_id: 0,
                mask_png_b64: b64(png_mask(4, 4, 0, 2)),
            })
            .unwrap();
        assert!(matches!(saved, CommandOutput::Saved { .. }));

        match coordinator
            .execute(AnnotationCommand::ListMasks { image_name: "cat.png".into(), query_id: 0 })
            .unwrap()
        {
            CommandOutput::Listing { combined_png_b64, masks } => {
                assert!(combined_png_b64.is_some());
                assert_eq!(masks.len(), 1);
            }
            other => panic!("unexpected output {other:?}"),
        }

        coordinator
            .execute(AnnotationCommand::LogAction {
                chunk_id: 5,
                index: 0,
                image_name: "cat.png".into(),
                query_id: 0,
                action: "done".into(),
            })
            .unwrap();
        let status = coordinator.execute(AnnotationCommand::GetStatus { chunk_id: 5 }).unwrap();
        let CommandOutput::Status { statuses, .. } = status else {
            panic!("expected status");
        };
        assert_eq!(statuses.get(&0), Some(&ReviewAction::Done));
    }

    #[test]
    fn test_delete_with_malformed_id_is_noop() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.delete_mask("cat.png", 1, "../../etc").unwrap();
    }

    #[test]
    fn test_command_metadata() {
        assert!(AnnotationCommand::command_names().contains(&"save_mask"));
        let json = serde_json::to_value(AnnotationCommand::GetStatus { chunk_id: 2 }).unwrap();
        assert_eq!(json["type"], "get_status");
        assert_eq!(json["params"]["chunk_id"], 2);
    }

    #[tokio::test]
    async fn test_predict_returns_mask_and_overlay() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.register_image("cat.png", &png_image(6, 6)).unwrap();
        let segmenter = FixedSegmenter(png_mask(6, 6, 0, 3));
        let points = [PointPrompt { x: 1.0, y: 1.0, label: Default::default() }];

        let prediction = coordinator.predict(&segmenter, "cat.png", &points).await.unwrap();
        assert_eq!(prediction.mask.get_pixel(0, 0)[0], 255);
        let overlay = image::load_from_memory(&prediction.overlay_png).unwrap().to_rgba8();
        assert_eq!(overlay.get_pixel(0, 0).0, [0, 255, 0, 120]);
        assert_eq!(overlay.get_pixel(5, 0).0[3], 0);
    }

    #[tokio::test]
    async fn test_predict_failures_are_structured() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.register_image("cat.png", &png_image(6, 6)).unwrap();
        let points = [PointPrompt { x: 1.0, y: 1.0, label: Default::default() }];

        assert!(matches!(
            coordinator.predict(&DownSegmenter, "cat.png", &points).await,
            Err(MaskError::CollaboratorUnavailable(_))
        ));
        assert!(matches!(
            coordinator.predict(&DownSegmenter, "cat.png", &[]).await,
            Err(MaskError::NoPoints)
        ));
        assert!(coordinator
            .predict(&DownSegmenter, "dog.png", &points)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
