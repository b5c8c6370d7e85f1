use std::collections::BTreeMap;

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use mask::{
    CompositorConfig, Coordinator, MaskError, ReviewAction, distinct_colors, io::encode_png,
};
use tempfile::TempDir;

fn base_png() -> Vec<u8> {
    let img = RgbImage::from_pixel(20, 10, Rgb([90, 90, 90]));
    encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
}

fn band(x0: u32, x1: u32) -> Vec<u8> {
    let img = GrayImage::from_fn(20, 10, |x, _| Luma([if (x0..x1).contains(&x) { 255 } else { 0 }]));
    encode_png(&DynamicImage::ImageLuma8(img)).unwrap()
}

fn opaque(dir: &TempDir) -> Coordinator {
    Coordinator::open(dir.path(), CompositorConfig { opacity: 1.0, thumbnail_width: None })
}

#[test]
fn save_list_delete_scenario() {
    let dir = TempDir::new().unwrap();
    let coordinator = opaque(&dir);
    let store = coordinator.store();

    let a1 = coordinator.save_mask("cat.png", 7, &band(0, 10)).unwrap();
    let a2 = coordinator.save_mask("cat.png", 7, &band(5, 15)).unwrap();
    assert_ne!(a1, a2);
    assert_eq!(store.list("cat.png", 7).unwrap(), vec![a1.clone(), a2.clone()]);

    store.delete("cat.png", 7, &a1).unwrap();
    assert_eq!(store.list("cat.png", 7).unwrap(), vec![a2.clone()]);
    assert!(matches!(store.load("cat.png", 7, &a1), Err(MaskError::NotFound { .. })));
    assert!(store.load("cat.png", 7, &a2).is_ok());
}

#[test]
fn index_length_tracks_saves_minus_deletes() {
    let dir = TempDir::new().unwrap();
    let coordinator = opaque(&dir);
    let ids: Vec<_> = (0..6)
        .map(|i| coordinator.save_mask("dog.png", 1, &band(i, i + 2)).unwrap())
        .collect();
    coordinator.delete_mask("dog.png", 1, ids[1].as_str()).unwrap();
    coordinator.delete_mask("dog.png", 1, ids[4].as_str()).unwrap();
    coordinator.delete_mask("dog.png", 1, ids[4].as_str()).unwrap();

    let listed = coordinator.store().list("dog.png", 1).unwrap();
    assert_eq!(listed.len(), 4);
    assert_eq!(listed, vec![ids[0].clone(), ids[2].clone(), ids[3].clone(), ids[5].clone()]);
}

#[test]
fn combined_overlay_puts_later_mask_on_top() {
    let dir = TempDir::new().unwrap();
    let coordinator = opaque(&dir);
    coordinator.register_image("cat.png", &base_png()).unwrap();
    coordinator.save_mask("cat.png", 7, &band(0, 12)).unwrap();
    coordinator.save_mask("cat.png", 7, &band(8, 20)).unwrap();

    let listing = coordinator.list_masks("cat.png", 7).unwrap();
    let combined = listing.combined.expect("combined thumbnail");
    let colors = distinct_colors(2);

    assert_eq!(combined.get_pixel(10, 5).0[..3], colors[1]);
    assert_eq!(combined.get_pixel(2, 5).0[..3], colors[0]);
    assert_eq!(listing.masks.len(), 2);
    assert_eq!(listing.masks[0].color, colors[0]);
}

#[test]
fn review_journal_scenario() {
    let dir = TempDir::new().unwrap();
    let coordinator = opaque(&dir);
    coordinator.log_action(5, 0, "cat.png", 7, "done").unwrap();
    coordinator.log_action(5, 1, "dog.png", 7, "skip").unwrap();

    let expected = BTreeMap::from([(0, ReviewAction::Done), (1, ReviewAction::Skip)]);
    assert_eq!(coordinator.status(5).unwrap(), expected);
    assert_eq!(coordinator.status(5).unwrap(), expected);
    assert!(coordinator.status(6).unwrap().is_empty());
}

#[test]
fn rejected_action_leaves_log_untouched() {
    let dir = TempDir::new().unwrap();
    let coordinator = opaque(&dir);
    coordinator.log_action(3, 0, "cat.png", 1, "done").unwrap();
    let before = std::fs::read(coordinator.journal().log_path(3)).unwrap();

    let err = coordinator.log_action(3, 1, "cat.png", 1, "maybe").unwrap_err();
    assert!(matches!(err, MaskError::InvalidAction(_)));
    assert_eq!(std::fs::read(coordinator.journal().log_path(3)).unwrap(), before);
}
