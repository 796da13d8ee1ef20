use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use nutrilens::NutritionError;
use nutrilens::storage::UploadStore;

fn transparent_png() -> Vec<u8> {
    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(6, 4, Rgba([30, 160, 60, 128])))
        .write_to(&mut png, ImageFormat::Png)
        .unwrap();
    png.into_inner()
}

#[tokio::test]
async fn stores_canonical_jpeg_and_removes_original() {
    let dir = tempfile::tempdir().unwrap();
    let store = UploadStore::new(dir.path().join("uploads"));

    let stored = store
        .store_canonical("lunch plate.png", &transparent_png())
        .await
        .unwrap();

    assert_eq!(stored.path, dir.path().join("uploads").join("lunch_plate.jpeg"));
    let on_disk = std::fs::read(&stored.path).unwrap();
    assert_eq!(on_disk, stored.image.as_bytes());
    assert_eq!(image::guess_format(&on_disk).unwrap(), ImageFormat::Jpeg);
    assert!(!dir.path().join("uploads").join("lunch_plate.png").exists());
}

#[tokio::test]
async fn canonical_upload_with_jpeg_name_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = UploadStore::new(dir.path());

    let first = store.store_canonical("meal.png", &transparent_png()).await.unwrap();
    let second = store
        .store_canonical("meal.jpeg", first.image.as_bytes())
        .await
        .unwrap();

    assert_eq!(first.path, second.path);
    assert!(second.path.exists());
    assert_eq!(second.image, first.image);
}

#[tokio::test]
async fn undecodable_upload_is_rejected_and_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let store = UploadStore::new(dir.path());

    let err = store
        .store_canonical("notes.txt", b"not a picture")
        .await
        .unwrap_err();

    assert!(matches!(err, NutritionError::ImageDecode { .. }));
    assert!(!dir.path().join("notes.txt").exists());
    assert!(!dir.path().join("notes.jpeg").exists());
}

#[tokio::test]
async fn undecodable_upload_under_canonical_name_keeps_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = UploadStore::new(dir.path());

    let good = store.store_canonical("meal.png", &transparent_png()).await.unwrap();
    let err = store
        .store_canonical("meal.jpeg", b"not a picture")
        .await
        .unwrap_err();

    assert!(matches!(err, NutritionError::ImageDecode { .. }));
    assert_eq!(std::fs::read(&good.path).unwrap(), good.image.as_bytes());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("meal.jpeg")]);
}

#[tokio::test]
async fn undecodable_first_upload_under_canonical_name_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = UploadStore::new(dir.path());

    assert!(store.store_canonical("meal.jpeg", b"not a picture").await.is_err());
    assert!(!dir.path().join("meal.jpeg").exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
