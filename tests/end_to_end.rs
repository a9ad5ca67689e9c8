//! Configuration-driven runs against a filesystem bucket and a SQLite
//! document store.

use bytes::Bytes;
use common::config::Configuration;
use common::document::{CollectionPath, DocumentPath, DocumentStore};
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use lifecycle::{DispatchSummary, Dispatcher, Runtime};
use object_store::path::Path;
use serde_json::{Map, json};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

fn jpeg(width: u32, height: u32) -> Bytes {
    let img: RgbImage = ImageBuffer::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 40, 80]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    Bytes::from(out.into_inner())
}

fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let blobs = dir.path().join("blobs");
    std::fs::create_dir_all(&blobs).unwrap();
    let config = format!(
        r#"
        [storage]
        default_bucket = "photos"

        [storage.buckets.photos]
        dsn = "file://{blobs}"
        public_url = "https://cdn.example.com/photos"

        [documents]
        dsn = "sqlite://{db}"

        [linker]
        initial_delay = "1ms"
        max_delay = "2ms"

        [cascade]
        batch_size = 20
        "#,
        blobs = blobs.display(),
        db = dir.path().join("db/documents.db").display(),
    );
    let path = dir.path().join("assetkeeper.toml");
    std::fs::write(&path, config).unwrap();
    path
}

#[tokio::test]
async fn test_upload_then_delete_motorcycle() {
    let dir = TempDir::new().unwrap();
    let config = Configuration::load_from_path(&write_config(&dir)).unwrap();
    config.validate().unwrap();

    let runtime = Runtime::from_config(&config).await.unwrap();
    let bucket = runtime.buckets().get("photos").unwrap().clone();
    let documents = runtime.documents().clone();
    let dispatcher = Dispatcher::new(Arc::new(runtime));

    let record = DocumentPath::parse("users/u1/motorcycles/m1").unwrap();
    documents
        .set(&record, json!({"make": "BMW"}).as_object().cloned().unwrap())
        .await
        .unwrap();
    let forms = CollectionPath::parse("users/u1/work_orders/m1/forms").unwrap();
    for i in 0..45 {
        documents
            .set(&forms.doc(&format!("wo{i:02}")).unwrap(), Map::new())
            .await
            .unwrap();
    }
    bucket
        .store()
        .put(&Path::from("users/u1/motorcycles/m1/bike.jpg"), jpeg(1000, 2000).into())
        .await
        .unwrap();

    let upload = json!({
        "kind": "object_finalized",
        "bucket": "photos",
        "objectName": "users/u1/motorcycles/m1/bike.jpg",
        "contentType": "image/jpeg"
    });
    let summary = dispatcher
        .dispatch_lines(format!("{upload}\n").as_bytes())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);

    let linked = documents.get(&record).await.unwrap().unwrap();
    let image = &linked["image"];
    assert_eq!(image["thumbnailUrl"], json!("users/u1/motorcycles/m1/thumb_bike.jpg"));
    assert!(image["thumbnailPublicUrl"]
        .as_str()
        .unwrap()
        .starts_with("https://cdn.example.com/photos/users/u1/motorcycles/m1/thumb_bike.jpg?expires="));

    let thumbnail = bucket
        .store()
        .get(&Path::from("users/u1/motorcycles/m1/thumb_bike.jpg"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let thumbnail = image::load_from_memory(&thumbnail).unwrap();
    assert_eq!((thumbnail.width(), thumbnail.height()), (125, 250));

    // the record is deleted by its owner; the trigger carries its last content
    documents.delete(&record).await.unwrap();
    let deletion = json!({
        "kind": "document_deleted",
        "documentPath": "users/u1/motorcycles/m1",
        "priorFieldValues": linked,
    });
    let summary = dispatcher
        .dispatch_lines(format!("{deletion}\n").as_bytes())
        .await
        .unwrap();
    assert_eq!(
        summary,
        DispatchSummary {
            completed: 1,
            ..Default::default()
        }
    );

    assert!(documents.query(&forms, 100).await.unwrap().is_empty());
    assert!(bucket
        .store()
        .head(&Path::from("users/u1/motorcycles/m1/bike.jpg"))
        .await
        .is_err());
    assert!(bucket
        .store()
        .head(&Path::from("users/u1/motorcycles/m1/thumb_bike.jpg"))
        .await
        .is_err());
}
