//! Streams a source image through a fit-inside resize into a destination object.
//!
//! The transform runs as two halves joined by a bounded channel: a producer
//! that reads the source stream, resizes, encodes and emits chunks, and a
//! consumer that writes those chunks to the destination. The destination is
//! only committed after the producer sends [`Frame::End`]; if the producer
//! fails the partial upload is aborted, and if the destination fails the
//! channel closes and the producer stops reading the source.

use bytes::{Bytes, BytesMut};
use common::asset::is_derivative_key;
use common::config::DerivativeConfig;
use futures::StreamExt;
use image::ImageFormat;
use image::imageops::FilterType;
use object_store::buffered::BufWriter;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore};
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{SkipReason, TransformError, WriteError, WriterError};

/// Unit handed from the transform to the destination writer.
#[derive(Debug)]
enum Frame {
    Data(Bytes),
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformStats {
    pub source_bytes: u64,
    pub output_bytes: u64,
    pub width: u32,
    pub height: u32,
}

/// One source/destination pair to transform.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub store: Arc<dyn ObjectStore>,
    pub source: Path,
    pub destination: Path,
    pub content_type: String,
    /// Persist the content type as an object attribute.
    pub with_attributes: bool,
}

/// Completion signal of a running transform.
#[derive(Debug)]
pub struct TransformHandle {
    task: JoinHandle<Result<TransformStats, WriterError>>,
    resized: Option<oneshot::Receiver<()>>,
}

impl TransformHandle {
    /// Wait until the resized output is ready to be written. `false` when the
    /// transform failed before producing output.
    pub async fn resized(&mut self) -> bool {
        match self.resized.take() {
            Some(signal) => signal.await.is_ok(),
            None => false,
        }
    }

    /// Wait until the destination object is durably written or the run failed.
    pub async fn finished(self) -> Result<TransformStats, WriterError> {
        self.task
            .await
            .map_err(|e| TransformError::Worker(e.to_string()))?
    }
}

#[derive(Debug, Clone)]
pub struct StreamTransformer {
    config: DerivativeConfig,
}

impl StreamTransformer {
    pub fn new(config: DerivativeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DerivativeConfig {
        &self.config
    }

    /// Decide whether an object is a candidate for a derivative at all.
    pub fn check_applicable(
        &self,
        object_name: &str,
        content_type: Option<&str>,
    ) -> Result<(), SkipReason> {
        if !content_type.is_some_and(|ct| ct.starts_with("image/")) {
            return Err(SkipReason::NotAnImage {
                content_type: content_type.map(str::to_string),
            });
        }
        if is_derivative_key(object_name, &self.config.name_prefix) {
            return Err(SkipReason::AlreadyDerivative);
        }
        Ok(())
    }

    /// Start transforming `request.source` into `request.destination`.
    pub fn spawn(&self, request: TransformRequest) -> TransformHandle {
        let config = self.config.clone();
        let (resized_tx, resized_rx) = oneshot::channel();
        TransformHandle {
            task: tokio::spawn(run(config, request, resized_tx)),
            resized: Some(resized_rx),
        }
    }
}

/// Image format for a content type; the derivative keeps the source format.
pub fn output_format(content_type: &str) -> Result<ImageFormat, TransformError> {
    ImageFormat::from_mime_type(content_type)
        .filter(|format| format.writing_enabled())
        .ok_or_else(|| TransformError::UnsupportedFormat(content_type.to_string()))
}

async fn run(
    config: DerivativeConfig,
    request: TransformRequest,
    resized: oneshot::Sender<()>,
) -> Result<TransformStats, WriterError> {
    let format = output_format(&request.content_type)?;
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let content_type = request.with_attributes.then(|| request.content_type.clone());
    let produce = produce(&config, request.store.clone(), &request.source, format, tx, resized);
    let consume = consume(request.store, &request.destination, content_type, rx);
    let (produced, consumed) = tokio::join!(produce, consume);

    match (produced, consumed) {
        (Ok(stats), Ok(Some(written))) => Ok(TransformStats {
            output_bytes: written,
            ..stats
        }),
        // the producer only sees a closed sink as a consequence of this
        (_, Err(e)) => Err(e.into()),
        (Err(e), Ok(_)) => Err(e.into()),
        (Ok(_), Ok(None)) => Err(WriteError::Incomplete {
            key: request.destination.to_string(),
        }
        .into()),
    }
}

async fn produce(
    config: &DerivativeConfig,
    store: Arc<dyn ObjectStore>,
    source: &Path,
    format: ImageFormat,
    tx: mpsc::Sender<Frame>,
    resized: oneshot::Sender<()>,
) -> Result<TransformStats, TransformError> {
    let unreadable = |e| TransformError::SourceUnreadable {
        key: source.to_string(),
        source: e,
    };
    let too_large = || TransformError::SourceTooLarge {
        key: source.to_string(),
        limit: config.max_source_bytes,
    };

    let result = store.get(source).await.map_err(unreadable)?;
    if result.meta.size as u64 > config.max_source_bytes as u64 {
        return Err(too_large());
    }

    let mut stream = result.into_stream();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        if tx.is_closed() {
            // dropping the stream aborts the source read
            return Err(TransformError::SinkClosed);
        }
        let chunk = chunk.map_err(unreadable)?;
        if buffer.len() + chunk.len() > config.max_source_bytes {
            return Err(too_large());
        }
        buffer.extend_from_slice(&chunk);
    }
    drop(stream);

    let source_bytes = buffer.len() as u64;
    let (max_width, max_height) = (config.max_width, config.max_height);
    let source_data = buffer.freeze();
    let (encoded, width, height) = tokio::task::spawn_blocking(move || {
        resize(&source_data, format, max_width, max_height)
    })
    .await
    .map_err(|e| TransformError::Worker(e.to_string()))??;

    tracing::debug!(
        source = %source,
        source_bytes,
        output_bytes = encoded.len(),
        width,
        height,
        "Resized image"
    );
    // nobody may be waiting for the signal
    let _ = resized.send(());

    let encoded = Bytes::from(encoded);
    let mut offset = 0;
    while offset < encoded.len() {
        let end = (offset + config.chunk_size).min(encoded.len());
        tx.send(Frame::Data(encoded.slice(offset..end)))
            .await
            .map_err(|_| TransformError::SinkClosed)?;
        offset = end;
    }
    tx.send(Frame::End)
        .await
        .map_err(|_| TransformError::SinkClosed)?;

    Ok(TransformStats {
        source_bytes,
        output_bytes: encoded.len() as u64,
        width,
        height,
    })
}

/// Decode, fit inside `max_width` x `max_height` preserving aspect ratio, re-encode.
fn resize(
    source: &[u8],
    format: ImageFormat,
    max_width: u32,
    max_height: u32,
) -> Result<(Vec<u8>, u32, u32), TransformError> {
    let image = image::load_from_memory_with_format(source, format)?;
    let thumbnail = image.resize(max_width, max_height, FilterType::Lanczos3);

    let mut output = Cursor::new(Vec::new());
    thumbnail.write_to(&mut output, format)?;
    Ok((output.into_inner(), thumbnail.width(), thumbnail.height()))
}

async fn consume(
    store: Arc<dyn ObjectStore>,
    destination: &Path,
    content_type: Option<String>,
    mut rx: mpsc::Receiver<Frame>,
) -> Result<Option<u64>, WriteError> {
    let destination_error = |e| WriteError::Destination {
        key: destination.to_string(),
        source: e,
    };

    let mut writer = BufWriter::new(store, destination.clone());
    if let Some(content_type) = content_type {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.into());
        writer = writer.with_attributes(attributes);
    }

    let mut written = 0u64;
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Data(chunk) => {
                if let Err(e) = writer.write_all(&chunk).await {
                    rx.close();
                    abort(&mut writer, destination).await;
                    return Err(destination_error(e));
                }
                written += chunk.len() as u64;
            }
            Frame::End => {
                if let Err(e) = writer.shutdown().await {
                    abort(&mut writer, destination).await;
                    return Err(destination_error(e));
                }
                return Ok(Some(written));
            }
        }
    }

    // producer went away without finishing: discard the partial upload
    abort(&mut writer, destination).await;
    Ok(None)
}

async fn abort(writer: &mut BufWriter, destination: &Path) {
    if let Err(e) = writer.abort().await {
        tracing::warn!(destination = %destination, error = %e, "Failed to abort destination upload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};
    use object_store::memory::InMemory;

    fn jpeg(width: u32, height: u32) -> Bytes {
        let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        Bytes::from(out.into_inner())
    }

    fn request(store: Arc<dyn ObjectStore>, content_type: &str) -> TransformRequest {
        TransformRequest {
            store,
            source: Path::from("images/bike1.jpg"),
            destination: Path::from("images/thumb_bike1.jpg"),
            content_type: content_type.to_string(),
            with_attributes: true,
        }
    }

    #[test]
    fn test_applicability_guards() {
        let transformer = StreamTransformer::new(DerivativeConfig::default());

        assert_eq!(
            transformer.check_applicable("notes/readme.txt", Some("text/plain")),
            Err(SkipReason::NotAnImage {
                content_type: Some("text/plain".to_string())
            })
        );
        assert_eq!(
            transformer.check_applicable("images/bike1.jpg", None),
            Err(SkipReason::NotAnImage { content_type: None })
        );
        assert_eq!(
            transformer.check_applicable("images/thumb_bike1.jpg", Some("image/jpeg")),
            Err(SkipReason::AlreadyDerivative)
        );
        assert!(transformer
            .check_applicable("images/bike1.jpg", Some("image/jpeg"))
            .is_ok());
    }

    #[test]
    fn test_output_format() {
        assert_eq!(output_format("image/jpeg").unwrap(), ImageFormat::Jpeg);
        assert_eq!(output_format("image/png").unwrap(), ImageFormat::Png);
        assert!(matches!(
            output_format("image/svg+xml"),
            Err(TransformError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_fit_inside_preserves_aspect_ratio() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        store
            .put(&Path::from("images/bike1.jpg"), jpeg(1000, 2000).into())
            .await
            .unwrap();

        let transformer = StreamTransformer::new(DerivativeConfig {
            chunk_size: 512,
            ..Default::default()
        });
        let stats = transformer
            .spawn(request(store.clone(), "image/jpeg"))
            .finished()
            .await
            .unwrap();

        assert_eq!((stats.width, stats.height), (125, 250));

        let written = store
            .get(&Path::from("images/thumb_bike1.jpg"))
            .await
            .unwrap();
        assert_eq!(
            written.attributes.get(&Attribute::ContentType).map(|v| v.as_ref()),
            Some("image/jpeg")
        );
        let bytes = written.bytes().await.unwrap();
        assert_eq!(bytes.len() as u64, stats.output_bytes);
        let thumbnail = image::load_from_memory(&bytes).unwrap();
        assert_eq!((thumbnail.width(), thumbnail.height()), (125, 250));
    }

    #[tokio::test]
    async fn test_invalid_image_writes_nothing() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        store
            .put(
                &Path::from("images/bike1.jpg"),
                Bytes::from_static(b"definitely not a jpeg").into(),
            )
            .await
            .unwrap();

        let transformer = StreamTransformer::new(DerivativeConfig::default());
        let err = transformer
            .spawn(request(store.clone(), "image/jpeg"))
            .finished()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WriterError::Transform(TransformError::InvalidImage(_))
        ));
        assert!(store.head(&Path::from("images/thumb_bike1.jpg")).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_source_is_unreadable() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let transformer = StreamTransformer::new(DerivativeConfig::default());

        let err = transformer
            .spawn(request(store, "image/jpeg"))
            .finished()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WriterError::Transform(TransformError::SourceUnreadable { .. })
        ));
    }

    #[tokio::test]
    async fn test_source_size_limit() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        store
            .put(&Path::from("images/bike1.jpg"), jpeg(400, 400).into())
            .await
            .unwrap();

        let transformer = StreamTransformer::new(DerivativeConfig {
            max_source_bytes: 64,
            ..Default::default()
        });
        let err = transformer
            .spawn(request(store.clone(), "image/jpeg"))
            .finished()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WriterError::Transform(TransformError::SourceTooLarge { limit: 64, .. })
        ));
        assert!(store.head(&Path::from("images/thumb_bike1.jpg")).await.is_err());
    }

    #[tokio::test]
    async fn test_destination_failure_is_a_write_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        // a non-empty directory where the derivative should go cannot be replaced
        std::fs::create_dir_all(temp_dir.path().join("images/thumb_bike1.jpg/blocker")).unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(
            object_store::local::LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap(),
        );
        store
            .put(&Path::from("images/bike1.jpg"), jpeg(300, 200).into())
            .await
            .unwrap();

        let transformer = StreamTransformer::new(DerivativeConfig::default());
        let err = transformer
            .spawn(TransformRequest {
                with_attributes: false,
                ..request(store, "image/jpeg")
            })
            .finished()
            .await
            .unwrap_err();

        assert!(matches!(err, WriterError::Write(WriteError::Destination { .. })));
        assert!(!err.needs_rollback());

        // the failed completion leaves no staged upload next to the source
        let mut entries: Vec<_> = std::fs::read_dir(temp_dir.path().join("images"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        entries.sort();
        assert_eq!(entries, ["bike1.jpg", "thumb_bike1.jpg"]);
    }
}
