//! End-to-end uploads through `object_store`'s in-memory backend.

use std::sync::Arc;

use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStoreExt;
use s3_write_stream::retry::RetryConfig;
use s3_write_stream::{
    Destination, MultipartStoreClient, Outcome, SessionState, StoreError, UploadConfig,
    UploadError, UploadStream,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup(part_size: usize, max_concurrency: usize, key: &str) -> (Arc<InMemory>, UploadStream) {
    init_logger();
    let store = Arc::new(InMemory::new());
    let client = Arc::new(MultipartStoreClient::new(store.clone(), "bucket"));
    let config = UploadConfig::default()
        .with_part_size(part_size)
        .with_max_concurrency(max_concurrency)
        .with_retry(RetryConfig::immediate(2));
    let stream = UploadStream::new(client, Destination::new("bucket", key), config).unwrap();
    (store, stream)
}

async fn read_back(store: &InMemory, key: &str) -> Vec<u8> {
    let path = Path::parse(key).unwrap();
    store.get(&path).await.unwrap().bytes().await.unwrap().to_vec()
}

#[tokio::test]
async fn test_streamed_object_matches_input() {
    let (store, mut stream) = setup(1024, 3, "data/stream.bin");
    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();

    for chunk in data.chunks(700) {
        if !stream.write(chunk).await.unwrap() {
            stream.drained().await.unwrap();
        }
    }
    let descriptor = stream.end().await.unwrap();

    assert_eq!(descriptor.size, data.len() as u64);
    assert_eq!(descriptor.part_count, 49);
    assert_eq!(descriptor.destination.key, "data/stream.bin");
    assert_eq!(stream.state(), SessionState::Completed);
    assert_eq!(read_back(&store, "data/stream.bin").await, data);
}

#[tokio::test]
async fn test_pipe_from_reader() {
    let (store, mut stream) = setup(4096, 2, "piped.txt");
    let mut events = stream.events();
    let text = "line of text\n".repeat(2000);

    let descriptor = stream.pipe(text.as_bytes()).await.unwrap();

    assert_eq!(descriptor.size, text.len() as u64);
    assert_eq!(read_back(&store, "piped.txt").await, text.as_bytes());
    assert!(matches!(events.outcome().await, Outcome::Completed(d) if d == descriptor));
}

#[tokio::test]
async fn test_empty_stream_creates_empty_object() {
    let (store, mut stream) = setup(1024, 2, "empty");

    let descriptor = stream.end().await.unwrap();

    assert_eq!(descriptor.size, 0);
    assert!(read_back(&store, "empty").await.is_empty());
}

#[tokio::test]
async fn test_cancelled_upload_leaves_no_object() {
    let (store, mut stream) = setup(1024, 2, "cancelled");
    stream.events().ready().await.unwrap();

    stream.write(&[7u8; 3000]).await.unwrap();
    stream.cancel().await.unwrap();

    assert_eq!(stream.state(), SessionState::Aborted);
    let path = Path::parse("cancelled").unwrap();
    assert!(matches!(
        store.get(&path).await,
        Err(object_store::Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_foreign_bucket_is_rejected() {
    init_logger();
    let store = Arc::new(InMemory::new());
    let client = Arc::new(MultipartStoreClient::new(store, "bucket"));
    let mut stream = UploadStream::new(
        client,
        Destination::new("elsewhere", "key"),
        UploadConfig::default().with_retry(RetryConfig::immediate(2)),
    )
    .unwrap();

    let err = stream.end().await.unwrap_err();

    assert!(matches!(
        err,
        UploadError::Permanent {
            source: StoreError::NotFound { .. },
            ..
        }
    ));
    assert_eq!(stream.state(), SessionState::Rejected);
}
