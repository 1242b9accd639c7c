use std::sync::Arc;

use anyhow::Context;
use s3_write_stream::{Destination, MultipartStoreClient, UploadStream};
use tokio::io::AsyncRead;

use crate::cli::PutArgs;
use crate::config::config;
use crate::s3;

pub async fn exec(args: PutArgs) -> anyhow::Result<()> {
    let config = config()?;
    let bucket = args.bucket.unwrap_or_else(|| config.s3.bucket.clone());

    let mut upload_config = config.upload.clone();
    if let Some(part_size) = args.part_size {
        upload_config = upload_config.with_part_size(part_size);
    }
    if let Some(concurrency) = args.concurrency {
        upload_config = upload_config.with_max_concurrency(concurrency);
    }

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &args.file {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let s3 = s3::client_for_bucket(&config.s3, &bucket)?;
    let client = Arc::new(MultipartStoreClient::new(Arc::new(s3), bucket.clone()));
    let mut stream = UploadStream::new(client, Destination::new(bucket, args.key), upload_config)?;

    let cancellation = stream.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, aborting upload");
            cancellation.cancel();
        }
    });

    let descriptor = stream
        .pipe(reader)
        .await
        .with_context(|| format!("Upload to {} failed", stream.destination()))?;

    if !args.silent {
        println!("{:#?}", descriptor);
    }
    Ok(())
}
