//! Streaming multipart uploads to an object store.
//!
//! Bytes pushed into an [`UploadStream`] are cut into fixed-size parts and
//! uploaded concurrently while the producer keeps writing. The stream
//! reports backpressure, retries transient part failures, and either
//! finalizes the object with every part in order or aborts the upload.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use object_store::memory::InMemory;
//! # async fn run() -> Result<(), s3_write_stream::UploadError> {
//! use s3_write_stream::{create_write_stream, Destination, MultipartStoreClient};
//!
//! let client = Arc::new(MultipartStoreClient::new(Arc::new(InMemory::new()), "bucket"));
//! let mut stream = create_write_stream(client, Destination::new("bucket", "report.csv"))?;
//! if !stream.write(b"id,value\n").await? {
//!     stream.drained().await?;
//! }
//! let object = stream.end().await?;
//! println!("wrote {} bytes", object.size);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

mod buffer;
pub mod config;
mod coordinator;
mod dispatcher;
pub mod error;
pub mod events;
pub mod retry;
pub mod store;
mod stream;

#[cfg(test)]
mod testing;

pub use buffer::PartBuffer;
pub use config::UploadConfig;
pub use coordinator::SessionState;
pub use dispatcher::PartResult;
pub use error::{Operation, StoreError, UploadError};
pub use events::{Outcome, UploadEvents};
pub use store::{
    Destination, MultipartStoreClient, ObjectDescriptor, ObjectStoreClient, SessionToken,
};
pub use stream::{ByteSink, UploadStream};

/// Open an upload to `destination` with the default [`UploadConfig`].
pub fn create_write_stream(
    client: Arc<dyn ObjectStoreClient>,
    destination: Destination,
) -> Result<UploadStream, UploadError> {
    UploadStream::new(client, destination, UploadConfig::default())
}
