use object_store::aws;

use crate::config::S3Config;

pub fn client_for_bucket(s3: &S3Config, bucket: &str) -> anyhow::Result<aws::AmazonS3> {
    let mut builder = aws::AmazonS3Builder::new()
        .with_region(&s3.region)
        .with_bucket_name(bucket)
        .with_access_key_id(&s3.access_key)
        .with_secret_access_key(&s3.secret_key);

    if let Some(endpoint) = &s3.endpoint {
        // Use path-style URLs (http://localhost:9000/bucket/key) instead of
        // virtual-hosted style (http://bucket.localhost:9000/key) for MinIO
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    Ok(builder.build()?)
}
