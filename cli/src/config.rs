use anyhow::Context;
use once_cell::sync::OnceCell;
use s3_write_stream::UploadConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Custom endpoint, e.g. a MinIO server
    pub endpoint: Option<String>,
}

#[derive(Debug)]
pub struct Config {
    pub s3: S3Config,
    pub upload: UploadConfig,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

pub fn config() -> anyhow::Result<&'static Config> {
    CONFIG.get_or_try_init(|| from_env(std::env::vars()))
}

fn from_env<I>(vars: I) -> anyhow::Result<Config>
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: Vec<(String, String)> = vars.into_iter().collect();
    let s3 = envy::prefixed("S3WS_S3_")
        .from_iter::<_, S3Config>(vars.clone())
        .context("Missing S3 config. Required env vars: S3WS_S3_BUCKET, S3WS_S3_REGION, S3WS_S3_ACCESS_KEY, S3WS_S3_SECRET_KEY")?;
    let upload = envy::prefixed("S3WS_UPLOAD_")
        .from_iter::<_, UploadConfig>(vars)
        .context("Invalid S3WS_UPLOAD_* settings")?;
    Ok(Config { s3, upload })
}
