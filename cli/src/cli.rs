use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(about = "Stream data into an S3 object with a multipart upload.")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a file, or stdin, to an object key
    Put(PutArgs),
}

#[derive(Debug, Parser)]
pub struct PutArgs {
    /// Object key to write
    pub key: String,
    /// Read from this file instead of stdin
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    /// Target bucket, defaults to S3WS_S3_BUCKET
    #[arg(short, long)]
    pub bucket: Option<String>,
    /// Part size in bytes
    #[arg(long)]
    pub part_size: Option<usize>,
    /// Maximum number of parts uploaded at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,
    /// Do not print the uploaded object
    #[arg(short, long)]
    pub silent: bool,
}
