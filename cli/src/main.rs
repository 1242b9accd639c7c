use clap::Parser;
use cli::{Cli, Command};

mod cli;
mod config;
mod put;
mod s3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Cli::parse();

    match args.cmd {
        Command::Put(put_args) => put::exec(put_args).await,
    }
}
