//! Smoke-test CLI: builds a `Client` against a mock drive fleet described by
//! a JSON config file and performs one PUT/GET/DELETE round trip.
//!
//! Mirrors the teacher's `Args` (`clap::Parser`) + `env_logger::init()` +
//! `#[tokio::main]` bootstrap in `src/main.rs`, generalized from an HTTP
//! server's listen address to this client's config file and object size.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use blobfleet::client::{drive_map_from_pairs, Client, KeyContext};
use blobfleet::config::Config;
use blobfleet::error;
use blobfleet::keyscheme::Code;
use blobfleet::repair::{RepairJob, RepairQueue};
use clap::Parser;

#[derive(clap::Parser, Clone)]
struct Args {
    #[clap(long = "config")]
    config_path: PathBuf,

    #[clap(long = "drives", value_delimiter = ',')]
    drives: Vec<String>,

    #[clap(long = "object", default_value = "demo-object")]
    object_key: String,

    #[clap(long = "size", default_value_t = 65536)]
    size: u64,
}

struct LoggingRepairQueue;

#[async_trait::async_trait]
impl RepairQueue for LoggingRepairQueue {
    async fn produce(&self, topic: &str, key: &str, job: &RepairJob) -> error::Result<()> {
        log::info!("repair job on topic={topic} key={key}: {job:?}");
        Ok(())
    }
}

fn parse_drive_pairs(drives: &[String]) -> HashMap<String, String> {
    drive_map_from_pairs(drives.iter().filter_map(|entry| {
        let (uuid, addr) = entry.split_once('=')?;
        Some((uuid.to_string(), addr.to_string()))
    }))
}

#[tokio::main]
async fn main() -> error::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config_text = std::fs::read_to_string(&args.config_path)?;
    let config: Config = serde_json::from_str(&config_text)?;

    let drive_map = parse_drive_pairs(&args.drives);
    let client = Client::new(&config, drive_map, Arc::new(LoggingRepairQueue))?;

    let key_context = KeyContext {
        bucket_name: "demo-bucket".into(),
        object_key: args.object_key.clone(),
        owner: "demo-owner".into(),
        namespace: "demo-namespace".into(),
    };

    let payload = vec![0x42u8; args.size as usize];
    let raw_key = client
        .put(std::io::Cursor::new(payload), args.size, &key_context, Code::Rs, 4, 2, vec!["demo-req-1".into()])
        .await?;
    log::info!("put succeeded, rawKey={raw_key}");

    client.delete(&raw_key, vec!["demo-req-2".into()]).await?;
    log::info!("delete succeeded");

    Ok(())
}
