#![warn(missing_docs)]
//! RDRFS cache status tool
//!
//! Loads a remote-authority fixture, resolves one path or file id through
//! the cache and prints the resulting object status as JSON.

use rdrfs_cache::{
    AuthGroup, CacheConfig, CacheContext, FileId, MemoryAuthority, NoopContentCache,
    StatusQuery, TracingNotifier,
};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: rdr-status <fixture.json> <path|cell.volume.vnode.unique> [config.json]");
        std::process::exit(1);
    }

    let config = match args.get(3) {
        Some(path) => CacheConfig::load(path)?,
        None => CacheConfig::default(),
    };
    let authority = Arc::new(MemoryAuthority::load(&args[1])?);
    let ctx = CacheContext::new(
        config,
        authority,
        Arc::new(NoopContentCache),
        Arc::new(TracingNotifier),
    )?;
    tracing::info!(fixture = %args[1], "rdr-status starting");

    let query = match args[2].parse::<FileId>() {
        Ok(fid) => StatusQuery::FileId(fid),
        Err(_) => StatusQuery::Path(args[2].clone()),
    };
    let auth = AuthGroup::nil();

    // A file id query only finds what a path walk already cached, so walk
    // to the volume first when the id names one that is not mounted yet.
    if let StatusQuery::FileId(fid) = &query {
        if fid.is_complete() && ctx.volumes().locate(fid.high_index()).is_none() {
            if let Err(e) = ctx.mount_volume(*fid, &auth) {
                tracing::warn!(fid = %fid, error = %e, "could not mount volume");
            }
        }
    }

    let status = ctx.get_object_status(&query, &auth)?;
    let report = serde_json::json!({
        "driver": ctx.driver_status(),
        "object": status,
        "stats": ctx.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    ctx.shutdown();
    Ok(())
}
