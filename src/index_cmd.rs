//! IVF maintenance commands: `rvault index rebuild | stats`.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_rebuild(config: &Config) -> Result<()> {
    let engine = db::open_engine(config).await?;
    let stats = engine.rebuild_index().await?;

    println!("index rebuild");
    if stats.lists == 0 {
        println!("  no documents; index left untrained");
    } else {
        println!("  generation: {}", stats.generation);
        println!("  lists: {}", stats.lists);
        println!("  documents indexed: {}", stats.indexed);
    }
    println!("ok");
    Ok(())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let engine = db::open_engine(config).await?;
    let stats = engine.index_stats();
    let stale = engine.needs_rebuild().await?;

    println!("index stats");
    if stats.lists == 0 {
        println!("  status: untrained (queries scan every document)");
    } else {
        println!("  status: trained");
        println!("  generation: {}", stats.generation);
        println!("  lists: {}", stats.lists);
        println!("  documents indexed: {}", stats.indexed);
        println!("  trained on: {}", stats.trained_size);
        println!(
            "  list sizes: min {} / max {}",
            stats.smallest_list, stats.largest_list
        );
        println!("  probes: {}", engine.config().index.probes);
    }
    println!("  needs rebuild: {}", if stale { "yes" } else { "no" });
    Ok(())
}
