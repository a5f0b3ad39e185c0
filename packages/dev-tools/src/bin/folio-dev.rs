//! Folio Development CLI
//!
//! Composition root for local development: builds the primary store, the
//! tree service and the search index explicitly, then runs one command
//! against them.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin folio-dev -- add "Roman Empire"
//! cargo run --bin folio-dev -- add "Provinces" <parent-id>
//! cargo run --bin folio-dev -- search "roman or greek"
//! cargo run --bin folio-dev -- titles emp*
//! cargo run --bin folio-dev -- menu
//! cargo run --bin folio-dev -- rebuild
//! cargo run --bin folio-dev -- status
//! ```
//!
//! # Environment Variables
//!
//! - `FOLIO_DATA_DIR`: Directory holding `folio.db` and `search.db` (default: `~/.folio`)
//! - `FOLIO_FORCE_REBUILD`: `1` or `true` to rebuild the index on start
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")

use anyhow::{anyhow, bail, Context};
use folio_core::db::LibsqlDocumentStore;
use folio_core::models::{MenuNode, NewPage};
use folio_core::search::{SearchConfig, SearchIndex, SearchService};
use folio_core::services::{PageTreeService, TreeConfig};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

const USAGE: &str = "usage: folio-dev <add TITLE [PARENT_ID] | search QUERY | titles QUERY | menu | rebuild | status>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let data_dir = data_dir()?;
    tokio::fs::create_dir_all(&data_dir).await?;
    tracing::info!("Data directory: {}", data_dir.display());

    // Primary store and tree
    let store = Arc::new(LibsqlDocumentStore::new(data_dir.join("folio.db")).await?);
    let tree = PageTreeService::new(store.clone(), TreeConfig::default());

    // Search index (fatal if it cannot be opened)
    let config = SearchConfig {
        force_rebuild_on_start: force_rebuild(),
        ..SearchConfig::with_index_path(data_dir.join("search.db"))
    };
    let index = SearchIndex::open(store.clone(), config)
        .await
        .context("search index failed to start")?;
    let search = SearchService::new(store.clone(), index.clone());

    let result = run(command, &args[1..], &tree, &search).await;
    index.close();
    result
}

async fn run(
    command: &str,
    args: &[String],
    tree: &PageTreeService,
    search: &SearchService,
) -> anyhow::Result<()> {
    let index = search.index();

    match command {
        "add" => {
            let title = args.first().ok_or_else(|| anyhow!(USAGE))?;
            let parent = args.get(1).map(String::as_str);
            let page = tree
                .append_as_child(parent, NewPage::new(title.as_str(), ""))
                .await?;
            println!("{} /{} (position {})", page.id, page.slug, page.position);
        }
        "search" => {
            let query = args.join(" ");
            let results = search.search(&query).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        "titles" => {
            let query = args.join(" ");
            for hit in search.search_titles_only(&query).await? {
                println!("{}  {}", hit.id, hit.title);
            }
        }
        "menu" => {
            let menu = tree.build_menu_tree(None).await?;
            print_menu(&menu, 0);
        }
        "rebuild" => {
            index.wait_ready().await?;
            let done = index.completed_builds();
            let status = index.rebuild_index()?;
            tracing::info!("Rebuild {:?}", status);
            index.wait_for_builds(done + 1).await?;
            println!("{} pages indexed", index.indexed_count().await?);
        }
        "status" => {
            index.wait_ready().await?;
            let status = index.status().await?;
            println!("state:    {:?}", status.state);
            println!("indexed:  {}", status.indexed_documents);
            println!("stale:    {}", index.is_stale().await?);
            println!("feed:     {:?}", status.feed_health);
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}

fn print_menu(nodes: &[MenuNode], depth: usize) {
    for node in nodes {
        println!("{}{}  {}", "  ".repeat(depth), node.title, node.link);
        print_menu(&node.children, depth + 1);
    }
}

fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = env::var("FOLIO_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home_dir =
        dirs::home_dir().ok_or_else(|| anyhow!("Failed to get home directory"))?;
    Ok(home_dir.join(".folio"))
}

fn force_rebuild() -> bool {
    env::var("FOLIO_FORCE_REBUILD")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
