use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::Parser;

use bookcover_core::config::CoversConfig;
use bookcover_core::events::TracingEventBus;
use bookcover_core::object_store::{ObjectStore, S3ObjectStore};
use bookcover_core::{Collaborators, CoverManager};
use bookcover_sources::HttpFetcher;
use bookcover_types::Book;

/// Resolve the best cover image for a single book.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ISBN-13 or ISBN-10 of the book
    #[arg(long)]
    isbn: Option<String>,

    /// Catalog volume id (e.g. a Google Books volume id)
    #[arg(long)]
    volume_id: Option<String>,

    /// Known cover URL to use as a hint
    #[arg(long)]
    cover_url: Option<String>,

    /// Path to a TOML config file
    #[arg(long, default_value = "bookcover.toml")]
    config: PathBuf,

    /// Run the full background convergence and wait for it
    #[arg(long)]
    converge: bool,

    /// Print the provenance record of the convergence as JSON
    #[arg(long)]
    provenance: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.isbn.is_none() && args.volume_id.is_none() {
        bail!("pass at least one of --isbn or --volume-id");
    }

    let config =
        CoversConfig::load(&args.config).context("could not load the cover resolver config")?;

    let mut collaborators = Collaborators::new(Arc::new(HttpFetcher::new()), Arc::new(TracingEventBus));
    if config.object_store.enabled {
        let store = S3ObjectStore::new(&config.object_store)
            .context("could not construct the object store client")?;
        collaborators.object_store = Some(Arc::new(store) as Arc<dyn ObjectStore>);
    }

    let manager = CoverManager::new(config, collaborators);

    let (isbn13, isbn10) = match &args.isbn {
        Some(isbn) if isbn.len() == 13 => (Some(isbn.clone()), None),
        Some(isbn) => (None, Some(isbn.clone())),
        None => (None, None),
    };
    let book = Book {
        id: args.volume_id.clone(),
        isbn13,
        isbn10,
        title: None,
        cover_image_url: args.cover_url.clone(),
    };

    let urls = manager.initial_cover(&book).await;
    println!("preferred: {}", urls.preferred);
    println!("fallback:  {}", urls.fallback);
    println!("provider:  {}", urls.provider);

    if args.converge {
        match manager.converge(&book).await {
            Some((descriptor, record)) => {
                println!();
                println!("final:     {}", descriptor.location);
                println!(
                    "storage:   {:?}, {}x{}, via {}",
                    descriptor.storage, descriptor.width, descriptor.height, descriptor.provider
                );
                if args.provenance {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
            }
            None => println!("caching is disabled; nothing to converge"),
        }
    }

    manager.shutdown().await;
    Ok(())
}
