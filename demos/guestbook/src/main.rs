//! Guestbook demo
//!
//! Signs a guestbook, edits an entry in a transaction and pages through
//! the entries, all against the in-process emulator.
//!
//! ```text
//! guestbook --guests 12 --page-size 5 --cached --verbose
//! ```

use clap::Parser;
use kinddb_cache::{CachingAdapter, InMemoryCache};
use kinddb_core::{
    Adapter, Config, CoreError, CoreResult, Direction, Entity, Key, Record, Session,
    TransactionOptions, Value,
};
use kinddb_remote::{shared_emulator, RemoteAdapter};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Guestbook demo for kinddb.
#[derive(Parser)]
#[command(name = "guestbook")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of guests who sign the book
    #[arg(short, long, default_value = "12")]
    guests: usize,

    /// Entries per printed page
    #[arg(short, long, default_value = "5")]
    page_size: usize,

    /// Guestbook name, used as the ancestor of every entry
    #[arg(short, long, default_value = "lobby")]
    book: String,

    /// Put the caching adapter in front of the store
    #[arg(short, long)]
    cached: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

struct Greeting {
    key: Option<Key>,
    author: String,
    content: String,
    seq: i64,
}

impl Entity for Greeting {
    fn kind() -> &'static str {
        "Greeting"
    }

    fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    fn to_record(&self) -> CoreResult<Record> {
        Ok(Record::new()
            .with_indexed("author", self.author.as_str())
            .with_indexed("seq", self.seq)
            .with_unindexed("content", self.content.as_str()))
    }

    fn from_record(key: Key, record: Record) -> CoreResult<Self> {
        let text = |name: &str| {
            record
                .get(name)
                .and_then(Value::as_text)
                .map(str::to_string)
                .ok_or_else(|| CoreError::codec(format!("greeting without {name}")))
        };
        Ok(Self {
            author: text("author")?,
            content: text("content")?,
            seq: record.get("seq").and_then(Value::as_integer).unwrap_or_default(),
            key: Some(key),
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    let remote = RemoteAdapter::new(shared_emulator(), config.project.clone());
    let adapter: Arc<dyn Adapter> = if cli.cached {
        Arc::new(CachingAdapter::new(remote, InMemoryCache::new(), config.cache.clone()))
    } else {
        Arc::new(remote)
    };
    info!(adapter = adapter.name(), project = %config.project, "guestbook starting");
    let session = Session::new(adapter, config);
    let book = Key::new("Guestbook", cli.book.as_str());

    sign(&session, &book, cli.guests)?;
    amend_first(&session, &book)?;
    print_pages(&session, &book, cli.page_size)?;
    Ok(())
}

fn sign(session: &Session, book: &Key, guests: usize) -> CoreResult<()> {
    let mut greetings = Vec::with_capacity(guests);
    for seq in 1..=guests {
        greetings.push(Greeting {
            key: Some(book.partial_child(Greeting::kind())?),
            author: format!("guest-{seq}"),
            content: format!("Hello from guest {seq}"),
            seq: seq as i64,
        });
    }
    let keys = session.put_multi(&mut greetings)?;
    info!(count = keys.len(), book = %book, "guests signed");
    Ok(())
}

fn amend_first(session: &Session, book: &Key) -> CoreResult<()> {
    let options = TransactionOptions::new()
        .with_scope(kinddb_core::IsolationScope::Ancestors(vec![book.clone()]));
    session.run_in_transaction(&options, |s| {
        let first = s
            .query::<Greeting>()
            .with_ancestor(book.clone())
            .order_by("seq", Direction::Ascending)
            .get(s.adapter())?;
        let Some(entry) = first else {
            return Ok(());
        };
        let mut greeting: Greeting = s.load(entry.key())?;
        greeting.content.push_str(" (edited)");
        s.put(&mut greeting)?;
        info!(key = %entry.key(), "amended first greeting");
        Ok(())
    })
}

fn print_pages(session: &Session, book: &Key, page_size: usize) -> CoreResult<()> {
    let query = session
        .query::<Greeting>()
        .with_ancestor(book.clone())
        .order_by("seq", Direction::Ascending);
    let mut pages = session.paginate(&query, page_size, None)?;
    let mut number = 0;
    while pages.has_more() {
        let page = pages.fetch_next_page()?;
        if page.is_empty() {
            break;
        }
        number += 1;
        println!("--- page {number} ---");
        for entry in page.into_entries() {
            let greeting: Greeting = entry.into_entity()?;
            println!("{:>3}  {:<10} {}", greeting.seq, greeting.author, greeting.content);
        }
    }
    if let Some(cursor) = pages.cursor() {
        println!("resume token: {}", cursor.to_urlsafe());
    }
    Ok(())
}
