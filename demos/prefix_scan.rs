//! Prefix views over a StrMap.
//!
//! Run with `RUST_LOG=strmap_rs=trace` to see the trie being built.

use std::ops::ControlFlow;

use strmap_rs::{StrMap, StrMapError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), StrMapError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,strmap_rs=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let urls = [
        "http://example.com/",
        "http://example.com/page1",
        "http://example.com/page2",
        "http://other.com/page1",
        "https://example.com/",
    ];

    let mut map = StrMap::with_capacity(urls.len());
    for (i, url) in urls.iter().enumerate() {
        map.insert(url.as_bytes(), i)?;
    }
    tracing::info!(len = map.len(), "map built");

    println!("Everything under http://example.com/:");
    for (key, value) in map.prefix(b"http://example.com/") {
        println!("  {} = {}", String::from_utf8_lossy(key), value);
    }

    println!("\nFirst https entry:");
    map.prefix(b"https://").iterate(|key, value| {
        println!("  {} = {}", String::from_utf8_lossy(key), value);
        ControlFlow::Break(())
    });

    let ftp = map.prefix(b"ftp://");
    println!("\nftp:// entries: {}", ftp.len());

    if let Err(err) = map.insert_new(urls[0].as_bytes(), 99) {
        tracing::warn!("{err}");
    }

    map.clear();
    println!("\nAfter clear: {} entries", map.len());
    Ok(())
}
