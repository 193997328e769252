//! A small demo binary driving the library from the command line: load a
//! handful of URLs into a cache directory and print what comes back through
//! the callback. Exercises the same public API an embedding application
//! would use -- `init`, `load`, `destroy`.

use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;

use imgcache::{Config, ImageCache};

#[derive(Parser)]
#[command(about = "Load image URLs through the on-disk ETag-revalidating cache")]
struct Opt {
    /// URLs to load.
    urls: Vec<String>,

    /// Cache directory (defaults to the platform cache dir).
    #[arg(long)]
    cache_dir: Option<String>,

    /// Maximum parallel HTTP transfers.
    #[arg(long)]
    max_requests: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::parse();

    let config = match opt.cache_dir {
        Some(dir) => Config::new(dir),
        None => Config::with_default_dir()?,
    };
    let config = match opt.max_requests {
        Some(n) => config.with_max_requests(n),
        None => config,
    };

    let (tx, rx) = mpsc::channel::<(String, usize)>();
    let cache = ImageCache::init(config, move |url, bytes| {
        let _ = tx.send((url.to_string(), bytes.len()));
    })?;

    let expected = opt.urls.len();
    for url in &opt.urls {
        cache.load(url);
    }

    // Each load() can produce up to two callbacks (disk hit + revalidation),
    // so just drain whatever arrives for a bounded window rather than
    // waiting for an exact count.
    let deadline = std::time::Instant::now() + Duration::from_secs(65);
    let mut seen = 0usize;
    while std::time::Instant::now() < deadline && seen < expected {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok((url, len)) => {
                println!("{}: {} bytes", url, len);
                seen += 1;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    cache.destroy();
    Ok(())
}
