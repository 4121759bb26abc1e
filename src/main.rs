//! watchctl - watcher store CLI tool
//!
//! Command-line access to sync cursors and watch entries in the
//! watcher's RocksDB store.

use chainwatch::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
