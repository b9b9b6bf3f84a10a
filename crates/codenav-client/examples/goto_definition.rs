//! Ask a real language server where a symbol is defined.
//!
//! cargo run -p codenav-client --example goto_definition -- rust-analyzer rust src/lib.rs 12 8

use codenav_client::{ClientOptions, LspClient, Result};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 5 {
        eprintln!("usage: goto_definition <server> <language> <file> <line> <column>");
        std::process::exit(2);
    }

    let root = std::env::current_dir()?;
    let file = root.join(PathBuf::from(&args[2]));
    let line: u32 = args[3].parse().unwrap_or(1);
    let column: u32 = args[4].parse().unwrap_or(1);

    let client = LspClient::spawn(&args[0], &[], &root, &args[1], ClientOptions::default()).await?;
    println!("{} ready", args[0]);

    let locations = client.definition(&file, line, column).await?;
    if locations.is_empty() {
        println!("no definition found at {}:{}:{}", file.display(), line, column);
    }
    for location in locations {
        println!("{}:{}:{}", location.file, location.line, location.column);
    }

    client.close().await
}
