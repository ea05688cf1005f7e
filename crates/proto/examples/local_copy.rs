//! Local SFTP Copy Example
//!
//! This example streams a local file to a "remote" path through an
//! `sftp-server` child process and reads it back, the way a file would travel
//! over an SSH `sftp` subsystem channel.
//!
//! Key features:
//! - SFTP session over the stdio of a child process
//! - Buffered sequential writes and reads
//! - Cancellation with Ctrl-C
//!
//! Usage:
//!   cargo run --example local_copy <source> <destination> [sftp-server path]
//!
//! Example:
//!   RUST_LOG=keel_proto=debug cargo run --example local_copy Cargo.toml /tmp/copy.toml

use keel_proto::sftp::{
    FileAccess, OpenMode, SftpClient, SftpClientConfig, SftpFileStream, StreamConfig,
};
use std::env;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER: &str = "/usr/lib/openssh/sftp-server";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!(
            "Usage: {} <source> <destination> [sftp-server path]",
            args[0]
        );
        std::process::exit(1);
    }
    let source = &args[1];
    let destination = &args[2];
    let server = args.get(3).map(String::as_str).unwrap_or(DEFAULT_SERVER);

    // Start the server with its stdio as the session pipe
    let mut child = Command::new(server)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    let stdin = child.stdin.take().ok_or("sftp-server stdin unavailable")?;
    let stdout = child.stdout.take().ok_or("sftp-server stdout unavailable")?;

    let client = SftpClient::from_parts(stdout, stdin, SftpClientConfig::default()).await?;
    println!("Connected to {} (SFTP v{})", server, client.server_version());
    let client = Arc::new(client);

    // Ctrl-C cancels whatever request is in flight
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let config = StreamConfig::default()
        .with_read_timeout(Duration::from_secs(30))
        .with_write_timeout(Duration::from_secs(30));

    // Upload
    let mut input = tokio::fs::File::open(source).await?;
    let mut upload = SftpFileStream::open(
        client.clone(),
        destination,
        OpenMode::Create,
        FileAccess::Write,
        &config,
        &cancel,
    )
    .await?;

    let mut chunk = vec![0u8; 8192];
    let mut sent = 0u64;
    loop {
        let n = input.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        upload.write(&chunk[..n], &cancel).await?;
        sent += n as u64;
    }
    let remote_length = upload.length(&cancel).await?;
    upload.close(&cancel).await?;
    println!("Wrote {} bytes, remote length {}", sent, remote_length);

    // Download and compare
    let mut download = SftpFileStream::open(
        client.clone(),
        destination,
        OpenMode::Open,
        FileAccess::Read,
        &config,
        &cancel,
    )
    .await?;
    let mut copy = Vec::new();
    download.read_to_end(&mut copy, &cancel).await?;
    download.close(&cancel).await?;

    let original = tokio::fs::read(source).await?;
    if copy == original {
        println!("Verified {} bytes", copy.len());
    } else {
        eprintln!("Copy differs from source");
        std::process::exit(2);
    }

    client.shutdown().await;
    child.kill().await?;
    Ok(())
}
