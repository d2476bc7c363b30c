//! End-to-end walkthrough against in-memory providers: lazy activation, a
//! nested streamed write with partial provider writes, read-back and a
//! concurrency check on one resource.

use std::sync::Arc;

use anyhow::{Context, bail};
use bytes::Bytes;
use futures::stream;
use tracing::info;

use crate::capability::Capabilities;
use crate::config::FileServiceConfig;
use crate::error::ProviderError;
use crate::memory::InMemoryFileSystemProvider;
use crate::service::{FileService, ReadFileOptions, WriteContent};
use crate::uri::Resource;

#[derive(Clone, Debug)]
pub struct DemoOptions {
    /// Scheme the demo provider is activated for.
    pub scheme: String,
    /// Size of each streamed chunk.
    pub chunk_size: usize,
    /// Number of chunks written.
    pub chunks: usize,
    /// Cap on bytes accepted per provider write; 0 disables it.
    pub max_write_len: usize,
    /// Concurrent writers racing on one file.
    pub writers: usize,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            scheme: "mem".to_string(),
            chunk_size: 4096,
            chunks: 6,
            max_write_len: 1000,
            writers: 8,
        }
    }
}

pub async fn run_demo(config: FileServiceConfig, opts: DemoOptions) -> anyhow::Result<()> {
    let service = Arc::new(FileService::new(config));

    // register the provider only when the scheme is first used
    let weak = Arc::downgrade(&service);
    let max_write_len = opts.max_write_len;
    let _activation = service.on_will_activate(move |event| {
        let weak = weak.clone();
        let scheme = event.scheme().to_string();
        event.join(async move {
            let Some(service) = weak.upgrade() else {
                return Ok(());
            };
            // joiners run on every activation, keep the first provider
            if service.can_handle_resource(&Resource::from_path(&scheme, "/")) {
                return Ok(());
            }
            let provider = InMemoryFileSystemProvider::with_capabilities(
                InMemoryFileSystemProvider::default_capabilities() - Capabilities::FILE_FOLDER_COPY,
            );
            provider.set_max_write_len(max_write_len);
            let _registration = service.register_provider(&scheme, Arc::new(provider))?;
            info!(%scheme, "demo provider activated");
            Ok(())
        });
    });

    // 1) streamed write into a folder that does not exist yet
    let target = Resource::from_path(&opts.scheme, "/demo/nested/data.bin");
    let len = opts.chunk_size * opts.chunks;
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let chunks: Vec<Result<Bytes, ProviderError>> = data
        .chunks(opts.chunk_size.max(1))
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    let stat = service
        .write_file(&target, WriteContent::stream(stream::iter(chunks)), None)
        .await
        .context("streamed write")?;
    info!(resource = %target, size = stat.size, etag = %stat.etag, "written");

    // 2) read back and verify
    let content = service
        .read_file(&target, &ReadFileOptions::default())
        .await
        .context("read back")?;
    if content.value.as_ref() != data.as_slice() {
        bail!("data mismatch");
    }

    // 3) racing writers on one resource must not interleave
    let contended = Resource::from_path(&opts.scheme, "/demo/contended.txt");
    let mut tasks = Vec::new();
    for i in 0..opts.writers {
        let service = service.clone();
        let contended = contended.clone();
        tasks.push(tokio::spawn(async move {
            let piece: Result<Bytes, ProviderError> = Ok(Bytes::from(format!("writer-{i}:")));
            let body = WriteContent::stream(stream::iter(vec![piece; 64]));
            service.write_file(&contended, body, None).await
        }));
    }
    for task in tasks {
        task.await.context("writer task")??;
    }
    let last = service
        .read_file(&contended, &ReadFileOptions::default())
        .await
        .context("read contended")?;
    let text = String::from_utf8_lossy(&last.value);
    let Some(first) = text.split(':').next() else {
        bail!("empty contended file");
    };
    if text != format!("{first}:").repeat(64) {
        bail!("interleaved writes detected");
    }
    info!(winner = first, "contended writes serialized");
    Ok(())
}
