// tests/write_path.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use tokio::sync::broadcast;

use fsmux::provider::{
    FileDeleteOptions, FileHandle, FileOpenOptions, FileOverwriteOptions, FileWriteOptions,
    ProviderResult,
};
use fsmux::{
    Capabilities, FileChange, FileOpenReadWriteCloseProvider, FileOperationResult,
    FileReadWriteProvider, FileService, FileSystemProvider, FileType, FsError,
    InMemoryFileSystemProvider, ProviderError, ReadFileOptions, Resource, ResolveFileOptions,
    Stat, WriteContent, WriteFileOptions,
};

static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}

/// Delegates to an in-memory provider and records every call.
struct RecordingProvider {
    inner: InMemoryFileSystemProvider,
    calls: Mutex<Vec<String>>,
    fail_handle_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
}

impl RecordingProvider {
    fn new(capabilities: Capabilities) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryFileSystemProvider::with_capabilities(capabilities),
            calls: Mutex::new(Vec::new()),
            fail_handle_writes: AtomicBool::new(false),
            write_delay: Mutex::new(None),
        })
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    async fn delay(&self) {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl FileSystemProvider for RecordingProvider {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn stat(&self, resource: &Resource) -> ProviderResult<Stat> {
        self.record(format!("stat {}", resource.path()));
        self.inner.stat(resource).await
    }

    async fn mkdir(&self, resource: &Resource) -> ProviderResult<()> {
        self.record(format!("mkdir {}", resource.path()));
        self.inner.mkdir(resource).await
    }

    async fn readdir(&self, resource: &Resource) -> ProviderResult<Vec<(String, FileType)>> {
        self.inner.readdir(resource).await
    }

    async fn delete(&self, resource: &Resource, opts: FileDeleteOptions) -> ProviderResult<()> {
        self.record(format!("delete {}", resource.path()));
        self.inner.delete(resource, opts).await
    }

    async fn rename(
        &self,
        from: &Resource,
        to: &Resource,
        opts: FileOverwriteOptions,
    ) -> ProviderResult<()> {
        self.inner.rename(from, to, opts).await
    }

    fn watch_changes(&self) -> Option<broadcast::Receiver<Vec<FileChange>>> {
        self.inner.watch_changes()
    }

    fn watch_capabilities(&self) -> Option<broadcast::Receiver<Capabilities>> {
        self.inner.watch_capabilities()
    }

    fn as_read_write(&self) -> Option<&dyn FileReadWriteProvider> {
        Some(self)
    }

    fn as_open_read_write_close(&self) -> Option<&dyn FileOpenReadWriteCloseProvider> {
        Some(self)
    }
}

#[async_trait]
impl FileReadWriteProvider for RecordingProvider {
    async fn read_file(&self, resource: &Resource) -> ProviderResult<Bytes> {
        self.inner.read_file(resource).await
    }

    async fn write_file(
        &self,
        resource: &Resource,
        content: Bytes,
        opts: FileWriteOptions,
    ) -> ProviderResult<()> {
        let tag = String::from_utf8_lossy(&content).to_string();
        self.record(format!("write_file {} start {tag}", resource.path()));
        self.delay().await;
        let result = self.inner.write_file(resource, content, opts).await;
        self.record(format!("write_file {} end {tag}", resource.path()));
        result
    }
}

#[async_trait]
impl FileOpenReadWriteCloseProvider for RecordingProvider {
    async fn open(&self, resource: &Resource, opts: FileOpenOptions) -> ProviderResult<FileHandle> {
        self.record(format!("open {}", resource.path()));
        self.inner.open(resource, opts).await
    }

    async fn close(&self, fd: FileHandle) -> ProviderResult<()> {
        self.record("close");
        self.inner.close(fd).await
    }

    async fn read(&self, fd: FileHandle, pos: u64, data: &mut [u8]) -> ProviderResult<usize> {
        self.inner.read(fd, pos, data).await
    }

    async fn write(&self, fd: FileHandle, pos: u64, data: &[u8]) -> ProviderResult<usize> {
        self.record(format!("write {pos}"));
        if self.fail_handle_writes.load(Ordering::SeqCst) {
            return Err(ProviderError::no_permissions("disk says no"));
        }
        self.delay().await;
        self.inner.write(fd, pos, data).await
    }
}

const BOTH: Capabilities = Capabilities::FILE_READ_WRITE
    .union(Capabilities::FILE_OPEN_READ_WRITE_CLOSE)
    .union(Capabilities::PATH_CASE_SENSITIVE);

fn res(path: &str) -> Resource {
    Resource::from_path("rec", path)
}

fn setup(capabilities: Capabilities) -> (Arc<FileService>, Arc<RecordingProvider>) {
    init_logging();
    let service = Arc::new(FileService::default());
    let provider = RecordingProvider::new(capabilities);
    let _registration = service
        .register_provider("rec", provider.clone())
        .expect("register recording provider");
    (service, provider)
}

fn chunks(parts: &[&'static str]) -> WriteContent {
    let items: Vec<Result<Bytes, ProviderError>> = parts
        .iter()
        .map(|part| Ok(Bytes::from_static(part.as_bytes())))
        .collect();
    WriteContent::stream(stream::iter(items))
}

#[tokio::test]
async fn creates_missing_ancestors_top_down() {
    let (service, provider) = setup(BOTH);
    service
        .write_file(&res("/a/b/c.txt"), "hi", None)
        .await
        .expect("write");

    assert_eq!(provider.calls_starting_with("mkdir"), vec!["mkdir /a", "mkdir /a/b"]);
    let calls = provider.calls();
    let last_mkdir = calls.iter().rposition(|c| c == "mkdir /a/b").unwrap();
    let write = calls.iter().position(|c| c.starts_with("write_file")).unwrap();
    assert!(last_mkdir < write);

    // parent exists now: no more folder creation
    provider.clear();
    service.write_file(&res("/a/b/d.txt"), "hi", None).await.unwrap();
    assert!(provider.calls_starting_with("mkdir").is_empty());
}

#[tokio::test]
async fn whole_buffer_only_provider_never_streams() {
    let (service, provider) = setup(Capabilities::FILE_READ_WRITE);
    service
        .write_file(&res("/s.txt"), chunks(&["ab", "cd", "ef"]), None)
        .await
        .expect("write");

    assert!(provider.calls_starting_with("open").is_empty());
    assert_eq!(provider.calls_starting_with("write_file").len(), 2);
    let content = service.read_file(&res("/s.txt"), &ReadFileOptions::default()).await.unwrap();
    assert_eq!(content.value, Bytes::from_static(b"abcdef"));
}

#[tokio::test]
async fn strategy_follows_content_kind() {
    let (service, provider) = setup(BOTH);

    service.write_file(&res("/buf"), "buffer", None).await.unwrap();
    assert!(provider.calls_starting_with("open").is_empty());
    assert!(!provider.calls_starting_with("write_file").is_empty());

    provider.clear();
    service
        .write_file(&res("/stream"), chunks(&["one", "two"]), None)
        .await
        .unwrap();
    assert!(provider.calls_starting_with("write_file").is_empty());
    assert_eq!(provider.calls_starting_with("open"), vec!["open /stream"]);
    assert_eq!(provider.calls_starting_with("write "), vec!["write 0", "write 3"]);
    assert_eq!(provider.calls_starting_with("close"), vec!["close"]);
}

#[tokio::test]
async fn streaming_only_provider_streams_buffers() {
    let (service, provider) = setup(Capabilities::FILE_OPEN_READ_WRITE_CLOSE);
    service.write_file(&res("/f"), "buffer", None).await.unwrap();
    assert_eq!(provider.calls_starting_with("open"), vec!["open /f"]);
    assert_eq!(provider.calls_starting_with("close").len(), 1);
}

#[tokio::test]
async fn failed_stream_write_closes_once() {
    let (service, provider) = setup(BOTH);
    provider.fail_handle_writes.store(true, Ordering::SeqCst);

    let err = service
        .write_file(&res("/f"), chunks(&["x", "y"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.result(), FileOperationResult::FilePermissionDenied);
    assert_eq!(provider.calls_starting_with("open").len(), 1);
    assert_eq!(provider.calls_starting_with("close").len(), 1);
    assert_eq!(provider.inner.open_handles(), 0);
}

#[tokio::test]
async fn writes_to_one_resource_run_in_call_order() {
    let (service, provider) = setup(BOTH);
    *provider.write_delay.lock().unwrap() = Some(Duration::from_millis(30));

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.write_file(&res("/q"), "first", None).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let service = service.clone();
        tokio::spawn(async move { service.write_file(&res("/q"), "second", None).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(
        provider.calls_starting_with("write_file"),
        vec![
            "write_file /q start first",
            "write_file /q end first",
            "write_file /q start second",
            "write_file /q end second",
        ]
    );
    let content = service.read_file(&res("/q"), &ReadFileOptions::default()).await.unwrap();
    assert_eq!(content.value, Bytes::from_static(b"second"));
}

#[tokio::test]
async fn failed_write_does_not_block_queue() {
    let (service, provider) = setup(BOTH);
    provider.fail_handle_writes.store(true, Ordering::SeqCst);
    assert!(service.write_file(&res("/q"), chunks(&["a"]), None).await.is_err());

    provider.fail_handle_writes.store(false, Ordering::SeqCst);
    let written = tokio::time::timeout(
        Duration::from_secs(1),
        service.write_file(&res("/q"), chunks(&["b"]), None),
    )
    .await
    .expect("queue must not stay blocked");
    assert_eq!(written.unwrap().size, 1);
}

#[tokio::test]
async fn concurrent_writes_share_new_ancestors() {
    let (service, provider) = setup(BOTH);
    let mut tasks = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .write_file(&res(&format!("/x/y/{name}")), name.to_string(), None)
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("every write succeeds");
    }
    let folder = service
        .resolve(&res("/x/y"), &ResolveFileOptions::default())
        .await
        .unwrap();
    assert_eq!(folder.children.unwrap().len(), 4);
    assert!(!provider.calls_starting_with("mkdir /x/y").is_empty());
}

#[tokio::test]
async fn directory_target_fails_without_writing() {
    let (service, provider) = setup(BOTH);
    service.create_folder(&res("/dir")).await.unwrap();
    provider.clear();

    let options = WriteFileOptions {
        mtime: Some(1),
        etag: Some("tag".into()),
    };
    let err = service
        .write_file(&res("/dir"), "x", Some(options.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.result(), FileOperationResult::FileIsDirectory);
    match err {
        FsError::Operation(op) => assert_eq!(op.options, Some(options)),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(provider.calls_starting_with("write").is_empty());
    assert!(provider.calls_starting_with("open").is_empty());
}

#[tokio::test]
async fn dirty_write_is_refused_before_writing() {
    let (service, provider) = setup(BOTH);
    let first = service.write_file(&res("/f"), "v1", None).await.unwrap();
    service.write_file(&res("/f"), "v2 longer", None).await.unwrap();
    provider.clear();

    let stale = WriteFileOptions {
        mtime: Some(first.mtime),
        etag: Some(first.etag.clone()),
    };
    let err = service
        .write_file(&res("/f"), "v3", Some(stale))
        .await
        .unwrap_err();
    assert_eq!(err.result(), FileOperationResult::FileModifiedSince);
    assert!(provider.calls_starting_with("write").is_empty());

    // a caller that knows about the newest version may write
    let current = service
        .resolve_metadata(&res("/f"), &ResolveFileOptions::default())
        .await
        .unwrap();
    let fresh = WriteFileOptions {
        mtime: Some(current.mtime),
        etag: Some(current.etag),
    };
    service.write_file(&res("/f"), "v3", Some(fresh)).await.unwrap();
}

#[tokio::test]
async fn stale_registration_keeps_newer_provider() {
    init_logging();
    let service = FileService::default();
    let first = service
        .register_provider("rec", RecordingProvider::new(BOTH))
        .unwrap();
    let newer = RecordingProvider::new(BOTH);
    let _second = service.register_provider("rec", newer.clone()).unwrap();

    first.dispose();
    assert!(service.can_handle_resource(&res("/")));
    service.write_file(&res("/f"), "x", None).await.unwrap();
    assert!(!newer.calls_starting_with("write_file").is_empty());
}

#[tokio::test]
async fn provider_is_activated_on_first_use() {
    init_logging();
    let service = Arc::new(FileService::default());
    let weak = Arc::downgrade(&service);
    let _listener = service.on_will_activate(move |event| {
        if event.scheme() != "rec" {
            return;
        }
        event.join(async { anyhow::bail!("unrelated participant failed") });
        let weak = weak.clone();
        event.join(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(service) = weak.upgrade() {
                if !service.can_handle_resource(&res("/")) {
                    service.register_provider("rec", RecordingProvider::new(BOTH))?;
                }
            }
            Ok(())
        });
    });

    assert!(!service.can_handle_resource(&res("/f")));
    service.write_file(&res("/f"), "x", None).await.unwrap();
    assert!(service.can_handle_resource(&res("/f")));

    let err = service
        .write_file(&Resource::from_path("other", "/f"), "x", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NoProvider(_)));
}

#[tokio::test]
async fn provider_events_are_forwarded() {
    let (service, provider) = setup(BOTH);
    let mut changes = service.subscribe_file_changes();
    let mut capabilities = service.subscribe_capability_changes();

    service.write_file(&res("/f"), "x", None).await.unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(1), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch, vec![FileChange::added(res("/f"))]);

    provider.inner.set_capabilities(Capabilities::FILE_READ_WRITE | Capabilities::READONLY);
    let event = tokio::time::timeout(Duration::from_secs(1), capabilities.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.scheme, "rec");
    assert!(event.capabilities.is_readonly());

    let err = service.write_file(&res("/g"), "x", None).await.unwrap_err();
    assert_eq!(err.result(), FileOperationResult::FilePermissionDenied);
}
