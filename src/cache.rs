//! Caching decorator over the client contract.
//!
//! Wraps any [`Fetch`] implementation with a document cache and a
//! file-cache accounting collaborator. Cache lookups only ever intercept
//! the not-found case; delegate failures always propagate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::client::Fetch;
use crate::error::Result;

/// Document cache keyed by request URI. `None` from `get` is the distinct
/// not-found signal.
pub trait Documents: Send + Sync {
    fn get(&self, uri: &str) -> Option<String>;
    fn put(&self, uri: &str, content: &str);
}

/// Accounting for downloaded files, so an external purge can tell managed
/// files from strays.
pub trait FileCache: Send + Sync {
    fn register(&self, filename: &str, original_name: &str);
}

/// Caching client: short-circuits on cache hit, stores after every fetch.
pub struct CachingClient<C> {
    client: C,
    documents: Arc<dyn Documents>,
    files: Arc<dyn FileCache>,
    cache_dir: PathBuf,
}

impl<C: Fetch + Sync> CachingClient<C> {
    pub fn new(
        client: C,
        documents: Arc<dyn Documents>,
        files: Arc<dyn FileCache>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            documents,
            files,
            cache_dir: cache_dir.into(),
        }
    }

    /// Fetch `uri` as bytes and persist it in the cache directory under a
    /// time-based name that preserves the original extension. The file is
    /// registered with the file-cache collaborator before returning.
    pub async fn download(&self, uri: &str) -> Result<PathBuf> {
        let bytes = self.client.binary(uri).await?;

        let original = original_name(uri);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let filename = match extension(&original) {
            Some(ext) => format!("{millis}.{ext}"),
            None => millis.to_string(),
        };

        let path = self.cache_dir.join(&filename);
        tokio::fs::write(&path, &bytes).await?;
        self.files.register(&filename, &original);
        tracing::info!("Downloaded {uri} to {}", path.display());

        Ok(path)
    }
}

impl<C: Fetch + Sync> Fetch for CachingClient<C> {
    async fn get(&self, uri: &str, check_cache: bool) -> Result<String> {
        if check_cache {
            if let Some(content) = self.documents.get(uri) {
                tracing::info!("GET {uri}, found in cache!");
                return Ok(content);
            }
            tracing::info!("{uri} not in cache! Getting ...");
        } else {
            tracing::info!("GET: {uri}, skipping cache");
        }

        let text = self.client.get(uri, false).await?;
        self.documents.put(uri, &text);
        Ok(text)
    }

    async fn binary(&self, uri: &str) -> Result<Bytes> {
        self.client.binary(uri).await
    }
}

/// Last path segment of the request URI.
fn original_name(uri: &str) -> String {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(uri)
        .to_string()
}

/// File extension of a name, if any.
fn extension(name: &str) -> Option<&str> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapDocuments {
        entries: Mutex<HashMap<String, String>>,
    }

    impl Documents for MapDocuments {
        fn get(&self, uri: &str) -> Option<String> {
            self.entries.lock().unwrap().get(uri).cloned()
        }

        fn put(&self, uri: &str, content: &str) {
            self.entries
                .lock()
                .unwrap()
                .insert(uri.to_string(), content.to_string());
        }
    }

    #[derive(Default)]
    struct RecordingFileCache {
        registered: Mutex<Vec<(String, String)>>,
    }

    impl FileCache for RecordingFileCache {
        fn register(&self, filename: &str, original_name: &str) {
            self.registered
                .lock()
                .unwrap()
                .push((filename.to_string(), original_name.to_string()));
        }
    }

    /// Scripted delegate that counts network calls.
    struct FakeClient {
        text: std::result::Result<String, ()>,
        bytes: Vec<u8>,
        calls: AtomicUsize,
    }

    impl FakeClient {
        fn returning(text: &str) -> Self {
            Self {
                text: Ok(text.to_string()),
                bytes: b"binary".to_vec(),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                text: Err(()),
                bytes: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetch for &FakeClient {
        async fn get(&self, _uri: &str, _check_cache: bool) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.text
                .clone()
                .map_err(|_| Error::no_response("scripted failure"))
        }

        async fn binary(&self, _uri: &str) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(self.bytes.clone()))
        }
    }

    fn caching(client: &FakeClient) -> (CachingClient<&FakeClient>, Arc<MapDocuments>) {
        let documents = Arc::new(MapDocuments::default());
        let caching = CachingClient::new(
            client,
            documents.clone(),
            Arc::new(RecordingFileCache::default()),
            std::env::temp_dir(),
        );
        (caching, documents)
    }

    #[tokio::test]
    async fn cache_hit_skips_network() {
        let delegate = FakeClient::returning("fresh");
        let (client, documents) = caching(&delegate);
        documents.put("gemini://example.org/", "cached");

        let text = client.get("gemini://example.org/", true).await.unwrap();
        assert_eq!(text, "cached");
        assert_eq!(delegate.calls(), 0);
    }

    #[tokio::test]
    async fn cache_miss_delegates_and_stores() {
        let delegate = FakeClient::returning("fresh");
        let (client, documents) = caching(&delegate);

        let text = client.get("gemini://example.org/", true).await.unwrap();
        assert_eq!(text, "fresh");
        assert_eq!(delegate.calls(), 1);
        assert_eq!(documents.get("gemini://example.org/").as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn skipping_cache_always_fetches_and_overwrites() {
        let delegate = FakeClient::returning("fresh");
        let (client, documents) = caching(&delegate);
        documents.put("gemini://example.org/", "stale");

        let text = client.get("gemini://example.org/", false).await.unwrap();
        assert_eq!(text, "fresh");
        assert_eq!(delegate.calls(), 1);
        assert_eq!(documents.get("gemini://example.org/").as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn delegate_failure_propagates_and_stores_nothing() {
        let delegate = FakeClient::failing();
        let (client, documents) = caching(&delegate);

        let err = client.get("gemini://example.org/", true).await.unwrap_err();
        assert!(matches!(err, Error::NoResponse(_)));
        assert!(documents.get("gemini://example.org/").is_none());
    }

    #[tokio::test]
    async fn download_preserves_extension_and_registers() {
        let delegate = FakeClient::returning("");
        let files = Arc::new(RecordingFileCache::default());
        let dir = std::env::temp_dir().join(format!(
            "capsule-test-{}",
            std::process::id()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let client = CachingClient::new(
            &delegate,
            Arc::new(MapDocuments::default()),
            files.clone(),
            &dir,
        );

        let path = client
            .download("gemini://example.org/images/photo.jpg")
            .await
            .unwrap();

        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpg"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"binary");

        let registered = files.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].1, "photo.jpg");
        assert!(registered[0].0.ends_with(".jpg"));
    }

    #[test]
    fn original_name_is_last_segment() {
        assert_eq!(original_name("gemini://h/images/photo.jpg"), "photo.jpg");
        assert_eq!(original_name("gemini://h/dir/"), "dir");
    }

    #[test]
    fn extension_of_plain_names() {
        assert_eq!(extension("photo.jpg"), Some("jpg"));
        assert_eq!(extension("archive.tar.gz"), Some("gz"));
        assert_eq!(extension("README"), None);
        assert_eq!(extension(".hidden"), None);
    }
}
