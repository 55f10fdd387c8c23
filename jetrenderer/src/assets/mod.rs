//! Asset sources and the readiness-gated store shared by the resource caches.

mod store;
mod worker;

pub use store::AssetStore;
pub use worker::unblock;

use crate::error::AssetError;
use futures::{FutureExt, future::LocalBoxFuture};
use rustc_hash::FxHashMap;
use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

/// Fetch-by-identifier byte source. Single-threaded: the returned futures are
/// driven on the same run loop as the renderer.
pub trait AssetSource {
    fn fetch(&self, id: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, AssetError>>;
}

/// Reads assets from a directory; identifiers are paths relative to `root`.
/// The read itself happens on the asset worker pool.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetSource for FileSource {
    fn fetch(&self, id: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, AssetError>> {
        let path = self.root.join(id.trim_start_matches('/'));
        let id = id.to_owned();

        async move {
            unblock(move || std::fs::read(path))
                .await?
                .map_err(|source| match source.kind() {
                    std::io::ErrorKind::NotFound => AssetError::NotFound(id),
                    _ => AssetError::Io { id, source },
                })
        }
        .boxed_local()
    }
}

/// Serves bytes registered up front.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    assets: FxHashMap<String, Rc<[u8]>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(id, bytes);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let bytes: Vec<u8> = bytes.into();
        self.assets.insert(id.into(), Rc::from(bytes));
    }
}

impl AssetSource for MemorySource {
    fn fetch(&self, id: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, AssetError>> {
        let result = self
            .assets
            .get(id)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| AssetError::NotFound(id.to_owned()));

        futures::future::ready(result).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_serves_registered_bytes() {
        let source = MemorySource::new().with("a.obj", "v 0 0 0");

        let bytes = pollster::block_on(source.fetch("a.obj")).unwrap();
        assert_eq!(bytes, b"v 0 0 0");

        let missing = pollster::block_on(source.fetch("b.obj"));
        assert!(matches!(missing, Err(AssetError::NotFound(id)) if id == "b.obj"));
    }

    #[test]
    fn file_source_reports_missing_files() {
        let source = FileSource::new(std::env::temp_dir());
        let result = pollster::block_on(source.fetch("/definitely/not/here.obj"));
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }

    #[test]
    fn file_source_reads_relative_to_root() {
        let dir = std::env::temp_dir()
            .join(format!("jetrenderer-assets-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("tri.obj"), "v 1 2 3\n").unwrap();

        let source = FileSource::new(&dir);
        let bytes = pollster::block_on(source.fetch("/tri.obj")).unwrap();
        assert_eq!(bytes, b"v 1 2 3\n");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
