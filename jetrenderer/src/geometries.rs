use crate::{
    assets::{AssetSource, AssetStore, unblock},
    error::AssetError,
    obj::{GeometryData, parse_obj},
};
use futures::{FutureExt, future::LocalBoxFuture};
use std::{cell::RefCell, rc::Rc};

/// Parsed model geometry keyed by source id.
///
/// Clones share the same storage, which is how in-flight loads write back
/// into the cache.
#[derive(Debug, Clone)]
pub struct GeometryCache {
    store: Rc<RefCell<AssetStore<Rc<GeometryData>>>>,
}

impl GeometryCache {
    pub fn new() -> Self {
        Self {
            store: Rc::new(RefCell::new(AssetStore::new("GeometryCache"))),
        }
    }

    /// Fetches and parses every id. The cache becomes ready once all of them
    /// have settled; failures are logged and leave their id unresolved.
    ///
    /// Parsing runs on the asset worker pool. The returned future must be
    /// driven to completion by the caller's run loop, which is where results
    /// land in the cache. Only the first call per cache does anything.
    pub fn load(
        &self,
        source: Rc<dyn AssetSource>,
        ids: &[String],
    ) -> LocalBoxFuture<'static, ()> {
        let Some(accepted) = self.store.borrow_mut().begin_batch(ids) else {
            return futures::future::ready(()).boxed_local();
        };

        let store = self.store.clone();
        async move {
            let loads = accepted.into_iter().map(|id| {
                let source = source.clone();
                let store = store.clone();
                async move {
                    match fetch_geometry(source.as_ref(), &id).await {
                        Ok(geometry) => {
                            log::debug!(
                                "loaded geometry `{id}` ({} vertices)",
                                geometry.vertex_count()
                            );
                            let _ = store.borrow_mut().insert(id, Rc::new(geometry));
                        }
                        Err(err) => log::error!("{err}"),
                    }
                }
            });

            futures::future::join_all(loads).await;
            store.borrow_mut().finish_batch();
        }
        .boxed_local()
    }

    /// Registers already-parsed geometry under `id`.
    pub fn add_geometry(&self, id: impl Into<String>, geometry: GeometryData) -> bool {
        self.store
            .borrow_mut()
            .add(id.into(), Rc::new(geometry))
            .is_ok()
    }

    pub fn geometry(&self, id: &str) -> Option<Rc<GeometryData>> {
        self.store.borrow().get(id).cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.store.borrow().is_ready()
    }

    pub fn destroy(&self) {
        let released = self.store.borrow_mut().teardown();
        if !released.is_empty() {
            log::debug!("GeometryCache: released {} geometries", released.len());
        }
    }
}

impl Default for GeometryCache {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch_geometry(source: &dyn AssetSource, id: &str) -> Result<GeometryData, AssetError> {
    let bytes = source.fetch(id).await?;
    unblock(move || String::from_utf8(bytes).map(|text| parse_obj(&text)))
        .await?
        .map_err(|_| AssetError::Utf8(id.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{FileSource, MemorySource};

    const TRIANGLE: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 2/1/1 3/1/1\n";

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn source() -> Rc<dyn AssetSource> {
        Rc::new(
            MemorySource::new()
                .with("good.obj", TRIANGLE)
                .with("binary.obj", vec![0xff, 0xfe, 0x00]),
        )
    }

    #[test]
    fn failed_entry_resolves_to_none_after_batch_settles() {
        let cache = GeometryCache::new();
        let load = cache.load(source(), &ids(&["good.obj", "missing.obj"]));

        assert!(!cache.is_ready());
        assert!(cache.geometry("good.obj").is_none());

        pollster::block_on(load);

        assert!(cache.is_ready());
        assert!(cache.geometry("missing.obj").is_none());
        assert_eq!(cache.geometry("good.obj").unwrap().vertex_count(), 3);
    }

    #[test]
    fn undecodable_text_counts_as_failure() {
        let cache = GeometryCache::new();
        pollster::block_on(cache.load(source(), &ids(&["binary.obj"])));
        assert!(cache.is_ready());
        assert!(cache.geometry("binary.obj").is_none());
    }

    #[test]
    fn lookups_return_the_identical_record() {
        let cache = GeometryCache::new();
        pollster::block_on(cache.load(source(), &ids(&["good.obj"])));

        let a = cache.geometry("good.obj").unwrap();
        let b = cache.geometry("good.obj").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn second_load_is_a_no_op() {
        let cache = GeometryCache::new();
        pollster::block_on(cache.load(source(), &ids(&["good.obj"])));
        pollster::block_on(cache.load(source(), &ids(&["binary.obj"])));

        assert!(cache.geometry("good.obj").is_some());
        assert!(cache.geometry("binary.obj").is_none());
    }

    #[test]
    fn add_geometry_merges_alongside_batch() {
        let cache = GeometryCache::new();
        assert!(cache.add_geometry("quad", GeometryData::fullscreen_quad()));
        assert!(!cache.add_geometry("quad", GeometryData::default()));
        assert!(cache.is_ready());
        assert_eq!(cache.geometry("quad").unwrap().vertex_count(), 6);
    }

    #[test]
    fn file_loads_yield_before_the_batch_settles() {
        let dir = std::env::temp_dir()
            .join(format!("jetrenderer-geometries-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut text = String::new();
        for i in 0..200_000 {
            text.push_str(&format!("v {i} 0 0\n"));
        }
        text.push_str("f 1 2 3\n");
        std::fs::write(dir.join("big.obj"), &text).unwrap();

        let cache = GeometryCache::new();
        let source: Rc<dyn AssetSource> = Rc::new(FileSource::new(&dir));
        let mut load = cache.load(source, &ids(&["big.obj"]));

        // The read and the parse are off-thread, so one poll cannot settle it.
        assert!((&mut load).now_or_never().is_none());
        assert!(!cache.is_ready());

        pollster::block_on(load);
        assert!(cache.is_ready());
        assert_eq!(cache.geometry("big.obj").unwrap().vertex_count(), 3);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn destroy_discards_loads_that_finish_late() {
        let cache = GeometryCache::new();
        let load = cache.load(source(), &ids(&["good.obj"]));
        cache.destroy();

        pollster::block_on(load);

        assert!(!cache.is_ready());
        assert!(cache.geometry("good.obj").is_none());
    }
}
