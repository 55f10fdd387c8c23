//! GPU textures keyed by source id, plus named off-screen render targets.

use crate::{
    assets::{AssetSource, AssetStore, unblock},
    error::{AssetError, TextureError},
    utils::{IdPool, SlotId},
};
use futures::{FutureExt, future::LocalBoxFuture};
use image::{RgbaImage, imageops::FilterType};
use rustc_hash::FxHashMap;
use std::{cell::RefCell, rc::Rc};

pub const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
pub const TARGET_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// A sampled texture as handed out to shader programs.
///
/// `slot` identifies the cache entry and `generation` changes whenever the
/// storage behind it is reallocated, so the pair is enough to tell whether a
/// bind group built from an earlier lookup is still valid.
#[derive(Debug, Clone)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub width: u32,
    pub height: u32,
    pub slot: SlotId,
    pub generation: u64,
}

impl GpuTexture {
    pub fn bind_key(&self) -> (SlotId, u64) {
        (self.slot, self.generation)
    }
}

#[derive(Debug)]
pub struct DepthBuffer {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl DepthBuffer {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: extent(width.max(1), height.max(1)),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self { texture, view }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }

    pub fn release(&self) {
        self.texture.destroy();
    }
}

/// Off-screen color attachment with its matching depth buffer.
#[derive(Debug)]
pub struct RenderTarget {
    pub color: GpuTexture,
    pub depth: DepthBuffer,
}

impl RenderTarget {
    pub fn size(&self) -> (u32, u32) {
        (self.color.width, self.color.height)
    }

    fn release(&self) {
        self.color.texture.destroy();
        self.depth.release();
    }
}

struct TextureCacheInner {
    device: wgpu::Device,
    queue: wgpu::Queue,
    images: AssetStore<GpuTexture>,
    targets: FxHashMap<String, RenderTarget>,
    slots: IdPool,
    next_generation: u64,
    fallback: GpuTexture,
}

impl TextureCacheInner {
    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn upload_image(&mut self, id: &str, levels: &[RgbaImage]) -> GpuTexture {
        let slot = self.slots.get_next();
        let generation = self.generation();
        create_image_texture(&self.device, &self.queue, id, levels, slot, generation)
    }

    fn allocate_target(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        slot: SlotId,
    ) -> Result<RenderTarget, TextureError> {
        validate_render_target(
            name,
            width,
            height,
            DEPTH_FORMAT,
            self.device.limits().max_texture_dimension_2d,
        )?;

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(name),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(name),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let depth = DepthBuffer::new(&self.device, width, height);

        let target = RenderTarget {
            color: GpuTexture {
                texture,
                view,
                sampler,
                width,
                height,
                slot,
                generation: self.generation(),
            },
            depth,
        };

        let color_size = (target.color.texture.width(), target.color.texture.height());
        if let Err(err) = check_attachments(name, color_size, target.depth.size()) {
            target.release();
            return Err(err);
        }

        Ok(target)
    }

    fn release_image(&mut self, texture: GpuTexture) {
        texture.texture.destroy();
        self.slots.free(texture.slot);
    }
}

/// Image textures loaded in one batch, and render targets created on demand.
///
/// Image lookups are gated on the batch having settled. Render targets are
/// available as soon as they are created. Until an image is ready, callers can
/// sample [`TextureCache::fallback`], a 1×1 white texture.
#[derive(Clone)]
pub struct TextureCache {
    inner: Rc<RefCell<TextureCacheInner>>,
}

impl TextureCache {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let mut slots = IdPool::new();
        let white = RgbaImage::from_pixel(1, 1, image::Rgba([255, 255, 255, 255]));
        let fallback = create_image_texture(
            device,
            queue,
            "Fallback Texture",
            std::slice::from_ref(&white),
            slots.get_next(),
            0,
        );

        let inner = TextureCacheInner {
            device: device.clone(),
            queue: queue.clone(),
            images: AssetStore::new("TextureCache"),
            targets: FxHashMap::default(),
            slots,
            next_generation: 0,
            fallback,
        };

        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// Fetches, decodes and uploads every id. The cache becomes ready once all
    /// of them have settled. Only the first call per cache does anything.
    ///
    /// Decoding and mip generation run on the asset worker pool; the upload
    /// happens on the run loop that drives the returned future.
    pub fn load(
        &self,
        source: Rc<dyn AssetSource>,
        ids: &[String],
    ) -> LocalBoxFuture<'static, ()> {
        let Some(accepted) = self.inner.borrow_mut().images.begin_batch(ids) else {
            return futures::future::ready(()).boxed_local();
        };

        let inner = self.inner.clone();
        async move {
            let loads = accepted.into_iter().map(|id| {
                let source = source.clone();
                let inner = inner.clone();
                async move {
                    let levels = match fetch_image(source.as_ref(), &id).await {
                        Ok(levels) => levels,
                        Err(err) => {
                            log::error!("{err}");
                            return;
                        }
                    };

                    let mut inner = inner.borrow_mut();
                    if !inner.images.is_alive() {
                        log::debug!("TextureCache: dropping late load of `{id}`");
                        return;
                    }

                    let texture = inner.upload_image(&id, &levels);
                    log::debug!(
                        "loaded texture `{id}` ({}x{})",
                        texture.width,
                        texture.height
                    );
                    if let Err(texture) = inner.images.insert(id, texture) {
                        inner.release_image(texture);
                    }
                }
            });

            futures::future::join_all(loads).await;
            inner.borrow_mut().images.finish_batch();
        }
        .boxed_local()
    }

    /// Looks up an image or the color attachment of a render target.
    pub fn texture(&self, key: &str) -> Option<GpuTexture> {
        let inner = self.inner.borrow();
        if let Some(target) = inner.targets.get(key) {
            return Some(target.color.clone());
        }
        inner.images.get(key).cloned()
    }

    pub fn fallback(&self) -> GpuTexture {
        self.inner.borrow().fallback.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.borrow().images.is_ready()
    }

    /// False once [`TextureCache::destroy`] has run. Nothing the cache hands
    /// out, the fallback included, may be sampled after that.
    pub fn is_alive(&self) -> bool {
        self.inner.borrow().images.is_alive()
    }

    pub fn create_render_target(
        &self,
        name: &str,
        width: u32,
        height: u32,
    ) -> Result<(), TextureError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.images.is_alive() {
            return Err(TextureError::Destroyed);
        }
        if inner.targets.contains_key(name) || inner.images.contains(name) {
            return Err(TextureError::Duplicate(name.to_owned()));
        }

        let slot = inner.slots.get_next();
        match inner.allocate_target(name, width, height, slot) {
            Ok(target) => {
                log::debug!("created render target `{name}` ({width}x{height})");
                inner.targets.insert(name.to_owned(), target);
                Ok(())
            }
            Err(err) => {
                inner.slots.free(slot);
                Err(err)
            }
        }
    }

    /// Reallocates the storage of a render target. The key and slot stay the
    /// same; the generation changes.
    pub fn resize_render_target(
        &self,
        name: &str,
        width: u32,
        height: u32,
    ) -> Result<(), TextureError> {
        let mut inner = self.inner.borrow_mut();
        let Some(slot) = inner.targets.get(name).map(|target| target.color.slot) else {
            return Err(TextureError::UnknownTarget(name.to_owned()));
        };
        if inner.targets.get(name).is_some_and(|target| target.size() == (width, height)) {
            return Ok(());
        }

        let resized = inner.allocate_target(name, width, height, slot)?;
        if let Some(old) = inner.targets.insert(name.to_owned(), resized) {
            old.release();
        }
        log::debug!("resized render target `{name}` to {width}x{height}");
        Ok(())
    }

    /// Runs `f` with the render target, if one exists under `name`.
    pub fn with_render_target<R>(
        &self,
        name: &str,
        f: impl FnOnce(&RenderTarget) -> R,
    ) -> Option<R> {
        self.inner.borrow().targets.get(name).map(f)
    }

    pub fn render_target_names(&self) -> Vec<String> {
        self.inner.borrow().targets.keys().cloned().collect()
    }

    /// Releases every texture the cache owns. Loads still in flight are
    /// discarded when they complete.
    pub fn destroy(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.images.is_alive() {
            return;
        }

        for (_, texture) in inner.images.teardown() {
            inner.release_image(texture);
        }
        let targets: Vec<_> = inner.targets.drain().collect();
        for (_, target) in targets {
            target.release();
            inner.slots.free(target.color.slot);
        }
        inner.fallback.texture.destroy();
        log::debug!("TextureCache: destroyed");
    }
}

async fn fetch_image(source: &dyn AssetSource, id: &str) -> Result<Vec<RgbaImage>, AssetError> {
    let bytes = source.fetch(id).await?;
    let id = id.to_owned();
    unblock(move || decode_levels(id, &bytes)).await?
}

/// Decodes `bytes` and builds the mip chain the upload will use.
fn decode_levels(id: String, bytes: &[u8]) -> Result<Vec<RgbaImage>, AssetError> {
    let image = image::load_from_memory(bytes)
        .map_err(|source| AssetError::Decode { id, source })?
        .to_rgba8();

    let (width, height) = image.dimensions();
    if is_power_of_two(width) && is_power_of_two(height) {
        Ok(mip_chain(&image))
    } else {
        Ok(vec![image])
    }
}

fn write_rgba(queue: &wgpu::Queue, texture: &wgpu::Texture, mip_level: u32, image: &RgbaImage) {
    let (width, height) = image.dimensions();
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        image.as_raw(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        extent(width, height),
    );
}

/// Uploads prepared mip levels, base level first, with repeat wrapping and
/// linear filtering.
fn create_image_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    levels: &[RgbaImage],
    slot: SlotId,
    generation: u64,
) -> GpuTexture {
    let (width, height) = levels.first().map_or((1, 1), |base| base.dimensions());

    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(width, height),
        mip_level_count: levels.len() as u32,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: IMAGE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    for (level, data) in levels.iter().enumerate() {
        write_rgba(queue, &texture, level as u32, data);
    }

    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: if levels.len() > 1 {
            wgpu::MipmapFilterMode::Linear
        } else {
            wgpu::MipmapFilterMode::Nearest
        },
        ..Default::default()
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    GpuTexture {
        texture,
        view,
        sampler,
        width,
        height,
        slot,
        generation,
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

pub fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Number of mip levels for a texture, counting the base level. Only
/// power-of-two textures get a chain.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    if !is_power_of_two(width) || !is_power_of_two(height) {
        return 1;
    }
    32 - width.max(height).leading_zeros()
}

/// Downsamples `base` level by level until both sides are 1.
pub fn mip_chain(base: &RgbaImage) -> Vec<RgbaImage> {
    let (width, height) = base.dimensions();
    let count = mip_level_count(width, height);

    let mut levels = Vec::with_capacity(count as usize);
    levels.push(base.clone());
    for level in 1..count {
        let w = (width >> level).max(1);
        let h = (height >> level).max(1);
        let previous = &levels[level as usize - 1];
        levels.push(image::imageops::resize(previous, w, h, FilterType::Triangle));
    }
    levels
}

/// Checks a render target request before anything is allocated.
pub fn validate_render_target(
    name: &str,
    width: u32,
    height: u32,
    depth_format: wgpu::TextureFormat,
    max_dimension: u32,
) -> Result<(), TextureError> {
    let incomplete = |reason: String| TextureError::IncompleteTarget {
        name: name.to_owned(),
        reason,
    };

    if width == 0 || height == 0 {
        return Err(incomplete(format!("zero-sized attachment {width}x{height}")));
    }
    if width > max_dimension || height > max_dimension {
        return Err(incomplete(format!(
            "{width}x{height} exceeds the device limit of {max_dimension}"
        )));
    }
    if !depth_format.has_depth_aspect() {
        return Err(incomplete(format!("{depth_format:?} is not a depth format")));
    }
    Ok(())
}

/// Every attachment of a target must have the same dimensions.
pub fn check_attachments(
    name: &str,
    color: (u32, u32),
    depth: (u32, u32),
) -> Result<(), TextureError> {
    if color != depth {
        return Err(TextureError::IncompleteTarget {
            name: name.to_owned(),
            reason: format!(
                "color is {}x{} but depth is {}x{}",
                color.0, color.1, depth.0, depth.1
            ),
        });
    }
    Ok(())
}
