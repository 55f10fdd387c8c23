//! Shader programs: a vertex and a fragment stage linked into one unit that
//! owns its uniform buffers, bind groups and pipelines.
//!
//! ```rust,ignore
//! let mut program = ShaderProgram::new(
//!     &device,
//!     &queue,
//!     builtin::DEFAULT_VERTEX,
//!     builtin::DEFAULT_FRAGMENT,
//!     vec![TextureBinding::new("efa.png", "u_image")],
//! )?;
//!
//! program.uniforms_mut().set("u_time", 1.5);
//! program.bind(&mut pass, &textures, DrawMode::Triangles, formats);
//! ```

pub mod reflect;
pub mod uniform;

/// Programs bundled with the crate.
pub mod builtin {
    pub const DEFAULT_VERTEX: &str = include_str!("../../shaders/default.vert.wgsl");
    pub const DEFAULT_FRAGMENT: &str = include_str!("../../shaders/default.frag.wgsl");
    pub const COMPOSITE_VERTEX: &str = include_str!("../../shaders/composite.vert.wgsl");
    pub const COMPOSITE_FRAGMENT: &str = include_str!("../../shaders/composite.frag.wgsl");
}

pub use reflect::{ProgramInterface, ResourceKind, UniformLocation, VertexAttribute};
pub use uniform::{UniformTable, UniformValue};

use crate::{
    error::ShaderError,
    frame::DrawMode,
    textures::{GpuTexture, TextureCache},
    utils::SlotId,
};
use reflect::Stage;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::borrow::Cow;
use uniform::UniformStaging;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
}

impl AttributeFormat {
    /// Size of one element in bytes.
    pub fn size(&self) -> u64 {
        self.to_wgpu().size()
    }

    pub fn components(&self) -> usize {
        match self {
            AttributeFormat::Float32 | AttributeFormat::Uint32 => 1,
            AttributeFormat::Float32x2 | AttributeFormat::Uint32x2 => 2,
            AttributeFormat::Float32x3 | AttributeFormat::Uint32x3 => 3,
            AttributeFormat::Float32x4 | AttributeFormat::Uint32x4 => 4,
        }
    }

    pub fn to_wgpu(&self) -> wgpu::VertexFormat {
        match self {
            AttributeFormat::Float32 => wgpu::VertexFormat::Float32,
            AttributeFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            AttributeFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            AttributeFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
            AttributeFormat::Uint32 => wgpu::VertexFormat::Uint32,
            AttributeFormat::Uint32x2 => wgpu::VertexFormat::Uint32x2,
            AttributeFormat::Uint32x3 => wgpu::VertexFormat::Uint32x3,
            AttributeFormat::Uint32x4 => wgpu::VertexFormat::Uint32x4,
        }
    }
}

/// Binds the texture cached under `key` to the texture global named `uniform`.
/// The sampler comes from the global named `{uniform}_sampler`, if declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    pub key: String,
    pub uniform: String,
}

impl TextureBinding {
    pub fn new(key: impl Into<String>, uniform: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            uniform: uniform.into(),
        }
    }
}

/// Attachment formats of the pass a program draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetFormats {
    pub color: wgpu::TextureFormat,
    pub depth: Option<wgpu::TextureFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    topology: wgpu::PrimitiveTopology,
    formats: TargetFormats,
}

type BindGroupKey = SmallVec<[(SlotId, u64); 2]>;

pub struct ShaderProgram {
    device: wgpu::Device,
    queue: wgpu::Queue,
    vertex_module: wgpu::ShaderModule,
    fragment_module: wgpu::ShaderModule,
    interface: ProgramInterface,
    pipeline_layout: wgpu::PipelineLayout,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
    bind_groups: Vec<Option<(BindGroupKey, wgpu::BindGroup)>>,
    uniform_buffers: Vec<(u32, u32, wgpu::Buffer)>,
    staging: UniformStaging,
    locations: FxHashMap<String, Option<UniformLocation>>,
    uniforms: UniformTable,
    texture_bindings: Vec<TextureBinding>,
    destroyed: bool,
}

impl ShaderProgram {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        vertex_source: &str,
        fragment_source: &str,
        texture_bindings: Vec<TextureBinding>,
    ) -> Result<Self, ShaderError> {
        let vertex = reflect::compile_stage(vertex_source, Stage::Vertex)?;
        let fragment = reflect::compile_stage(fragment_source, Stage::Fragment)?;
        let interface = reflect::link(&vertex, &fragment)?;

        for binding in &texture_bindings {
            let kind = interface.resource(&binding.uniform).map(|r| r.kind);
            if kind != Some(ResourceKind::Texture) {
                log::warn!(
                    "texture `{}` is bound to `{}`, which the program does not sample",
                    binding.key,
                    binding.uniform
                );
            }
        }

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Vertex Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(vertex.source)),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Fragment Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(fragment.source)),
        });

        let bind_group_layouts: Vec<_> = layout_entries(&interface)
            .iter()
            .map(|entries| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Program Bind Group Layout"),
                    entries,
                })
            })
            .collect();

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Program Pipeline Layout"),
            bind_group_layouts: &bind_group_layouts.iter().collect::<Vec<_>>(),
            immediate_size: 0,
        });

        let staging = UniformStaging::new(&interface);
        let uniform_buffers = staging
            .blocks()
            .iter()
            .map(|block| {
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Uniform Buffer"),
                    size: block.size(),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                (block.group, block.binding, buffer)
            })
            .collect();

        log::debug!(
            "linked program: {} attributes, {} resources",
            interface.attributes.len(),
            interface.resources.len()
        );

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            vertex_module,
            fragment_module,
            bind_groups: (0..bind_group_layouts.len()).map(|_| None).collect(),
            interface,
            pipeline_layout,
            bind_group_layouts,
            pipelines: FxHashMap::default(),
            uniform_buffers,
            staging,
            locations: FxHashMap::default(),
            uniforms: UniformTable::new(),
            texture_bindings,
            destroyed: false,
        })
    }

    pub fn interface(&self) -> &ProgramInterface {
        &self.interface
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.interface.attributes
    }

    pub fn attribute_location(&self, name: &str) -> Option<u32> {
        self.interface.attribute(name).map(|attribute| attribute.location)
    }

    pub fn texture_bindings(&self) -> &[TextureBinding] {
        &self.texture_bindings
    }

    /// Resolves a uniform by name. Both hits and misses are remembered.
    pub fn uniform_location(&mut self, name: &str) -> Option<UniformLocation> {
        if let Some(location) = self.locations.get(name) {
            return *location;
        }

        let location = self.interface.uniform(name);
        if location.is_none() {
            log::debug!("uniform `{name}` is not used by the program");
        }
        self.locations.insert(name.to_owned(), location);
        location
    }

    /// Writes a uniform for the next draw. Unknown names are ignored.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) {
        let Some(location) = self.uniform_location(name) else {
            return;
        };
        self.staging.write(name, location, &value.into());
    }

    /// Uniforms applied on every [`ShaderProgram::bind`].
    pub fn uniforms(&self) -> &UniformTable {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformTable {
        &mut self.uniforms
    }

    /// Makes the program current on `pass`: selects the pipeline for `mode`,
    /// applies the uniform table, uploads uniforms and binds textures.
    /// Textures that are not loaded yet are replaced by the cache fallback.
    ///
    /// Returns `false` and leaves `pass` untouched when the program or the
    /// texture cache has been destroyed; nothing may be drawn then.
    pub fn bind(
        &mut self,
        pass: &mut wgpu::RenderPass<'_>,
        textures: &TextureCache,
        mode: DrawMode,
        formats: TargetFormats,
    ) -> bool {
        if self.destroyed {
            log::warn!("bind called on a destroyed program");
            return false;
        }
        let Some(resolved) = self.resolve_textures(textures) else {
            log::warn!("bind called with a destroyed texture cache");
            return false;
        };

        let key = PipelineKey {
            topology: mode.to_wgpu(),
            formats,
        };
        if !self.pipelines.contains_key(&key) {
            let pipeline = self.create_pipeline(key);
            self.pipelines.insert(key, pipeline);
        }
        if let Some(pipeline) = self.pipelines.get(&key) {
            pass.set_pipeline(pipeline);
        }

        let table: Vec<_> = self
            .uniforms
            .iter()
            .map(|(name, value)| (name.to_owned(), *value))
            .collect();
        for (name, value) in table {
            self.set_uniform(&name, value);
        }
        self.flush_uniforms();

        for group in 0..self.bind_group_layouts.len() {
            self.bind_group(pass, group, &resolved);
        }
        true
    }

    fn flush_uniforms(&mut self) {
        for block in self.staging.blocks_mut() {
            if !block.is_dirty() {
                continue;
            }
            let buffer = self
                .uniform_buffers
                .iter()
                .find(|(group, binding, _)| *group == block.group && *binding == block.binding);
            if let Some((_, _, buffer)) = buffer {
                self.queue.write_buffer(buffer, 0, block.bytes());
            }
            block.mark_clean();
        }
    }

    /// `None` once the cache is destroyed, since its fallback is gone too.
    fn resolve_textures(&self, textures: &TextureCache) -> Option<ResolvedTextures> {
        if !textures.is_alive() {
            return None;
        }

        let by_name = self
            .interface
            .resources
            .iter()
            .filter(|resource| resource.kind == ResourceKind::Texture)
            .filter_map(|resource| {
                let binding = self
                    .texture_bindings
                    .iter()
                    .find(|binding| binding.uniform == resource.name)?;
                let texture = textures.texture(&binding.key)?;
                Some((resource.name.clone(), texture))
            })
            .collect();

        Some(ResolvedTextures {
            by_name,
            fallback: textures.fallback(),
        })
    }

    fn bind_group(
        &mut self,
        pass: &mut wgpu::RenderPass<'_>,
        group: usize,
        resolved: &ResolvedTextures,
    ) {
        let resources: Vec<_> = self
            .interface
            .resources
            .iter()
            .filter(|resource| resource.group as usize == group)
            .collect();

        let key: BindGroupKey = resources
            .iter()
            .filter(|resource| !matches!(resource.kind, ResourceKind::UniformBuffer { .. }))
            .map(|resource| resolved.texture_for(resource).bind_key())
            .collect();

        if let Some((cached, bind_group)) = &self.bind_groups[group]
            && *cached == key
        {
            pass.set_bind_group(group as u32, bind_group, &[]);
            return;
        }

        let mut entries: SmallVec<[wgpu::BindGroupEntry; 4]> = SmallVec::new();
        for resource in &resources {
            let binding_resource = match resource.kind {
                ResourceKind::UniformBuffer { .. } => {
                    let Some((_, _, buffer)) = self
                        .uniform_buffers
                        .iter()
                        .find(|(g, b, _)| *g == resource.group && *b == resource.binding)
                    else {
                        continue;
                    };
                    buffer.as_entire_binding()
                }
                ResourceKind::Texture => {
                    wgpu::BindingResource::TextureView(&resolved.texture_for(resource).view)
                }
                ResourceKind::Sampler => {
                    wgpu::BindingResource::Sampler(&resolved.texture_for(resource).sampler)
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: resource.binding,
                resource: binding_resource,
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Program Bind Group"),
            layout: &self.bind_group_layouts[group],
            entries: &entries,
        });
        pass.set_bind_group(group as u32, &bind_group, &[]);
        self.bind_groups[group] = Some((key, bind_group));
    }

    fn create_pipeline(&self, key: PipelineKey) -> wgpu::RenderPipeline {
        let attributes = vertex_attributes(&self.interface);
        let buffers: Vec<_> = self
            .interface
            .attributes
            .iter()
            .zip(&attributes)
            .map(|(attribute, layout)| wgpu::VertexBufferLayout {
                array_stride: attribute.format.size(),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: layout,
            })
            .collect();

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Program Pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.vertex_module,
                    entry_point: Some(reflect::VERTEX_ENTRY),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.fragment_module,
                    entry_point: Some(reflect::FRAGMENT_ENTRY),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: key.formats.color,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: key.topology,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: key.formats.depth.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Releases the pipelines, bind groups and uniform buffers.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.pipelines.clear();
        self.bind_groups.iter_mut().for_each(|group| *group = None);
        for (_, _, buffer) in self.uniform_buffers.drain(..) {
            buffer.destroy();
        }
        self.locations.clear();
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct ResolvedTextures {
    by_name: FxHashMap<String, GpuTexture>,
    fallback: GpuTexture,
}

impl ResolvedTextures {
    /// Texture backing a texture global, or the one a sampler global samples.
    fn texture_for(&self, resource: &reflect::Resource) -> &GpuTexture {
        let name = match resource.kind {
            ResourceKind::Sampler => sampled_texture_name(&resource.name).unwrap_or_default(),
            _ => resource.name.as_str(),
        };
        self.by_name.get(name).unwrap_or(&self.fallback)
    }
}

/// Name of the texture a sampler global belongs to: `u_image_sampler`
/// samples `u_image`.
pub fn sampled_texture_name(sampler: &str) -> Option<&str> {
    sampler.strip_suffix("_sampler").filter(|name| !name.is_empty())
}

/// Bind group layout entries per group. Groups the program leaves unused get
/// an empty layout.
pub fn layout_entries(interface: &ProgramInterface) -> Vec<Vec<wgpu::BindGroupLayoutEntry>> {
    let mut groups = vec![Vec::new(); interface.group_count() as usize];

    for resource in &interface.resources {
        let ty = match resource.kind {
            ResourceKind::UniformBuffer { .. } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            ResourceKind::Texture => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            ResourceKind::Sampler => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
            }
        };

        groups[resource.group as usize].push(wgpu::BindGroupLayoutEntry {
            binding: resource.binding,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty,
            count: None,
        });
    }

    groups
}

/// One single-attribute vertex buffer layout per reflected attribute, in
/// location order. Buffer slot `i` feeds `interface.attributes[i]`.
pub fn vertex_attributes(interface: &ProgramInterface) -> Vec<[wgpu::VertexAttribute; 1]> {
    interface
        .attributes
        .iter()
        .map(|attribute| {
            [wgpu::VertexAttribute {
                offset: 0,
                shader_location: attribute.location,
                format: attribute.format.to_wgpu(),
            }]
        })
        .collect()
}
