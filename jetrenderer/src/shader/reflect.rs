//! Compile-time checks and reflection for WGSL programs.
//!
//! Each stage is parsed and validated on its own ("compile"). The two stages
//! are then checked against each other and their resource declarations are
//! merged into a [`ProgramInterface`] ("link").

use super::AttributeFormat;
use crate::error::ShaderError;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use rustc_hash::FxHashMap;

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
        }
    }

    pub fn entry_point(self) -> &'static str {
        match self {
            Stage::Vertex => VERTEX_ENTRY,
            Stage::Fragment => FRAGMENT_ENTRY,
        }
    }

    fn to_naga(self) -> naga::ShaderStage {
        match self {
            Stage::Vertex => naga::ShaderStage::Vertex,
            Stage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

/// A validated single-stage module.
#[derive(Debug)]
pub struct CompiledStage {
    pub stage: Stage,
    pub source: String,
    module: naga::Module,
}

impl CompiledStage {
    fn entry(&self) -> Result<&naga::EntryPoint, ShaderError> {
        find_entry(&self.module, self.stage).ok_or(ShaderError::MissingEntryPoint {
            stage: self.stage.label(),
            entry: self.stage.entry_point(),
        })
    }
}

pub fn compile_stage(source: &str, stage: Stage) -> Result<CompiledStage, ShaderError> {
    let compile_error = |message: String| ShaderError::Compile {
        stage: stage.label(),
        message,
    };

    let module = naga::front::wgsl::parse_str(source)
        .map_err(|err| compile_error(err.emit_to_string(source)))?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| compile_error(err.emit_to_string(source)))?;

    if find_entry(&module, stage).is_none() {
        return Err(ShaderError::MissingEntryPoint {
            stage: stage.label(),
            entry: stage.entry_point(),
        });
    }

    Ok(CompiledStage {
        stage,
        source: source.to_owned(),
        module,
    })
}

fn find_entry(module: &naga::Module, stage: Stage) -> Option<&naga::EntryPoint> {
    module
        .entry_points
        .iter()
        .find(|entry| entry.stage == stage.to_naga() && entry.name == stage.entry_point())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub name: String,
    pub location: u32,
    pub format: AttributeFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    UniformBuffer { size: u32 },
    /// `texture_2d<f32>`
    Texture,
    /// Filtering `sampler`
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

/// Where a named uniform lives: the buffer binding plus a byte range in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub group: u32,
    pub binding: u32,
    pub offset: u32,
    pub size: u32,
}

/// Everything a linked program exposes to the host.
#[derive(Debug, Clone, Default)]
pub struct ProgramInterface {
    pub attributes: Vec<VertexAttribute>,
    /// Sorted by `(group, binding)`.
    pub resources: Vec<Resource>,
    uniforms: FxHashMap<String, UniformLocation>,
}

impl ProgramInterface {
    pub fn uniform(&self, name: &str) -> Option<UniformLocation> {
        self.uniforms.get(name).copied()
    }

    pub fn attribute(&self, name: &str) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|resource| resource.name == name)
    }

    pub fn group_count(&self) -> u32 {
        self.resources
            .iter()
            .map(|resource| resource.group + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn uniform_blocks(&self) -> impl Iterator<Item = (&Resource, u32)> {
        self.resources.iter().filter_map(|resource| match resource.kind {
            ResourceKind::UniformBuffer { size } => Some((resource, size)),
            _ => None,
        })
    }
}

pub fn link(
    vertex: &CompiledStage,
    fragment: &CompiledStage,
) -> Result<ProgramInterface, ShaderError> {
    let vertex_entry = vertex.entry()?;
    let fragment_entry = fragment.entry()?;

    let mut outputs = Vec::new();
    if let Some(result) = &vertex_entry.function.result {
        collect_io(&vertex.module, result.ty, result.binding.as_ref(), None, &mut outputs);
    }

    let mut inputs = Vec::new();
    for argument in &fragment_entry.function.arguments {
        let name = argument.name.as_deref();
        collect_io(&fragment.module, argument.ty, argument.binding.as_ref(), name, &mut inputs);
    }

    for input in &inputs {
        match outputs.iter().find(|output| output.location == input.location) {
            None => {
                return Err(ShaderError::Link(format!(
                    "fragment input `{}` at location {} is not written by the vertex stage",
                    input.name, input.location
                )));
            }
            Some(output) if output.inner != input.inner => {
                return Err(ShaderError::Link(format!(
                    "fragment input `{}` at location {} does not match the vertex output type",
                    input.name, input.location
                )));
            }
            Some(_) => {}
        }
    }

    let mut attributes = Vec::new();
    let mut attribute_io = Vec::new();
    for argument in &vertex_entry.function.arguments {
        let name = argument.name.as_deref();
        collect_io(&vertex.module, argument.ty, argument.binding.as_ref(), name, &mut attribute_io);
    }
    for io in attribute_io {
        let format = attribute_format(&io.inner).ok_or_else(|| {
            ShaderError::Link(format!("attribute `{}` has an unsupported type", io.name))
        })?;
        attributes.push(VertexAttribute {
            name: io.name,
            location: io.location,
            format,
        });
    }
    attributes.sort_by_key(|attribute| attribute.location);

    let mut interface = ProgramInterface {
        attributes,
        ..Default::default()
    };
    collect_resources(&vertex.module, &mut interface)?;
    collect_resources(&fragment.module, &mut interface)?;
    interface
        .resources
        .sort_by_key(|resource| (resource.group, resource.binding));

    Ok(interface)
}

#[derive(Debug)]
struct Io {
    name: String,
    location: u32,
    inner: naga::TypeInner,
}

fn collect_io(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
    name: Option<&str>,
    out: &mut Vec<Io>,
) {
    let inner = &module.types[ty].inner;
    match binding {
        Some(naga::Binding::Location { location, .. }) => out.push(Io {
            name: name.unwrap_or_default().to_owned(),
            location: *location,
            inner: inner.clone(),
        }),
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = inner {
                for member in members {
                    collect_io(
                        module,
                        member.ty,
                        member.binding.as_ref(),
                        member.name.as_deref(),
                        out,
                    );
                }
            }
        }
    }
}

fn attribute_format(inner: &naga::TypeInner) -> Option<AttributeFormat> {
    use naga::{ScalarKind, TypeInner, VectorSize};

    match *inner {
        TypeInner::Scalar(scalar) if scalar.width == 4 => match scalar.kind {
            ScalarKind::Float => Some(AttributeFormat::Float32),
            ScalarKind::Uint => Some(AttributeFormat::Uint32),
            _ => None,
        },
        TypeInner::Vector { size, scalar } if scalar.width == 4 => {
            match (scalar.kind, size) {
                (ScalarKind::Float, VectorSize::Bi) => Some(AttributeFormat::Float32x2),
                (ScalarKind::Float, VectorSize::Tri) => Some(AttributeFormat::Float32x3),
                (ScalarKind::Float, VectorSize::Quad) => Some(AttributeFormat::Float32x4),
                (ScalarKind::Uint, VectorSize::Bi) => Some(AttributeFormat::Uint32x2),
                (ScalarKind::Uint, VectorSize::Tri) => Some(AttributeFormat::Uint32x3),
                (ScalarKind::Uint, VectorSize::Quad) => Some(AttributeFormat::Uint32x4),
                _ => None,
            }
        }
        _ => None,
    }
}

fn collect_resources(
    module: &naga::Module,
    interface: &mut ProgramInterface,
) -> Result<(), ShaderError> {
    let ctx = module.to_ctx();

    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        let name = global.name.clone().unwrap_or_default();
        let inner = &module.types[global.ty].inner;

        let kind = match (global.space, inner) {
            (naga::AddressSpace::Uniform, _) => ResourceKind::UniformBuffer {
                size: inner.size(ctx),
            },
            (
                naga::AddressSpace::Handle,
                naga::TypeInner::Image {
                    dim: naga::ImageDimension::D2,
                    arrayed: false,
                    class:
                        naga::ImageClass::Sampled {
                            kind: naga::ScalarKind::Float,
                            multi: false,
                        },
                },
            ) => ResourceKind::Texture,
            (naga::AddressSpace::Handle, naga::TypeInner::Sampler { comparison: false }) => {
                ResourceKind::Sampler
            }
            _ => {
                return Err(ShaderError::Link(format!(
                    "`{name}` at {}:{} must be a uniform buffer, a texture_2d<f32> or a sampler",
                    binding.group, binding.binding
                )));
            }
        };

        if let Some(existing) = interface
            .resources
            .iter()
            .find(|resource| resource.group == binding.group && resource.binding == binding.binding)
        {
            if existing.kind != kind {
                return Err(ShaderError::Link(format!(
                    "binding {}:{} is declared differently by the two stages",
                    binding.group, binding.binding
                )));
            }
            continue;
        }

        if let ResourceKind::UniformBuffer { size } = kind {
            let block = |offset, size| UniformLocation {
                group: binding.group,
                binding: binding.binding,
                offset,
                size,
            };

            if let naga::TypeInner::Struct { members, .. } = inner {
                for member in members {
                    if let Some(member_name) = &member.name {
                        let member_size = module.types[member.ty].inner.size(ctx);
                        interface
                            .uniforms
                            .insert(member_name.clone(), block(member.offset, member_size));
                    }
                }
            }
            interface.uniforms.insert(name.clone(), block(0, size));
        }

        interface.resources.push(Resource {
            name,
            group: binding.group,
            binding: binding.binding,
            kind,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r#"
struct Transforms {
    u_model: mat4x4<f32>,
    u_view: mat4x4<f32>,
    u_projection: mat4x4<f32>,
    u_camera_position: vec3<f32>,
}

@group(0) @binding(0) var<uniform> transforms: Transforms;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) a_position: vec3<f32>, @location(2) a_uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    let world = transforms.u_model * vec4<f32>(a_position, 1.0);
    out.clip_position = transforms.u_projection * transforms.u_view * world;
    out.uv = a_uv;
    return out;
}
"#;

    const FRAGMENT: &str = r#"
@group(0) @binding(1) var<uniform> u_time: f32;
@group(1) @binding(0) var u_image: texture_2d<f32>;
@group(1) @binding(1) var u_image_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(u_image, u_image_sampler, uv) * (0.5 + 0.5 * sin(u_time));
}
"#;

    fn linked(vertex: &str, fragment: &str) -> Result<ProgramInterface, ShaderError> {
        let vertex = compile_stage(vertex, Stage::Vertex)?;
        let fragment = compile_stage(fragment, Stage::Fragment)?;
        link(&vertex, &fragment)
    }

    #[test]
    fn reflects_uniform_members_and_globals() {
        let interface = linked(VERTEX, FRAGMENT).unwrap();

        assert_eq!(
            interface.uniform("u_view"),
            Some(UniformLocation {
                group: 0,
                binding: 0,
                offset: 64,
                size: 64
            })
        );
        assert_eq!(
            interface.uniform("u_camera_position").map(|u| (u.offset, u.size)),
            Some((192, 12))
        );
        assert_eq!(
            interface.uniform("u_time"),
            Some(UniformLocation {
                group: 0,
                binding: 1,
                offset: 0,
                size: 4
            })
        );
        assert_eq!(interface.uniform("u_missing"), None);
    }

    #[test]
    fn reflects_attributes_and_resources() {
        let interface = linked(VERTEX, FRAGMENT).unwrap();

        let attributes: Vec<_> = interface
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), a.location, a.format))
            .collect();
        assert_eq!(
            attributes,
            vec![
                ("a_position", 0, AttributeFormat::Float32x3),
                ("a_uv", 2, AttributeFormat::Float32x2),
            ]
        );

        let bindings: Vec<_> = interface
            .resources
            .iter()
            .map(|r| (r.name.as_str(), r.group, r.binding))
            .collect();
        assert_eq!(
            bindings,
            vec![
                ("transforms", 0, 0),
                ("u_time", 0, 1),
                ("u_image", 1, 0),
                ("u_image_sampler", 1, 1),
            ]
        );
        assert_eq!(interface.group_count(), 2);
        assert_eq!(interface.uniform_blocks().count(), 2);
    }

    #[test]
    fn syntax_errors_fail_compilation() {
        let err = compile_stage("fn broken(", Stage::Vertex).unwrap_err();
        assert!(matches!(err, ShaderError::Compile { stage: "vertex", .. }));
    }

    #[test]
    fn invalid_modules_fail_compilation() {
        let source = "@fragment fn fs_main() -> @location(0) vec4<f32> { return 1.0; }";
        let err = compile_stage(source, Stage::Fragment).unwrap_err();
        assert!(matches!(err, ShaderError::Compile { stage: "fragment", .. }));
    }

    #[test]
    fn stage_without_entry_point_is_rejected() {
        let err = compile_stage(FRAGMENT, Stage::Vertex).unwrap_err();
        assert_eq!(
            err,
            ShaderError::MissingEntryPoint {
                stage: "vertex",
                entry: "vs_main"
            }
        );
    }

    #[test]
    fn unmatched_fragment_input_fails_link() {
        let fragment = r#"
@fragment
fn fs_main(@location(3) tint: vec4<f32>) -> @location(0) vec4<f32> {
    return tint;
}
"#;
        let err = linked(VERTEX, fragment).unwrap_err();
        assert!(matches!(err, ShaderError::Link(message) if message.contains("location 3")));
    }

    #[test]
    fn mismatched_interface_type_fails_link() {
        let fragment = r#"
@fragment
fn fs_main(@location(0) uv: vec4<f32>) -> @location(0) vec4<f32> {
    return uv;
}
"#;
        assert!(matches!(linked(VERTEX, fragment), Err(ShaderError::Link(_))));
    }

    #[test]
    fn unsupported_resource_types_fail_link() {
        let fragment = r#"
@group(1) @binding(0) var u_depth: texture_depth_2d;
@group(1) @binding(1) var u_shadow: sampler_comparison;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let d = textureSampleCompare(u_depth, u_shadow, uv, 0.5);
    return vec4<f32>(d);
}
"#;
        let err = linked(VERTEX, fragment).unwrap_err();
        assert!(matches!(err, ShaderError::Link(message) if message.contains("u_depth")));
    }

    #[test]
    fn conflicting_bindings_fail_link() {
        let fragment = r#"
@group(0) @binding(0) var<uniform> tint: vec4<f32>;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return tint * uv.x;
}
"#;
        let err = linked(VERTEX, fragment).unwrap_err();
        assert!(matches!(err, ShaderError::Link(message) if message.contains("0:0")));
    }
}
