use crate::{
    camera::Camera,
    error::{Error, Result},
    frame::DrawMode,
    obj::GeometryData,
    shader::{ShaderProgram, TargetFormats, VertexAttribute},
    textures::TextureCache,
    transform::Transform,
    utils::align_to,
};
use std::borrow::Cow;

/// One attribute stream, bound to vertex buffer slot `slot`.
#[derive(Debug)]
pub struct VertexBuffer {
    buffer: wgpu::Buffer,
    slot: u32,
    attribute: VertexAttribute,
}

impl VertexBuffer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        slot: u32,
        data: &[u8],
        attribute: VertexAttribute,
    ) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("Vertex Buffer {}", attribute.name)),
            size: align_to(data.len().max(1) as u64, 16),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if !data.is_empty() {
            queue.write_buffer(&buffer, 0, data);
        }

        Self {
            buffer,
            slot,
            attribute,
        }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn attribute(&self) -> &VertexAttribute {
        &self.attribute
    }

    fn release(&self) {
        self.buffer.destroy();
    }
}

/// Geometry uploaded for one program, plus the transform it is drawn with.
#[derive(Debug)]
pub struct Mesh {
    pub transform: Transform,
    vertex_buffers: Vec<VertexBuffer>,
    vertex_count: u32,
    destroyed: bool,
}

impl Mesh {
    /// Uploads one buffer per attribute the program reads. Attributes the
    /// geometry lacks are fed zeros.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        id: &str,
        geometry: Option<&GeometryData>,
        program: &ShaderProgram,
    ) -> Result<Self> {
        let geometry = geometry.ok_or_else(|| Error::MissingGeometry(id.to_owned()))?;
        let vertex_count = geometry.vertex_count();

        let vertex_buffers = program
            .attributes()
            .iter()
            .enumerate()
            .map(|(slot, attribute)| {
                let data = attribute_bytes(attribute, geometry);
                VertexBuffer::new(device, queue, slot as u32, &data, attribute.clone())
            })
            .collect();

        log::debug!("created mesh `{id}` with {vertex_count} vertices");

        Ok(Self {
            transform: Transform::default(),
            vertex_buffers,
            vertex_count,
            destroyed: false,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn vertex_buffers(&self) -> &[VertexBuffer] {
        &self.vertex_buffers
    }

    /// Uploads the transform and camera matrices, binds the program and
    /// draws every vertex.
    pub fn render(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        program: &mut ShaderProgram,
        textures: &TextureCache,
        camera: &Camera,
        mode: DrawMode,
        formats: TargetFormats,
    ) {
        if self.destroyed {
            return;
        }

        program.set_uniform("u_model", self.transform.model());
        program.set_uniform("u_view", camera.view());
        program.set_uniform("u_projection", camera.clip_projection());
        program.set_uniform("u_camera_position", camera.eye());
        if !program.bind(pass, textures, mode, formats) {
            return;
        }

        for vertex_buffer in &self.vertex_buffers {
            pass.set_vertex_buffer(vertex_buffer.slot, vertex_buffer.buffer.slice(..));
        }
        pass.draw(0..self.vertex_count, 0..1);
    }

    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        for vertex_buffer in self.vertex_buffers.drain(..) {
            vertex_buffer.release();
        }
    }
}

/// Geometry stream read by a vertex attribute, matched by name.
pub fn attribute_source<'a>(name: &str, geometry: &'a GeometryData) -> Option<&'a [f32]> {
    match name {
        "a_position" => Some(geometry.vertices.as_slice()),
        "a_normal" => Some(geometry.normals.as_slice()),
        "a_uv" | "a_texcoord" => Some(geometry.texcoords.as_slice()),
        _ => None,
    }
}

/// Bytes for one attribute buffer. A stream that is missing or does not hold
/// exactly one element per vertex is replaced by zeros.
pub fn attribute_bytes<'a>(
    attribute: &VertexAttribute,
    geometry: &'a GeometryData,
) -> Cow<'a, [u8]> {
    let count = geometry.vertex_count() as usize;
    let expected = count * attribute.format.components();

    match attribute_source(&attribute.name, geometry) {
        Some(data) if data.len() == expected => Cow::Borrowed(bytemuck::cast_slice(data)),
        source => {
            if source.is_some_and(|data| !data.is_empty()) {
                log::warn!(
                    "attribute `{}` has {} components for {count} vertices, using zeros",
                    attribute.name,
                    source.map_or(0, <[f32]>::len)
                );
            }
            Cow::Owned(vec![0; count * attribute.format.size() as usize])
        }
    }
}
