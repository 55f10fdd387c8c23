use super::reflect::{ProgramInterface, UniformLocation};
use crate::utils::align_to;
use glam::{Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

type StagingBuffer = Vec<u8>;

/// Value of a single uniform. Matrices are column-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// Picks the uniform shape from the number of components.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match *values {
            [x] => Some(Self::Float(x)),
            [x, y] => Some(Self::Vec2(Vec2::new(x, y))),
            [x, y, z] => Some(Self::Vec3(Vec3::new(x, y, z))),
            [x, y, z, w] => Some(Self::Vec4(Vec4::new(x, y, z, w))),
            _ if values.len() == 16 => Some(Self::Mat4(Mat4::from_cols_slice(values))),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Float(v) => bytemuck::bytes_of(v),
            Self::Vec2(v) => bytemuck::bytes_of(v),
            Self::Vec3(v) => bytemuck::bytes_of(v),
            Self::Vec4(v) => bytemuck::bytes_of(v),
            Self::Mat4(v) => bytemuck::bytes_of(v),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<Vec2> for UniformValue {
    fn from(value: Vec2) -> Self {
        Self::Vec2(value)
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        Self::Vec3(value)
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        Self::Vec4(value)
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        Self::Mat4(value)
    }
}

/// Declarative `name -> value` table applied every time the program is used.
#[derive(Debug, Clone, Default)]
pub struct UniformTable {
    values: FxHashMap<String, UniformValue>,
}

impl UniformTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// CPU copy of one uniform buffer binding.
#[derive(Debug)]
pub struct UniformBlock {
    pub group: u32,
    pub binding: u32,
    staging_buffer: StagingBuffer,
    dirty: bool,
}

impl UniformBlock {
    pub fn new(group: u32, binding: u32, size: u32) -> Self {
        Self {
            group,
            binding,
            staging_buffer: vec![0; align_to(size.max(1) as u64, 16) as usize],
            dirty: true,
        }
    }

    pub fn size(&self) -> u64 {
        self.staging_buffer.len() as u64
    }

    pub fn bytes(&self) -> &[u8] {
        &self.staging_buffer
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> bool {
        let Some(slice) = self.staging_buffer.get_mut(offset..offset + bytes.len()) else {
            return false;
        };
        if slice != bytes {
            slice.copy_from_slice(bytes);
            self.dirty = true;
        }
        true
    }
}

/// Staging storage for every uniform buffer a program declares.
#[derive(Debug, Default)]
pub struct UniformStaging {
    blocks: Vec<UniformBlock>,
}

impl UniformStaging {
    pub fn new(interface: &ProgramInterface) -> Self {
        let blocks = interface
            .uniform_blocks()
            .map(|(resource, size)| UniformBlock::new(resource.group, resource.binding, size))
            .collect();

        Self { blocks }
    }

    /// Copies `value` into the range described by `location`. A value wider
    /// than the uniform is truncated with a warning.
    pub fn write(&mut self, name: &str, location: UniformLocation, value: &UniformValue) -> bool {
        let Some(block) = self.block_mut(location.group, location.binding) else {
            return false;
        };

        let mut bytes = value.as_bytes();
        if bytes.len() > location.size as usize {
            log::warn!(
                "uniform `{name}` holds {} bytes, got a {}-byte value",
                location.size,
                bytes.len()
            );
            bytes = &bytes[..location.size as usize];
        }

        block.write(location.offset as usize, bytes)
    }

    pub fn block(&self, group: u32, binding: u32) -> Option<&UniformBlock> {
        self.blocks
            .iter()
            .find(|block| block.group == group && block.binding == binding)
    }

    fn block_mut(&mut self, group: u32, binding: u32) -> Option<&mut UniformBlock> {
        self.blocks
            .iter_mut()
            .find(|block| block.group == group && block.binding == binding)
    }

    pub fn blocks(&self) -> &[UniformBlock] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [UniformBlock] {
        &mut self.blocks
    }
}
