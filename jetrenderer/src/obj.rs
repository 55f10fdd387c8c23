//! Wavefront-style model text parser.
//!
//! Only the subset used by the bundled assets is understood: `v`, `vn`, `vt`
//! lookup tables and `f` records with `pos/tex/norm` composite indices.
//! Face vertices are emitted as-is (no re-indexing), so every face-vertex gets
//! its own entry in the flat output arrays.

/// Uniform scale applied to parsed positions to bring the bundled models into
/// world units.
pub const MODEL_SCALE: f32 = 0.04;

/// Flat per-attribute vertex data, one entry per face-vertex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryData {
    /// 3 floats per vertex.
    pub vertices: Vec<f32>,
    /// 3 floats per vertex, may be empty.
    pub normals: Vec<f32>,
    /// 2 floats per vertex, may be empty.
    pub texcoords: Vec<f32>,
}

impl GeometryData {
    pub fn vertex_count(&self) -> u32 {
        (self.vertices.len() / 3) as u32
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn has_texcoords(&self) -> bool {
        !self.texcoords.is_empty()
    }

    /// Two clip-space triangles covering the whole viewport, with texture
    /// coordinates flipped so `v = 0` is the top row of a render target.
    pub fn fullscreen_quad() -> Self {
        let corners = [
            ([-1.0, -1.0], [0.0, 1.0]),
            ([1.0, -1.0], [1.0, 1.0]),
            ([1.0, 1.0], [1.0, 0.0]),
            ([-1.0, -1.0], [0.0, 1.0]),
            ([1.0, 1.0], [1.0, 0.0]),
            ([-1.0, 1.0], [0.0, 0.0]),
        ];

        let mut quad = Self::default();
        for ([x, y], [u, v]) in corners {
            quad.vertices.extend_from_slice(&[x, y, 0.0]);
            quad.normals.extend_from_slice(&[0.0, 0.0, 1.0]);
            quad.texcoords.extend_from_slice(&[u, v]);
        }
        quad
    }
}

/// Parses model text into flat arrays.
///
/// Malformed numbers become `NaN` and indices that do not resolve against
/// their lookup table emit `NaN` components; the input is trusted, so there is
/// no diagnostic. A face-vertex that omits a component (`1//3`, or `1`) emits
/// nothing for that attribute.
pub fn parse_obj(text: &str) -> GeometryData {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut texcoords: Vec<[f32; 2]> = Vec::new();

    let mut out = GeometryData::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            continue;
        };

        match keyword {
            "v" => positions.push(read_floats(&mut parts)),
            "vn" => normals.push(read_floats(&mut parts)),
            "vt" => texcoords.push(read_floats(&mut parts)),
            "f" => {
                for corner in parts {
                    let mut indices = corner.split('/');

                    if let Some(index) = indices.next().filter(|s| !s.is_empty()) {
                        let position = lookup(&positions, index);
                        out.vertices
                            .extend(position.iter().map(|component| component * MODEL_SCALE));
                    }
                    if let Some(index) = indices.next().filter(|s| !s.is_empty()) {
                        out.texcoords.extend_from_slice(&lookup(&texcoords, index));
                    }
                    if let Some(index) = indices.next().filter(|s| !s.is_empty()) {
                        out.normals.extend_from_slice(&lookup(&normals, index));
                    }
                }
            }
            _ => {}
        }
    }

    out
}

fn read_floats<'a, const N: usize>(parts: &mut impl Iterator<Item = &'a str>) -> [f32; N] {
    std::array::from_fn(|_| {
        parts
            .next()
            .and_then(|token| token.parse::<f32>().ok())
            .unwrap_or(f32::NAN)
    })
}

/// Resolves a 1-based index, yielding `NaN`s when it is out of range.
fn lookup<const N: usize>(table: &[[f32; N]], index: &str) -> [f32; N] {
    index
        .parse::<usize>()
        .ok()
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| table.get(i))
        .copied()
        .unwrap_or([f32::NAN; N])
}
