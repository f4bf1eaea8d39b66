//! Mesh file loading and procedural mesh generation.
//!
//! OBJ and STL are implemented; the other format extensions are recognized
//! but rejected. Faces with more than three vertices are fan-triangulated
//! and every face corner gets its own vertex (no deduplication).

use crate::error::{AssetError, Result};
use crate::types::{MeshData, Vertex};
use glam::{Vec2, Vec3, Vec4};
use std::fs;
use std::path::Path;

/// Recognized model file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Obj,
    Stl,
    Ply,
    Fbx,
    Gltf,
    Unknown,
}

/// Detect the model format from the file extension.
pub fn detect_model_format(path: &Path) -> ModelFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "obj" => ModelFormat::Obj,
        "stl" => ModelFormat::Stl,
        "ply" => ModelFormat::Ply,
        "fbx" => ModelFormat::Fbx,
        "gltf" | "glb" => ModelFormat::Gltf,
        _ => ModelFormat::Unknown,
    }
}

/// Load a model file into one or more meshes.
pub fn load_model(path: &Path, flip_uvs: bool) -> Result<Vec<MeshData>> {
    match detect_model_format(path) {
        ModelFormat::Obj => {
            let source = fs::read_to_string(path)?;
            parse_obj(&source, flip_uvs)
        }
        ModelFormat::Stl => {
            let bytes = fs::read(path)?;
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("stl")
                .to_string();
            Ok(vec![parse_stl(&bytes, name)?])
        }
        other => Err(AssetError::UnsupportedFormat(format!(
            "model format {other:?}: {}",
            path.display()
        ))),
    }
}

/// One `v[/vt][/vn]` face corner. OBJ indices are 1-based; 0 means absent.
fn parse_face_corner(token: &str) -> (i64, i64, i64) {
    let mut parts = token.split('/');
    let pos = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let uv = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let normal = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (pos, uv, normal)
}

fn obj_index(index: i64, len: usize) -> Option<usize> {
    if index > 0 && (index as usize) <= len {
        Some(index as usize - 1)
    } else {
        None
    }
}

/// Parse OBJ source. `g`/`o` statements start a new mesh.
pub fn parse_obj(source: &str, flip_uvs: bool) -> Result<Vec<MeshData>> {
    let mut meshes = Vec::new();
    let mut vertices: Vec<Vertex> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();

    let mut positions: Vec<Vec3> = Vec::new();
    let mut normals: Vec<Vec3> = Vec::new();
    let mut tex_coords: Vec<Vec2> = Vec::new();

    let mut current_name = String::from("default");

    let mut flush = |name: &str, vertices: &mut Vec<Vertex>, indices: &mut Vec<u32>| {
        if !vertices.is_empty() {
            meshes.push(MeshData {
                debug_name: name.to_string(),
                vertices: std::mem::take(vertices),
                indices: std::mem::take(indices),
            });
        }
    };

    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let prefix = tokens.next().unwrap_or("");

        match prefix {
            "v" => {
                let coords: Vec<f32> = tokens.filter_map(|t| t.parse().ok()).collect();
                if coords.len() < 3 {
                    return Err(AssetError::InvalidData(format!("malformed vertex line: {line}")));
                }
                positions.push(Vec3::new(coords[0], coords[1], coords[2]));
            }
            "vn" => {
                let coords: Vec<f32> = tokens.filter_map(|t| t.parse().ok()).collect();
                if coords.len() < 3 {
                    return Err(AssetError::InvalidData(format!("malformed normal line: {line}")));
                }
                normals.push(Vec3::new(coords[0], coords[1], coords[2]));
            }
            "vt" => {
                let coords: Vec<f32> = tokens.filter_map(|t| t.parse().ok()).collect();
                if coords.len() < 2 {
                    return Err(AssetError::InvalidData(format!("malformed texcoord line: {line}")));
                }
                let v = if flip_uvs { 1.0 - coords[1] } else { coords[1] };
                tex_coords.push(Vec2::new(coords[0], v));
            }
            "g" | "o" => {
                flush(&current_name, &mut vertices, &mut indices);
                current_name = tokens.next().unwrap_or("default").to_string();
            }
            "f" => {
                let mut face_indices = Vec::new();
                for token in tokens {
                    let (pos_idx, uv_idx, normal_idx) = parse_face_corner(token);
                    let position = obj_index(pos_idx, positions.len())
                        .map(|i| positions[i])
                        .ok_or_else(|| {
                            AssetError::InvalidData(format!("face references missing vertex: {line}"))
                        })?;
                    let normal = obj_index(normal_idx, normals.len())
                        .map(|i| normals[i])
                        .unwrap_or(Vec3::Y);
                    let tex_coord = obj_index(uv_idx, tex_coords.len())
                        .map(|i| tex_coords[i])
                        .unwrap_or(Vec2::ZERO);

                    let index = vertices.len() as u32;
                    vertices.push(Vertex::new(position, normal, tex_coord, Vec4::ONE));
                    face_indices.push(index);
                }

                // Fan triangulation for quads and larger polygons.
                for i in 2..face_indices.len() {
                    indices.push(face_indices[0]);
                    indices.push(face_indices[i - 1]);
                    indices.push(face_indices[i]);
                }
            }
            _ => {}
        }
    }

    flush(&current_name, &mut vertices, &mut indices);

    if meshes.is_empty() {
        return Err(AssetError::InvalidData("no geometry found in OBJ source".to_string()));
    }
    Ok(meshes)
}

/// Parse STL bytes. Binary STL is detected by a header that does not start
/// with "solid".
pub fn parse_stl(bytes: &[u8], name: String) -> Result<MeshData> {
    let is_binary = bytes.len() >= 5 && &bytes[0..5] != b"solid";
    let mut mesh = if is_binary {
        parse_stl_binary(bytes)?
    } else {
        parse_stl_ascii(std::str::from_utf8(bytes).map_err(|_| {
            AssetError::InvalidData("ASCII STL contains invalid UTF-8".to_string())
        })?)?
    };
    mesh.debug_name = name;
    Ok(mesh)
}

fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn parse_stl_binary(bytes: &[u8]) -> Result<MeshData> {
    const HEADER: usize = 80;
    const TRIANGLE: usize = 50;

    if bytes.len() < HEADER + 4 {
        return Err(AssetError::InvalidData("binary STL truncated header".to_string()));
    }
    let triangle_count =
        u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    if bytes.len() < HEADER + 4 + triangle_count * TRIANGLE {
        return Err(AssetError::InvalidData(format!(
            "binary STL truncated: {} triangles declared",
            triangle_count
        )));
    }

    let mut vertices = Vec::with_capacity(triangle_count * 3);
    let mut indices = Vec::with_capacity(triangle_count * 3);

    for t in 0..triangle_count {
        let base = HEADER + 4 + t * TRIANGLE;
        let normal = Vec3::new(
            read_f32(bytes, base),
            read_f32(bytes, base + 4),
            read_f32(bytes, base + 8),
        );
        for v in 0..3 {
            let offset = base + 12 + v * 12;
            let position = Vec3::new(
                read_f32(bytes, offset),
                read_f32(bytes, offset + 4),
                read_f32(bytes, offset + 8),
            );
            indices.push(vertices.len() as u32);
            vertices.push(Vertex::new(position, normal, Vec2::ZERO, Vec4::ONE));
        }
        // 2 attribute bytes per triangle are skipped.
    }

    Ok(MeshData {
        debug_name: String::new(),
        vertices,
        indices,
    })
}

fn parse_stl_ascii(source: &str) -> Result<MeshData> {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    let mut normal = Vec3::Z;

    for line in source.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("facet") => {
                // facet normal nx ny nz
                let coords: Vec<f32> = tokens.skip(1).filter_map(|t| t.parse().ok()).collect();
                if coords.len() >= 3 {
                    normal = Vec3::new(coords[0], coords[1], coords[2]);
                }
            }
            Some("vertex") => {
                let coords: Vec<f32> = tokens.filter_map(|t| t.parse().ok()).collect();
                if coords.len() < 3 {
                    return Err(AssetError::InvalidData(format!("malformed STL vertex: {line}")));
                }
                let position = Vec3::new(coords[0], coords[1], coords[2]);
                indices.push(vertices.len() as u32);
                vertices.push(Vertex::new(position, normal, Vec2::ZERO, Vec4::ONE));
            }
            _ => {}
        }
    }

    Ok(MeshData {
        debug_name: String::new(),
        vertices,
        indices,
    })
}

/// Axis-aligned cube with per-face normals and UVs: 24 vertices, 36 indices.
pub fn create_cube(size: f32, color: Vec4) -> MeshData {
    let h = size * 0.5;

    // Four corners per face so each face keeps its own normal.
    let faces: [(Vec3, [Vec3; 4]); 6] = [
        (
            Vec3::Z,
            [
                Vec3::new(-h, -h, h),
                Vec3::new(h, -h, h),
                Vec3::new(h, h, h),
                Vec3::new(-h, h, h),
            ],
        ),
        (
            Vec3::NEG_Z,
            [
                Vec3::new(h, -h, -h),
                Vec3::new(-h, -h, -h),
                Vec3::new(-h, h, -h),
                Vec3::new(h, h, -h),
            ],
        ),
        (
            Vec3::X,
            [
                Vec3::new(h, -h, h),
                Vec3::new(h, -h, -h),
                Vec3::new(h, h, -h),
                Vec3::new(h, h, h),
            ],
        ),
        (
            Vec3::NEG_X,
            [
                Vec3::new(-h, -h, -h),
                Vec3::new(-h, -h, h),
                Vec3::new(-h, h, h),
                Vec3::new(-h, h, -h),
            ],
        ),
        (
            Vec3::Y,
            [
                Vec3::new(-h, h, h),
                Vec3::new(h, h, h),
                Vec3::new(h, h, -h),
                Vec3::new(-h, h, -h),
            ],
        ),
        (
            Vec3::NEG_Y,
            [
                Vec3::new(-h, -h, -h),
                Vec3::new(h, -h, -h),
                Vec3::new(h, -h, h),
                Vec3::new(-h, -h, h),
            ],
        ),
    ];

    let uvs = [
        Vec2::new(0.0, 0.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(0.0, 1.0),
    ];

    let mut mesh = MeshData {
        debug_name: "Cube".to_string(),
        vertices: Vec::with_capacity(24),
        indices: Vec::with_capacity(36),
    };

    for (face, (normal, corners)) in faces.iter().enumerate() {
        let base = (face * 4) as u32;
        for (corner, &position) in corners.iter().enumerate() {
            mesh.vertices.push(Vertex::new(position, *normal, uvs[corner], color));
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    mesh
}

/// UV sphere with `(rings + 1) * (segments + 1)` vertices. Normals point
/// radially outward.
pub fn create_sphere(radius: f32, segments: u32, rings: u32, color: Vec4) -> MeshData {
    let segments = segments.max(3);
    let rings = rings.max(2);

    let mut mesh = MeshData {
        debug_name: "Sphere".to_string(),
        vertices: Vec::with_capacity(((rings + 1) * (segments + 1)) as usize),
        indices: Vec::with_capacity((rings * segments * 6) as usize),
    };

    for ring in 0..=rings {
        let theta = ring as f32 * std::f32::consts::PI / rings as f32;
        let (sin_theta, cos_theta) = theta.sin_cos();

        for seg in 0..=segments {
            let phi = seg as f32 * 2.0 * std::f32::consts::PI / segments as f32;
            let (sin_phi, cos_phi) = phi.sin_cos();

            let position = Vec3::new(
                radius * sin_theta * cos_phi,
                radius * cos_theta,
                radius * sin_theta * sin_phi,
            );
            let tex_coord = Vec2::new(seg as f32 / segments as f32, ring as f32 / rings as f32);

            mesh.vertices
                .push(Vertex::new(position, position.normalize_or_zero(), tex_coord, color));
        }
    }

    for ring in 0..rings {
        for seg in 0..segments {
            let current = ring * (segments + 1) + seg;
            let next = current + segments + 1;

            mesh.indices.extend_from_slice(&[
                current,
                next,
                current + 1,
                current + 1,
                next,
                next + 1,
            ]);
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats_case_insensitively() {
        assert_eq!(detect_model_format(Path::new("a.OBJ")), ModelFormat::Obj);
        assert_eq!(detect_model_format(Path::new("a.stl")), ModelFormat::Stl);
        assert_eq!(detect_model_format(Path::new("a.glb")), ModelFormat::Gltf);
        assert_eq!(detect_model_format(Path::new("a.bin")), ModelFormat::Unknown);
    }

    #[test]
    fn obj_quad_is_fan_triangulated() {
        let source = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4
";
        let meshes = parse_obj(source, false).unwrap();
        assert_eq!(meshes.len(), 1);
        let mesh = &meshes[0];
        // Four face corners become four fresh vertices a,b,c,d; the quad
        // triangulates as (a,b,c)(a,c,d).
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn obj_face_corners_are_not_deduplicated() {
        let source = "\
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
f 1 2 3
";
        let meshes = parse_obj(source, false).unwrap();
        assert_eq!(meshes[0].vertices.len(), 6);
        assert_eq!(meshes[0].indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn obj_corner_syntax_variants() {
        let source = "\
v 0 0 0
v 1 0 0
v 0 1 0
vt 0.5 0.5
vn 0 0 1
f 1/1/1 2//1 3
";
        let meshes = parse_obj(source, false).unwrap();
        let mesh = &meshes[0];
        assert_eq!(mesh.vertices[0].tex_coord, [0.5, 0.5]);
        assert_eq!(mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
        // Missing texcoord falls back to zero, missing normal to +Y.
        assert_eq!(mesh.vertices[1].tex_coord, [0.0, 0.0]);
        assert_eq!(mesh.vertices[2].normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn obj_groups_split_meshes() {
        let source = "\
o first
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
o second
v 0 0 1
v 1 0 1
v 0 1 1
f 4 5 6
";
        let meshes = parse_obj(source, false).unwrap();
        assert_eq!(meshes.len(), 2);
        assert_eq!(meshes[0].debug_name, "first");
        assert_eq!(meshes[1].debug_name, "second");
    }

    #[test]
    fn obj_without_geometry_fails() {
        assert!(parse_obj("# empty\n", false).is_err());
    }

    #[test]
    fn stl_binary_roundtrip() {
        // One triangle: header(80) + count(4) + 50 bytes.
        let mut bytes = vec![0u8; 80];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        let normal = [0.0f32, 0.0, 1.0];
        let verts = [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        for f in normal {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        for v in verts {
            for f in v {
                bytes.extend_from_slice(&f.to_le_bytes());
            }
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let mesh = parse_stl(&bytes, "tri".to_string()).unwrap();
        assert_eq!(mesh.debug_name, "tri");
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(mesh.vertices[1].position, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn stl_ascii_parse() {
        let source = "\
solid tri
facet normal 0 0 1
outer loop
vertex 0 0 0
vertex 1 0 0
vertex 0 1 0
endloop
endfacet
endsolid tri
";
        let mesh = parse_stl(source.as_bytes(), "tri".to_string()).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.vertices[2].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn cube_has_expected_shape() {
        let mesh = create_cube(2.0, Vec4::ONE);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);

        for axis in 0..3 {
            let min = mesh
                .vertices
                .iter()
                .map(|v| v.position[axis])
                .fold(f32::INFINITY, f32::min);
            let max = mesh
                .vertices
                .iter()
                .map(|v| v.position[axis])
                .fold(f32::NEG_INFINITY, f32::max);
            assert_eq!(min, -1.0);
            assert_eq!(max, 1.0);
        }
    }

    #[test]
    fn sphere_vertices_lie_on_the_sphere() {
        let radius = 2.5;
        let segments = 12;
        let rings = 8;
        let mesh = create_sphere(radius, segments, rings, Vec4::ONE);

        assert_eq!(mesh.vertices.len(), ((rings + 1) * (segments + 1)) as usize);

        for vertex in &mesh.vertices {
            let position = Vec3::from_array(vertex.position);
            assert!((position.length() - radius).abs() < 1e-4);

            let normal = Vec3::from_array(vertex.normal);
            assert!((normal - position / radius).length() < 1e-4);
        }
    }

    #[test]
    fn sphere_clamps_tessellation_minimums() {
        let mesh = create_sphere(1.0, 1, 1, Vec4::ONE);
        // segments clamps to 3, rings to 2.
        assert_eq!(mesh.vertices.len(), (3 * 4) as usize);
    }
}
