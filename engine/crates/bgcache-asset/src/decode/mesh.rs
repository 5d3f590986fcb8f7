use anyhow::Context;
use bytemuck::{Pod, Zeroable};
use std::io::{BufReader, Cursor};

/// 交错的顶点格式
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// 解析后的模型，所有子 mesh 合并为一份顶点和索引
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// 解析 OBJ；材质文件不会被读取
pub fn decode_obj(data: &[u8]) -> anyhow::Result<MeshData> {
    let _span = bgcache_queue::profile_span!("decode_obj");

    let mut reader = BufReader::new(Cursor::new(data));
    let (models, _materials) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ignore_lines: true,
            ignore_points: true,
            ..Default::default()
        },
        |_| Err(tobj::LoadError::OpenFileFailed),
    )
    .context("failed to parse OBJ")?;

    let mut mesh = MeshData::default();
    for model in models {
        let m = model.mesh;
        let base = mesh.vertices.len() as u32;
        let vertex_count = m.positions.len() / 3;
        for i in 0..vertex_count {
            let position = [m.positions[i * 3], m.positions[i * 3 + 1], m.positions[i * 3 + 2]];
            let normal = if m.normals.len() >= (i + 1) * 3 {
                [m.normals[i * 3], m.normals[i * 3 + 1], m.normals[i * 3 + 2]]
            } else {
                [0.0, 0.0, 1.0]
            };
            let uv = if m.texcoords.len() >= (i + 1) * 2 {
                [m.texcoords[i * 2], m.texcoords[i * 2 + 1]]
            } else {
                [0.0, 0.0]
            };
            mesh.vertices.push(MeshVertex { position, normal, uv });
        }
        mesh.indices.extend(m.indices.iter().map(|idx| base + idx));
    }

    if mesh.indices.is_empty() {
        anyhow::bail!("OBJ contains no faces");
    }
    Ok(mesh)
}
