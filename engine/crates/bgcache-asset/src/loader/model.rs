use crate::decode::mesh::{MeshData, decode_obj};
use crate::handle::AssetModelHandle;
use crate::loader::guarded;
use crate::lump::LumpReader;
use ash::vk;
use bgcache_gfx::uploader::{GfxUploader, UploadedBuffer};
use bgcache_queue::ResourceDecoder;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct ModelLoadRequest {
    pub handle: AssetModelHandle,
    pub lump: String,
}

/// GPU 上的模型数据
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelBuffers {
    pub vertices: UploadedBuffer,
    pub indices: UploadedBuffer,
    pub index_count: u32,
}

pub enum ModelLoadResult {
    Uploaded { handle: AssetModelHandle, buffers: ModelBuffers },
    /// 主线程上传
    Mesh { handle: AssetModelHandle, mesh: MeshData },
    Failed { handle: AssetModelHandle, reason: String },
}

impl ModelLoadResult {
    pub fn handle(&self) -> AssetModelHandle {
        match self {
            Self::Uploaded { handle, .. } | Self::Mesh { handle, .. } | Self::Failed { handle, .. } => *handle,
        }
    }
}

/// 上传一个 mesh 的顶点和索引
pub fn upload_mesh(uploader: &mut GfxUploader, mesh: &MeshData, name: &str) -> anyhow::Result<ModelBuffers> {
    let vertices = uploader.upload_buffer(mesh.vertex_bytes(), vk::BufferUsageFlags::VERTEX_BUFFER, name)?;
    let indices = uploader.upload_buffer(mesh.index_bytes(), vk::BufferUsageFlags::INDEX_BUFFER, name)?;
    Ok(ModelBuffers {
        vertices,
        indices,
        index_count: mesh.indices.len() as u32,
    })
}

/// 模型线程的解码策略
pub struct ModelLoadDecoder {
    lumps: Arc<dyn LumpReader>,
    uploader: Option<GfxUploader>,
}

impl ModelLoadDecoder {
    pub fn new(lumps: Arc<dyn LumpReader>, uploader: Option<GfxUploader>) -> Self {
        Self { lumps, uploader }
    }

    fn load(&mut self, request: &ModelLoadRequest) -> anyhow::Result<ModelLoadResult> {
        let data = self.lumps.read_all(&request.lump)?;
        let mesh = decode_obj(&data)?;

        match self.uploader.as_mut() {
            Some(uploader) => Ok(ModelLoadResult::Uploaded {
                handle: request.handle,
                buffers: upload_mesh(uploader, &mesh, &request.lump)?,
            }),
            None => Ok(ModelLoadResult::Mesh {
                handle: request.handle,
                mesh,
            }),
        }
    }
}

impl ResourceDecoder<ModelLoadRequest, ModelLoadResult> for ModelLoadDecoder {
    fn prepare(&mut self) {
        if let Some(uploader) = self.uploader.as_mut() {
            uploader.release_staging();
        }
    }

    fn load_resource(&mut self, request: ModelLoadRequest) -> anyhow::Result<ModelLoadResult> {
        let _span = bgcache_queue::profile_span!("ModelLoadDecoder::load_resource");
        Ok(guarded(|| self.load(&request)).unwrap_or_else(|err| {
            log::warn!("failed to load model {}: {:#}", request.lump, err);
            ModelLoadResult::Failed {
                handle: request.handle,
                reason: format!("{:#}", err),
            }
        }))
    }
}
