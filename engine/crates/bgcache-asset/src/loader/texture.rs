use crate::decode::{TexLoadOptions, TextureData, decode_texture};
use crate::handle::TextureKey;
use crate::loader::guarded;
use crate::lump::LumpReader;
use bgcache_gfx::uploader::{GfxUploader, UploadedImage};
use bgcache_queue::ResourceDecoder;
use std::sync::Arc;

/// 纹理加载请求
///
/// 目标资源在主线程上已经登记（[`TextureKey`]），worker 只负责产生数据。
#[derive(Clone, Debug)]
pub struct TexLoadRequest {
    pub key: TextureKey,
    pub lump: String,
    pub options: TexLoadOptions,
}

/// 纹理加载结果
pub enum TexLoadResult {
    /// worker 已经完成 GPU 上传
    Uploaded { key: TextureKey, image: UploadedImage },
    /// 只有 CPU 数据：设备不支持后台上传，或配置关闭了后台上传，由主线程上传
    Pixels { key: TextureKey, texture: TextureData },
    Failed { key: TextureKey, reason: String },
}

impl TexLoadResult {
    pub fn key(&self) -> TextureKey {
        match self {
            Self::Uploaded { key, .. } | Self::Pixels { key, .. } | Self::Failed { key, .. } => *key,
        }
    }
}

/// 纹理线程的解码策略：读取 lump -> 解码 -> （可选）上传
pub struct TexLoadDecoder {
    lumps: Arc<dyn LumpReader>,
    /// None 表示该线程不做 GPU 上传
    uploader: Option<GfxUploader>,
}

impl TexLoadDecoder {
    pub fn new(lumps: Arc<dyn LumpReader>, uploader: Option<GfxUploader>) -> Self {
        Self { lumps, uploader }
    }

    fn load(&mut self, request: &TexLoadRequest) -> anyhow::Result<TexLoadResult> {
        let data = self.lumps.read_all(&request.lump)?;
        let texture = decode_texture(&data, request.options)?;

        let Some(uploader) = self.uploader.as_mut() else {
            return Ok(TexLoadResult::Pixels {
                key: request.key,
                texture,
            });
        };

        let image = uploader.upload_image(&texture.image_desc(), &texture.mips, &request.lump)?;
        log::trace!(
            "uploaded {} ({}x{}, {} mips, {} bytes)",
            request.lump,
            texture.extent.width,
            texture.extent.height,
            texture.mips.len(),
            texture.total_size()
        );
        Ok(TexLoadResult::Uploaded {
            key: request.key,
            image,
        })
    }
}

impl ResourceDecoder<TexLoadRequest, TexLoadResult> for TexLoadDecoder {
    fn prepare(&mut self) {
        if let Some(uploader) = self.uploader.as_mut() {
            uploader.release_staging();
        }
    }

    fn load_resource(&mut self, request: TexLoadRequest) -> anyhow::Result<TexLoadResult> {
        let _span = bgcache_queue::profile_span!("TexLoadDecoder::load_resource");
        match guarded(|| self.load(&request)) {
            Ok(result) => Ok(result),
            Err(err) => {
                log::warn!("failed to load texture {}: {:#}", request.lump, err);
                Ok(TexLoadResult::Failed {
                    key: request.key,
                    reason: format!("{:#}", err),
                })
            }
        }
    }
}
