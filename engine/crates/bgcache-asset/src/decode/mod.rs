//! lump 数据的解码
//!
//! - DDS：块压缩格式，只切分 mip，不在 CPU 上解码
//! - PNG/TGA/JPEG：经 `image` 解码为 RGBA8（或 indexed 模式下的 R8），可选缩小和生成 mip
//! - OBJ：经 `tobj` 解析为交错的顶点数据和索引

pub mod dds;
pub mod mesh;
pub mod pixels;

use ash::vk;
use bgcache_gfx::device::upload_device::GfxImageDesc;
use bgcache_gfx::resources::format::GfxTexelFormat;
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TexLoadFlags: u32 {
        /// 对非压缩纹理生成完整的 mip 链
        const GENERATE_MIPS = 1 << 0;
        /// 输出调色板索引（单通道 R8），而不是 RGBA8
        const INDEXED = 1 << 1;
    }
}

/// 纹理解码参数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TexLoadOptions {
    pub flags: TexLoadFlags,
    /// 质量降低：尺寸减半的次数，不会小于 1x1；对块压缩纹理表现为跳过前几层 mip
    pub reduce: u32,
}

impl Default for TexLoadOptions {
    fn default() -> Self {
        Self {
            flags: TexLoadFlags::empty(),
            reduce: 0,
        }
    }
}

/// 解码后的纹理：格式、尺寸和每一层 mip 的数据
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub format: GfxTexelFormat,
    pub extent: vk::Extent2D,
    pub mips: Vec<Vec<u8>>,
}

impl TextureData {
    pub fn image_desc(&self) -> GfxImageDesc {
        GfxImageDesc {
            format: self.format,
            extent: self.extent,
            mip_levels: self.mips.len() as u32,
        }
    }

    pub fn total_size(&self) -> usize {
        self.mips.iter().map(Vec::len).sum()
    }
}

/// 按内容识别格式并解码纹理
pub fn decode_texture(data: &[u8], options: TexLoadOptions) -> anyhow::Result<TextureData> {
    if dds::is_dds(data) {
        let texture = dds::parse_dds(data)?;
        Ok(dds::apply_reduce(texture, options.reduce))
    } else {
        pixels::decode_pixels(data, options)
    }
}
