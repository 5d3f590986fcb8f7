//! DDS 文件解析
//!
//! 只处理 2D 纹理的块压缩格式：legacy FourCC（DXT1/DXT3/DXT5/ATI1/ATI2）
//! 以及 DX10 扩展头中的 BC1-BC7。数据不做 CPU 解码，直接按 mip 切分后交给 GPU。

use crate::decode::TextureData;
use ash::vk;
use bgcache_gfx::resources::format::{GfxTexelFormat, mip_extent, mip_level_count};

const DDS_MAGIC: &[u8; 4] = b"DDS ";
const HEADER_SIZE: usize = 124;
const DX10_HEADER_SIZE: usize = 20;

// DDS header flags (DDSD_*)
const DDSD_MIPMAPCOUNT: u32 = 0x20000;

// DDS pixel format flags (DDPF_*)
const DDPF_FOURCC: u32 = 0x4;

// DDS caps2 flags
const DDSCAPS2_CUBEMAP: u32 = 0x200;
const DDSCAPS2_VOLUME: u32 = 0x200000;

// DXGI_FORMAT
const DXGI_FORMAT_BC1_UNORM: u32 = 71;
const DXGI_FORMAT_BC1_UNORM_SRGB: u32 = 72;
const DXGI_FORMAT_BC2_UNORM: u32 = 74;
const DXGI_FORMAT_BC2_UNORM_SRGB: u32 = 75;
const DXGI_FORMAT_BC3_UNORM: u32 = 77;
const DXGI_FORMAT_BC3_UNORM_SRGB: u32 = 78;
const DXGI_FORMAT_BC4_UNORM: u32 = 80;
const DXGI_FORMAT_BC5_UNORM: u32 = 83;
const DXGI_FORMAT_BC6H_UF16: u32 = 95;
const DXGI_FORMAT_BC7_UNORM: u32 = 98;
const DXGI_FORMAT_BC7_UNORM_SRGB: u32 = 99;

const D3D10_RESOURCE_DIMENSION_TEXTURE2D: u32 = 3;

/// 判断数据是否是 DDS 文件
pub fn is_dds(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == DDS_MAGIC
}

fn read_u32(data: &[u8], offset: usize) -> anyhow::Result<u32> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| anyhow::anyhow!("DDS truncated at offset {}", offset))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn format_from_fourcc(fourcc: &[u8]) -> anyhow::Result<GfxTexelFormat> {
    match fourcc {
        b"DXT1" => Ok(GfxTexelFormat::Bc1),
        b"DXT2" | b"DXT3" => Ok(GfxTexelFormat::Bc2),
        b"DXT4" | b"DXT5" => Ok(GfxTexelFormat::Bc3),
        b"ATI1" | b"BC4U" => Ok(GfxTexelFormat::Bc4),
        b"ATI2" | b"BC5U" => Ok(GfxTexelFormat::Bc5),
        other => anyhow::bail!("unsupported DDS FourCC {:?}", String::from_utf8_lossy(other)),
    }
}

fn format_from_dxgi(dxgi_format: u32) -> anyhow::Result<GfxTexelFormat> {
    match dxgi_format {
        DXGI_FORMAT_BC1_UNORM | DXGI_FORMAT_BC1_UNORM_SRGB => Ok(GfxTexelFormat::Bc1),
        DXGI_FORMAT_BC2_UNORM | DXGI_FORMAT_BC2_UNORM_SRGB => Ok(GfxTexelFormat::Bc2),
        DXGI_FORMAT_BC3_UNORM | DXGI_FORMAT_BC3_UNORM_SRGB => Ok(GfxTexelFormat::Bc3),
        DXGI_FORMAT_BC4_UNORM => Ok(GfxTexelFormat::Bc4),
        DXGI_FORMAT_BC5_UNORM => Ok(GfxTexelFormat::Bc5),
        DXGI_FORMAT_BC6H_UF16 => Ok(GfxTexelFormat::Bc6h),
        DXGI_FORMAT_BC7_UNORM | DXGI_FORMAT_BC7_UNORM_SRGB => Ok(GfxTexelFormat::Bc7),
        other => anyhow::bail!("unsupported DXGI format {}", other),
    }
}

/// 解析 DDS，切分出完整的压缩 mip 链
///
/// 声明的 mip 数超过尺寸允许的层数，或者数据不足以容纳所有 mip 时返回错误。
pub fn parse_dds(data: &[u8]) -> anyhow::Result<TextureData> {
    if !is_dds(data) {
        anyhow::bail!("missing DDS magic");
    }
    let size = read_u32(data, 4)?;
    if size as usize != HEADER_SIZE {
        anyhow::bail!("invalid DDS header size {}", size);
    }

    let flags = read_u32(data, 8)?;
    let height = read_u32(data, 12)?;
    let width = read_u32(data, 16)?;
    let header_mips = read_u32(data, 28)?;
    let pf_flags = read_u32(data, 80)?;
    let fourcc = data.get(84..88).ok_or_else(|| anyhow::anyhow!("DDS truncated in pixel format"))?;
    let caps2 = read_u32(data, 112)?;

    if width == 0 || height == 0 {
        anyhow::bail!("DDS has zero size {}x{}", width, height);
    }
    if caps2 & (DDSCAPS2_CUBEMAP | DDSCAPS2_VOLUME) != 0 {
        anyhow::bail!("cubemap and volume DDS textures are not supported");
    }
    if pf_flags & DDPF_FOURCC == 0 {
        anyhow::bail!("uncompressed DDS pixel formats are not supported");
    }

    let mut data_offset = 4 + HEADER_SIZE;
    let format = if fourcc == b"DX10" {
        let dxgi_format = read_u32(data, data_offset)?;
        let dimension = read_u32(data, data_offset + 4)?;
        let array_size = read_u32(data, data_offset + 12)?;
        if dimension != D3D10_RESOURCE_DIMENSION_TEXTURE2D || array_size > 1 {
            anyhow::bail!("only single 2D DX10 textures are supported");
        }
        data_offset += DX10_HEADER_SIZE;
        format_from_dxgi(dxgi_format)?
    } else {
        format_from_fourcc(fourcc)?
    };

    let expected_mips = mip_level_count(width, height);
    let mip_levels = if flags & DDSD_MIPMAPCOUNT != 0 { header_mips.max(1) } else { 1 };
    if mip_levels > expected_mips {
        anyhow::bail!(
            "DDS declares {} mip levels but {}x{} allows at most {}",
            mip_levels,
            width,
            height,
            expected_mips
        );
    }

    let extent = vk::Extent2D { width, height };
    let mut mips = Vec::with_capacity(mip_levels as usize);
    let mut offset = data_offset;
    for level in 0..mip_levels {
        let level_extent = mip_extent(extent, level);
        let level_size = format
            .level_size(level_extent)
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| {
                anyhow::anyhow!("DDS mip {} size overflows ({}x{})", level, level_extent.width, level_extent.height)
            })?;
        let end = offset
            .checked_add(level_size)
            .ok_or_else(|| anyhow::anyhow!("DDS mip {} end offset overflows", level))?;
        let level_data = data.get(offset..end).ok_or_else(|| {
            anyhow::anyhow!("DDS mip {} truncated: need {} bytes at offset {}", level, level_size, offset)
        })?;
        mips.push(level_data.to_vec());
        offset = end;
    }

    Ok(TextureData { format, extent, mips })
}

/// 块压缩纹理的质量降低：直接丢弃前 `reduce` 层 mip，至少保留一层
pub fn apply_reduce(mut texture: TextureData, reduce: u32) -> TextureData {
    let skip = (reduce as usize).min(texture.mips.len().saturating_sub(1));
    if skip > 0 {
        texture.mips.drain(..skip);
        texture.extent = mip_extent(texture.extent, skip as u32);
    }
    texture
}

/// 组装一个最小的 DDS 文件，测试和 headless app 生成数据时使用
pub fn build_dds(format: GfxTexelFormat, width: u32, height: u32, mip_levels: u32) -> Vec<u8> {
    let (fourcc, dxgi_format): (&[u8; 4], Option<u32>) = match format {
        GfxTexelFormat::Bc1 => (b"DXT1", None),
        GfxTexelFormat::Bc2 => (b"DXT3", None),
        GfxTexelFormat::Bc3 => (b"DXT5", None),
        GfxTexelFormat::Bc4 => (b"DX10", Some(DXGI_FORMAT_BC4_UNORM)),
        GfxTexelFormat::Bc5 => (b"DX10", Some(DXGI_FORMAT_BC5_UNORM)),
        GfxTexelFormat::Bc6h => (b"DX10", Some(DXGI_FORMAT_BC6H_UF16)),
        // 非压缩格式没有对应的 FourCC，按 BC7 写出
        GfxTexelFormat::Bc7 | GfxTexelFormat::Rgba8 | GfxTexelFormat::R8 => (b"DX10", Some(DXGI_FORMAT_BC7_UNORM)),
    };
    let format = if format.is_block_compressed() { format } else { GfxTexelFormat::Bc7 };

    let mut header = [0u32; HEADER_SIZE / 4];
    header[0] = HEADER_SIZE as u32;
    header[1] = 0x1 | 0x2 | 0x4 | 0x1000 | DDSD_MIPMAPCOUNT;
    header[2] = height;
    header[3] = width;
    header[6] = mip_levels;
    // pixel format 从偏移 72（相对 header 起始）开始
    header[18] = 32;
    header[19] = DDPF_FOURCC;
    header[20] = u32::from_le_bytes(*fourcc);
    header[26] = 0x1000;

    let mut out = Vec::new();
    out.extend_from_slice(DDS_MAGIC);
    out.extend(header.iter().flat_map(|v| v.to_le_bytes()));
    if let Some(dxgi_format) = dxgi_format {
        for v in [dxgi_format, D3D10_RESOURCE_DIMENSION_TEXTURE2D, 0, 1, 0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    let extent = vk::Extent2D { width, height };
    for level in 0..mip_levels {
        let level_size = format.level_size(mip_extent(extent, level)).unwrap_or(0) as usize;
        out.extend(std::iter::repeat_n(level as u8, level_size));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bc7_mip_chain() {
        let data = build_dds(GfxTexelFormat::Bc7, 64, 64, 7);
        let texture = parse_dds(&data).unwrap();
        assert_eq!(texture.format, GfxTexelFormat::Bc7);
        assert_eq!(texture.extent, vk::Extent2D { width: 64, height: 64 });
        let sizes: Vec<_> = texture.mips.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4096, 1024, 256, 64, 16, 16, 16]);
        // 每层数据按 level 填充，确认切分位置正确
        assert!(texture.mips[3].iter().all(|&b| b == 3));
    }

    #[test]
    fn test_parse_legacy_dxt1() {
        let data = build_dds(GfxTexelFormat::Bc1, 16, 8, 2);
        let texture = parse_dds(&data).unwrap();
        assert_eq!(texture.format, GfxTexelFormat::Bc1);
        assert_eq!(texture.mips.len(), 2);
        assert_eq!(texture.mips[0].len(), 64);
    }

    #[test]
    fn test_too_many_mips() {
        let mut data = build_dds(GfxTexelFormat::Bc7, 64, 64, 7);
        // mip count 位于 header 偏移 28
        data[28..32].copy_from_slice(&8u32.to_le_bytes());
        assert!(parse_dds(&data).is_err());
    }

    #[test]
    fn test_truncated_mip_chain() {
        let data = build_dds(GfxTexelFormat::Bc3, 32, 32, 6);
        assert!(parse_dds(&data[..data.len() - 1]).is_err());
    }

    #[test]
    fn test_oversized_header_rejected() {
        // 只有 header，没有像素数据；尺寸声明为 0xFFFFFFFF x 0xFFFFFFFF
        let mut data = build_dds(GfxTexelFormat::Bc7, 4, 4, 1);
        data.truncate(4 + HEADER_SIZE + DX10_HEADER_SIZE);
        data[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        data[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = parse_dds(&data).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{}", err);

        // BC1 的 level 0 不溢出 u64，但数据明显不足
        let mut data = build_dds(GfxTexelFormat::Bc1, 4, 4, 1);
        data[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        data[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(parse_dds(&data).is_err());
    }

    #[test]
    fn test_reduce_skips_top_mips() {
        let texture = parse_dds(&build_dds(GfxTexelFormat::Bc7, 64, 64, 7)).unwrap();
        let reduced = apply_reduce(texture.clone(), 2);
        assert_eq!(reduced.extent, vk::Extent2D { width: 16, height: 16 });
        assert_eq!(reduced.mips.len(), 5);
        assert_eq!(reduced.mips[0], texture.mips[2]);

        // 只有一层时无法再降低
        let single = parse_dds(&build_dds(GfxTexelFormat::Bc1, 8, 8, 1)).unwrap();
        assert_eq!(apply_reduce(single.clone(), 3), single);
    }

    #[test]
    fn test_not_dds() {
        assert!(!is_dds(b"\x89PNG"));
        assert!(parse_dds(b"\x89PNG\r\n\x1a\n").is_err());
    }
}
