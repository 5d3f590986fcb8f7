use ash::vk;
use std::fmt;

/// 后台上传支持的纹理格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxTexelFormat {
    Rgba8,
    /// indexed 模式：每个 texel 一个调色板索引
    R8,
    /// DXT1
    Bc1,
    /// DXT3
    Bc2,
    /// DXT5
    Bc3,
    Bc4,
    Bc5,
    Bc6h,
    Bc7,
}

impl fmt::Display for GfxTexelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl GfxTexelFormat {
    pub fn vk_format(self) -> vk::Format {
        match self {
            Self::Rgba8 => vk::Format::R8G8B8A8_UNORM,
            Self::R8 => vk::Format::R8_UNORM,
            Self::Bc1 => vk::Format::BC1_RGBA_UNORM_BLOCK,
            Self::Bc2 => vk::Format::BC2_UNORM_BLOCK,
            Self::Bc3 => vk::Format::BC3_UNORM_BLOCK,
            Self::Bc4 => vk::Format::BC4_UNORM_BLOCK,
            Self::Bc5 => vk::Format::BC5_UNORM_BLOCK,
            Self::Bc6h => vk::Format::BC6H_UFLOAT_BLOCK,
            Self::Bc7 => vk::Format::BC7_UNORM_BLOCK,
        }
    }

    /// 块压缩格式只能直接上传给 GPU，CPU 端不做解码
    #[inline]
    pub fn is_block_compressed(self) -> bool {
        !matches!(self, Self::Rgba8 | Self::R8)
    }

    /// 块边长（texel），非压缩格式为 1
    #[inline]
    pub fn block_dim(self) -> u32 {
        if self.is_block_compressed() { 4 } else { 1 }
    }

    /// 每个块占用的字节数
    #[inline]
    pub fn block_bytes(self) -> u64 {
        match self {
            Self::R8 => 1,
            Self::Rgba8 => 4,
            Self::Bc1 | Self::Bc4 => 8,
            Self::Bc2 | Self::Bc3 | Self::Bc5 | Self::Bc6h | Self::Bc7 => 16,
        }
    }

    /// 一个 mip level 的字节数，溢出 `u64` 时返回 None
    ///
    /// 尺寸来自文件头，不可信。
    pub fn level_size(self, extent: vk::Extent2D) -> Option<u64> {
        let dim = self.block_dim();
        let blocks_w = extent.width.div_ceil(dim).max(1) as u64;
        let blocks_h = extent.height.div_ceil(dim).max(1) as u64;
        blocks_w.checked_mul(blocks_h)?.checked_mul(self.block_bytes())
    }

    /// 整条 mip 链的字节数，溢出 `u64` 时返回 None
    pub fn mip_chain_size(self, base: vk::Extent2D, mip_levels: u32) -> Option<u64> {
        (0..mip_levels).try_fold(0u64, |total, level| total.checked_add(self.level_size(mip_extent(base, level))?))
    }
}

/// 完整 mip 链的层数：`floor(log2(max(w, h))) + 1`
#[inline]
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// 第 `level` 层的尺寸：逐层减半（向下取整），最小为 1
#[inline]
pub fn mip_extent(base: vk::Extent2D, level: u32) -> vk::Extent2D {
    let halve = |v: u32| v.checked_shr(level).unwrap_or(0).max(1);
    vk::Extent2D {
        width: halve(base.width),
        height: halve(base.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(64, 64), 7);
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 16), 9);
        assert_eq!(mip_level_count(100, 30), 7);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_mip_extent_halves_and_floors() {
        let base = extent(100, 30);
        assert_eq!(mip_extent(base, 1), extent(50, 15));
        assert_eq!(mip_extent(base, 2), extent(25, 7));
        assert_eq!(mip_extent(base, 5), extent(3, 1));
        assert_eq!(mip_extent(base, 6), extent(1, 1));
        assert_eq!(mip_extent(base, 40), extent(1, 1));
    }

    #[test]
    fn test_level_size_block_compressed() {
        // 64x64 BC7: 16x16 个块，每块 16 字节
        assert_eq!(GfxTexelFormat::Bc7.level_size(extent(64, 64)), Some(4096));
        // 小于一个块的 level 仍然占一个块
        assert_eq!(GfxTexelFormat::Bc7.level_size(extent(2, 1)), Some(16));
        assert_eq!(GfxTexelFormat::Bc1.level_size(extent(8, 4)), Some(16));
    }

    #[test]
    fn test_level_size_uncompressed() {
        assert_eq!(GfxTexelFormat::Rgba8.level_size(extent(3, 5)), Some(60));
        assert_eq!(GfxTexelFormat::R8.level_size(extent(3, 5)), Some(15));
    }

    #[test]
    fn test_mip_chain_size() {
        // 4096 + 1024 + 256 + 64 + 16 + 16 + 16
        assert_eq!(GfxTexelFormat::Bc7.mip_chain_size(extent(64, 64), 7), Some(5488));
    }

    #[test]
    fn test_level_size_overflow() {
        // 2^30 * 2^30 个块，每块 16 字节，正好超出 u64
        let huge = extent(u32::MAX, u32::MAX);
        assert_eq!(GfxTexelFormat::Bc7.level_size(huge), None);
        assert_eq!(GfxTexelFormat::Bc7.mip_chain_size(huge, 3), None);
        // BC1 每块 8 字节，2^63 仍然放得下
        assert_eq!(GfxTexelFormat::Bc1.level_size(huge), Some(1 << 63));
    }
}
