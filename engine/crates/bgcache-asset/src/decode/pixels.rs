use crate::decode::{TexLoadFlags, TexLoadOptions, TextureData};
use anyhow::Context;
use ash::vk;
use bgcache_gfx::resources::format::{GfxTexelFormat, mip_extent, mip_level_count};
use image::GenericImageView;
use image::imageops::FilterType;

/// 用 `image` 解码 PNG/TGA/JPEG
///
/// 1. 按 `reduce` 逐次减半尺寸（最小 1x1）
/// 2. indexed 模式输出单通道，否则输出 RGBA8
/// 3. 需要时生成 box filter 的 mip 链，直到 1x1
pub fn decode_pixels(data: &[u8], options: TexLoadOptions) -> anyhow::Result<TextureData> {
    let _span = bgcache_queue::profile_span!("decode_pixels");

    let mut img = image::load_from_memory(data).context("failed to decode image")?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("image has zero size {}x{}", width, height);
    }

    if options.reduce > 0 {
        let reduced = mip_extent(vk::Extent2D { width, height }, options.reduce);
        if reduced.width != width || reduced.height != height {
            img = img.resize_exact(reduced.width, reduced.height, FilterType::Triangle);
        }
    }
    let (width, height) = img.dimensions();

    let (format, base) = if options.flags.contains(TexLoadFlags::INDEXED) {
        (GfxTexelFormat::R8, img.into_luma8().into_raw())
    } else {
        (GfxTexelFormat::Rgba8, img.into_rgba8().into_raw())
    };

    let extent = vk::Extent2D { width, height };
    let mips = if options.flags.contains(TexLoadFlags::GENERATE_MIPS) {
        generate_mip_chain(base, extent, format.block_bytes() as usize)
    } else {
        vec![base]
    };

    Ok(TextureData { format, extent, mips })
}

/// 从第 0 层开始逐层 2x 缩小，直到 1x1
pub fn generate_mip_chain(base: Vec<u8>, extent: vk::Extent2D, channels: usize) -> Vec<Vec<u8>> {
    let levels = mip_level_count(extent.width, extent.height);
    let mut mips = Vec::with_capacity(levels as usize);
    mips.push(base);
    for level in 1..levels {
        let src_extent = mip_extent(extent, level - 1);
        let next = downsample_box_2x(&mips[level as usize - 1], src_extent, channels);
        mips.push(next);
    }
    mips
}

/// box filter：每个输出 texel 是对应 2x2 输入的平均值
///
/// 奇数尺寸时最后一行/列向下取整后被丢弃；某个方向已经是 1 时只在另一个方向上平均。
fn downsample_box_2x(src: &[u8], src_extent: vk::Extent2D, channels: usize) -> Vec<u8> {
    let src_w = src_extent.width as usize;
    let src_h = src_extent.height as usize;
    let dst_w = (src_w / 2).max(1);
    let dst_h = (src_h / 2).max(1);

    let texel = |x: usize, y: usize, c: usize| src[(y.min(src_h - 1) * src_w + x.min(src_w - 1)) * channels + c] as u32;

    let mut dst = vec![0u8; dst_w * dst_h * channels];
    for y in 0..dst_h {
        for x in 0..dst_w {
            for c in 0..channels {
                let sum = texel(x * 2, y * 2, c)
                    + texel(x * 2 + 1, y * 2, c)
                    + texel(x * 2, y * 2 + 1, c)
                    + texel(x * 2 + 1, y * 2 + 1, c);
                dst[(y * dst_w + x) * channels + c] = ((sum + 2) / 4) as u8;
            }
        }
    }
    dst
}
