use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use ash::vk;

/// 上传线程录制的一条命令
///
/// 一次 submit 由若干条命令组成，按顺序在同一个队列上执行。
#[derive(Clone, Copy)]
pub enum GfxUploadCommand {
    ImageBarrier(GfxImageBarrier),
    BufferBarrier(GfxBufferBarrier),
    /// staging buffer -> image 的某一个 mip level
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        mip_level: u32,
        extent: vk::Extent2D,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
}

impl GfxUploadCommand {
    pub fn buffer_image_copy(&self) -> Option<vk::BufferImageCopy2<'static>> {
        let Self::CopyBufferToImage { mip_level, extent, .. } = *self else {
            return None;
        };
        Some(
            vk::BufferImageCopy2::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level,
                    base_array_layer: 0,
                    layer_count: 1,
                }),
        )
    }
}
