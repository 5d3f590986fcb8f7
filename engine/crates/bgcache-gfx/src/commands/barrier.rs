use ash::vk;

/// 便捷创建 image memory barrier 的结构体
///
/// 后台上传只需要整张 image（所有 mip）的 layout 转换和 ownership 转移，
/// 因此 subresource range 默认覆盖全部 mip level。
#[derive(Clone, Copy)]
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_array_layer: 0,
                    layer_count: 1,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'_> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn queue_family_transfer(mut self, src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        self.inner.src_queue_family_index = src_queue_family_index;
        self.inner.dst_queue_family_index = dst_queue_family_index;
        self
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn mip_range(mut self, base_mip_level: u32, level_count: u32) -> Self {
        self.inner.subresource_range.base_mip_level = base_mip_level;
        self.inner.subresource_range.level_count = level_count;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }

    #[inline]
    pub fn is_ownership_transfer(&self) -> bool {
        self.inner.src_queue_family_index != self.inner.dst_queue_family_index
            && self.inner.src_queue_family_index != vk::QUEUE_FAMILY_IGNORED
    }
}

#[derive(Clone, Copy)]
pub struct GfxBufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            },
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'_> {
        &self.inner
    }

    #[inline]
    pub fn queue_family_transfer(mut self, src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        self.inner.src_queue_family_index = src_queue_family_index;
        self.inner.dst_queue_family_index = dst_queue_family_index;
        self
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }
}

/// 资源被上传队列释放、等待 graphics 队列获取的记录
///
/// 上传线程在自己的队列上提交 release barrier，
/// 主线程集成结果时必须在 graphics 队列上提交对应的 acquire barrier，之后才能采样。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxOwnershipTransfer {
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    /// release 时 image 所处的 layout，acquire 使用相同的 layout
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}

impl GfxOwnershipTransfer {
    /// 上传完成后 image 的 ownership 转移：TransferDst -> ShaderReadOnly
    pub fn for_sampled_image(src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        Self {
            src_queue_family_index,
            dst_queue_family_index,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// buffer 没有 layout
    pub fn for_buffer(src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        Self {
            src_queue_family_index,
            dst_queue_family_index,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
        }
    }

    /// 在上传队列上录制：dst 阶段和 access 必须为空
    pub fn release_image_barrier(&self, image: vk::Image) -> GfxImageBarrier {
        GfxImageBarrier::new()
            .image(image)
            .queue_family_transfer(self.src_queue_family_index, self.dst_queue_family_index)
            .layout_transfer(self.old_layout, self.new_layout)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
    }

    /// 在 graphics 队列上录制：src 阶段和 access 必须为空
    pub fn acquire_image_barrier(&self, image: vk::Image) -> GfxImageBarrier {
        GfxImageBarrier::new()
            .image(image)
            .queue_family_transfer(self.src_queue_family_index, self.dst_queue_family_index)
            .layout_transfer(self.old_layout, self.new_layout)
            .src_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
            .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ)
    }

    pub fn release_buffer_barrier(&self, buffer: vk::Buffer) -> GfxBufferBarrier {
        GfxBufferBarrier::new()
            .buffer(buffer, 0, vk::WHOLE_SIZE)
            .queue_family_transfer(self.src_queue_family_index, self.dst_queue_family_index)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
    }

    pub fn acquire_buffer_barrier(&self, buffer: vk::Buffer) -> GfxBufferBarrier {
        GfxBufferBarrier::new()
            .buffer(buffer, 0, vk::WHOLE_SIZE)
            .queue_family_transfer(self.src_queue_family_index, self.dst_queue_family_index)
            .src_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
            .dst_mask(vk::PipelineStageFlags2::VERTEX_INPUT, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ)
    }
}
