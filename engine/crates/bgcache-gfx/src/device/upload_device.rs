use crate::commands::upload_command::GfxUploadCommand;
use crate::foundation::queue_family::GfxQueueId;
use crate::resources::format::GfxTexelFormat;
use ash::vk;

/// 目标 image 的描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxImageDesc {
    pub format: GfxTexelFormat,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
}

impl GfxImageDesc {
    pub fn vk_create_info(&self) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format.vk_format())
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(self.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }
}

/// 后台上传依赖的 GPU 操作
///
/// 实现必须允许多个线程同时调用，但同一个队列只会被一个线程提交
/// （每个 worker 独占一个 [`crate::foundation::queue_family::UploadSlot`]）。
/// 所有错误（零尺寸 image、显存耗尽、设备丢失）都以 `Err` 返回，由调用方决定资源的失败状态。
pub trait GfxUploadDevice: Send + Sync {
    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> anyhow::Result<vk::Image>;

    fn destroy_image(&self, image: vk::Image);

    /// device local 的 buffer（顶点、索引）
    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, name: &str)
    -> anyhow::Result<vk::Buffer>;

    fn destroy_buffer(&self, buffer: vk::Buffer);

    /// 创建 host visible 的 staging buffer 并写入数据
    fn create_staging_buffer(&self, data: &[u8], name: &str) -> anyhow::Result<vk::Buffer>;

    fn destroy_staging_buffer(&self, buffer: vk::Buffer);

    /// 在指定队列上提交一批命令，返回用于等待的 timeline 值
    fn submit(&self, queue: GfxQueueId, commands: &[GfxUploadCommand]) -> anyhow::Result<u64>;

    /// 阻塞直到 `queue` 上 timeline 值达到 `value`
    fn wait(&self, queue: GfxQueueId, value: u64) -> anyhow::Result<()>;
}
