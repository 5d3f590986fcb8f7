use crate::commands::upload_command::GfxUploadCommand;
use crate::device::upload_device::{GfxImageDesc, GfxUploadDevice};
use crate::foundation::queue_family::GfxQueueId;
use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// 被记录下来的 barrier（不含 p_next 等裸指针，可以跨线程保存）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedBarrier {
    pub image: Option<vk::Image>,
    pub buffer: Option<vk::Buffer>,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}

impl RecordedBarrier {
    #[inline]
    pub fn is_ownership_transfer(&self) -> bool {
        self.src_queue_family_index != self.dst_queue_family_index
            && self.src_queue_family_index != vk::QUEUE_FAMILY_IGNORED
    }
}

/// [`HeadlessDevice`] 记录的一次操作
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedOp {
    CreateImage {
        image: vk::Image,
        desc: GfxImageDesc,
        name: String,
    },
    DestroyImage(vk::Image),
    CreateBuffer {
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    },
    DestroyBuffer(vk::Buffer),
    CreateStaging {
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    },
    DestroyStaging(vk::Buffer),
    CopyBufferToImage {
        queue: GfxQueueId,
        src: vk::Buffer,
        dst: vk::Image,
        mip_level: u32,
        extent: vk::Extent3D,
    },
    CopyBuffer {
        queue: GfxQueueId,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    Barrier {
        queue: GfxQueueId,
        barrier: RecordedBarrier,
    },
    Submit {
        queue: GfxQueueId,
        value: u64,
    },
    Wait {
        queue: GfxQueueId,
        value: u64,
    },
}

#[derive(Default)]
struct StagingUsage {
    sizes: HashMap<vk::Buffer, vk::DeviceSize>,
    live_bytes: vk::DeviceSize,
    peak_bytes: vk::DeviceSize,
}

/// 不连接任何驱动、只记录操作的 GPU 设备
///
/// 用于单元测试和 headless app：可以断言上传顺序、staging 占用、ownership barrier，
/// 也可以注入失败和模拟的提交耗时。
pub struct HeadlessDevice {
    next_handle: AtomicU64,
    next_timeline: AtomicU64,
    ops: Mutex<Vec<RecordedOp>>,
    staging: Mutex<StagingUsage>,

    /// 接下来的 N 次 create_image 返回错误
    fail_next_images: AtomicUsize,
    /// 每次 wait 的模拟耗时
    wait_latency: Duration,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            next_timeline: AtomicU64::new(1),
            ops: Mutex::new(Vec::new()),
            staging: Mutex::new(StagingUsage::default()),
            fail_next_images: AtomicUsize::new(0),
            wait_latency: Duration::ZERO,
        }
    }

    /// 让每次 wait 睡眠一段时间，模拟 GPU 拷贝耗时
    pub fn with_wait_latency(mut self, latency: Duration) -> Self {
        self.wait_latency = latency;
        self
    }
}

// tools
impl HeadlessDevice {
    pub fn fail_next_image_creations(&self, count: usize) {
        self.fail_next_images.store(count, Ordering::Release);
    }

    fn alloc_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn record(&self, op: RecordedOp) {
        self.ops.lock().push(op);
    }

    /// 取出目前为止记录的所有操作（按发生顺序）
    pub fn ops(&self) -> Vec<RecordedOp> {
        self.ops.lock().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().clear();
    }

    /// 当前尚未销毁的 staging buffer 字节数
    pub fn live_staging_bytes(&self) -> vk::DeviceSize {
        self.staging.lock().live_bytes
    }

    /// 历史上同时存在的 staging buffer 最大字节数
    pub fn peak_staging_bytes(&self) -> vk::DeviceSize {
        self.staging.lock().peak_bytes
    }

    pub fn count_ops(&self, pred: impl Fn(&RecordedOp) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| pred(op)).count()
    }
}

impl GfxUploadDevice for HeadlessDevice {
    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> anyhow::Result<vk::Image> {
        let create_info = desc.vk_create_info();
        if create_info.extent.width == 0 || create_info.extent.height == 0 || create_info.mip_levels == 0 {
            anyhow::bail!("cannot create zero-size image {}: {:?}", name, create_info.extent);
        }
        let injected = self
            .fail_next_images
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            anyhow::bail!("out of device memory while creating image {}", name);
        }

        let image = vk::Image::from_raw(self.alloc_handle());
        self.record(RecordedOp::CreateImage {
            image,
            desc: *desc,
            name: name.to_string(),
        });
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        self.record(RecordedOp::DestroyImage(image));
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        name: &str,
    ) -> anyhow::Result<vk::Buffer> {
        if size == 0 {
            anyhow::bail!("cannot create zero-size buffer {}", name);
        }
        let buffer = vk::Buffer::from_raw(self.alloc_handle());
        self.record(RecordedOp::CreateBuffer { buffer, size });
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.record(RecordedOp::DestroyBuffer(buffer));
    }

    fn create_staging_buffer(&self, data: &[u8], name: &str) -> anyhow::Result<vk::Buffer> {
        if data.is_empty() {
            anyhow::bail!("cannot create empty staging buffer {}", name);
        }
        let buffer = vk::Buffer::from_raw(self.alloc_handle());
        let size = data.len() as vk::DeviceSize;
        {
            let mut staging = self.staging.lock();
            staging.sizes.insert(buffer, size);
            staging.live_bytes += size;
            staging.peak_bytes = staging.peak_bytes.max(staging.live_bytes);
        }
        self.record(RecordedOp::CreateStaging { buffer, size });
        Ok(buffer)
    }

    fn destroy_staging_buffer(&self, buffer: vk::Buffer) {
        {
            let mut staging = self.staging.lock();
            if let Some(size) = staging.sizes.remove(&buffer) {
                staging.live_bytes -= size;
            } else {
                log::warn!("destroying unknown staging buffer {:?}", buffer);
            }
        }
        self.record(RecordedOp::DestroyStaging(buffer));
    }

    fn submit(&self, queue: GfxQueueId, commands: &[GfxUploadCommand]) -> anyhow::Result<u64> {
        let mut ops = self.ops.lock();
        for command in commands {
            let op = match command {
                GfxUploadCommand::ImageBarrier(barrier) => {
                    let inner = barrier.inner();
                    RecordedOp::Barrier {
                        queue,
                        barrier: RecordedBarrier {
                            image: Some(inner.image),
                            buffer: None,
                            src_queue_family_index: inner.src_queue_family_index,
                            dst_queue_family_index: inner.dst_queue_family_index,
                            old_layout: inner.old_layout,
                            new_layout: inner.new_layout,
                        },
                    }
                }
                GfxUploadCommand::BufferBarrier(barrier) => {
                    let inner = barrier.inner();
                    RecordedOp::Barrier {
                        queue,
                        barrier: RecordedBarrier {
                            image: None,
                            buffer: Some(inner.buffer),
                            src_queue_family_index: inner.src_queue_family_index,
                            dst_queue_family_index: inner.dst_queue_family_index,
                            old_layout: vk::ImageLayout::UNDEFINED,
                            new_layout: vk::ImageLayout::UNDEFINED,
                        },
                    }
                }
                GfxUploadCommand::CopyBufferToImage { src, dst, .. } => {
                    let region = command
                        .buffer_image_copy()
                        .ok_or_else(|| anyhow::anyhow!("copy command without a region"))?;
                    RecordedOp::CopyBufferToImage {
                        queue,
                        src: *src,
                        dst: *dst,
                        mip_level: region.image_subresource.mip_level,
                        extent: region.image_extent,
                    }
                }
                GfxUploadCommand::CopyBuffer { src, dst, size } => RecordedOp::CopyBuffer {
                    queue,
                    src: *src,
                    dst: *dst,
                    size: *size,
                },
            };
            ops.push(op);
        }

        let value = self.next_timeline.fetch_add(1, Ordering::Relaxed);
        ops.push(RecordedOp::Submit { queue, value });
        Ok(value)
    }

    fn wait(&self, queue: GfxQueueId, value: u64) -> anyhow::Result<()> {
        if !self.wait_latency.is_zero() {
            std::thread::sleep(self.wait_latency);
        }
        self.record(RecordedOp::Wait { queue, value });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::format::GfxTexelFormat;

    #[test]
    fn test_zero_size_image_is_error() {
        let device = HeadlessDevice::new();
        let desc = GfxImageDesc {
            format: GfxTexelFormat::Rgba8,
            extent: vk::Extent2D { width: 0, height: 4 },
            mip_levels: 1,
        };
        assert!(device.create_image(&desc, "zero").is_err());
        assert!(device.ops().is_empty());
    }

    #[test]
    fn test_injected_failures() {
        let device = HeadlessDevice::new();
        let desc = GfxImageDesc {
            format: GfxTexelFormat::Rgba8,
            extent: vk::Extent2D { width: 4, height: 4 },
            mip_levels: 1,
        };
        device.fail_next_image_creations(1);
        assert!(device.create_image(&desc, "a").is_err());
        assert!(device.create_image(&desc, "b").is_ok());
    }

    #[test]
    fn test_staging_usage_tracking() {
        let device = HeadlessDevice::new();
        let a = device.create_staging_buffer(&[0u8; 100], "a").unwrap();
        let b = device.create_staging_buffer(&[0u8; 50], "b").unwrap();
        assert_eq!(device.live_staging_bytes(), 150);
        device.destroy_staging_buffer(a);
        device.destroy_staging_buffer(b);
        assert_eq!(device.live_staging_bytes(), 0);
        assert_eq!(device.peak_staging_bytes(), 150);
    }
}
