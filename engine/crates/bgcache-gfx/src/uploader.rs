use crate::commands::barrier::{GfxImageBarrier, GfxOwnershipTransfer};
use crate::commands::upload_command::GfxUploadCommand;
use crate::device::upload_device::{GfxImageDesc, GfxUploadDevice};
use crate::foundation::queue_family::{GfxQueueId, UploadSlot};
use crate::resources::format::{mip_extent, mip_level_count};
use ash::vk;
use std::sync::Arc;

/// staging buffer 累计超过这个大小时，先等待 GPU 完成再释放
pub const STAGING_THROTTLE_BYTES: vk::DeviceSize = 64 * 1024 * 1024;

/// 已经在 GPU 上就绪的 image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadedImage {
    pub image: vk::Image,
    pub desc: GfxImageDesc,
    /// 上传队列与 graphics 队列不同 family 时存在，集成时需要 acquire
    pub ownership: Option<GfxOwnershipTransfer>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadedBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    pub ownership: Option<GfxOwnershipTransfer>,
}

/// 上传统计，供 stats 面板使用
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploaderStats {
    pub images: u64,
    pub buffers: u64,
    pub uploaded_bytes: u64,
    /// 因为 staging 超过阈值而被迫等待的次数
    pub throttle_waits: u64,
}

/// 单个上传线程使用的 uploader
///
/// 每个 uploader 独占一个 [`UploadSlot`]（即一个队列），不与其他线程共享命令录制。
/// 上传流程:
/// 1. 创建目标 image，barrier: Undefined -> TransferDst
/// 2. 每个 mip level 一个 staging buffer，录制 buffer -> image 的拷贝
/// 3. 队列 family 与 graphics 不同：录制 release barrier，并在结果中带上 ownership 记录；
///    否则直接转换到 ShaderReadOnly
/// 4. 提交并等待完成；staging buffer 不立即释放，累计超过阈值时统一释放
pub struct GfxUploader {
    device: Arc<dyn GfxUploadDevice>,
    slot: UploadSlot,
    graphics_family: u32,

    staging_threshold: vk::DeviceSize,
    /// 已经提交并等待完成、但尚未释放的 staging buffer
    retired_staging: Vec<(vk::Buffer, vk::DeviceSize)>,
    /// 当前批次中录制了拷贝、但还没有提交的 staging buffer
    recording_staging: Vec<(vk::Buffer, vk::DeviceSize)>,
    /// 以上两者的总字节数
    staging_bytes: vk::DeviceSize,

    stats: UploaderStats,
}

// new & init
impl GfxUploader {
    pub fn new(device: Arc<dyn GfxUploadDevice>, slot: UploadSlot, graphics_family: u32) -> Self {
        Self {
            device,
            slot,
            graphics_family,
            staging_threshold: STAGING_THROTTLE_BYTES,
            retired_staging: Vec::new(),
            recording_staging: Vec::new(),
            staging_bytes: 0,
            stats: UploaderStats::default(),
        }
    }

    /// 主线程上传使用 graphics 队列本身，不需要 ownership 转移
    pub fn for_graphics_queue(device: Arc<dyn GfxUploadDevice>, graphics_queue: GfxQueueId) -> Self {
        let slot = UploadSlot {
            queue: graphics_queue,
            needs_ownership_transfer: false,
        };
        Self::new(device, slot, graphics_queue.family_index)
    }

    pub fn with_staging_threshold(mut self, bytes: vk::DeviceSize) -> Self {
        self.staging_threshold = bytes.max(1);
        self
    }
}

// destroy
impl GfxUploader {
    /// 释放所有已经完成的 staging buffer
    pub fn release_staging(&mut self) {
        for (buffer, size) in self.retired_staging.drain(..) {
            self.device.destroy_staging_buffer(buffer);
            self.staging_bytes -= size;
        }
    }
}

impl Drop for GfxUploader {
    fn drop(&mut self) {
        self.retired_staging.append(&mut self.recording_staging);
        self.release_staging();
    }
}

// tools
impl GfxUploader {
    /// 上传一张 image 的完整 mip 链
    ///
    /// `mips[i]` 是第 i 层的数据，长度必须与格式和尺寸相符。
    pub fn upload_image(&mut self, desc: &GfxImageDesc, mips: &[Vec<u8>], name: &str) -> anyhow::Result<UploadedImage> {
        let _span = bgcache_queue::profile_span!("GfxUploader::upload_image");

        let expected_levels = mip_level_count(desc.extent.width, desc.extent.height);
        if desc.mip_levels == 0 || desc.mip_levels > expected_levels {
            anyhow::bail!(
                "{}: {} mip levels for {}x{}, at most {} expected",
                name,
                desc.mip_levels,
                desc.extent.width,
                desc.extent.height,
                expected_levels
            );
        }
        if mips.len() != desc.mip_levels as usize {
            anyhow::bail!("{}: {} mip levels declared but {} provided", name, desc.mip_levels, mips.len());
        }
        for (level, data) in mips.iter().enumerate() {
            let expected = desc
                .format
                .level_size(mip_extent(desc.extent, level as u32))
                .ok_or_else(|| anyhow::anyhow!("{}: mip {} size overflows", name, level))?;
            if data.len() as vk::DeviceSize != expected {
                anyhow::bail!("{}: mip {} has {} bytes, expected {}", name, level, data.len(), expected);
            }
        }

        let image = self.device.create_image(desc, name)?;
        match self.record_and_submit_image(image, desc, mips, name) {
            Ok(ownership) => {
                self.stats.images += 1;
                Ok(UploadedImage {
                    image,
                    desc: *desc,
                    ownership,
                })
            }
            Err(err) => {
                self.abandon_recording();
                self.device.destroy_image(image);
                Err(err)
            }
        }
    }

    fn record_and_submit_image(
        &mut self,
        image: vk::Image,
        desc: &GfxImageDesc,
        mips: &[Vec<u8>],
        name: &str,
    ) -> anyhow::Result<Option<GfxOwnershipTransfer>> {
        let mut commands = Vec::with_capacity(mips.len() + 2);
        commands.push(GfxUploadCommand::ImageBarrier(
            GfxImageBarrier::new()
                .image(image)
                .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
        ));

        for (level, data) in mips.iter().enumerate() {
            let src = self.create_staging(&mut commands, data, name)?;
            commands.push(GfxUploadCommand::CopyBufferToImage {
                src,
                dst: image,
                mip_level: level as u32,
                extent: mip_extent(desc.extent, level as u32),
            });
            self.stats.uploaded_bytes += data.len() as u64;
        }

        let ownership = if self.slot.needs_ownership_transfer {
            let transfer =
                GfxOwnershipTransfer::for_sampled_image(self.slot.queue.family_index, self.graphics_family);
            commands.push(GfxUploadCommand::ImageBarrier(transfer.release_image_barrier(image)));
            Some(transfer)
        } else {
            commands.push(GfxUploadCommand::ImageBarrier(
                GfxImageBarrier::new()
                    .image(image)
                    .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                    .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ)
                    .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            ));
            None
        };

        self.submit_and_wait(&mut commands)?;
        Ok(ownership)
    }

    /// 上传顶点/索引数据到 device local buffer
    pub fn upload_buffer(
        &mut self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> anyhow::Result<UploadedBuffer> {
        let _span = bgcache_queue::profile_span!("GfxUploader::upload_buffer");

        let size = data.len() as vk::DeviceSize;
        let buffer = self.device.create_buffer(size, usage | vk::BufferUsageFlags::TRANSFER_DST, name)?;

        match self.record_and_submit_buffer(buffer, data, name) {
            Ok(ownership) => {
                self.stats.buffers += 1;
                self.stats.uploaded_bytes += size;
                Ok(UploadedBuffer { buffer, size, ownership })
            }
            Err(err) => {
                self.abandon_recording();
                self.device.destroy_buffer(buffer);
                Err(err)
            }
        }
    }

    fn record_and_submit_buffer(
        &mut self,
        buffer: vk::Buffer,
        data: &[u8],
        name: &str,
    ) -> anyhow::Result<Option<GfxOwnershipTransfer>> {
        let mut commands = Vec::with_capacity(2);
        let src = self.create_staging(&mut commands, data, name)?;
        commands.push(GfxUploadCommand::CopyBuffer {
            src,
            dst: buffer,
            size: data.len() as vk::DeviceSize,
        });

        let ownership = if self.slot.needs_ownership_transfer {
            let transfer = GfxOwnershipTransfer::for_buffer(self.slot.queue.family_index, self.graphics_family);
            commands.push(GfxUploadCommand::BufferBarrier(transfer.release_buffer_barrier(buffer)));
            Some(transfer)
        } else {
            None
        };

        self.submit_and_wait(&mut commands)?;
        Ok(ownership)
    }

    /// 创建 staging buffer；超过阈值时先提交已录制的命令、等待并释放旧的 staging
    fn create_staging(
        &mut self,
        commands: &mut Vec<GfxUploadCommand>,
        data: &[u8],
        name: &str,
    ) -> anyhow::Result<vk::Buffer> {
        let size = data.len() as vk::DeviceSize;
        if self.staging_bytes > 0 && self.staging_bytes + size > self.staging_threshold {
            log::debug!(
                "staging usage {} + {} exceeds {}, waiting for queue {:?}",
                self.staging_bytes,
                size,
                self.staging_threshold,
                self.slot.queue
            );
            self.stats.throttle_waits += 1;
            self.submit_and_wait(commands)?;
            self.release_staging();
        }

        let buffer = self.device.create_staging_buffer(data, name)?;
        self.recording_staging.push((buffer, size));
        self.staging_bytes += size;
        Ok(buffer)
    }

    fn submit_and_wait(&mut self, commands: &mut Vec<GfxUploadCommand>) -> anyhow::Result<()> {
        if !commands.is_empty() {
            let value = self.device.submit(self.slot.queue, commands)?;
            commands.clear();
            self.device.wait(self.slot.queue, value)?;
        }
        self.retired_staging.append(&mut self.recording_staging);
        Ok(())
    }

    /// 上传失败时丢弃当前批次的 staging
    fn abandon_recording(&mut self) {
        self.retired_staging.append(&mut self.recording_staging);
        self.release_staging();
    }
}

/// 主线程在 graphics 队列上获取后台上传的 image
pub fn acquire_image(
    device: &dyn GfxUploadDevice,
    graphics_queue: GfxQueueId,
    image: vk::Image,
    transfer: &GfxOwnershipTransfer,
) -> anyhow::Result<u64> {
    device.submit(graphics_queue, &[GfxUploadCommand::ImageBarrier(transfer.acquire_image_barrier(image))])
}

pub fn acquire_buffer(
    device: &dyn GfxUploadDevice,
    graphics_queue: GfxQueueId,
    buffer: vk::Buffer,
    transfer: &GfxOwnershipTransfer,
) -> anyhow::Result<u64> {
    device.submit(graphics_queue, &[GfxUploadCommand::BufferBarrier(transfer.acquire_buffer_barrier(buffer))])
}

// getters
impl GfxUploader {
    #[inline]
    pub fn slot(&self) -> UploadSlot {
        self.slot
    }

    #[inline]
    pub fn stats(&self) -> UploaderStats {
        self.stats
    }

    /// 尚未释放的 staging 字节数
    #[inline]
    pub fn pending_staging_bytes(&self) -> vk::DeviceSize {
        self.staging_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::{HeadlessDevice, RecordedOp};
    use crate::resources::format::GfxTexelFormat;

    const GRAPHICS_QUEUE: GfxQueueId = GfxQueueId {
        family_index: 0,
        queue_index: 0,
    };

    fn same_family_slot() -> UploadSlot {
        UploadSlot {
            queue: GfxQueueId {
                family_index: 0,
                queue_index: 1,
            },
            needs_ownership_transfer: false,
        }
    }

    fn transfer_slot() -> UploadSlot {
        UploadSlot {
            queue: GfxQueueId {
                family_index: 1,
                queue_index: 0,
            },
            needs_ownership_transfer: true,
        }
    }

    fn mip_chain(desc: &GfxImageDesc) -> Vec<Vec<u8>> {
        (0..desc.mip_levels)
            .map(|level| vec![0xAB; desc.format.level_size(mip_extent(desc.extent, level)).unwrap() as usize])
            .collect()
    }

    fn bc7_64() -> GfxImageDesc {
        GfxImageDesc {
            format: GfxTexelFormat::Bc7,
            extent: vk::Extent2D { width: 64, height: 64 },
            mip_levels: 7,
        }
    }

    #[test]
    fn test_bc7_mip_chain_one_staging_per_mip() {
        let device = Arc::new(HeadlessDevice::new());
        let mut uploader = GfxUploader::new(device.clone(), same_family_slot(), 0);

        let desc = bc7_64();
        let uploaded = uploader.upload_image(&desc, &mip_chain(&desc), "bc7").unwrap();
        assert!(uploaded.ownership.is_none());

        let ops = device.ops();
        let staging_count = ops.iter().filter(|op| matches!(op, RecordedOp::CreateStaging { .. })).count();
        assert_eq!(staging_count, 7);

        let copies: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::CopyBufferToImage {
                    dst, mip_level, extent, ..
                } => {
                    assert_eq!(*dst, uploaded.image);
                    Some((*mip_level, extent.width, extent.height))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            copies,
            vec![(0, 64, 64), (1, 32, 32), (2, 16, 16), (3, 8, 8), (4, 4, 4), (5, 2, 2), (6, 1, 1)]
        );

        // 最后一个 barrier 把 image 转到可采样的 layout，且不涉及 ownership
        let last_barrier = ops
            .iter()
            .rev()
            .find_map(|op| match op {
                RecordedOp::Barrier { barrier, .. } => Some(*barrier),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(!last_barrier.is_ownership_transfer());
    }

    #[test]
    fn test_ownership_release_and_acquire() {
        let device = Arc::new(HeadlessDevice::new());
        let mut uploader = GfxUploader::new(device.clone(), transfer_slot(), 0);

        let desc = bc7_64();
        let uploaded = uploader.upload_image(&desc, &mip_chain(&desc), "owned").unwrap();
        let transfer = uploaded.ownership.unwrap();
        assert_eq!(transfer.src_queue_family_index, 1);
        assert_eq!(transfer.dst_queue_family_index, 0);

        acquire_image(device.as_ref(), GRAPHICS_QUEUE, uploaded.image, &transfer).unwrap();

        let ownership_barriers: Vec<_> = device
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Barrier { queue, barrier } if barrier.is_ownership_transfer() => Some(queue),
                _ => None,
            })
            .collect();
        // release 在上传队列，acquire 在 graphics 队列
        assert_eq!(ownership_barriers, vec![transfer_slot().queue, GRAPHICS_QUEUE]);
    }

    #[test]
    fn test_staging_throttle() {
        const MIB: usize = 1024 * 1024;
        let device = Arc::new(HeadlessDevice::new());
        let mut uploader =
            GfxUploader::new(device.clone(), same_family_slot(), 0).with_staging_threshold(2 * MIB as u64);

        let desc = GfxImageDesc {
            format: GfxTexelFormat::Rgba8,
            extent: vk::Extent2D { width: 512, height: 512 },
            mip_levels: 1,
        };
        for i in 0..4 {
            uploader.upload_image(&desc, &mip_chain(&desc), &format!("img{i}")).unwrap();
        }

        assert_eq!(uploader.stats().throttle_waits, 1);
        assert!(device.peak_staging_bytes() <= 2 * MIB as u64);
        assert_eq!(uploader.pending_staging_bytes(), 2 * MIB as u64);

        uploader.release_staging();
        assert_eq!(device.live_staging_bytes(), 0);
    }

    #[test]
    fn test_too_many_mips_rejected() {
        let device = Arc::new(HeadlessDevice::new());
        let mut uploader = GfxUploader::new(device.clone(), same_family_slot(), 0);

        let desc = GfxImageDesc {
            mip_levels: 8,
            ..bc7_64()
        };
        let mips = mip_chain(&desc);
        assert!(uploader.upload_image(&desc, &mips, "bad").is_err());
        assert!(device.ops().is_empty());
    }

    #[test]
    fn test_truncated_mip_rejected() {
        let device = Arc::new(HeadlessDevice::new());
        let mut uploader = GfxUploader::new(device.clone(), same_family_slot(), 0);

        let desc = bc7_64();
        let mut mips = mip_chain(&desc);
        mips[3].pop();
        assert!(uploader.upload_image(&desc, &mips, "truncated").is_err());
    }

    #[test]
    fn test_oversized_extent_rejected() {
        let device = Arc::new(HeadlessDevice::new());
        let mut uploader = GfxUploader::new(device.clone(), same_family_slot(), 0);

        let desc = GfxImageDesc {
            extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            mip_levels: 1,
            ..bc7_64()
        };
        let err = uploader.upload_image(&desc, &[Vec::new()], "huge").unwrap_err();
        assert!(err.to_string().contains("overflows"), "{}", err);
        assert!(device.ops().is_empty());
    }

    #[test]
    fn test_image_creation_failure_leaks_nothing() {
        let device = Arc::new(HeadlessDevice::new());
        let mut uploader = GfxUploader::new(device.clone(), same_family_slot(), 0);
        device.fail_next_image_creations(1);

        let desc = bc7_64();
        assert!(uploader.upload_image(&desc, &mip_chain(&desc), "oom").is_err());
        assert_eq!(device.live_staging_bytes(), 0);

        // 下一次上传不受影响
        assert!(uploader.upload_image(&desc, &mip_chain(&desc), "ok").is_ok());
    }

    #[test]
    fn test_buffer_upload() {
        let device = Arc::new(HeadlessDevice::new());
        let mut uploader = GfxUploader::new(device.clone(), transfer_slot(), 0);

        let uploaded = uploader.upload_buffer(&[1u8; 96], vk::BufferUsageFlags::VERTEX_BUFFER, "vb").unwrap();
        assert_eq!(uploaded.size, 96);
        assert!(uploaded.ownership.is_some());
        assert_eq!(
            device.count_ops(|op| matches!(op, RecordedOp::CopyBuffer { size: 96, .. })),
            1
        );
        assert_eq!(uploader.stats().buffers, 1);
    }
}
