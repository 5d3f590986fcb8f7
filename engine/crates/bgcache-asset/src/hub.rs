use crate::decode::TexLoadOptions;
use crate::handle::{AssetModelHandle, AssetTextureHandle, LoadStatus, TextureKey};
use crate::loader::model::{ModelBuffers, ModelLoadDecoder, ModelLoadRequest, ModelLoadResult, upload_mesh};
use crate::loader::texture::{TexLoadDecoder, TexLoadRequest, TexLoadResult};
use crate::lump::LumpReader;
use ash::vk;
use bgcache_gfx::device::upload_device::GfxUploadDevice;
use bgcache_gfx::foundation::queue_family::{GfxQueueId, UploadSlots};
use bgcache_gfx::uploader::{GfxUploader, UploadedImage, acquire_buffer, acquire_image};
use bgcache_queue::{PriorityResourceLoader, QueueDepth, ResourceLoader, TimingStats, TimingSummary};
use bgcache_tools::settings::StreamingSettings;
use itertools::Itertools;
use slotmap::SlotMap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 一张已登记的源纹理
struct TextureSource {
    lump: String,
    options: TexLoadOptions,
}

/// 一个目标 GPU image 的状态
#[derive(Default)]
struct TextureSlot {
    status: LoadStatus,
    image: Option<UploadedImage>,
}

struct ModelSlot {
    lump: String,
    status: LoadStatus,
    buffers: Option<ModelBuffers>,
}

/// 单个加载线程的统计
#[derive(Clone, Debug)]
pub struct LoaderThreadStats {
    pub name: String,
    pub queued: usize,
    pub loaded: u64,
    pub failed: u64,
    pub decode: TimingSummary,
}

/// 后台缓存的统计快照，供 stats 面板轮询
#[derive(Clone, Debug, Default)]
pub struct BackgroundCacheStats {
    pub primary: QueueDepth,
    pub secondary: QueueDepth,
    /// 重复请求（同一个 texture + translation + scale flags 已经在加载中）的次数
    pub collisions: u64,
    pub loaded: u64,
    pub failed: u64,
    pub models_loaded: u64,
    pub threads: Vec<LoaderThreadStats>,
    /// 主线程上每个结果的集成耗时
    pub integration: TimingSummary,
}

impl fmt::Display for BackgroundCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "queue: {} / secondary: {}, collisions: {}, loaded: {}, failed: {}, models: {}",
            self.primary, self.secondary, self.collisions, self.loaded, self.failed, self.models_loaded
        )?;
        for thread in &self.threads {
            writeln!(
                f,
                "  {}: queued {}, loaded {}, failed {}, decode {}",
                thread.name, thread.queued, thread.loaded, thread.failed, thread.decode
            )?;
        }
        write!(f, "  integration {}", self.integration)
    }
}

/// 后台缓存中心
///
/// 负责：
/// 1. 登记纹理/模型来源，维护每个目标资源的状态 (Unloaded -> Loading -> Uploading -> Ready)
/// 2. 把请求路由到最空闲的加载线程，对重复请求计数而不重复加载
/// 3. 每帧在预算内集成完成的结果（acquire ownership、替换 image、或在主线程上传）
/// 4. 关卡切换时 flush / stop，保证没有旧的后台任务遗留
///
/// 所有方法只能在主线程调用。
pub struct AssetHub {
    device: Arc<dyn GfxUploadDevice>,
    graphics_queue: GfxQueueId,
    integration_budget: Option<usize>,

    textures: SlotMap<AssetTextureHandle, TextureSource>,
    // lump 到句柄的映射，用于去重
    texture_cache: HashMap<String, AssetTextureHandle>,
    texture_slots: HashMap<TextureKey, TextureSlot>,
    // 已入队但还没有集成的目标
    in_flight: HashSet<TextureKey>,

    models: SlotMap<AssetModelHandle, ModelSlot>,
    model_cache: HashMap<String, AssetModelHandle>,

    texture_loaders: Vec<PriorityResourceLoader<TexLoadRequest, TexLoadResult>>,
    model_loader: ResourceLoader<ModelLoadRequest, ModelLoadResult>,
    /// 不支持后台上传时，在主线程完成上传
    main_uploader: GfxUploader,

    accepting: bool,

    collisions: u64,
    loaded: u64,
    failed: u64,
    models_loaded: u64,
    primary_depth: QueueDepth,
    secondary_depth: QueueDepth,
    integration_time: TimingStats,
}

// new & init
impl AssetHub {
    /// 创建加载线程但不启动，需要调用 [`Self::start_background_cache`]
    ///
    /// 线程数由配置决定，开启后台上传时还不能超过可用的上传队列数。
    /// 纹理线程依次占用 `slots` 中的队列，模型线程使用紧随其后的一个；不够时模型在主线程上传。
    pub fn new(
        settings: &StreamingSettings,
        device: Arc<dyn GfxUploadDevice>,
        slots: UploadSlots,
        lumps: Arc<dyn LumpReader>,
    ) -> Self {
        let graphics_queue = slots.graphics_queue();
        let background_upload = settings.background_upload && slots.supports_background_upload();
        if settings.background_upload && !background_upload {
            log::warn!("no upload-capable queue available, textures will be uploaded on the main thread");
        }

        let mut thread_count = settings.effective_texture_threads();
        if background_upload {
            thread_count = thread_count.min(slots.len());
        }

        let make_uploader = |index: usize| {
            if !background_upload {
                return None;
            }
            slots
                .get(index)
                .map(|slot| GfxUploader::new(device.clone(), slot, graphics_queue.family_index))
        };

        let texture_loaders = (0..thread_count)
            .map(|i| {
                PriorityResourceLoader::new(
                    format!("tex-loader-{}", i),
                    TexLoadDecoder::new(lumps.clone(), make_uploader(i)),
                )
            })
            .collect_vec();
        let model_loader =
            ResourceLoader::new("model-loader-0", ModelLoadDecoder::new(lumps.clone(), make_uploader(thread_count)));

        log::info!(
            "background cache: {} texture threads, background upload: {}, budget: {:?}",
            thread_count,
            background_upload,
            settings.integration_budget()
        );

        Self {
            main_uploader: GfxUploader::for_graphics_queue(device.clone(), graphics_queue),
            device,
            graphics_queue,
            integration_budget: settings.integration_budget(),

            textures: SlotMap::with_key(),
            texture_cache: HashMap::new(),
            texture_slots: HashMap::new(),
            in_flight: HashSet::new(),

            models: SlotMap::with_key(),
            model_cache: HashMap::new(),

            texture_loaders,
            model_loader,

            accepting: true,

            collisions: 0,
            loaded: 0,
            failed: 0,
            models_loaded: 0,
            primary_depth: QueueDepth::default(),
            secondary_depth: QueueDepth::default(),
            integration_time: TimingStats::default(),
        }
    }

    /// 启动所有加载线程，并重新开始接受请求
    pub fn start_background_cache(&mut self) -> anyhow::Result<()> {
        for loader in &mut self.texture_loaders {
            loader.start()?;
        }
        self.model_loader.start()?;
        self.accepting = true;
        Ok(())
    }
}

// destroy
impl AssetHub {
    pub fn destroy(mut self) {
        self.stop_background_cache();

        for (_, slot) in self.texture_slots.drain() {
            if let Some(image) = slot.image {
                self.device.destroy_image(image.image);
            }
        }
        for (_, model) in self.models.drain() {
            if let Some(buffers) = model.buffers {
                self.device.destroy_buffer(buffers.vertices.buffer);
                self.device.destroy_buffer(buffers.indices.buffer);
            }
        }
    }
}

// tools
impl AssetHub {
    /// 登记一张源纹理；同一个 lump 只登记一次
    pub fn register_texture(&mut self, lump: impl Into<String>, options: TexLoadOptions) -> AssetTextureHandle {
        let lump = lump.into();
        if let Some(&handle) = self.texture_cache.get(&lump) {
            return handle;
        }

        let handle = self.textures.insert(TextureSource {
            lump: lump.clone(),
            options,
        });
        self.texture_cache.insert(lump, handle);
        handle
    }

    pub fn register_model(&mut self, lump: impl Into<String>) -> AssetModelHandle {
        let lump = lump.into();
        if let Some(&handle) = self.model_cache.get(&lump) {
            return handle;
        }

        let handle = self.models.insert(ModelSlot {
            lump: lump.clone(),
            status: LoadStatus::Unloaded,
            buffers: None,
        });
        self.model_cache.insert(lump, handle);
        handle
    }

    /// 请求在后台加载一个纹理目标
    ///
    /// 返回是否真的入队。目标已经在加载中时记一次 collision；已经 Ready 或 Failed 的目标不会重新加载。
    /// `secondary` 为 true 时进入低优先级队列（预缓存），只有主队列为空时才会被处理。
    pub fn background_cache_texture_material(&mut self, key: TextureKey, secondary: bool) -> bool {
        let _span = bgcache_queue::profile_span!("AssetHub::background_cache_texture_material");
        if !self.accepting {
            log::debug!("background cache stopped, ignoring request for {:?}", key);
            return false;
        }
        let Some(source) = self.textures.get(key.texture) else {
            log::warn!("request for unregistered texture {:?}", key.texture);
            return false;
        };

        if self.in_flight.contains(&key) {
            self.collisions += 1;
            return false;
        }

        let slot = self.texture_slots.entry(key).or_default();
        if matches!(slot.status, LoadStatus::Ready | LoadStatus::Failed) {
            return false;
        }
        slot.status = LoadStatus::Loading;
        self.in_flight.insert(key);

        let request = TexLoadRequest {
            key,
            lump: source.lump.clone(),
            options: source.options,
        };

        // 最空闲的线程；并列时取第一个
        let Some(index) = self.texture_loaders.iter().position_min_by_key(|loader| loader.num_pending()) else {
            return false;
        };
        let loader = &self.texture_loaders[index];
        if secondary {
            loader.queue_secondary(request);
        } else {
            loader.queue(request);
        }

        self.observe_queue_depths();
        true
    }

    /// 请求一个材质用到的所有纹理，返回实际入队的数量
    pub fn background_cache_material(&mut self, layers: &[TextureKey], secondary: bool) -> usize {
        layers
            .iter()
            .filter(|&&key| self.background_cache_texture_material(key, secondary))
            .count()
    }

    pub fn background_cache_model(&mut self, handle: AssetModelHandle) -> bool {
        if !self.accepting {
            return false;
        }
        let Some(model) = self.models.get_mut(handle) else {
            log::warn!("request for unregistered model {:?}", handle);
            return false;
        };
        match model.status {
            LoadStatus::Unloaded => {}
            LoadStatus::Loading | LoadStatus::Uploading => {
                self.collisions += 1;
                return false;
            }
            LoadStatus::Ready | LoadStatus::Failed => return false,
        }

        model.status = LoadStatus::Loading;
        self.model_loader.queue(ModelLoadRequest {
            handle,
            lump: model.lump.clone(),
        });
        true
    }

    /// 集成已经完成的结果（每帧调用）
    ///
    /// 非 flush 时最多集成 `max_integrations_per_update` 个，剩下的留到下一帧；
    /// flush 时集成当前所有完成的结果。线程之间轮流取，避免某个线程的结果一直排在后面。
    /// 返回本次集成的数量。
    pub fn update_background_cache(&mut self, flush: bool) -> usize {
        let _span = bgcache_queue::profile_span!("AssetHub::update_background_cache");
        let budget = if flush { None } else { self.integration_budget };
        let within_budget = |count: usize| budget.is_none_or(|budget| count < budget);

        self.main_uploader.release_staging();
        self.observe_queue_depths();

        let mut integrated = 0;
        'drain: loop {
            let mut progressed = false;
            for index in 0..self.texture_loaders.len() {
                if !within_budget(integrated) {
                    break 'drain;
                }
                if let Some(result) = self.texture_loaders[index].pop_finished() {
                    self.timed_integration(|hub| hub.integrate_texture(result));
                    integrated += 1;
                    progressed = true;
                }
            }

            if !within_budget(integrated) {
                break;
            }
            if let Some(result) = self.model_loader.pop_finished() {
                self.timed_integration(|hub| hub.integrate_model(result));
                integrated += 1;
                progressed = true;
            }

            if !progressed {
                break;
            }
        }

        self.mark_pending_uploads();
        integrated
    }

    /// 等待所有已入队的任务完成，然后集成全部结果
    ///
    /// 只等待已经启动的线程；未启动的线程上排队的任务保持原样。
    pub fn flush_background(&mut self) -> usize {
        let _span = bgcache_queue::profile_span!("AssetHub::flush_background");
        while !self.wait_background_idle(Duration::from_millis(100)) {
            log::debug!("flush_background: waiting for {} pending loads", self.num_pending());
        }
        self.update_background_cache(true)
    }

    /// 停止接受请求，丢弃尚未开始的任务，等待正在处理的任务完成，集成所有结果后结束线程
    ///
    /// 被丢弃的目标回到 Unloaded，可以在下一次 start 后重新请求。
    pub fn stop_background_cache(&mut self) -> usize {
        let _span = bgcache_queue::profile_span!("AssetHub::stop_background_cache");
        self.accepting = false;

        let mut cancelled = 0;
        for index in 0..self.texture_loaders.len() {
            for request in self.texture_loaders[index].drain_queued() {
                self.in_flight.remove(&request.key);
                if let Some(slot) = self.texture_slots.get_mut(&request.key) {
                    slot.status = LoadStatus::Unloaded;
                }
                cancelled += 1;
            }
        }
        for request in self.model_loader.drain_queued() {
            if let Some(model) = self.models.get_mut(request.handle) {
                model.status = LoadStatus::Unloaded;
            }
            cancelled += 1;
        }

        for loader in &mut self.texture_loaders {
            loader.stop();
        }
        self.model_loader.stop();

        let integrated = self.update_background_cache(true);
        log::info!(
            "background cache stopped: {} queued loads cancelled, {} results integrated",
            cancelled,
            integrated
        );
        integrated
    }

    /// 等待所有运行中的线程空闲，超时返回 false
    pub fn wait_background_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let texture_idle = self
            .texture_loaders
            .iter()
            .filter(|loader| loader.is_running())
            .all(|loader| loader.wait_idle(deadline.saturating_duration_since(Instant::now())));
        texture_idle
            && (!self.model_loader.is_running()
                || self.model_loader.wait_idle(deadline.saturating_duration_since(Instant::now())))
    }

    fn timed_integration(&mut self, integrate: impl FnOnce(&mut Self)) {
        let start = Instant::now();
        integrate(self);
        self.integration_time.record(start.elapsed());
    }

    fn integrate_texture(&mut self, result: TexLoadResult) {
        let key = result.key();
        self.in_flight.remove(&key);

        let uploaded = match result {
            TexLoadResult::Uploaded { image, .. } => match image.ownership {
                Some(transfer) => acquire_image(self.device.as_ref(), self.graphics_queue, image.image, &transfer)
                    .map(|_| image)
                    .inspect_err(|_| self.device.destroy_image(image.image)),
                None => Ok(image),
            },
            TexLoadResult::Pixels { texture, .. } => {
                let name = self.textures.get(key.texture).map(|source| source.lump.as_str()).unwrap_or("texture");
                self.main_uploader.upload_image(&texture.image_desc(), &texture.mips, name)
            }
            TexLoadResult::Failed { reason, .. } => Err(anyhow::anyhow!(reason)),
        };

        let slot = self.texture_slots.entry(key).or_default();
        match uploaded {
            Ok(image) => {
                // 旧 image 只有渲染线程（也就是当前线程）会读取，直接替换
                if let Some(old) = slot.image.replace(image) {
                    self.device.destroy_image(old.image);
                }
                slot.status = LoadStatus::Ready;
                self.loaded += 1;
            }
            Err(err) => {
                log::error!("texture {:?} failed: {:#}", key, err);
                slot.status = LoadStatus::Failed;
                self.failed += 1;
            }
        }
    }

    fn integrate_model(&mut self, result: ModelLoadResult) {
        let handle = result.handle();
        let Some(model) = self.models.get_mut(handle) else {
            return;
        };

        let uploaded = match result {
            ModelLoadResult::Uploaded { buffers, .. } => {
                let acquired = [buffers.vertices, buffers.indices].iter().try_for_each(|buffer| match buffer.ownership {
                    Some(transfer) => {
                        acquire_buffer(self.device.as_ref(), self.graphics_queue, buffer.buffer, &transfer).map(|_| ())
                    }
                    None => Ok(()),
                });
                acquired.map(|_| buffers).inspect_err(|_| {
                    self.device.destroy_buffer(buffers.vertices.buffer);
                    self.device.destroy_buffer(buffers.indices.buffer);
                })
            }
            ModelLoadResult::Mesh { mesh, .. } => upload_mesh(&mut self.main_uploader, &mesh, &model.lump),
            ModelLoadResult::Failed { reason, .. } => Err(anyhow::anyhow!(reason)),
        };

        match uploaded {
            Ok(buffers) => {
                if let Some(old) = model.buffers.replace(buffers) {
                    self.device.destroy_buffer(old.vertices.buffer);
                    self.device.destroy_buffer(old.indices.buffer);
                }
                model.status = LoadStatus::Ready;
                self.models_loaded += 1;
            }
            Err(err) => {
                log::error!("model {} failed: {:#}", model.lump, err);
                model.status = LoadStatus::Failed;
                self.failed += 1;
            }
        }
    }

    /// 已经完成但因为预算还没有集成的结果，其目标标记为 Uploading
    fn mark_pending_uploads(&mut self) {
        for loader in &self.texture_loaders {
            loader.for_each_finished_mut(|result| {
                if matches!(result, TexLoadResult::Failed { .. }) {
                    return;
                }
                if let Some(slot) = self.texture_slots.get_mut(&result.key()) {
                    slot.status = LoadStatus::Uploading;
                }
            });
        }
        self.model_loader.for_each_finished_mut(|result| {
            if matches!(result, ModelLoadResult::Failed { .. }) {
                return;
            }
            if let Some(model) = self.models.get_mut(result.handle()) {
                model.status = LoadStatus::Uploading;
            }
        });
    }

    fn observe_queue_depths(&mut self) {
        let primary = self.texture_loaders.iter().map(|loader| loader.num_queued_primary()).sum();
        let secondary = self.texture_loaders.iter().map(|loader| loader.num_queued_secondary()).sum();
        self.primary_depth.observe(primary);
        self.secondary_depth.observe(secondary);
    }
}

// getters
impl AssetHub {
    pub fn get_status(&self, key: TextureKey) -> LoadStatus {
        if !self.textures.contains_key(key.texture) {
            return LoadStatus::Failed;
        }
        self.texture_slots.get(&key).map(|slot| slot.status).unwrap_or_default()
    }

    /// 只有 Ready 的目标才返回 image，其余情况由调用方使用占位纹理
    pub fn get_texture(&self, key: TextureKey) -> Option<vk::Image> {
        let slot = self.texture_slots.get(&key)?;
        match slot.status {
            LoadStatus::Ready => slot.image.map(|image| image.image),
            _ => None,
        }
    }

    pub fn get_model_status(&self, handle: AssetModelHandle) -> LoadStatus {
        self.models.get(handle).map(|model| model.status).unwrap_or(LoadStatus::Failed)
    }

    pub fn get_model(&self, handle: AssetModelHandle) -> Option<ModelBuffers> {
        let model = self.models.get(handle)?;
        if model.status == LoadStatus::Ready { model.buffers } else { None }
    }

    #[inline]
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    #[inline]
    pub fn num_texture_threads(&self) -> usize {
        self.texture_loaders.len()
    }

    /// 所有线程上还没有处理完的任务数
    pub fn num_pending(&self) -> usize {
        self.texture_loaders.iter().map(|loader| loader.num_pending()).sum::<usize>() + self.model_loader.num_pending()
    }

    /// 每个纹理线程当前排队的任务数
    pub fn thread_queue_depths(&self) -> Vec<usize> {
        self.texture_loaders.iter().map(|loader| loader.num_queued()).collect()
    }

    pub fn stats(&self) -> BackgroundCacheStats {
        let threads = self
            .texture_loaders
            .iter()
            .map(|loader| (loader.name(), loader.num_queued(), loader.stats()))
            .chain(std::iter::once((
                self.model_loader.name(),
                self.model_loader.num_queued(),
                self.model_loader.stats(),
            )))
            .map(|(name, queued, stats)| LoaderThreadStats {
                name: name.to_string(),
                queued,
                loaded: stats.loaded,
                failed: stats.failed,
                decode: stats.decode.summary(),
            })
            .collect();

        BackgroundCacheStats {
            primary: self.primary_depth,
            secondary: self.secondary_depth,
            collisions: self.collisions,
            loaded: self.loaded,
            failed: self.failed,
            models_loaded: self.models_loaded,
            threads,
            integration: self.integration_time.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::TexLoadFlags;
    use crate::decode::dds::build_dds;
    use crate::lump::MemoryLumps;
    use bgcache_gfx::device::headless::{HeadlessDevice, RecordedOp};
    use bgcache_gfx::foundation::queue_family::GfxQueueFamilies;
    use bgcache_gfx::resources::format::GfxTexelFormat;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    const WAIT: Duration = Duration::from_secs(10);

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([1, 2, 3, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn settings(threads: usize, budget: usize, background_upload: bool) -> StreamingSettings {
        StreamingSettings {
            texture_threads: threads,
            max_integrations_per_update: budget,
            background_upload,
            ..Default::default()
        }
    }

    /// graphics family 0 有 4 个队列，外加一个 transfer-only family
    fn vulkan_slots() -> UploadSlots {
        let props = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                queue_count: 4,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
        ];
        UploadSlots::vulkan(&GfxQueueFamilies::from_props(&props).unwrap())
    }

    fn key(texture: AssetTextureHandle) -> TextureKey {
        TextureKey {
            texture,
            translation: 0,
            scale_flags: 0,
        }
    }

    fn hub_with(
        settings: &StreamingSettings,
        slots: UploadSlots,
        lumps: &Arc<MemoryLumps>,
    ) -> (Arc<HeadlessDevice>, AssetHub) {
        let device = Arc::new(HeadlessDevice::new());
        let hub = AssetHub::new(settings, device.clone(), slots, lumps.clone());
        (device, hub)
    }

    fn png_lumps(count: usize) -> Arc<MemoryLumps> {
        let lumps = Arc::new(MemoryLumps::new());
        for i in 0..count {
            lumps.insert(format!("tex{}.png", i), png_bytes(8, 8));
        }
        lumps
    }

    #[test]
    fn test_bc7_texture_becomes_ready() {
        let lumps = Arc::new(MemoryLumps::new());
        lumps.insert("bc7.dds", build_dds(GfxTexelFormat::Bc7, 64, 64, 7));
        let (device, mut hub) = hub_with(&settings(1, 100, true), vulkan_slots(), &lumps);

        let texture = hub.register_texture("bc7.dds", TexLoadOptions::default());
        assert!(hub.background_cache_texture_material(key(texture), false));
        assert_eq!(hub.get_status(key(texture)), LoadStatus::Loading);
        assert_eq!(hub.get_texture(key(texture)), None);

        hub.start_background_cache().unwrap();
        hub.flush_background();

        assert_eq!(hub.get_status(key(texture)), LoadStatus::Ready);
        let image = hub.get_texture(key(texture)).unwrap();

        let ops = device.ops();
        assert_eq!(ops.iter().filter(|op| matches!(op, RecordedOp::CreateStaging { .. })).count(), 7);
        let extents: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::CopyBufferToImage { dst, extent, .. } if *dst == image => Some(extent.width),
                _ => None,
            })
            .collect();
        assert_eq!(extents, vec![64, 32, 16, 8, 4, 2, 1]);

        // 第一个槽位是 transfer-only family：上传队列 release，graphics 队列 acquire
        let acquire_queues: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Barrier { queue, barrier } if barrier.is_ownership_transfer() => Some(*queue),
                _ => None,
            })
            .collect();
        assert_eq!(acquire_queues.len(), 2);
        assert_eq!(acquire_queues[1], vulkan_slots().graphics_queue());
    }

    #[test]
    fn test_integration_budget() {
        let lumps = png_lumps(5);
        let (_device, mut hub) = hub_with(&settings(2, 2, true), vulkan_slots(), &lumps);

        let keys = (0..5)
            .map(|i| key(hub.register_texture(format!("tex{}.png", i), TexLoadOptions::default())))
            .collect_vec();
        assert_eq!(hub.background_cache_material(&keys, false), 5);

        hub.start_background_cache().unwrap();
        assert!(hub.wait_background_idle(WAIT));

        assert_eq!(hub.update_background_cache(false), 2);
        // 还没集成的结果处于 Uploading
        let uploading = keys.iter().filter(|&&k| hub.get_status(k) == LoadStatus::Uploading).count();
        assert_eq!(uploading, 3);

        assert_eq!(hub.update_background_cache(false), 2);
        assert_eq!(hub.update_background_cache(false), 1);
        assert_eq!(hub.update_background_cache(false), 0);
        assert!(keys.iter().all(|&k| hub.get_status(k) == LoadStatus::Ready));
        assert_eq!(hub.stats().loaded, 5);
        assert_eq!(hub.stats().integration.samples, 5);
    }

    #[test]
    fn test_least_queued_distribution() {
        let lumps = png_lumps(10);
        let (_device, mut hub) = hub_with(&settings(3, 0, true), vulkan_slots(), &lumps);
        assert_eq!(hub.num_texture_threads(), 3);

        for i in 0..10 {
            let texture = hub.register_texture(format!("tex{}.png", i), TexLoadOptions::default());
            hub.background_cache_texture_material(key(texture), false);
        }

        let depths = hub.thread_queue_depths();
        assert_eq!(depths, vec![4, 3, 3]);
        let spread = depths.iter().max().unwrap() - depths.iter().min().unwrap();
        assert!(spread <= 1);
        assert_eq!(hub.stats().primary.max, 10);
    }

    #[test]
    fn test_collision_loads_once() {
        let lumps = png_lumps(1);
        let (device, mut hub) = hub_with(&settings(2, 0, true), vulkan_slots(), &lumps);
        let texture = hub.register_texture("tex0.png", TexLoadOptions::default());

        assert!(hub.background_cache_texture_material(key(texture), false));
        assert!(!hub.background_cache_texture_material(key(texture), true));
        assert_eq!(hub.stats().collisions, 1);

        // 不同 translation 是另一个目标
        let translated = TextureKey {
            translation: 3,
            ..key(texture)
        };
        assert!(hub.background_cache_texture_material(translated, false));

        hub.start_background_cache().unwrap();
        hub.flush_background();

        assert_eq!(hub.get_status(key(texture)), LoadStatus::Ready);
        assert_eq!(hub.get_status(translated), LoadStatus::Ready);
        assert_eq!(device.count_ops(|op| matches!(op, RecordedOp::CreateImage { .. })), 2);

        // Ready 之后不会重新加载
        assert!(!hub.background_cache_texture_material(key(texture), false));
        assert_eq!(hub.stats().collisions, 1);
    }

    #[test]
    fn test_main_thread_upload_without_background() {
        let lumps = png_lumps(1);
        let options = TexLoadOptions {
            flags: TexLoadFlags::GENERATE_MIPS,
            reduce: 0,
        };
        let (device, mut hub) = hub_with(&settings(2, 0, false), vulkan_slots(), &lumps);
        let texture = hub.register_texture("tex0.png", options);

        hub.start_background_cache().unwrap();
        hub.background_cache_texture_material(key(texture), false);
        hub.flush_background();

        assert_eq!(hub.get_status(key(texture)), LoadStatus::Ready);
        // 8x8 -> 4 个 mip，全部在 graphics 队列上拷贝
        let graphics = vulkan_slots().graphics_queue();
        let copies = device.count_ops(|op| matches!(op, RecordedOp::CopyBufferToImage { queue, .. } if *queue == graphics));
        assert_eq!(copies, 4);
    }

    #[test]
    fn test_failed_lump_marks_failed() {
        let lumps = Arc::new(MemoryLumps::new());
        lumps.insert("broken.png", b"not an image".to_vec());
        let (device, mut hub) = hub_with(&settings(1, 0, true), vulkan_slots(), &lumps);

        let broken = hub.register_texture("broken.png", TexLoadOptions::default());
        let missing = hub.register_texture("missing.png", TexLoadOptions::default());
        hub.start_background_cache().unwrap();
        hub.background_cache_texture_material(key(broken), false);
        hub.background_cache_texture_material(key(missing), false);
        hub.flush_background();

        assert_eq!(hub.get_status(key(broken)), LoadStatus::Failed);
        assert_eq!(hub.get_status(key(missing)), LoadStatus::Failed);
        assert_eq!(hub.get_texture(key(broken)), None);
        assert_eq!(hub.stats().failed, 2);
        assert_eq!(device.count_ops(|op| matches!(op, RecordedOp::CreateImage { .. })), 0);

        // 失败的目标不会再次尝试
        assert!(!hub.background_cache_texture_material(key(broken), false));
    }

    #[test]
    fn test_stop_resets_queued_entries() {
        let lumps = png_lumps(3);
        let (_device, mut hub) = hub_with(&settings(1, 0, true), vulkan_slots(), &lumps);
        let keys = (0..3)
            .map(|i| key(hub.register_texture(format!("tex{}.png", i), TexLoadOptions::default())))
            .collect_vec();
        hub.background_cache_material(&keys, true);

        // 线程从未启动，所有请求都还在队列里
        hub.stop_background_cache();
        assert!(keys.iter().all(|&k| hub.get_status(k) == LoadStatus::Unloaded));
        assert!(!hub.is_accepting());
        assert!(!hub.background_cache_texture_material(keys[0], false));

        // 重新启动后可以再次请求
        hub.start_background_cache().unwrap();
        assert_eq!(hub.background_cache_material(&keys, false), 3);
        hub.flush_background();
        assert!(keys.iter().all(|&k| hub.get_status(k) == LoadStatus::Ready));
    }

    #[test]
    fn test_model_upload() {
        let lumps = Arc::new(MemoryLumps::new());
        lumps.insert("tri.obj", b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".to_vec());
        // 只有一个上传槽位：纹理线程占用后，模型在主线程上传
        let slots = UploadSlots::shared_context(0, 1);
        let (device, mut hub) = hub_with(&settings(1, 0, true), slots, &lumps);

        let model = hub.register_model("tri.obj");
        assert_eq!(hub.register_model("tri.obj"), model);
        hub.start_background_cache().unwrap();
        assert!(hub.background_cache_model(model));
        hub.flush_background();

        assert_eq!(hub.get_model_status(model), LoadStatus::Ready);
        let buffers = hub.get_model(model).unwrap();
        assert_eq!(buffers.index_count, 3);
        assert_eq!(device.count_ops(|op| matches!(op, RecordedOp::CreateBuffer { .. })), 2);
        assert_eq!(hub.stats().models_loaded, 1);

        hub.destroy();
        assert_eq!(device.count_ops(|op| matches!(op, RecordedOp::DestroyBuffer(_))), 2);
    }
}
