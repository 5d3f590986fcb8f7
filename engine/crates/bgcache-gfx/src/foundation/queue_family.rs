use ash::vk;
use itertools::Itertools;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxQueueFamily {
    pub name: String,
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// 设备上与上传相关的 queue family
#[derive(Clone, Debug)]
pub struct GfxQueueFamilies {
    /// 全能的 family：graphics, compute, transfer
    pub gfx: GfxQueueFamily,
    /// compute only（不含 graphics）
    pub compute: Option<GfxQueueFamily>,
    /// transfer only（不含 graphics 和 compute）
    pub transfer: Option<GfxQueueFamily>,
}

impl GfxQueueFamilies {
    /// 从驱动报告的 queue family 属性中找出三类 family
    pub fn from_props(queue_family_props: &[vk::QueueFamilyProperties]) -> anyhow::Result<Self> {
        log::info!("queue family props:\n{:#?}", queue_family_props);

        // 找到符合条件的 queue family
        let find_queue_family = |name: &str, include_flags: vk::QueueFlags, exclude_flags: vk::QueueFlags| {
            queue_family_props
                .iter()
                .enumerate()
                .find(|(_, props)| {
                    props.queue_count > 0
                        && props.queue_flags.contains(include_flags)
                        && (props.queue_flags & exclude_flags).is_empty()
                })
                .map(|(family_idx, props)| GfxQueueFamily {
                    name: name.to_string(),
                    queue_family_index: family_idx as u32,
                    queue_flags: props.queue_flags,
                    queue_count: props.queue_count,
                })
        };

        let gfx = find_queue_family(
            "gfx",
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::empty(),
        )
        .ok_or_else(|| anyhow::anyhow!("no queue family supports graphics + compute + transfer"))?;

        // compute 队列隐含 transfer 能力，即使驱动没有显式报告 TRANSFER 位
        let compute = find_queue_family("compute-only", vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS);

        let transfer = find_queue_family(
            "transfer-only",
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        );

        Ok(Self { gfx, compute, transfer })
    }
}

/// 某个 family 中的一个具体队列
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxQueueId {
    pub family_index: u32,
    pub queue_index: u32,
}

/// 一个上传 worker 独占的队列
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadSlot {
    pub queue: GfxQueueId,
    /// 上传队列和 graphics 队列不在同一个 family 时，需要 release/acquire ownership
    pub needs_ownership_transfer: bool,
}

/// worker 线程 -> 上传队列的路由表
///
/// 在设备创建时计算一次，之后不再改变。
/// 每个槽位对应一个独占的队列，worker 录制和提交命令时不需要和其他线程同步。
#[derive(Clone, Debug)]
pub struct UploadSlots {
    graphics_queue: GfxQueueId,
    slots: Vec<UploadSlot>,
}

// new & init
impl UploadSlots {
    /// Vulkan：优先使用 transfer-only 队列，其次 compute-only 队列，
    /// 最后是 graphics family 中除主渲染队列（index 0）之外的队列
    pub fn vulkan(families: &GfxQueueFamilies) -> Self {
        let graphics_family = families.gfx.queue_family_index;
        let graphics_queue = GfxQueueId {
            family_index: graphics_family,
            queue_index: 0,
        };

        let dedicated = [families.transfer.as_ref(), families.compute.as_ref()]
            .into_iter()
            .flatten()
            .flat_map(|family| {
                (0..family.queue_count).map(|queue_index| GfxQueueId {
                    family_index: family.queue_family_index,
                    queue_index,
                })
            });
        let shared_family = (1..families.gfx.queue_count).map(|queue_index| GfxQueueId {
            family_index: graphics_family,
            queue_index,
        });

        let slots = dedicated
            .chain(shared_family)
            .map(|queue| UploadSlot {
                queue,
                needs_ownership_transfer: queue.family_index != graphics_family,
            })
            .collect_vec();

        log::info!(
            "upload slots: {} ({} with ownership transfer)",
            slots.len(),
            slots.iter().filter(|slot| slot.needs_ownership_transfer).count()
        );

        Self { graphics_queue, slots }
    }

    /// OpenGL：每个 worker 一个与主 context 共享资源的 context，都在同一个 family 上
    pub fn shared_context(graphics_family: u32, contexts: usize) -> Self {
        let slots = (0..contexts as u32)
            .map(|i| UploadSlot {
                queue: GfxQueueId {
                    family_index: graphics_family,
                    queue_index: i + 1,
                },
                needs_ownership_transfer: false,
            })
            .collect();

        Self {
            graphics_queue: GfxQueueId {
                family_index: graphics_family,
                queue_index: 0,
            },
            slots,
        }
    }
}

// getters
impl UploadSlots {
    #[inline]
    pub fn graphics_queue(&self) -> GfxQueueId {
        self.graphics_queue
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 没有任何可用的上传队列时，只能由主线程上传
    #[inline]
    pub fn supports_background_upload(&self) -> bool {
        !self.slots.is_empty()
    }

    #[inline]
    pub fn get(&self, worker_index: usize) -> Option<UploadSlot> {
        self.slots.get(worker_index).copied()
    }
}
