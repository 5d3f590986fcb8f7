use crate::wav::DecodedSound;
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;

new_key_type! { pub struct SoundId; }

/// 场景中的发声物体
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActorId(pub u32);

/// 由调用方分配，用于精确地停止某一次播放
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SoundHandle(pub u64);

/// 声音从哪里发出
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SoundSource {
    /// 不附着任何位置（UI、听者自身）
    Unattached,
    /// 固定在世界中的某个位置
    Positional([f32; 3]),
    /// 跟随 actor 移动
    Actor(ActorId),
}

/// 一次播放指令
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayInfo {
    pub source: SoundSource,
    pub channel: i32,
    pub volume: f32,
    /// 距离衰减系数
    pub attenuation: f32,
    pub looped: bool,
    pub handle: SoundHandle,
}

impl PlayInfo {
    pub fn new(source: SoundSource, channel: i32, handle: SoundHandle) -> Self {
        Self {
            source,
            channel,
            volume: 1.0,
            attenuation: 1.0,
            looped: false,
            handle,
        }
    }

    pub fn looped(mut self) -> Self {
        self.looped = true;
        self
    }

    #[inline]
    pub fn is_from_actor(&self, actor: ActorId) -> bool {
        self.source == SoundSource::Actor(actor)
    }
}

/// 真正播放声音的一方（混音器 / 音频后端）
pub trait SoundSink {
    fn start_sound(&mut self, sound: SoundId, data: &DecodedSound, play: &PlayInfo);
}

struct SoundSlot {
    name: String,
    data: Option<DecodedSound>,
    /// 加载失败过，之后不再尝试
    unplayable: bool,
}

/// 所有音效的持久槽位，只在主线程访问
#[derive(Default)]
pub struct SoundTable {
    slots: SlotMap<SoundId, SoundSlot>,
    by_name: HashMap<String, SoundId>,
}

// tools
impl SoundTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个音效；同名只登记一次
    pub fn register(&mut self, name: impl Into<String>) -> SoundId {
        let name = name.into();
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        let id = self.slots.insert(SoundSlot {
            name: name.clone(),
            data: None,
            unplayable: false,
        });
        self.by_name.insert(name, id);
        id
    }

    /// 写入解码结果
    ///
    /// 槽位已经有数据时（另一个线程先完成了加载）丢弃这份结果并返回 false。
    pub fn store(&mut self, id: SoundId, data: DecodedSound) -> bool {
        let Some(slot) = self.slots.get_mut(id) else {
            return false;
        };
        if slot.data.is_some() {
            return false;
        }
        slot.data = Some(data);
        slot.unplayable = false;
        true
    }

    pub fn mark_unplayable(&mut self, id: SoundId) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.unplayable = true;
        }
    }

    /// 释放所有已解码的数据，失败标记也一起清除
    pub fn unload_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.data = None;
            slot.unplayable = false;
        }
    }
}

// getters
impl SoundTable {
    pub fn find(&self, name: &str) -> Option<SoundId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: SoundId) -> Option<&str> {
        self.slots.get(id).map(|slot| slot.name.as_str())
    }

    pub fn data(&self, id: SoundId) -> Option<&DecodedSound> {
        self.slots.get(id)?.data.as_ref()
    }

    #[inline]
    pub fn is_loaded(&self, id: SoundId) -> bool {
        self.data(id).is_some()
    }

    #[inline]
    pub fn is_unplayable(&self, id: SoundId) -> bool {
        self.slots.get(id).is_some_and(|slot| slot.unplayable)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::{build_wav, decode_wav};

    #[test]
    fn test_first_loader_wins() {
        let mut table = SoundTable::new();
        let id = table.register("dsshotgn");
        assert_eq!(table.register("dsshotgn"), id);

        let first = decode_wav(&build_wav(1, 11025, 8, 10, None)).unwrap();
        let late = decode_wav(&build_wav(1, 22050, 8, 20, None)).unwrap();
        assert!(table.store(id, first));
        assert!(!table.store(id, late));
        assert_eq!(table.data(id).unwrap().info.rate, 11025);
    }

    #[test]
    fn test_unplayable() {
        let mut table = SoundTable::new();
        let id = table.register("missing");
        table.mark_unplayable(id);
        assert!(table.is_unplayable(id));
        assert!(!table.is_loaded(id));

        table.unload_all();
        assert!(!table.is_unplayable(id));
    }
}
