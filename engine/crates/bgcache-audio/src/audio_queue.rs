use crate::sound::{ActorId, PlayInfo, SoundHandle, SoundId, SoundSink, SoundSource, SoundTable};
use crate::wav::{DecodedSound, decode_wav};
use bgcache_asset::lump::LumpReader;
use bgcache_queue::{ResourceDecoder, ResourceLoader, TimingStats, TimingSummary};
use bgcache_tools::settings::StreamingSettings;
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct AudioLoadRequest {
    pub sound: SoundId,
    pub lump: String,
    pub queued_at: Instant,
}

/// 解码结果；`data` 为 None 表示失败
pub struct AudioLoadResult {
    pub sound: SoundId,
    pub data: Option<DecodedSound>,
    pub queued_at: Instant,
    pub decode_time: Duration,
}

/// 音频线程的解码策略
pub struct AudioLoadDecoder {
    lumps: Arc<dyn LumpReader>,
}

impl AudioLoadDecoder {
    pub fn new(lumps: Arc<dyn LumpReader>) -> Self {
        Self { lumps }
    }
}

impl ResourceDecoder<AudioLoadRequest, AudioLoadResult> for AudioLoadDecoder {
    fn load_resource(&mut self, request: AudioLoadRequest) -> anyhow::Result<AudioLoadResult> {
        let start = Instant::now();
        let data = self
            .lumps
            .read_all(&request.lump)
            .and_then(|bytes| decode_wav(&bytes))
            .inspect_err(|err| log::warn!("failed to load sound {}: {:#}", request.lump, err))
            .ok();

        // 失败也要返回结果，主线程需要把声音标记为不可播放
        Ok(AudioLoadResult {
            sound: request.sound,
            data,
            queued_at: request.queued_at,
            decode_time: start.elapsed(),
        })
    }
}

/// [`AudioLoaderQueue::queue`] 的处理结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueOutcome {
    /// 新的解码任务已经派发
    Dispatched,
    /// 声音已经在加载中，播放指令追加到等待列表
    Appended,
    /// 数据已经就绪，调用方直接播放
    AlreadyLoaded,
    /// 之前加载失败过，不再尝试
    Unplayable,
    /// 未登记的 id
    Unknown,
}

/// 音频加载的统计快照
#[derive(Clone, Debug, Default)]
pub struct AudioLoaderStats {
    pub queued: usize,
    pub loaded: u64,
    pub failed: u64,
    /// 同一个声音在加载中再次被请求的次数
    pub collisions: u64,
    /// 从入队到集成完成
    pub total: TimingSummary,
    /// worker 线程上的解码耗时
    pub thread: TimingSummary,
    /// 主线程上的集成耗时
    pub integration: TimingSummary,
}

impl fmt::Display for AudioLoaderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "audio queued: {}, loaded: {}, failed: {}, collisions: {}",
            self.queued, self.loaded, self.failed, self.collisions
        )?;
        writeln!(f, "  total {}", self.total)?;
        writeln!(f, "  thread {}", self.thread)?;
        write!(f, "  integration {}", self.integration)
    }
}

/// 音效的后台加载队列
///
/// 一个声音在加载期间收到的所有播放请求都按顺序挂在等待列表上，加载完成后依次播放。
/// 停止、relink 只作用于等待列表，不会中断已经派发的解码。
///
/// 由音频子系统创建并持有，所有方法只在主线程调用。
pub struct AudioLoaderQueue {
    loaders: Vec<ResourceLoader<AudioLoadRequest, AudioLoadResult>>,
    /// 加载中的声音 -> 等待中的播放指令；预缓存请求对应空列表
    play_queue: HashMap<SoundId, Vec<PlayInfo>>,

    loaded: u64,
    failed: u64,
    collisions: u64,
    total_time: TimingStats,
    thread_time: TimingStats,
    integration_time: TimingStats,
}

// new & init
impl AudioLoaderQueue {
    pub fn new(settings: &StreamingSettings, lumps: Arc<dyn LumpReader>) -> Self {
        let thread_count = settings.effective_audio_threads();
        let loaders = (0..thread_count)
            .map(|i| ResourceLoader::new(format!("audio-loader-{}", i), AudioLoadDecoder::new(lumps.clone())))
            .collect_vec();
        log::info!("audio loader queue: {} threads", thread_count);

        Self {
            loaders,
            play_queue: HashMap::new(),
            loaded: 0,
            failed: 0,
            collisions: 0,
            total_time: TimingStats::default(),
            thread_time: TimingStats::default(),
            integration_time: TimingStats::default(),
        }
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        for loader in &mut self.loaders {
            loader.start()?;
        }
        Ok(())
    }
}

// destroy
impl AudioLoaderQueue {
    /// 丢弃所有排队的任务、已完成但未集成的结果和等待中的播放指令，并结束线程
    ///
    /// 正在解码的任务会先完成；之后可以再次 [`Self::start`]。
    pub fn clear(&mut self) {
        let _span = bgcache_queue::profile_span!("AudioLoaderQueue::clear");
        let mut dropped = 0;
        for loader in &mut self.loaders {
            dropped += loader.drain_queued().len();
            loader.stop();
            while loader.pop_finished().is_some() {
                dropped += 1;
            }
        }
        let plays = self.play_queue.drain().map(|(_, plays)| plays.len()).sum::<usize>();
        log::info!("audio loader queue cleared: {} loads and {} pending plays dropped", dropped, plays);
    }
}

// tools
impl AudioLoaderQueue {
    /// 请求加载并（可选地）播放一个声音
    ///
    /// `play` 为 None 时只预缓存。声音已经在任何一个线程上加载中时不会重复派发，
    /// 播放指令追加到等待列表；否则派发给待处理任务最少的线程。
    pub fn queue(&mut self, table: &SoundTable, sound: SoundId, play: Option<PlayInfo>) -> QueueOutcome {
        let _span = bgcache_queue::profile_span!("AudioLoaderQueue::queue");
        let Some(lump) = table.name(sound) else {
            return QueueOutcome::Unknown;
        };
        if table.is_loaded(sound) {
            return QueueOutcome::AlreadyLoaded;
        }
        if table.is_unplayable(sound) {
            return QueueOutcome::Unplayable;
        }

        if self.is_loading(sound) {
            self.collisions += 1;
            self.play_queue.entry(sound).or_default().extend(play);
            return QueueOutcome::Appended;
        }

        let Some(loader) = self.loaders.iter().min_by_key(|loader| loader.num_pending()) else {
            return QueueOutcome::Unknown;
        };
        loader.queue(AudioLoadRequest {
            sound,
            lump: lump.to_string(),
            queued_at: Instant::now(),
        });
        self.play_queue.insert(sound, play.into_iter().collect());
        QueueOutcome::Dispatched
    }

    /// 声音是否在加载中：等待列表中有记录，或者任意线程的输入/输出队列中有它的任务
    pub fn is_loading(&self, sound: SoundId) -> bool {
        self.play_queue.contains_key(&sound)
            || self.loaders.iter().any(|loader| {
                loader.any_queued(|request| request.sound == sound)
                    || loader.any_finished(|result| result.sound == sound)
            })
    }

    fn remove_plays(&mut self, mut pred: impl FnMut(SoundId, &PlayInfo) -> bool) -> usize {
        let mut removed = 0;
        for (&sound, plays) in self.play_queue.iter_mut() {
            let before = plays.len();
            plays.retain(|play| !pred(sound, play));
            removed += before - plays.len();
        }
        removed
    }

    /// 取消某个声音所有等待中的播放
    pub fn stop_sound(&mut self, sound: SoundId) -> usize {
        self.remove_plays(|id, _| id == sound)
    }

    /// 取消某个通道上所有等待中的播放
    pub fn stop_sound_on_channel(&mut self, channel: i32) -> usize {
        self.remove_plays(|_, play| play.channel == channel)
    }

    pub fn stop_actor_sound(&mut self, actor: ActorId, channel: i32) -> usize {
        self.remove_plays(|_, play| play.is_from_actor(actor) && play.channel == channel)
    }

    pub fn stop_sound_exact(&mut self, source: SoundSource, channel: i32, sound: SoundId) -> usize {
        self.remove_plays(|id, play| id == sound && play.source == source && play.channel == channel)
    }

    pub fn stop_sound_handle(&mut self, handle: SoundHandle) -> usize {
        self.remove_plays(|_, play| play.handle == handle)
    }

    /// 取消 actor 在一段通道上的所有等待中的播放
    pub fn stop_actor_sounds(&mut self, actor: ActorId, channels: RangeInclusive<i32>) -> usize {
        self.remove_plays(|_, play| play.is_from_actor(actor) && channels.contains(&play.channel))
    }

    /// actor 被销毁或替换时改写等待中的播放
    ///
    /// 1. `to` 存在：改为跟随 `to`
    /// 2. `to` 不存在、非循环、给出了位置：改为固定在 `pos` 的声音
    /// 3. 其余情况（循环声音没有可以附着的目标）取消播放
    ///
    /// 返回被取消的数量。
    pub fn relink_sound(&mut self, from: ActorId, to: Option<ActorId>, pos: Option<[f32; 3]>) -> usize {
        let mut cancelled = 0;
        for plays in self.play_queue.values_mut() {
            plays.retain_mut(|play| {
                if !play.is_from_actor(from) {
                    return true;
                }
                match (to, pos) {
                    (Some(actor), _) => {
                        play.source = SoundSource::Actor(actor);
                        true
                    }
                    (None, Some(pos)) if !play.looped => {
                        play.source = SoundSource::Positional(pos);
                        true
                    }
                    _ => {
                        cancelled += 1;
                        false
                    }
                }
            });
        }
        cancelled
    }

    /// 集成所有完成的解码（每帧调用，不限数量）
    ///
    /// 成功：写入 [`SoundTable`]，然后按入队顺序播放所有等待中的指令；
    /// 失败：标记为不可播放，丢弃等待中的指令。
    /// 返回集成的结果数。
    pub fn update(&mut self, table: &mut SoundTable, sink: &mut dyn SoundSink) -> usize {
        let _span = bgcache_queue::profile_span!("AudioLoaderQueue::update");
        let mut integrated = 0;
        for index in 0..self.loaders.len() {
            while let Some(result) = self.loaders[index].pop_finished() {
                self.integrate(result, table, sink);
                integrated += 1;
            }
        }
        integrated
    }

    fn integrate(&mut self, result: AudioLoadResult, table: &mut SoundTable, sink: &mut dyn SoundSink) {
        let start = Instant::now();
        let plays = self.play_queue.remove(&result.sound).unwrap_or_default();

        match result.data {
            Some(data) => {
                if !table.store(result.sound, data) {
                    log::debug!("sound {:?} already loaded, late result discarded", result.sound);
                }
                if let Some(data) = table.data(result.sound) {
                    for play in &plays {
                        sink.start_sound(result.sound, data, play);
                    }
                }
                self.loaded += 1;
            }
            None => {
                table.mark_unplayable(result.sound);
                if !plays.is_empty() {
                    log::debug!("dropping {} plays of unplayable sound {:?}", plays.len(), result.sound);
                }
                self.failed += 1;
            }
        }

        self.integration_time.record(start.elapsed());
        self.thread_time.record(result.decode_time);
        self.total_time.record(result.queued_at.elapsed());
    }

    /// 等待所有线程空闲，超时返回 false
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.loaders
            .iter()
            .all(|loader| loader.wait_idle(deadline.saturating_duration_since(Instant::now())))
    }
}

// getters
impl AudioLoaderQueue {
    /// 某个声音等待中的播放指令
    pub fn pending_plays(&self, sound: SoundId) -> &[PlayInfo] {
        self.play_queue.get(&sound).map(Vec::as_slice).unwrap_or(&[])
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.loaders.len()
    }

    pub fn thread_queue_depths(&self) -> Vec<usize> {
        self.loaders.iter().map(|loader| loader.num_queued()).collect()
    }

    /// 所有线程累计的解码次数（包括失败的解码）
    pub fn num_decodes(&self) -> u64 {
        self.loaders.iter().map(|loader| loader.stats().loaded).sum()
    }

    pub fn stats(&self) -> AudioLoaderStats {
        AudioLoaderStats {
            queued: self.loaders.iter().map(|loader| loader.num_pending()).sum(),
            loaded: self.loaded,
            failed: self.failed,
            collisions: self.collisions,
            total: self.total_time.summary(),
            thread: self.thread_time.summary(),
            integration: self.integration_time.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::build_wav;
    use bgcache_asset::lump::MemoryLumps;

    const WAIT: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct RecordingSink {
        started: Vec<(SoundId, PlayInfo)>,
    }

    impl SoundSink for RecordingSink {
        fn start_sound(&mut self, sound: SoundId, _data: &DecodedSound, play: &PlayInfo) {
            self.started.push((sound, *play));
        }
    }

    fn setup(threads: usize) -> (AudioLoaderQueue, SoundTable) {
        let lumps = Arc::new(MemoryLumps::new());
        lumps.insert("dspistol", build_wav(1, 11025, 8, 256, None));
        lumps.insert("dsfirxpl", build_wav(2, 22050, 16, 128, Some(4)));
        lumps.insert("dsbroken", b"RIFF garbage".to_vec());

        let settings = StreamingSettings {
            audio_threads: threads,
            ..Default::default()
        };
        let queue = AudioLoaderQueue::new(&settings, lumps);
        let mut table = SoundTable::new();
        for name in ["dspistol", "dsfirxpl", "dsbroken", "dsmissing"] {
            table.register(name);
        }
        (queue, table)
    }

    fn play(actor: u32, channel: i32, handle: u64) -> PlayInfo {
        PlayInfo::new(SoundSource::Actor(ActorId(actor)), channel, SoundHandle(handle))
    }

    fn finish(queue: &mut AudioLoaderQueue, table: &mut SoundTable, sink: &mut RecordingSink) -> usize {
        queue.start().unwrap();
        assert!(queue.wait_idle(WAIT));
        queue.update(table, sink)
    }

    #[test]
    fn test_three_plays_one_decode() {
        let (mut queue, mut table) = setup(2);
        let pistol = table.find("dspistol").unwrap();

        assert_eq!(queue.queue(&table, pistol, Some(play(1, 0, 1))), QueueOutcome::Dispatched);
        assert_eq!(queue.queue(&table, pistol, Some(play(2, 1, 2))), QueueOutcome::Appended);
        assert_eq!(queue.queue(&table, pistol, Some(play(3, 2, 3))), QueueOutcome::Appended);
        assert_eq!(queue.pending_plays(pistol).len(), 3);

        let mut sink = RecordingSink::default();
        assert_eq!(finish(&mut queue, &mut table, &mut sink), 1);

        assert_eq!(queue.num_decodes(), 1);
        let handles = sink.started.iter().map(|(_, play)| play.handle.0).collect_vec();
        assert_eq!(handles, vec![1, 2, 3]);
        assert!(table.is_loaded(pistol));
        assert!(!queue.is_loading(pistol));
        assert_eq!(queue.stats().collisions, 2);

        // 已经加载的声音由调用方直接播放
        assert_eq!(queue.queue(&table, pistol, Some(play(1, 0, 4))), QueueOutcome::AlreadyLoaded);
    }

    #[test]
    fn test_stop_before_load_plays_nothing() {
        let (mut queue, mut table) = setup(1);
        let pistol = table.find("dspistol").unwrap();
        queue.queue(&table, pistol, Some(play(1, 0, 1)));
        queue.queue(&table, pistol, Some(play(2, 0, 2)));

        assert_eq!(queue.stop_sound(pistol), 2);
        // 解码仍然进行，只是不会播放
        assert!(queue.is_loading(pistol));

        let mut sink = RecordingSink::default();
        finish(&mut queue, &mut table, &mut sink);
        assert!(sink.started.is_empty());
        assert!(table.is_loaded(pistol));
    }

    #[test]
    fn test_stop_variants() {
        let (mut queue, table) = setup(1);
        let pistol = table.find("dspistol").unwrap();
        let explode = table.find("dsfirxpl").unwrap();

        queue.queue(&table, pistol, Some(play(1, 0, 10)));
        queue.queue(&table, pistol, Some(play(1, 3, 11)));
        queue.queue(&table, pistol, Some(play(2, 3, 12)));
        queue.queue(&table, explode, Some(play(1, 5, 13)));
        queue.queue(&table, explode, Some(play(2, 6, 14)));

        assert_eq!(queue.stop_sound_handle(SoundHandle(10)), 1);
        assert_eq!(queue.stop_actor_sound(ActorId(2), 3), 1);
        assert_eq!(queue.stop_sound_exact(SoundSource::Actor(ActorId(1)), 3, explode), 0);
        assert_eq!(queue.stop_actor_sounds(ActorId(1), 3..=5), 2);
        assert_eq!(queue.stop_sound_on_channel(6), 1);
        assert!(queue.pending_plays(pistol).is_empty());
        assert!(queue.pending_plays(explode).is_empty());
    }

    #[test]
    fn test_relink() {
        let (mut queue, table) = setup(1);
        let pistol = table.find("dspistol").unwrap();
        let explode = table.find("dsfirxpl").unwrap();
        const POS: [f32; 3] = [1.0, 2.0, 3.0];

        queue.queue(&table, pistol, Some(play(7, 0, 1)));
        queue.queue(&table, explode, Some(play(7, 1, 2).looped()));
        queue.queue(&table, explode, Some(play(8, 1, 3).looped()));

        assert_eq!(queue.relink_sound(ActorId(7), None, Some(POS)), 1);
        assert_eq!(queue.pending_plays(pistol)[0].source, SoundSource::Positional(POS));
        // 循环声音没有目标可以附着，被取消
        let remaining = queue.pending_plays(explode);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].handle, SoundHandle(3));

        assert_eq!(queue.relink_sound(ActorId(8), Some(ActorId(9)), None), 0);
        assert_eq!(queue.pending_plays(explode)[0].source, SoundSource::Actor(ActorId(9)));
    }

    #[test]
    fn test_failed_sound_is_unplayable() {
        let (mut queue, mut table) = setup(2);
        let broken = table.find("dsbroken").unwrap();
        let missing = table.find("dsmissing").unwrap();
        queue.queue(&table, broken, Some(play(1, 0, 1)));
        queue.queue(&table, missing, None);

        let mut sink = RecordingSink::default();
        assert_eq!(finish(&mut queue, &mut table, &mut sink), 2);
        assert!(sink.started.is_empty());
        assert!(table.is_unplayable(broken));
        assert!(table.is_unplayable(missing));
        assert_eq!(queue.stats().failed, 2);

        // 不会再次尝试加载
        assert_eq!(queue.queue(&table, broken, None), QueueOutcome::Unplayable);
    }

    #[test]
    fn test_precache_and_stats() {
        let (mut queue, mut table) = setup(4);
        let pistol = table.find("dspistol").unwrap();
        let explode = table.find("dsfirxpl").unwrap();
        queue.queue(&table, pistol, None);
        queue.queue(&table, explode, None);
        assert_eq!(queue.thread_queue_depths(), vec![1, 1, 0, 0]);

        let mut sink = RecordingSink::default();
        assert_eq!(finish(&mut queue, &mut table, &mut sink), 2);
        assert!(sink.started.is_empty());
        assert_eq!(table.data(explode).unwrap().info.loop_start, Some(4));

        let stats = queue.stats();
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.total.samples, 2);
        assert_eq!(stats.thread.samples, 2);
        assert_eq!(stats.integration.samples, 2);
        assert!(stats.total.max >= stats.thread.min);
    }

    #[test]
    fn test_clear_drops_everything() {
        let (mut queue, table) = setup(1);
        let pistol = table.find("dspistol").unwrap();
        queue.queue(&table, pistol, Some(play(1, 0, 1)));

        queue.clear();
        assert!(!queue.is_loading(pistol));
        assert_eq!(queue.stats().queued, 0);
        assert!(queue.pending_plays(pistol).is_empty());
    }
}
