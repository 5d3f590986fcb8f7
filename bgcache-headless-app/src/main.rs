mod level;

use ash::vk;
use bgcache_asset::lump::MemoryLumps;
use bgcache_asset::{AssetHub, LoadStatus, TextureKey};
use bgcache_audio::wav::DecodedSound;
use bgcache_audio::{ActorId, AudioLoaderQueue, PlayInfo, SoundHandle, SoundId, SoundSink, SoundSource, SoundTable};
use bgcache_gfx::device::headless::HeadlessDevice;
use bgcache_gfx::foundation::queue_family::{GfxQueueFamilies, UploadSlots};
use bgcache_tools::init_log::{init_log, parse_level};
use bgcache_tools::settings::{BackendKind, StreamingSettings};
use std::sync::Arc;
use std::time::Duration;

const LEVELS: u32 = 2;
const TEXTURES_PER_LEVEL: u32 = 48;
const FRAMES_PER_LEVEL: u64 = 240;

/// 只统计和打印的混音器
#[derive(Default)]
struct LogSink {
    started: usize,
}

impl SoundSink for LogSink {
    fn start_sound(&mut self, sound: SoundId, data: &DecodedSound, play: &PlayInfo) {
        self.started += 1;
        log::debug!(
            "start sound {:?} ({:.2}s) on channel {} from {:?}",
            sound,
            data.duration_secs(),
            play.channel,
            play.source
        );
    }
}

/// 一个典型的独立显卡：graphics 16 个队列、compute-only 8 个、transfer-only 2 个
fn upload_slots(settings: &StreamingSettings) -> anyhow::Result<UploadSlots> {
    match settings.backend {
        BackendKind::Vulkan => {
            let props = [
                vk::QueueFamilyProperties {
                    queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                    queue_count: 16,
                    ..Default::default()
                },
                vk::QueueFamilyProperties {
                    queue_flags: vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                    queue_count: 8,
                    ..Default::default()
                },
                vk::QueueFamilyProperties {
                    queue_flags: vk::QueueFlags::TRANSFER,
                    queue_count: 2,
                    ..Default::default()
                },
            ];
            Ok(UploadSlots::vulkan(&GfxQueueFamilies::from_props(&props)?))
        }
        BackendKind::OpenGl => Ok(UploadSlots::shared_context(0, settings.effective_texture_threads() + 1)),
    }
}

fn run_level(
    settings: &StreamingSettings,
    hub: &mut AssetHub,
    audio: &mut AudioLoaderQueue,
    sounds: &mut SoundTable,
    sink: &mut LogSink,
    lumps: &MemoryLumps,
    level: u32,
) -> anyhow::Result<()> {
    let manifest = level::synthesize_level(lumps, level, TEXTURES_PER_LEVEL)?;
    log::info!(
        "level {}: {} textures, {} models, {} sounds",
        level,
        manifest.textures.len(),
        manifest.models.len(),
        manifest.sounds.len()
    );

    let keys: Vec<_> = manifest
        .textures
        .iter()
        .map(|(lump, options)| TextureKey {
            texture: hub.register_texture(lump.clone(), *options),
            translation: 0,
            scale_flags: 0,
        })
        .collect();
    let models: Vec<_> = manifest.models.iter().map(|lump| hub.register_model(lump.clone())).collect();
    let sound_ids: Vec<_> = manifest.sounds.iter().map(|name| sounds.register(name.clone())).collect();

    hub.start_background_cache()?;
    audio.start()?;

    // 预缓存：全部纹理进入低优先级队列
    hub.background_cache_material(&keys, true);
    for &sound in &sound_ids {
        audio.queue(sounds, sound, None);
    }

    for frame in 0..FRAMES_PER_LEVEL {
        let _span = bgcache_queue::profile_span!("frame");

        // 当前可见的纹理走主队列；已经在加载的会被计为 collision
        let visible = (frame as usize * 3) % keys.len();
        hub.background_cache_material(&keys[visible..(visible + 4).min(keys.len())], false);
        if frame % 30 == 0 {
            hub.background_cache_model(models[(frame / 30) as usize % models.len()]);
        }

        if frame % 10 == 0 {
            let actor = ActorId((frame / 10) as u32);
            let sound = sound_ids[(frame / 10) as usize % sound_ids.len()];
            let play = PlayInfo::new(SoundSource::Actor(actor), 1, SoundHandle(frame));
            if audio.queue(sounds, sound, Some(play)) == bgcache_audio::QueueOutcome::AlreadyLoaded
                && let Some(data) = sounds.data(sound)
            {
                sink.start_sound(sound, data, &play);
            }
            // actor 在同一帧被销毁，声音留在原地继续播放
            audio.relink_sound(actor, None, Some([frame as f32, 0.0, 0.0]));
        }

        hub.update_background_cache(false);
        audio.update(sounds, sink);

        if settings.stats_interval_frames > 0 && frame % settings.stats_interval_frames == 0 {
            log::info!("frame {}\n{}\n{}", frame, hub.stats(), audio.stats());
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    // 关卡结束：不允许旧的后台任务进入下一关
    hub.flush_background();
    hub.stop_background_cache();
    audio.clear();

    let ready = keys.iter().filter(|&&key| hub.get_status(key) == LoadStatus::Ready).count();
    let failed = keys.iter().filter(|&&key| hub.get_status(key) == LoadStatus::Failed).count();
    log::info!(
        "level {} done: {}/{} textures ready, {} failed, {} sounds started",
        level,
        ready,
        keys.len(),
        failed,
        sink.started
    );
    log::info!("final stats\n{}\n{}", hub.stats(), audio.stats());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let settings = match std::env::args().nth(1) {
        Some(path) => StreamingSettings::from_file(path)?,
        None => StreamingSettings::default(),
    };
    init_log(parse_level(&settings.log_level));
    tracy_client::Client::start();
    log::info!("settings: {:?}", settings);

    let device = Arc::new(HeadlessDevice::new().with_wait_latency(Duration::from_micros(200)));
    let lumps = Arc::new(MemoryLumps::new());

    let mut hub = AssetHub::new(&settings, device.clone(), upload_slots(&settings)?, lumps.clone());
    let mut audio = AudioLoaderQueue::new(&settings, lumps.clone());
    let mut sounds = SoundTable::new();
    let mut sink = LogSink::default();

    for level in 0..LEVELS {
        run_level(&settings, &mut hub, &mut audio, &mut sounds, &mut sink, &lumps, level)?;
        sounds.unload_all();
    }

    hub.destroy();
    log::info!(
        "shutdown: peak staging {} bytes, {} staging bytes leaked",
        device.peak_staging_bytes(),
        device.live_staging_bytes()
    );
    Ok(())
}
