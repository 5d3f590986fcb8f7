use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 纹理加载线程数的硬上限
///
/// 可以进行后台上传的队列是稀缺的硬件资源，无论配置写多少都不会超过这个值。
pub const MAX_TEXTURE_THREADS: usize = 8;

/// 音频解码线程数的硬上限
pub const MAX_AUDIO_THREADS: usize = 4;

/// 渲染后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 有独立 transfer/compute queue family 时走 ownership transfer
    Vulkan,
    /// 每个线程一个共享 context，上传和采样在同一个 family
    OpenGl,
}

/// 后台加载的运行参数
///
/// 对应 TOML 配置文件，缺省字段使用 [`StreamingSettings::default`] 的值。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// 纹理加载线程数，会被 clamp 到 `1..=MAX_TEXTURE_THREADS`
    pub texture_threads: usize,

    /// 每次 `update_background_cache` 最多集成多少个完成的结果，0 表示不限制
    pub max_integrations_per_update: usize,

    /// 是否允许在后台线程直接进行 GPU 上传
    ///
    /// 为 false 时 worker 只做解码，上传留给主线程。
    pub background_upload: bool,

    /// 音频解码线程数，会被 clamp 到 `1..=MAX_AUDIO_THREADS`
    pub audio_threads: usize,

    pub backend: BackendKind,

    /// 日志等级，例如 "info"、"debug"
    pub log_level: String,

    /// headless app 每隔多少帧打印一次统计
    pub stats_interval_frames: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            texture_threads: 2,
            max_integrations_per_update: 100,
            background_upload: true,
            audio_threads: 2,
            backend: BackendKind::Vulkan,
            log_level: "info".to_string(),
            stats_interval_frames: 60,
        }
    }
}

// new & init
impl StreamingSettings {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read settings file: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content).with_context(|| format!("failed to parse settings file: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let settings: StreamingSettings = toml::from_str(content)?;
        Ok(settings)
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize settings")?;

        fs::write(path.as_ref(), content)
            .with_context(|| format!("failed to write settings file: {:?}", path.as_ref()))?;

        Ok(())
    }
}

// getters
impl StreamingSettings {
    /// 实际使用的纹理线程数
    #[inline]
    pub fn effective_texture_threads(&self) -> usize {
        self.texture_threads.clamp(1, MAX_TEXTURE_THREADS)
    }

    /// 实际使用的音频线程数
    #[inline]
    pub fn effective_audio_threads(&self) -> usize {
        self.audio_threads.clamp(1, MAX_AUDIO_THREADS)
    }

    /// 每帧集成预算，`None` 表示不限制
    #[inline]
    pub fn integration_budget(&self) -> Option<usize> {
        if self.max_integrations_per_update == 0 { None } else { Some(self.max_integrations_per_update) }
    }
}
