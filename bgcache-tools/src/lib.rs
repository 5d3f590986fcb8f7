//! bgcache 工具集
//!
//! 提供日志初始化、后台加载配置的读写等通用工具。
//!
//! # StreamingSettings
//! 后台纹理/模型/音频加载的运行参数，可通过 TOML 配置文件管理。

pub mod init_log;
pub mod settings;
