//! 后台资源上传使用的 GPU 抽象层
//!
//! - queue family 发现与上传槽位（worker 线程 -> 队列）的路由
//! - image/buffer barrier 的 builder，以及 queue family ownership 的 release/acquire
//! - 纹理格式与 mip 链的尺寸计算
//! - [`uploader::GfxUploader`]：逐 mip 经 staging buffer 上传，限制 staging 占用

pub mod commands;
pub mod device;
pub mod foundation;
pub mod resources;
pub mod uploader;
