//! GPU API 的接缝
//!
//! 后台上传只依赖 [`GfxUploadDevice`] 这一组操作：创建 image/buffer、写 staging、
//! 在指定队列上提交命令、等待。[`headless::HeadlessDevice`] 记录所有操作，供测试和 headless app 使用。

pub mod headless;
pub mod upload_device;
