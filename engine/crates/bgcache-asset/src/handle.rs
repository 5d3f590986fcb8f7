use slotmap::new_key_type;

new_key_type! { pub struct AssetTextureHandle; }
new_key_type! { pub struct AssetModelHandle; }

/// 一个纹理的目标资源：同一张源纹理，不同的 translation（调色板重映射）和缩放标志
/// 对应不同的 GPU image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub texture: AssetTextureHandle,
    pub translation: u32,
    pub scale_flags: u32,
}

/// 资源加载状态机
///
/// 状态流转: Unloaded -> Loading -> Uploading -> Ready
///                        \-> Failed     \-> Failed
///
/// 只有 Ready 状态的资源可以被渲染使用。
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum LoadStatus {
    /// 初始状态，资源尚未请求加载（或请求在停止时被取消）
    #[default]
    Unloaded,
    /// 已经入队，后台线程正在读取 lump 或解码
    Loading,
    /// worker 已经完成 GPU 上传，等待主线程集成（acquire ownership、替换句柄）
    Uploading,
    /// GPU 资源已完全就绪，可以用于渲染
    Ready,
    /// lump 不存在、格式错误、解码或 GPU 创建失败
    Failed,
}
