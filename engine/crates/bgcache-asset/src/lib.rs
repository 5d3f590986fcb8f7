pub mod decode;
pub mod handle;
pub mod hub;
pub mod loader;
pub mod lump;

pub use handle::{AssetModelHandle, AssetTextureHandle, LoadStatus, TextureKey};
pub use hub::{AssetHub, BackgroundCacheStats};
