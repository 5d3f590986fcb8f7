use anyhow::Context;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// 资源文件（lump）的读取接口
///
/// 后台线程通过它取得原始字节；打开失败或读取失败都以 `Err` 返回，
/// 由 loader 转换为失败的加载结果。
pub trait LumpReader: Send + Sync {
    fn open(&self, lump: &str) -> anyhow::Result<Box<dyn Read + Send + '_>>;

    fn length(&self, lump: &str) -> anyhow::Result<u64>;

    /// 读出整个 lump
    fn read_all(&self, lump: &str) -> anyhow::Result<Vec<u8>> {
        let length = self.length(lump)?;
        let mut data = Vec::with_capacity(length as usize);
        self.open(lump)?
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read lump {}", lump))?;
        if data.len() as u64 != length {
            anyhow::bail!("lump {} is truncated: {} of {} bytes", lump, data.len(), length);
        }
        Ok(data)
    }
}

/// 以目录中的文件作为 lump，lump 名为相对路径
pub struct DirectoryLumps {
    root: PathBuf,
}

impl DirectoryLumps {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, lump: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(lump);
        // 不允许跳出根目录
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            anyhow::bail!("invalid lump name {}", lump);
        }
        Ok(self.root.join(relative))
    }
}

impl LumpReader for DirectoryLumps {
    fn open(&self, lump: &str) -> anyhow::Result<Box<dyn Read + Send + '_>> {
        let path = self.resolve(lump)?;
        let file = File::open(&path).with_context(|| format!("failed to open lump file: {:?}", path))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn length(&self, lump: &str) -> anyhow::Result<u64> {
        let path = self.resolve(lump)?;
        let metadata = std::fs::metadata(&path).with_context(|| format!("failed to stat lump file: {:?}", path))?;
        Ok(metadata.len())
    }
}

/// 内存中的 lump 集合，测试和 headless app 使用
#[derive(Default)]
pub struct MemoryLumps {
    lumps: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryLumps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, lump: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        self.lumps.write().insert(lump.into(), data.into());
    }

    pub fn len(&self) -> usize {
        self.lumps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lumps.read().is_empty()
    }

    fn get(&self, lump: &str) -> anyhow::Result<Arc<[u8]>> {
        self.lumps
            .read()
            .get(lump)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("lump {} not found", lump))
    }
}

impl LumpReader for MemoryLumps {
    fn open(&self, lump: &str) -> anyhow::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(Cursor::new(self.get(lump)?)))
    }

    fn length(&self, lump: &str) -> anyhow::Result<u64> {
        Ok(self.get(lump)?.len() as u64)
    }
}
