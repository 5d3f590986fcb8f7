//! worker 线程上运行的解码策略
//!
//! 两种策略都不会把解码错误作为 `Err` 交给 [`bgcache_queue::ResourceLoader`]：
//! 失败被编码在输出里，由主线程把目标资源标记为 Failed。

pub mod model;
pub mod texture;

use std::panic::{AssertUnwindSafe, catch_unwind};

/// 执行一次加载，把 panic 也转换为错误
pub(crate) fn guarded<T>(load: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(load)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow::anyhow!("panic during load: {}", message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_turns_panic_into_error() {
        let err = guarded::<()>(|| panic!("corrupt lump")).unwrap_err();
        assert!(err.to_string().contains("corrupt lump"), "{}", err);

        let err = guarded::<()>(|| panic!("mip {} broken", 3)).unwrap_err();
        assert!(err.to_string().contains("mip 3 broken"), "{}", err);

        assert_eq!(guarded(|| Ok(7)).unwrap(), 7);
    }
}
