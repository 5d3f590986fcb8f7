/// 在 Tracy 客户端运行时打开一个 zone，返回的 guard 离开作用域时结束
///
/// 没有运行中的客户端（单元测试、未接入 profiler 的程序）时为空操作。
#[macro_export]
macro_rules! profile_span {
    ($name:expr) => {
        $crate::tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), module_path!(), file!(), line!(), 0))
    };
}
