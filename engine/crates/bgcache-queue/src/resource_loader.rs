use crate::stats::TimingStats;
use crate::ts_queue::ThreadSafeQueue;
use crossbeam_utils::Backoff;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// 输入队列为空时 worker 的最长休眠时间
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// 解码策略
///
/// 每种资源（纹理、模型、音频）提供一个实现，在构造 [`ResourceLoader`] 时注入。
/// 策略对象被 worker 线程独占，因此可以持有线程私有的状态（例如每线程一个 command pool）。
pub trait ResourceDecoder<I, O>: Send + 'static {
    /// 每次 worker 被唤醒、开始处理一批任务之前调用
    fn prepare(&mut self) {}

    /// 处理一个任务
    ///
    /// 返回 `Err` 时该任务被丢弃：不产生输出，也不会重试。
    fn load_resource(&mut self, input: I) -> anyhow::Result<O>;
}

impl<I, O, F> ResourceDecoder<I, O> for F
where
    F: FnMut(I) -> anyhow::Result<O> + Send + 'static,
{
    fn load_resource(&mut self, input: I) -> anyhow::Result<O> {
        self(input)
    }
}

/// worker 的输入队列集合
///
/// [`SingleQueue`] 只有一个队列；[`PriorityQueues`] 有 primary/secondary 两个，
/// 只有 primary 为空时才会从 secondary 取任务。
pub trait InputQueues<I>: Default + Send + Sync + 'static {
    /// 放入 primary 队列
    fn push(&self, item: I);

    /// worker 取下一个任务
    fn pop_next(&self) -> Option<I>;

    fn total_len(&self) -> usize;

    fn any(&self, pred: impl FnMut(&I) -> bool) -> bool;

    fn remove_where(&self, pred: impl FnMut(&I) -> bool) -> usize;

    fn for_each_mut(&self, f: impl FnMut(&mut I));

    fn drain_all(&self) -> Vec<I>;
}

pub struct SingleQueue<I> {
    queue: ThreadSafeQueue<I>,
}

impl<I> Default for SingleQueue<I> {
    fn default() -> Self {
        Self {
            queue: ThreadSafeQueue::new(),
        }
    }
}

impl<I: Send + 'static> InputQueues<I> for SingleQueue<I> {
    fn push(&self, item: I) {
        self.queue.push(item);
    }

    fn pop_next(&self) -> Option<I> {
        self.queue.pop()
    }

    fn total_len(&self) -> usize {
        self.queue.len()
    }

    fn any(&self, pred: impl FnMut(&I) -> bool) -> bool {
        self.queue.any(pred)
    }

    fn remove_where(&self, pred: impl FnMut(&I) -> bool) -> usize {
        self.queue.remove_where(pred)
    }

    fn for_each_mut(&self, f: impl FnMut(&mut I)) {
        self.queue.for_each_mut(f);
    }

    fn drain_all(&self) -> Vec<I> {
        self.queue.drain()
    }
}

/// primary + secondary 两级队列
///
/// 屏幕上可见的资源走 primary，预缓存走 secondary。
/// secondary 只有在 primary 完全清空后才会被处理，primary 持续有任务时 secondary 会饿死。
pub struct PriorityQueues<I> {
    primary: ThreadSafeQueue<I>,
    secondary: ThreadSafeQueue<I>,
}

impl<I> Default for PriorityQueues<I> {
    fn default() -> Self {
        Self {
            primary: ThreadSafeQueue::new(),
            secondary: ThreadSafeQueue::new(),
        }
    }
}

impl<I> PriorityQueues<I> {
    pub fn push_secondary(&self, item: I) {
        self.secondary.push(item);
    }

    pub fn primary_len(&self) -> usize {
        self.primary.len()
    }

    pub fn secondary_len(&self) -> usize {
        self.secondary.len()
    }
}

impl<I: Send + 'static> InputQueues<I> for PriorityQueues<I> {
    fn push(&self, item: I) {
        self.primary.push(item);
    }

    fn pop_next(&self) -> Option<I> {
        self.primary.pop().or_else(|| self.secondary.pop())
    }

    fn total_len(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }

    fn any(&self, mut pred: impl FnMut(&I) -> bool) -> bool {
        self.primary.any(&mut pred) || self.secondary.any(&mut pred)
    }

    fn remove_where(&self, mut pred: impl FnMut(&I) -> bool) -> usize {
        self.primary.remove_where(&mut pred) + self.secondary.remove_where(&mut pred)
    }

    fn for_each_mut(&self, mut f: impl FnMut(&mut I)) {
        self.primary.for_each_mut(&mut f);
        self.secondary.for_each_mut(&mut f);
    }

    fn drain_all(&self) -> Vec<I> {
        let mut items = self.primary.drain();
        items.extend(self.secondary.drain());
        items
    }
}

/// 单个 loader 的累计统计
#[derive(Clone, Debug, Default)]
pub struct LoaderStats {
    /// 成功产生输出的任务数
    pub loaded: u64,
    /// 解码返回错误或 panic 的任务数
    pub failed: u64,
    /// 每个任务在 worker 线程上的耗时
    pub decode: TimingStats,
}

/// worker 线程和 loader 之间共享的状态
struct Shared<I, O, Q> {
    inputs: Q,
    outputs: ThreadSafeQueue<O>,

    running: AtomicBool,
    /// 已入队但还没有处理完（或被移除）的任务数，包括正在解码的那一个
    pending: AtomicUsize,

    wake: Mutex<bool>,
    wake_cv: Condvar,

    stats: Mutex<LoaderStats>,

    _input: PhantomData<fn() -> I>,
}

impl<I, O, Q> Shared<I, O, Q>
where
    I: Send + 'static,
    O: Send + 'static,
    Q: InputQueues<I>,
{
    fn notify(&self) {
        *self.wake.lock() = true;
        self.wake_cv.notify_one();
    }

    fn process(&self, name: &str, decoder: &mut dyn ResourceDecoder<I, O>, input: I) {
        let _span = crate::profile_span!("ResourceLoader::load_resource");
        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| decoder.load_resource(input)));
        let elapsed = start.elapsed();

        let mut stats = self.stats.lock();
        stats.decode.record(elapsed);
        match result {
            Ok(Ok(output)) => {
                stats.loaded += 1;
                drop(stats);
                self.outputs.push(output);
            }
            Ok(Err(err)) => {
                stats.failed += 1;
                log::warn!("[{}] load failed, item dropped: {:#}", name, err);
            }
            Err(payload) => {
                stats.failed += 1;
                log::error!("[{}] load panicked, item dropped: {}", name, panic_message(payload.as_ref()));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}

fn worker_loop<I, O, Q>(
    name: String,
    shared: Arc<Shared<I, O, Q>>,
    mut decoder: Box<dyn ResourceDecoder<I, O>>,
) -> Box<dyn ResourceDecoder<I, O>>
where
    I: Send + 'static,
    O: Send + 'static,
    Q: InputQueues<I>,
{
    log::debug!("[{}] worker thread enter", name);

    while shared.running.load(Ordering::Acquire) {
        decoder.prepare();

        // 每次唤醒都把输入队列清空；两个任务之间检查一次 running，stop 只等待当前任务
        while shared.running.load(Ordering::Acquire) {
            let Some(input) = shared.inputs.pop_next() else {
                break;
            };
            shared.process(&name, decoder.as_mut(), input);
            shared.pending.fetch_sub(1, Ordering::AcqRel);
        }

        let mut signaled = shared.wake.lock();
        if !*signaled && shared.running.load(Ordering::Acquire) {
            shared.wake_cv.wait_for(&mut signaled, IDLE_WAIT);
        }
        *signaled = false;
    }

    log::debug!("[{}] worker thread exit", name);
    decoder
}

/// 通用的单线程后台 loader
///
/// 状态机: `Stopped -> Running -> Stopped`，可以反复 start/stop。
/// 输入由任意线程通过 [`ResourceLoader::queue`] 放入，
/// 输出由集成线程通过 [`ResourceLoader::pop_finished`] 取出。
pub struct ResourceLoader<I, O, Q = SingleQueue<I>>
where
    I: Send + 'static,
    O: Send + 'static,
    Q: InputQueues<I>,
{
    name: String,
    shared: Arc<Shared<I, O, Q>>,

    /// 停止状态下由 loader 持有，运行时被 worker 线程持有，join 时归还
    decoder: Option<Box<dyn ResourceDecoder<I, O>>>,
    worker: Option<JoinHandle<Box<dyn ResourceDecoder<I, O>>>>,
}

/// 带 primary/secondary 两级输入队列的 loader
pub type PriorityResourceLoader<I, O> = ResourceLoader<I, O, PriorityQueues<I>>;

// new & init
impl<I, O, Q> ResourceLoader<I, O, Q>
where
    I: Send + 'static,
    O: Send + 'static,
    Q: InputQueues<I>,
{
    /// 创建一个处于停止状态的 loader，`name` 同时用作 worker 线程名
    pub fn new(name: impl Into<String>, decoder: impl ResourceDecoder<I, O>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                inputs: Q::default(),
                outputs: ThreadSafeQueue::new(),
                running: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                wake: Mutex::new(false),
                wake_cv: Condvar::new(),
                stats: Mutex::new(LoaderStats::default()),
                _input: PhantomData,
            }),
            decoder: Some(Box::new(decoder)),
            worker: None,
        }
    }

    /// 启动 worker 线程；已经在运行时什么都不做
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(decoder) = self.decoder.take() else {
            anyhow::bail!("[{}] decoder was lost by a crashed worker, loader cannot restart", self.name);
        };

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let name = self.name.clone();
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker_loop(name, shared, decoder));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                log::info!("[{}] loader started", self.name);
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                Err(anyhow::Error::new(err).context(format!("failed to spawn loader thread {}", self.name)))
            }
        }
    }
}

// destroy
impl<I, O, Q> ResourceLoader<I, O, Q>
where
    I: Send + 'static,
    O: Send + 'static,
    Q: InputQueues<I>,
{
    /// 停止 worker 并 join
    ///
    /// 不会打断正在进行的解码，会等待当前任务完成；
    /// 剩余的输入保留在队列中，再次 start 之后继续处理。
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.shared.running.store(false, Ordering::Release);
        self.shared.notify();

        match worker.join() {
            Ok(decoder) => self.decoder = Some(decoder),
            Err(_) => log::error!("[{}] worker thread panicked outside of a decode", self.name),
        }
        log::info!("[{}] loader stopped, {} item(s) left in queue", self.name, self.num_queued());
    }
}

impl<I, O, Q> Drop for ResourceLoader<I, O, Q>
where
    I: Send + 'static,
    O: Send + 'static,
    Q: InputQueues<I>,
{
    fn drop(&mut self) {
        self.stop();
    }
}

// tools
impl<I, O, Q> ResourceLoader<I, O, Q>
where
    I: Send + 'static,
    O: Send + 'static,
    Q: InputQueues<I>,
{
    /// 放入输入队列并唤醒 worker，不会阻塞调用方
    pub fn queue(&self, input: I) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.inputs.push(input);
        self.shared.notify();
    }

    /// 非阻塞地取出一个完成的结果
    #[inline]
    pub fn pop_finished(&self) -> Option<O> {
        self.shared.outputs.pop()
    }

    /// 等待所有已入队的任务处理完毕，超时返回 false
    ///
    /// loader 没有运行时，只要队列非空就会一直等到超时。
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(200));
            } else {
                backoff.snooze();
            }
        }
    }

    pub fn any_queued(&self, pred: impl FnMut(&I) -> bool) -> bool {
        self.shared.inputs.any(pred)
    }

    pub fn any_finished(&self, pred: impl FnMut(&O) -> bool) -> bool {
        self.shared.outputs.any(pred)
    }

    pub fn for_each_queued_mut(&self, f: impl FnMut(&mut I)) {
        self.shared.inputs.for_each_mut(f);
    }

    pub fn for_each_finished_mut(&self, f: impl FnMut(&mut O)) {
        self.shared.outputs.for_each_mut(f);
    }

    /// 从输入队列移除满足条件的任务，返回移除的个数
    pub fn remove_queued_where(&self, pred: impl FnMut(&I) -> bool) -> usize {
        let removed = self.shared.inputs.remove_where(pred);
        self.shared.pending.fetch_sub(removed, Ordering::AcqRel);
        removed
    }

    /// 取出所有尚未开始处理的任务
    pub fn drain_queued(&self) -> Vec<I> {
        let items = self.shared.inputs.drain_all();
        self.shared.pending.fetch_sub(items.len(), Ordering::AcqRel);
        items
    }
}

impl<I, O> ResourceLoader<I, O, PriorityQueues<I>>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// 放入低优先级队列
    pub fn queue_secondary(&self, input: I) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.inputs.push_secondary(input);
        self.shared.notify();
    }

    pub fn num_queued_primary(&self) -> usize {
        self.shared.inputs.primary_len()
    }

    pub fn num_queued_secondary(&self) -> usize {
        self.shared.inputs.secondary_len()
    }
}

// getters
impl<I, O, Q> ResourceLoader<I, O, Q>
where
    I: Send + 'static,
    O: Send + 'static,
    Q: InputQueues<I>,
{
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// 输入队列中尚未开始处理的任务数
    #[inline]
    pub fn num_queued(&self) -> usize {
        self.shared.inputs.total_len()
    }

    #[inline]
    pub fn num_finished(&self) -> usize {
        self.shared.outputs.len()
    }

    /// 已入队但未处理完的任务数（包括正在解码的任务）
    #[inline]
    pub fn num_pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.num_pending() == 0
    }

    pub fn stats(&self) -> LoaderStats {
        self.shared.stats.lock().clone()
    }
}
