use parking_lot::Mutex;
use std::collections::VecDeque;

/// 线程安全的 FIFO 队列
///
/// 所有操作都在同一把锁下完成，不提供容量上限或背压：
/// 调用方自己负责节流（例如入队前挑选最空闲的线程）。
///
/// # 注意
/// `for_each` / `for_each_mut` / `remove_where` 的回调在持锁状态下执行，
/// 回调中不能阻塞，也不能再次访问同一个队列（会死锁）。
pub struct ThreadSafeQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<T> ThreadSafeQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

// tools
impl<T> ThreadSafeQueue<T> {
    /// 入队，同一线程的多次 push 保持顺序
    #[inline]
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// 非阻塞出队，队列为空时返回 None
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// 当前长度；解锁之后就可能过时，只能作为参考
    #[inline]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// 在一次加锁内删除所有满足条件的元素，返回删除的个数
    pub fn remove_where(&self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|item| !pred(item));
        before - items.len()
    }

    /// 加锁遍历所有元素
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        self.items.lock().iter().for_each(|item| f(item));
    }

    /// 加锁遍历并允许修改元素
    pub fn for_each_mut(&self, mut f: impl FnMut(&mut T)) {
        self.items.lock().iter_mut().for_each(|item| f(item));
    }

    /// 是否存在满足条件的元素
    pub fn any(&self, mut pred: impl FnMut(&T) -> bool) -> bool {
        self.items.lock().iter().any(|item| pred(item))
    }

    /// 取出所有元素，保持入队顺序
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    /// 清空队列，返回被丢弃的元素个数
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let count = items.len();
        items.clear();
        count
    }
}
