//! Cooperative tick scheduler.
//!
//! The host calls [`TickScheduler::advance`] once per tick from its single
//! thread. Callbacks run on that thread with mutable access to the host
//! context `C` and to the scheduler itself, so a callback can schedule or
//! cancel further work.
//!
//! Delays are measured in ticks. A task scheduled during `advance` never runs
//! in that same `advance`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

/// Handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// What a repeating task wants after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Remove the task.
    Stop,
    /// Run again after this many ticks (0 is treated as 1).
    After(u32),
}

type OnceFn<C> = Box<dyn FnOnce(&mut C, &mut TickScheduler<C>)>;
type RepeatFn<C> = Box<dyn FnMut(&mut C, &mut TickScheduler<C>) -> Next>;

enum Callback<C> {
    Once(OnceFn<C>),
    Repeating(RepeatFn<C>),
}

/// Deferred callbacks measured in host ticks.
pub struct TickScheduler<C> {
    now: u64,
    next_id: u64,
    queue: BinaryHeap<Reverse<(u64, TaskId)>>,
    tasks: HashMap<TaskId, Callback<C>>,
    running: Option<TaskId>,
    cancel_running: bool,
}

impl<C> TickScheduler<C> {
    /// Create an empty scheduler at tick 0.
    pub fn new() -> Self {
        Self {
            now: 0,
            next_id: 0,
            queue: BinaryHeap::new(),
            tasks: HashMap::new(),
            running: None,
            cancel_running: false,
        }
    }

    /// Ticks advanced so far.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Number of live tasks.
    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is scheduled.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether `id` is still scheduled.
    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Run `f` once, `after` ticks from now.
    pub fn schedule_once<F>(&mut self, after: u32, f: F) -> TaskId
    where
        F: FnOnce(&mut C, &mut TickScheduler<C>) + 'static,
    {
        self.insert(after, Callback::Once(Box::new(f)))
    }

    /// Run `f` every `every` ticks until it returns [`Next::Stop`] or is
    /// cancelled. The interval can be changed by returning a different
    /// [`Next::After`].
    pub fn schedule_repeating<F>(&mut self, every: u32, f: F) -> TaskId
    where
        F: FnMut(&mut C, &mut TickScheduler<C>) -> Next + 'static,
    {
        self.insert(every, Callback::Repeating(Box::new(f)))
    }

    /// Cancel a task. Returns `false` if it was not scheduled.
    ///
    /// A repeating task may cancel itself while running.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        if self.running == Some(id) {
            self.cancel_running = true;
            return true;
        }
        self.tasks.remove(&id).is_some()
    }

    /// Advance one tick and run every task that is due.
    pub fn advance(&mut self, ctx: &mut C) {
        self.now += 1;

        let mut due = Vec::new();
        while let Some(Reverse((at, id))) = self.queue.peek().copied() {
            if at > self.now {
                break;
            }
            self.queue.pop();
            due.push(id);
        }

        for id in due {
            // Cancelled tasks leave a stale heap entry behind
            let Some(callback) = self.tasks.remove(&id) else {
                continue;
            };

            match callback {
                Callback::Once(f) => f(ctx, self),
                Callback::Repeating(mut f) => {
                    self.running = Some(id);
                    self.cancel_running = false;
                    let next = f(ctx, self);
                    self.running = None;

                    if let (Next::After(ticks), false) = (next, self.cancel_running) {
                        self.enqueue(id, ticks);
                        self.tasks.insert(id, Callback::Repeating(f));
                    }
                }
            }
        }
    }

    fn insert(&mut self, after: u32, callback: Callback<C>) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.enqueue(id, after);
        self.tasks.insert(id, callback);
        id
    }

    fn enqueue(&mut self, id: TaskId, after: u32) {
        let at = self.now + u64::from(after.max(1));
        self.queue.push(Reverse((at, id)));
    }
}

impl<C> Default for TickScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TickScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickScheduler")
            .field("now", &self.now)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
