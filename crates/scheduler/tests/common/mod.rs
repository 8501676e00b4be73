//! Recording executor shared by the scheduler integration tests.
//!
//! Each task's payload is how long it "works". The recorder tracks how many
//! tasks run at once (overall and per target) and logs start/end events so
//! tests can check ordering.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use keygate_scheduler::{BoxError, Executor, Task, TaskId};

pub type TimedTask = Task<Duration>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start(TaskId),
    End(TaskId),
}

#[derive(Default)]
pub struct Recorder {
    running: AtomicUsize,
    peak: AtomicUsize,
    per_target: Mutex<HashMap<u64, usize>>,
    overlap: AtomicBool,
    events: Mutex<Vec<Event>>,
    fail: HashSet<TaskId>,
    panic: HashSet<TaskId>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks with these ids return an error after working.
    pub fn failing(mut self, ids: &[TaskId]) -> Self {
        self.fail.extend(ids);
        self
    }

    /// Tasks with these ids panic after working.
    pub fn panicking(mut self, ids: &[TaskId]) -> Self {
        self.panic.extend(ids);
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Whether two tasks with the same target were ever running together.
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn starts(&self) -> Vec<TaskId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Start(id) => Some(id),
                Event::End(_) => None,
            })
            .collect()
    }

    pub fn position(&self, event: Event) -> usize {
        self.events()
            .iter()
            .position(|e| *e == event)
            .unwrap_or_else(|| panic!("{event:?} never happened"))
    }

    /// Most tasks from `ids` that were ever running at the same time.
    pub fn max_concurrent_among(&self, ids: &[TaskId]) -> usize {
        let mut running = 0usize;
        let mut peak = 0;
        for event in self.events() {
            match event {
                Event::Start(id) if ids.contains(&id) => {
                    running += 1;
                    peak = peak.max(running);
                }
                Event::End(id) if ids.contains(&id) => running -= 1,
                _ => {}
            }
        }
        peak
    }

    fn enter(&self, task: &TimedTask) {
        {
            let mut per_target = self.per_target.lock().unwrap();
            let count = per_target.entry(task.target).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.overlap.store(true, Ordering::SeqCst);
            }
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.events.lock().unwrap().push(Event::Start(task.id));
    }

    fn exit(&self, task: &TimedTask) {
        self.events.lock().unwrap().push(Event::End(task.id));
        self.running.fetch_sub(1, Ordering::SeqCst);
        let mut per_target = self.per_target.lock().unwrap();
        if let Some(count) = per_target.get_mut(&task.target) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl Executor<TimedTask> for Recorder {
    async fn execute(&self, task: &TimedTask) -> Result<(), BoxError> {
        self.enter(task);
        tokio::time::sleep(task.payload).await;
        self.exit(task);
        if self.panic.contains(&task.id) {
            panic!("task {} blew up", task.id);
        }
        if self.fail.contains(&task.id) {
            return Err(format!("task {} rejected", task.id).into());
        }
        Ok(())
    }
}

pub fn task(id: TaskId, target: u64, millis: u64) -> TimedTask {
    Task::new(id, target, Duration::from_millis(millis))
}
