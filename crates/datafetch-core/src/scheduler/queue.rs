//! Pending-task priority queue: priority ascending, FIFO within a priority.

use std::collections::{BTreeMap, HashMap};

use crate::task_db::TaskId;

/// Ordering key: (priority, enqueue sequence).
type Key = (i64, u64);

#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    order: BTreeMap<Key, TaskId>,
    index: HashMap<TaskId, Key>,
    next_seq: u64,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn next_key(&mut self, priority: i64) -> Key {
        let seq = self.next_seq;
        self.next_seq += 1;
        (priority, seq)
    }

    /// Insert a task. Returns false (and changes nothing) if it is already queued.
    pub(crate) fn push(&mut self, task_id: TaskId, priority: i64) -> bool {
        if self.index.contains_key(&task_id) {
            return false;
        }
        let key = self.next_key(priority);
        self.order.insert(key, task_id);
        self.index.insert(task_id, key);
        true
    }

    pub(crate) fn remove(&mut self, task_id: TaskId) -> bool {
        match self.index.remove(&task_id) {
            Some(key) => {
                self.order.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Re-insert with a new priority; the task goes to the back of its new priority band.
    pub(crate) fn set_priority(&mut self, task_id: TaskId, priority: i64) -> bool {
        if !self.remove(task_id) {
            return false;
        }
        self.push(task_id, priority)
    }

    /// Most urgent task.
    pub(crate) fn pop(&mut self) -> Option<TaskId> {
        let (_, task_id) = self.order.pop_first()?;
        self.index.remove(&task_id);
        Some(task_id)
    }

    pub(crate) fn contains(&self, task_id: TaskId) -> bool {
        self.index.contains_key(&task_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in admission order.
    pub(crate) fn ids(&self) -> Vec<TaskId> {
        self.order.values().copied().collect()
    }
}
