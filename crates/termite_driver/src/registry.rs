//! Per-connection registry of in-flight tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::task::{TaskId, TaskState};

/// Longest SQL prefix kept on a registry entry for diagnostics.
const SQL_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub id: TaskId,
    pub state: TaskState,
    pub sql_preview: String,
    pub queued_at: Instant,
}

/// Tasks currently dispatched on one connection, keyed by task id.
pub struct TaskRegistry {
    tasks: dashmap::DashMap<TaskId, TaskEntry>,
    next_id: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: dashmap::DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id and record the command as queued.
    pub fn register(&self, sql: &str) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.insert(
            id,
            TaskEntry {
                id,
                state: TaskState::Preparing,
                sql_preview: sql.chars().take(SQL_PREVIEW_CHARS).collect(),
                queued_at: Instant::now(),
            },
        );
        id
    }

    pub fn set_state(&self, id: TaskId, state: TaskState) {
        if let Some(mut entry) = self.tasks.get_mut(&id) {
            entry.state = state;
        }
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id).map(|e| e.state)
    }

    pub fn get(&self, id: TaskId) -> Option<TaskEntry> {
        self.tasks.get(&id).map(|e| e.clone())
    }

    pub fn remove(&self, id: TaskId) {
        self.tasks.remove(&id);
    }

    /// In-flight task count.
    pub fn count(&self) -> usize {
        self.tasks.len()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|e| *e.key()).collect()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let reg = TaskRegistry::new();
        let a = reg.register("SELECT 1");
        let b = reg.register("SELECT 2");
        assert_ne!(a, b);
        assert_eq!(reg.count(), 2);
        assert_eq!(reg.state(a), Some(TaskState::Preparing));

        reg.set_state(a, TaskState::Stepping);
        assert_eq!(reg.state(a), Some(TaskState::Stepping));

        reg.remove(a);
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.state(a), None);
        assert_eq!(reg.task_ids(), vec![b]);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let reg = TaskRegistry::new();
        let ids: Vec<TaskId> = (0..5).map(|_| reg.register("x")).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sql_preview_is_bounded() {
        let reg = TaskRegistry::new();
        let sql = "é".repeat(200);
        let id = reg.register(&sql);
        assert_eq!(reg.get(id).unwrap().sql_preview.chars().count(), SQL_PREVIEW_CHARS);
    }

    #[test]
    fn test_set_state_on_missing_id_is_noop() {
        let reg = TaskRegistry::new();
        reg.set_state(99, TaskState::Freed);
        assert_eq!(reg.count(), 0);
    }
}
