use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Bounded window of recently seen message ids. The oldest id is forgotten
/// once the window is full.
#[derive(Debug)]
pub struct RecentIds {
    capacity: usize,
    inner: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Window::default()),
        }
    }

    /// Records `id`. Returns false if it was already in the window.
    pub fn insert(&self, id: Uuid) -> bool {
        let mut window = self.inner.lock();
        if !window.seen.insert(id) {
            return false;
        }
        window.order.push_back(id);
        while window.order.len() > self.capacity {
            if let Some(oldest) = window.order.pop_front() {
                window.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.lock().seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
