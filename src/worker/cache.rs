use std::collections::{HashMap, VecDeque};

/// Fixed capacity cache evicting the oldest inserted entry first.
#[derive(Debug, Default)]
pub struct ResourceCache {
    capacity: usize,
    entries: HashMap<String, Vec<u8>>,
    order: VecDeque<String>,
}

impl ResourceCache {
    /// A cache holding at most `capacity` entries. 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Store an entry. Replacing an existing key keeps its insertion rank.
    pub fn insert(&mut self, key: impl Into<String>, value: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        let key = key.into();
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
