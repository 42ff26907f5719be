//! Keyed table used by flatten and replay passes.

use canvas_inspector_shared::ResourceId;
use hashbrown::HashMap;

/// Resource-id keyed table.
///
/// A pass inserts a placeholder entry before recursing into a resource's
/// references, so cycles resolve to the entry already present.
#[derive(Debug)]
pub struct Cache<T> {
    items: HashMap<ResourceId, T>,
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<T> Cache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: ResourceId) -> bool {
        self.items.contains_key(&key)
    }

    pub fn get(&self, key: ResourceId) -> Option<&T> {
        self.items.get(&key)
    }

    pub fn get_mut(&mut self, key: ResourceId) -> Option<&mut T> {
        self.items.get_mut(&key)
    }

    pub fn put(&mut self, key: ResourceId, item: T) {
        self.items.insert(key, item);
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn reset(&mut self) {
        self.items.clear();
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_reset() {
        let mut cache = Cache::new();
        assert!(!cache.has(ResourceId(1)));

        cache.put(ResourceId(1), "one");
        cache.put(ResourceId(2), "two");
        cache.put(ResourceId(1), "uno");

        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get(ResourceId(1)), Some(&"uno"));

        cache.reset();
        assert_eq!(cache.size(), 0);
        assert!(cache.get(ResourceId(2)).is_none());
    }
}
