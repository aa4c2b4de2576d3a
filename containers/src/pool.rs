use crate::error::ContainerError;
use crate::handle::Handle;

#[derive(Debug)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Free { generation: u32, next_free: Option<u32> },
}

/// Sparse generational pool.
///
/// Slots are either occupied or linked into an intrusive free list. Every
/// reuse of a slot bumps its generation, so handles to freed values are
/// detected on access instead of aliasing the new occupant.
#[derive(Debug)]
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }
}

impl<T> Pool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    pub fn add(&mut self, value: T) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Free {
                    generation,
                    next_free,
                } => (*generation, *next_free),
                Slot::Occupied { .. } => unreachable!("free list points to an occupied slot"),
            };
            let generation = generation.wrapping_add(1);
            self.free_head = next_free;
            *slot = Slot::Occupied { generation, value };
            Handle::new(index, generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied {
                generation: 0,
                value,
            });
            Handle::new(index, 0)
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Result<&T, ContainerError> {
        match self.slots.get(handle.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == handle.generation => {
                Ok(value)
            }
            Some(_) => Err(ContainerError::UseAfterFree),
            None => Err(ContainerError::InvalidHandle),
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T, ContainerError> {
        match self.slots.get_mut(handle.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == handle.generation => {
                Ok(value)
            }
            Some(_) => Err(ContainerError::UseAfterFree),
            None => Err(ContainerError::InvalidHandle),
        }
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Result<T, ContainerError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(ContainerError::InvalidHandle)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {
                let old = std::mem::replace(
                    slot,
                    Slot::Free {
                        generation: handle.generation,
                        next_free: self.free_head,
                    },
                );
                self.free_head = Some(handle.index);
                self.len -= 1;
                match old {
                    Slot::Occupied { value, .. } => Ok(value),
                    Slot::Free { .. } => unreachable!(),
                }
            }
            _ => Err(ContainerError::InvalidHandle),
        }
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_ok()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.len = 0;
    }

    /// Occupied slots only, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Handle::new(index as u32, *generation), value))
                }
                Slot::Free { .. } => None,
            })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Handle::new(index as u32, *generation), value))
                }
                Slot::Free { .. } => None,
            })
    }

    /// Handles of every occupied slot, collected upfront so the pool can be
    /// mutated while walking them.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut pool = Pool::default();
        let handle = pool.add(42);
        assert_eq!(pool.get(handle), Ok(&42));
    }

    #[test]
    fn test_add_multiple_and_get() {
        let mut pool = Pool::default();
        let h1 = pool.add(42);
        let h2 = pool.add(43);
        let h3 = pool.add(44);

        assert_eq!(pool.get(h1), Ok(&42));
        assert_eq!(pool.get(h2), Ok(&43));
        assert_eq!(pool.get(h3), Ok(&44));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_remove() {
        let mut pool = Pool::default();
        let handle = pool.add(42);
        assert_eq!(pool.remove(handle), Ok(42));
        assert_eq!(pool.get(handle), Err(ContainerError::UseAfterFree));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_remove_and_add_bumps_generation() {
        let mut pool = Pool::default();
        let h1 = pool.add(42);
        let h2 = pool.add(43);
        pool.remove(h1).unwrap();
        let h3 = pool.add(44);

        // Slot is reused, but the handle stays distinguishable from h1.
        assert_eq!(h3.index(), h1.index());
        assert_eq!(h3.generation(), h1.generation() + 1);
        assert_ne!(h3, h1);
        assert_eq!(pool.get(h2), Ok(&43));
        assert_eq!(pool.get(h3), Ok(&44));
    }

    #[test]
    fn test_use_after_free_detected() {
        let mut pool = Pool::default();
        let handle = pool.add(42);
        pool.remove(handle).unwrap();
        assert_eq!(pool.get(handle), Err(ContainerError::UseAfterFree));

        // Even once the slot is reoccupied.
        let _ = pool.add(1000);
        assert_eq!(pool.get(handle), Err(ContainerError::UseAfterFree));
    }

    #[test]
    fn test_double_remove() {
        let mut pool = Pool::default();
        let handle = pool.add(42);
        pool.remove(handle).unwrap();
        assert_eq!(pool.remove(handle), Err(ContainerError::InvalidHandle));
    }

    #[test]
    fn test_remove_wrong_generation() {
        let mut pool = Pool::default();
        let handle = pool.add(42);
        let forged = Handle::new(handle.index(), handle.generation() + 1);
        assert_eq!(pool.remove(forged), Err(ContainerError::InvalidHandle));
        assert_eq!(pool.get(handle), Ok(&42));
    }

    #[test]
    fn test_out_of_range_handle() {
        let pool: Pool<u64> = Pool::default();
        let handle = Handle::new(999, 0);
        assert_eq!(pool.get(handle), Err(ContainerError::InvalidHandle));
    }

    #[test]
    fn test_invalid_sentinel_rejected() {
        let mut pool = Pool::default();
        let _ = pool.add(1);
        assert_eq!(
            pool.get(Handle::invalid()),
            Err(ContainerError::InvalidHandle)
        );
    }

    #[test]
    fn test_get_mut() {
        let mut pool = Pool::default();
        let handle = pool.add(42);
        *pool.get_mut(handle).unwrap() = 100;
        assert_eq!(pool.get(handle), Ok(&100));
    }

    #[test]
    fn test_iter_visits_occupied_only() {
        let mut pool = Pool::default();
        let h1 = pool.add(1);
        let h2 = pool.add(2);
        let h3 = pool.add(3);
        pool.remove(h2).unwrap();

        let mut collected: Vec<(Handle<i32>, i32)> =
            pool.iter().map(|(handle, value)| (handle, *value)).collect();
        collected.sort_by_key(|(handle, _)| handle.index());
        assert_eq!(collected, vec![(h1, 1), (h3, 3)]);
    }

    #[test]
    fn test_iter_mut() {
        let mut pool = Pool::default();
        let _ = pool.add(1);
        let _ = pool.add(2);
        for (_, value) in pool.iter_mut() {
            *value *= 2;
        }
        let mut values: Vec<i32> = pool.iter().map(|(_, value)| *value).collect();
        values.sort();
        assert_eq!(values, vec![2, 4]);
    }

    #[test]
    fn test_free_list_reuses_most_recent() {
        let mut pool = Pool::default();
        let h1 = pool.add(1);
        let h2 = pool.add(2);
        pool.remove(h1).unwrap();
        pool.remove(h2).unwrap();

        let h3 = pool.add(3);
        let h4 = pool.add(4);
        assert_eq!(h3.index(), h2.index());
        assert_eq!(h4.index(), h1.index());
        assert_eq!(pool.get(h3), Ok(&3));
        assert_eq!(pool.get(h4), Ok(&4));
    }

    #[test]
    fn test_generation_monotonic_over_reuse() {
        let mut pool = Pool::default();
        let mut handle = pool.add(0u32);
        let index = handle.index();
        let mut last_generation = handle.generation();
        for i in 1..10u32 {
            pool.remove(handle).unwrap();
            handle = pool.add(i);
            assert_eq!(handle.index(), index);
            assert!(handle.generation() > last_generation);
            last_generation = handle.generation();
        }
    }

    #[test]
    fn test_large_number_of_elements() {
        let mut pool = Pool::default();
        let handles: Vec<_> = (0..1000).map(|i| pool.add(i)).collect();

        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(pool.get(*handle), Ok(&i));
        }

        for handle in handles.iter().step_by(2) {
            pool.remove(*handle).unwrap();
        }
        assert_eq!(pool.len(), 500);

        for (i, handle) in handles.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(pool.get(*handle), Err(ContainerError::UseAfterFree));
            } else {
                assert_eq!(pool.get(*handle), Ok(&i));
            }
        }
    }

    #[test]
    fn test_clear() {
        let mut pool = Pool::default();
        let handle = pool.add(1);
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.get(handle), Err(ContainerError::InvalidHandle));
    }
}
