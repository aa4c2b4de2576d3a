use glam::IVec2;
use karst_containers::{Handle, Pool};

/// A rectangle handed out by the [`ShelfAllocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShelfAllocation {
    pub pos: IVec2,
    pub size: IVec2,
    refcount: i32,
}

#[derive(Debug, Clone)]
struct FreeAllocation {
    pos: IVec2,
    capacity: IVec2,
}

#[derive(Debug, Clone)]
struct Shelf {
    y: i32,
    height: i32,
    cursor: i32,
}

/// Shelf packer for the glyph atlas.
///
/// Fills horizontal shelves left to right, opening a new shelf below the last
/// one when no existing shelf fits. Freed rectangles go to a freelist and are
/// reused before any shelf grows.
///
/// Simple reference implementation: https://github.com/mapbox/shelf-pack
#[derive(Debug, Default)]
pub struct ShelfAllocator {
    size: IVec2,
    shelves: Vec<Shelf>,
    allocations: Pool<ShelfAllocation>,
    freelist: Vec<FreeAllocation>,
}

impl ShelfAllocator {
    pub fn new(size: IVec2) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn size(&self) -> IVec2 {
        self.size
    }

    /// Returns `None` when the atlas is full.
    pub fn alloc(&mut self, alloc_size: IVec2) -> Option<Handle<ShelfAllocation>> {
        if alloc_size.x <= 0
            || alloc_size.y <= 0
            || alloc_size.x > self.size.x
            || alloc_size.y > self.size.y
        {
            return None;
        }

        // Best-fit pass over freed rectangles first.
        let mut best: Option<(usize, i32)> = None;
        for (i_free, free) in self.freelist.iter().enumerate() {
            if alloc_size.x <= free.capacity.x && alloc_size.y <= free.capacity.y {
                let waste = free.capacity.x * free.capacity.y - alloc_size.x * alloc_size.y;
                if best.map_or(true, |(_, best_waste)| waste < best_waste) {
                    best = Some((i_free, waste));
                }
            }
        }
        if let Some((i_free, _)) = best {
            let free = self.freelist.swap_remove(i_free);
            return Some(self.allocations.add(ShelfAllocation {
                pos: free.pos,
                size: alloc_size,
                refcount: 1,
            }));
        }

        // Tightest shelf that still fits, to limit vertical waste.
        let mut best_shelf: Option<(usize, i32)> = None;
        for (i_shelf, shelf) in self.shelves.iter().enumerate() {
            if alloc_size.y <= shelf.height && shelf.cursor + alloc_size.x <= self.size.x {
                let waste = shelf.height - alloc_size.y;
                if best_shelf.map_or(true, |(_, best_waste)| waste < best_waste) {
                    best_shelf = Some((i_shelf, waste));
                }
            }
        }

        let i_shelf = match best_shelf {
            Some((i_shelf, _)) => i_shelf,
            None => {
                let y = self
                    .shelves
                    .last()
                    .map_or(0, |shelf| shelf.y + shelf.height);
                if y + alloc_size.y > self.size.y {
                    return None;
                }
                self.shelves.push(Shelf {
                    y,
                    height: alloc_size.y,
                    cursor: 0,
                });
                self.shelves.len() - 1
            }
        };

        let shelf = &mut self.shelves[i_shelf];
        let pos = IVec2::new(shelf.cursor, shelf.y);
        shelf.cursor += alloc_size.x;
        Some(self.allocations.add(ShelfAllocation {
            pos,
            size: alloc_size,
            refcount: 1,
        }))
    }

    pub fn get(&self, id: Handle<ShelfAllocation>) -> &ShelfAllocation {
        self.allocations.get(id).unwrap_or_else(|_| {
            panic!("shelf allocation handle out of date");
        })
    }

    pub fn retain(&mut self, id: Handle<ShelfAllocation>) {
        if let Ok(allocation) = self.allocations.get_mut(id) {
            allocation.refcount += 1;
        }
    }

    /// Returns true once the allocation has actually been freed.
    pub fn release(&mut self, id: Handle<ShelfAllocation>) -> bool {
        let Ok(allocation) = self.allocations.get_mut(id) else {
            return false;
        };
        allocation.refcount -= 1;
        if allocation.refcount > 0 {
            return false;
        }
        let allocation = self.allocations.remove(id).unwrap();
        self.freelist.push(FreeAllocation {
            pos: allocation.pos,
            capacity: allocation.size,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlaps(a: &ShelfAllocation, b: &ShelfAllocation) -> bool {
        a.pos.x < b.pos.x + b.size.x
            && b.pos.x < a.pos.x + a.size.x
            && a.pos.y < b.pos.y + b.size.y
            && b.pos.y < a.pos.y + a.size.y
    }

    #[test]
    fn test_allocations_stay_in_bounds() {
        let mut packer = ShelfAllocator::new(IVec2::new(64, 64));
        for _ in 0..8 {
            let id = packer.alloc(IVec2::new(16, 16)).unwrap();
            let allocation = packer.get(id);
            assert!(allocation.pos.x >= 0 && allocation.pos.y >= 0);
            assert!(allocation.pos.x + allocation.size.x <= 64);
            assert!(allocation.pos.y + allocation.size.y <= 64);
        }
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let mut packer = ShelfAllocator::new(IVec2::new(128, 128));
        let sizes = [
            IVec2::new(10, 12),
            IVec2::new(30, 8),
            IVec2::new(7, 20),
            IVec2::new(64, 12),
            IVec2::new(12, 12),
            IVec2::new(40, 18),
        ];
        let ids: Vec<_> = sizes
            .iter()
            .map(|size| packer.alloc(*size).unwrap())
            .collect();
        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i + 1) {
                assert!(!overlaps(packer.get(*a), packer.get(*b)));
            }
        }
    }

    #[test]
    fn test_full_atlas_returns_none() {
        let mut packer = ShelfAllocator::new(IVec2::new(32, 32));
        assert!(packer.alloc(IVec2::new(32, 32)).is_some());
        assert!(packer.alloc(IVec2::new(1, 1)).is_none());
    }

    #[test]
    fn test_oversized_returns_none() {
        let mut packer = ShelfAllocator::new(IVec2::new(32, 32));
        assert!(packer.alloc(IVec2::new(33, 8)).is_none());
        assert!(packer.alloc(IVec2::new(8, 33)).is_none());
    }

    #[test]
    fn test_unref_then_realloc_reuses_slot() {
        let mut packer = ShelfAllocator::new(IVec2::new(32, 16));
        let a = packer.alloc(IVec2::new(32, 16)).unwrap();
        let pos = packer.get(a).pos;
        assert!(packer.alloc(IVec2::new(16, 16)).is_none());

        assert!(packer.release(a));
        let b = packer.alloc(IVec2::new(16, 16)).unwrap();
        assert_eq!(packer.get(b).pos, pos);
    }

    #[test]
    fn test_ref_keeps_allocation_alive() {
        let mut packer = ShelfAllocator::new(IVec2::new(32, 32));
        let id = packer.alloc(IVec2::new(8, 8)).unwrap();
        packer.retain(id);
        assert!(!packer.release(id));
        assert!(packer.release(id));
    }

    #[test]
    fn test_new_shelf_per_taller_glyph() {
        let mut packer = ShelfAllocator::new(IVec2::new(64, 64));
        let small = packer.alloc(IVec2::new(8, 8)).unwrap();
        let tall = packer.alloc(IVec2::new(8, 32)).unwrap();
        assert_eq!(packer.get(small).pos, IVec2::new(0, 0));
        assert_eq!(packer.get(tall).pos, IVec2::new(0, 8));
    }
}
