/// Identity of a texture inside the cache. Slots are recycled once their
/// texture is released.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u32);

impl SlotId {
    pub fn new(val: u32) -> Self {
        Self(val)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct IdPool {
    current: u32,
    available: Vec<SlotId>,
}

impl IdPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_next(&mut self) -> SlotId {
        if let Some(id) = self.available.pop() {
            id
        } else {
            let ret = SlotId(self.current);
            self.current += 1;
            ret
        }
    }

    pub fn free(&mut self, id: SlotId) {
        debug_assert!(
            id.0 < self.current,
            "Id {id:?} can't be freed, as it was never created by the pool"
        );
        self.available.push(id);
    }
}

/// Rounds `size` up to a multiple of `alignment` (a power of two).
pub fn align_to(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_ids_are_reused_first() {
        let mut pool = IdPool::new();
        let a = pool.get_next();
        let b = pool.get_next();
        assert_eq!((a.index(), b.index()), (0, 1));

        pool.free(a);
        assert_eq!(pool.get_next(), a);
        assert_eq!(pool.get_next().index(), 2);
    }

    #[test]
    fn align_rounds_up() {
        assert_eq!(align_to(0, 16), 0);
        assert_eq!(align_to(4, 16), 16);
        assert_eq!(align_to(64, 16), 64);
        assert_eq!(align_to(65, 16), 80);
    }
}
