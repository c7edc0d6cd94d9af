use std::{marker::PhantomData, ops::Index};

/// A typed handle into an [`Arena`].
///
/// The phantom type keeps a handle for one arena from indexing another, so a
/// frame handle can never be confused with any other compile-time table.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaId<T> {
    id: u32,
    _phantom_data: PhantomData<T>,
}

impl<T> Copy for ArenaId<T> {}

impl<T> Clone for ArenaId<T> {
    #[inline(always)]
    fn clone(&self) -> ArenaId<T> {
        *self
    }
}

impl<T> ArenaId<T> {
    pub const fn new(id: u32) -> ArenaId<T> {
        Self {
            id,
            _phantom_data: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.id as usize
    }
}

/// Append-only storage addressed by [`ArenaId`].
///
/// Items are never removed, so every handle handed out stays valid for the
/// lifetime of the arena. Links between items (such as a frame's parent) are
/// stored as handles rather than references.
#[derive(Debug, Clone, Default)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    pub fn new(size: usize) -> Self {
        Arena {
            items: Vec::with_capacity(size),
        }
    }

    pub fn alloc(&mut self, value: T) -> ArenaId<T> {
        let arena_id = self.items.len() as u32;
        self.items.push(value);
        ArenaId::new(arena_id)
    }

    pub fn get(&self, id: ArenaId<T>) -> Option<&T> {
        self.items.get(id.index())
    }

    /// Walks a parent chain starting at `id`, yielding each item and its handle.
    pub fn ancestors<'a, F>(
        &'a self,
        id: ArenaId<T>,
        parent: F,
    ) -> impl Iterator<Item = (ArenaId<T>, &'a T)> + 'a
    where
        F: Fn(&T) -> Option<ArenaId<T>> + 'a,
    {
        std::iter::successors(self.get(id).map(|item| (id, item)), move |(_, item)| {
            parent(item).and_then(|parent_id| self.get(parent_id).map(|p| (parent_id, p)))
        })
    }
}

impl<T> Index<ArenaId<T>> for Arena<T> {
    type Output = T;

    fn index(&self, index: ArenaId<T>) -> &Self::Output {
        &self.items[index.index()]
    }
}
