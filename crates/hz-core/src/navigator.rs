//! Gallery index arithmetic and preload policy.

/// Move `delta` items from `index` in a gallery of `count`, wrapping at
/// both ends. Galleries of zero or one item never move.
pub fn step(index: usize, count: usize, delta: isize) -> usize {
    if count <= 1 {
        return index.min(count.saturating_sub(1));
    }
    let count = count as isize;
    (index as isize + delta).rem_euclid(count) as usize
}

pub fn first(_count: usize) -> usize {
    0
}

pub fn last(count: usize) -> usize {
    count.saturating_sub(1)
}

/// Indices to preload after showing `index`: up to `ahead` items in the
/// travel `direction` (positive forward), wrapping, never `index` itself.
pub fn preload_targets(index: usize, count: usize, direction: isize, ahead: usize) -> Vec<usize> {
    if count <= 1 || ahead == 0 {
        return Vec::new();
    }
    let dir = if direction < 0 { -1 } else { 1 };
    let mut out = Vec::with_capacity(ahead);
    let mut cur = index;
    for _ in 0..ahead.min(count - 1) {
        cur = step(cur, count, dir);
        out.push(cur);
    }
    out
}

/// Cursor over a resolved gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GalleryNavigator {
    pub index: usize,
    pub count: usize,
}

impl GalleryNavigator {
    pub fn new(count: usize) -> Self {
        Self { index: 0, count }
    }

    /// Move by `delta` and return the new index.
    pub fn next(&mut self, delta: isize) -> usize {
        self.index = step(self.index, self.count, delta);
        self.index
    }

    pub fn jump_first(&mut self) -> usize {
        self.index = first(self.count);
        self.index
    }

    pub fn jump_last(&mut self) -> usize {
        self.index = last(self.count);
        self.index
    }

    pub fn preload_targets(&self, direction: isize, ahead: usize) -> Vec<usize> {
        preload_targets(self.index, self.count, direction, ahead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_both_ways() {
        let mut nav = GalleryNavigator { index: 4, count: 5 };
        assert_eq!(nav.next(1), 0);
        assert_eq!(nav.next(-1), 4);
        assert_eq!(step(1, 5, -3), 3);
    }

    #[test]
    fn single_item_never_moves() {
        let mut nav = GalleryNavigator::new(1);
        assert_eq!(nav.next(1), 0);
        assert_eq!(nav.next(-1), 0);
        assert_eq!(step(0, 0, 1), 0);
    }

    #[test]
    fn first_and_last() {
        let mut nav = GalleryNavigator { index: 2, count: 5 };
        assert_eq!(nav.jump_last(), 4);
        assert_eq!(nav.jump_first(), 0);
    }

    #[test]
    fn preload_follows_direction() {
        assert_eq!(preload_targets(3, 5, 1, 2), vec![4, 0]);
        assert_eq!(preload_targets(0, 5, -1, 1), vec![4]);
        assert_eq!(preload_targets(0, 3, 1, 10), vec![1, 2]);
        assert!(preload_targets(0, 1, 1, 2).is_empty());
    }
}
