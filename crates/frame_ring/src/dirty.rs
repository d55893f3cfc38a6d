/// Counts how many frame slots still hold stale copies of an item's constants.
///
/// Every slot has its own constant region, so a change has to be uploaded once
/// per slot before the item can be skipped again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyFrames {
    remaining: usize,
    frame_count: usize,
}

impl DirtyFrames {
    /// A new item starts dirty in every slot.
    pub const fn new(frame_count: usize) -> Self {
        Self {
            remaining: frame_count,
            frame_count,
        }
    }

    pub fn mark(&mut self) {
        self.remaining = self.frame_count;
    }

    /// Returns `true` when the current slot still needs an upload, counting
    /// that upload as done.
    pub fn take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.remaining > 0
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}
