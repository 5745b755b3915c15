//! Selection and scroll-window math shared by every scrollable pane.

/// Recomputes the top of the visible window after the selection moves from
/// `old_index` to `new_index`.
///
/// The result always satisfies `start <= new_index < start + visible_height`
/// for a valid `new_index`, and never scrolls past the last full page.
pub fn update_selection(
    old_index: usize,
    new_index: usize,
    item_count: usize,
    visible_height: usize,
    scroll_start: usize,
) -> usize {
    if old_index == new_index {
        return scroll_start;
    }
    let height = visible_height.max(1);
    let mut start = scroll_start;
    if new_index < start {
        start = new_index;
    } else if new_index >= start + height {
        start = new_index + 1 - height;
    }
    start.min(item_count.saturating_sub(height))
}

/// Wraps `index + delta` around both ends of a list of `count` items.
pub fn wrap_index(index: usize, delta: isize, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let count = count as isize;
    (index as isize + delta).rem_euclid(count) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavCommand {
    LineUp,
    LineDown,
    PageUp,
    PageDown,
    Home,
    End,
}

impl NavCommand {
    /// Target index for the command. Line moves wrap when `wrap` is set;
    /// everything else clamps.
    pub fn target(self, selected: usize, item_count: usize, visible_height: usize, wrap: bool) -> usize {
        if item_count == 0 {
            return 0;
        }
        let last = item_count - 1;
        let page = visible_height.max(1);
        match self {
            NavCommand::LineUp if wrap => wrap_index(selected, -1, item_count),
            NavCommand::LineDown if wrap => wrap_index(selected, 1, item_count),
            NavCommand::LineUp => selected.saturating_sub(1),
            NavCommand::LineDown => (selected + 1).min(last),
            NavCommand::PageUp => selected.saturating_sub(page),
            NavCommand::PageDown => (selected + page).min(last),
            NavCommand::Home => 0,
            NavCommand::End => last,
        }
    }
}

/// Selected row plus the first visible row of a list pane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListCursor {
    pub selected: usize,
    pub scroll_start: usize,
}

impl ListCursor {
    pub fn select(&mut self, index: usize, item_count: usize, visible_height: usize) {
        let new_index = index.min(item_count.saturating_sub(1));
        self.scroll_start = update_selection(
            self.selected,
            new_index,
            item_count,
            visible_height,
            self.scroll_start,
        );
        self.selected = new_index;
    }

    pub fn apply(&mut self, command: NavCommand, item_count: usize, visible_height: usize, wrap: bool) {
        let target = command.target(self.selected, item_count, visible_height, wrap);
        self.select(target, item_count, visible_height);
    }

    /// Re-establishes the window invariant after the list or pane shrank.
    pub fn clamp(&mut self, item_count: usize, visible_height: usize) {
        let height = visible_height.max(1);
        self.selected = self.selected.min(item_count.saturating_sub(1));
        if self.selected < self.scroll_start {
            self.scroll_start = self.selected;
        } else if self.selected >= self.scroll_start + height {
            self.scroll_start = self.selected + 1 - height;
        }
        self.scroll_start = self.scroll_start.min(item_count.saturating_sub(height));
    }
}

/// Moves a free-scrolling window (the message pad) by `delta` lines.
pub fn scroll_window(start: usize, delta: isize, total_lines: usize, visible_height: usize) -> usize {
    let max_start = total_lines.saturating_sub(visible_height.max(1));
    let moved = start as isize + delta;
    moved.clamp(0, max_start as isize) as usize
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollArrows {
    pub up: bool,
    pub down: bool,
}

pub fn arrows(scroll_start: usize, visible_height: usize, item_count: usize) -> ScrollArrows {
    let height = visible_height.max(1);
    ScrollArrows {
        up: scroll_start > 0,
        down: item_count > 0 && scroll_start + height < item_count,
    }
}
