//! Drawing surface the render code targets. The terminal implementation is
//! a ratatui `Buffer`; tests use `RecordingSurface`.

use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;
use ratatui::widgets::{Block, Borders, Widget};
use unicode_width::UnicodeWidthStr;

const COLOR_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_INACTIVE_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(88, 91, 112);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);
const COLOR_WARN: Color = Color::Rgb(249, 226, 175);

/// Named logical colours. Backends decide what each looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Normal,
    Dim,
    Selected,
    SelectedInactive,
    Border,
    BorderFocused,
    Title,
    Notification,
    Divider,
    Sent,
    Received,
    Warning,
    Note,
    Underline,
    Arrow,
    Header,
}

pub fn style_for(role: Role) -> Style {
    let base = Style::default().bg(COLOR_BG).fg(COLOR_TEXT_PRIMARY);
    match role {
        Role::Normal => base,
        Role::Dim => base.fg(COLOR_TEXT_SECONDARY),
        Role::Selected => base.bg(COLOR_SELECTED_BG).add_modifier(Modifier::BOLD),
        Role::SelectedInactive => base.bg(COLOR_INACTIVE_BG),
        Role::Border => base.fg(COLOR_BORDER_IDLE),
        Role::BorderFocused => base.fg(COLOR_BORDER_FOCUSED),
        Role::Title => base.fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
        Role::Notification => base.fg(COLOR_WARN).add_modifier(Modifier::BOLD),
        Role::Divider => base.fg(COLOR_TEXT_SECONDARY).add_modifier(Modifier::ITALIC),
        Role::Sent => base.fg(COLOR_SUCCESS),
        Role::Received => base.fg(COLOR_ACCENT),
        Role::Warning => base.fg(COLOR_ERROR).add_modifier(Modifier::BOLD),
        Role::Note => base.fg(COLOR_SUCCESS),
        Role::Underline => base.add_modifier(Modifier::UNDERLINED),
        Role::Arrow => base.fg(COLOR_ACCENT),
        Role::Header => base.fg(COLOR_TEXT_SECONDARY).add_modifier(Modifier::BOLD),
    }
}

/// One row of styled runs.
pub type StyledLine = Vec<(String, Role)>;

/// Off-screen buffer of rows, copied to the surface a window at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pad {
    pub lines: Vec<StyledLine>,
}

impl Pad {
    pub fn push(&mut self, line: StyledLine) {
        self.lines.push(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub trait Surface {
    fn area(&self) -> Rect;

    /// Writes `text` at `(x, y)`, clipped to `max_width` columns. Returns
    /// the number of columns used.
    fn write(&mut self, x: u16, y: u16, text: &str, max_width: u16, role: Role) -> u16;

    fn clear(&mut self, area: Rect);

    fn draw_box(&mut self, area: Rect, title: &str, focused: bool) {
        if area.width < 2 || area.height < 2 {
            return;
        }
        let role = if focused { Role::BorderFocused } else { Role::Border };
        let inner = area.width - 2;
        let right = area.x + area.width - 1;
        let bottom = area.y + area.height - 1;
        let horizontal = "─".repeat(inner as usize);
        self.write(area.x, area.y, "┌", 1, role);
        self.write(area.x + 1, area.y, &horizontal, inner, role);
        self.write(right, area.y, "┐", 1, role);
        for y in area.y + 1..bottom {
            self.write(area.x, y, "│", 1, role);
            self.write(right, y, "│", 1, role);
        }
        self.write(area.x, bottom, "└", 1, role);
        self.write(area.x + 1, bottom, &horizontal, inner, role);
        self.write(right, bottom, "┘", 1, role);
        if !title.is_empty() {
            self.write(area.x + 2, area.y, &format!(" {title} "), inner.saturating_sub(2), Role::Title);
        }
    }

    /// Copies `dest.height` rows of `pad`, starting at `first_row`, into
    /// `dest`.
    fn blit(&mut self, pad: &Pad, first_row: usize, dest: Rect) {
        for (offset, line) in pad
            .lines
            .iter()
            .skip(first_row)
            .take(dest.height as usize)
            .enumerate()
        {
            let y = dest.y + offset as u16;
            let mut x = dest.x;
            for (text, role) in line {
                let used = x - dest.x;
                if used >= dest.width {
                    break;
                }
                x += self.write(x, y, text, dest.width - used, *role);
            }
        }
    }
}

impl Surface for Buffer {
    fn area(&self) -> Rect {
        self.area
    }

    fn write(&mut self, x: u16, y: u16, text: &str, max_width: u16, role: Role) -> u16 {
        let area = self.area;
        if y < area.y || y >= area.bottom() || x < area.x || x >= area.right() {
            return 0;
        }
        let width = max_width.min(area.right() - x);
        let (end, _) = self.set_stringn(x, y, text, width as usize, style_for(role));
        end.saturating_sub(x)
    }

    fn clear(&mut self, area: Rect) {
        let area = area.intersection(self.area);
        let blank = style_for(Role::Normal);
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                self.get_mut(x, y).reset();
                self.get_mut(x, y).set_style(blank);
            }
        }
    }

    fn draw_box(&mut self, area: Rect, title: &str, focused: bool) {
        let area = area.intersection(self.area);
        if area.width < 2 || area.height < 2 {
            return;
        }
        let border = style_for(if focused { Role::BorderFocused } else { Role::Border });
        let mut block = Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .style(style_for(Role::Normal));
        if !title.is_empty() {
            block = block.title(Span::styled(format!(" {title} "), style_for(Role::Title)));
        }
        block.render(area, self);
    }
}

/// In-memory character grid that also logs every write.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    width: u16,
    height: u16,
    cells: Vec<Vec<(char, Role)>>,
    pub writes: Vec<(u16, u16, String, Role)>,
    pub clears: Vec<Rect>,
}

impl RecordingSurface {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            cells: vec![vec![(' ', Role::Normal); width as usize]; height as usize],
            writes: Vec::new(),
            clears: Vec::new(),
        }
    }

    pub fn row(&self, y: u16) -> String {
        self.cells
            .get(y as usize)
            .map(|row| row.iter().map(|(ch, _)| *ch).collect::<String>())
            .unwrap_or_default()
    }

    pub fn role_at(&self, x: u16, y: u16) -> Option<Role> {
        self.cells
            .get(y as usize)
            .and_then(|row| row.get(x as usize))
            .map(|(_, role)| *role)
    }

    pub fn contains(&self, needle: &str) -> bool {
        (0..self.height).any(|y| self.row(y).contains(needle))
    }

    pub fn reset_log(&mut self) {
        self.writes.clear();
        self.clears.clear();
    }
}

impl Surface for RecordingSurface {
    fn area(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    fn write(&mut self, x: u16, y: u16, text: &str, max_width: u16, role: Role) -> u16 {
        if y >= self.height || x >= self.width {
            return 0;
        }
        let limit = max_width.min(self.width - x) as usize;
        let mut used = 0usize;
        let mut written = String::new();
        for ch in text.chars() {
            let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
            if used + w > limit {
                break;
            }
            if w > 0 {
                self.cells[y as usize][x as usize + used] = (ch, role);
                for pad in 1..w {
                    self.cells[y as usize][x as usize + used + pad] = (' ', role);
                }
            }
            used += w;
            written.push(ch);
        }
        if !written.is_empty() {
            self.writes.push((x, y, written, role));
        }
        used as u16
    }

    fn clear(&mut self, area: Rect) {
        let area = area.intersection(self.area());
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                self.cells[y as usize][x as usize] = (' ', Role::Normal);
            }
        }
        self.clears.push(area);
    }
}

/// Display width of `text` in terminal columns.
pub fn text_width(text: &str) -> usize {
    text.width()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_surface_clips_and_logs() {
        let mut surface = RecordingSurface::new(6, 2);
        let used = surface.write(2, 0, "abcdef", 10, Role::Sent);
        assert_eq!(used, 4);
        assert_eq!(surface.row(0), "  abcd");
        assert_eq!(surface.role_at(2, 0), Some(Role::Sent));
        assert_eq!(surface.writes.len(), 1);
        assert_eq!(surface.write(0, 5, "x", 1, Role::Normal), 0);
    }

    #[test]
    fn wide_glyphs_take_two_columns() {
        let mut surface = RecordingSurface::new(4, 1);
        assert_eq!(surface.write(0, 0, "日本語", 4, Role::Normal), 4);
        assert_eq!(surface.row(0), "日 本 ");
    }

    #[test]
    fn default_box_draws_corners_and_title() {
        let mut surface = RecordingSurface::new(10, 3);
        surface.draw_box(Rect::new(0, 0, 10, 3), "Hi", true);
        assert_eq!(surface.row(0), "┌─ Hi ───┐");
        assert_eq!(surface.row(1), "│        │");
        assert_eq!(surface.row(2), "└────────┘");
    }

    #[test]
    fn blit_copies_window_of_pad() {
        let mut pad = Pad::default();
        for idx in 0..5 {
            pad.push(vec![(format!("line{idx}"), Role::Normal)]);
        }
        let mut surface = RecordingSurface::new(8, 2);
        surface.blit(&pad, 3, Rect::new(0, 0, 8, 2));
        assert_eq!(surface.row(0).trim_end(), "line3");
        assert_eq!(surface.row(1).trim_end(), "line4");
    }

    #[test]
    fn buffer_surface_writes_cells() {
        let mut buffer = Buffer::empty(Rect::new(0, 0, 8, 2));
        let used = Surface::write(&mut buffer, 1, 1, "hey", 8, Role::Normal);
        assert_eq!(used, 3);
        assert_eq!(buffer.get(1, 1).symbol(), "h");
        assert_eq!(Surface::write(&mut buffer, 0, 4, "x", 1, Role::Normal), 0);
    }
}
