//! Cosmetic variants the desk knows how to draw: themes, polaroid frames,
//! note paper colours and printer skins.

use inflections::case::to_title_case;
use ratatui::style::Color;
use ratatui::widgets::BorderType;

#[derive(Debug, Clone, Copy)]
pub struct Swatch {
    pub id: &'static str,
    pub fg: Color,
    pub bg: Color,
}

impl Swatch {
    pub fn display_name(&self) -> String {
        to_title_case(self.id)
    }
}

pub const THEMES: &[Swatch] = &[
    Swatch { id: "default", fg: Color::Gray, bg: Color::Reset },
    Swatch { id: "midnight", fg: Color::LightBlue, bg: Color::Rgb(16, 20, 40) },
    Swatch { id: "sakura", fg: Color::Rgb(120, 60, 80), bg: Color::Rgb(250, 228, 234) },
    Swatch { id: "desk_wood", fg: Color::Rgb(250, 235, 210), bg: Color::Rgb(92, 64, 40) },
];

pub const NOTE_COLORS: &[Swatch] = &[
    Swatch { id: "white", fg: Color::Black, bg: Color::Rgb(253, 253, 253) },
    Swatch { id: "yellow", fg: Color::Black, bg: Color::Rgb(254, 240, 138) },
    Swatch { id: "pink", fg: Color::Black, bg: Color::Rgb(251, 207, 232) },
    Swatch { id: "blue", fg: Color::Black, bg: Color::Rgb(191, 219, 254) },
    Swatch { id: "green", fg: Color::Black, bg: Color::Rgb(187, 247, 208) },
];

pub const PRINTER_STYLES: &[Swatch] = &[
    Swatch { id: "classic", fg: Color::Rgb(20, 83, 45), bg: Color::Rgb(125, 189, 67) },
    Swatch { id: "mint", fg: Color::Rgb(6, 78, 59), bg: Color::Rgb(167, 243, 208) },
    Swatch { id: "charcoal", fg: Color::Rgb(229, 231, 235), bg: Color::Rgb(55, 65, 81) },
    Swatch { id: "sunset", fg: Color::Rgb(124, 45, 18), bg: Color::Rgb(253, 186, 116) },
];

#[derive(Debug, Clone, Copy)]
pub struct FrameStyle {
    pub id: &'static str,
    pub border: BorderType,
    pub frame: Color,
}

impl FrameStyle {
    pub fn display_name(&self) -> String {
        to_title_case(self.id)
    }
}

pub const POLAROID_STYLES: &[FrameStyle] = &[
    FrameStyle { id: "classic", border: BorderType::Plain, frame: Color::White },
    FrameStyle { id: "vintage", border: BorderType::Rounded, frame: Color::Rgb(237, 224, 200) },
    FrameStyle { id: "noir", border: BorderType::Thick, frame: Color::DarkGray },
    FrameStyle { id: "gallery", border: BorderType::Double, frame: Color::Rgb(245, 245, 245) },
];

pub fn theme(id: &str) -> Swatch {
    find(THEMES, id, |s| s.id)
}

pub fn note_color(id: &str) -> Swatch {
    find(NOTE_COLORS, id, |s| s.id)
}

pub fn printer_style(id: &str) -> Swatch {
    find(PRINTER_STYLES, id, |s| s.id)
}

pub fn polaroid_style(id: &str) -> FrameStyle {
    find(POLAROID_STYLES, id, |s| s.id)
}

/// Unknown ids render as the first entry.
fn find<T: Copy>(items: &[T], id: &str, key: impl Fn(&T) -> &'static str) -> T {
    items
        .iter()
        .find(|item| key(*item) == id)
        .copied()
        .unwrap_or(items[0])
}

/// Id following `current` in the list, wrapping around.
pub fn next_id<T>(items: &[T], current: &str, key: impl Fn(&T) -> &'static str) -> &'static str {
    let position = items.iter().position(|item| key(item) == current);
    let next = match position {
        Some(idx) => (idx + 1) % items.len(),
        None => 0,
    };
    key(&items[next])
}
