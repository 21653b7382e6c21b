use std::collections::VecDeque;
use std::io::{self, Write};

use adventure_core::{ChoiceResolver, Frame, PageIndex, RenderImage, Size};
use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};
use tracing::warn;

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

/// Terminal size in cells and pixels. The last row is kept for the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellMetrics {
    pub columns: u16,
    pub rows: u16,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl CellMetrics {
    /// Falls back to `fallback` pixels when the terminal does not report them.
    pub fn new(columns: u16, rows: u16, pixel_width: u32, pixel_height: u32, fallback: Size) -> Self {
        let (pixel_width, pixel_height) = if pixel_width == 0 || pixel_height == 0 {
            (fallback.width, fallback.height)
        } else {
            (pixel_width, pixel_height)
        };
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
            pixel_width,
            pixel_height,
        }
    }

    pub fn query(fallback: Size) -> Result<Self> {
        let window = crossterm::terminal::window_size()?;
        Ok(Self::new(
            window.columns,
            window.rows,
            u32::from(window.width),
            u32::from(window.height),
            fallback,
        ))
    }

    fn cell_size(&self) -> (f64, f64) {
        (
            f64::from(self.pixel_width) / f64::from(self.columns),
            f64::from(self.pixel_height) / f64::from(self.rows),
        )
    }

    pub fn image_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }

    /// Pixel area available for the page image.
    pub fn viewport(&self) -> Size {
        let (_, cell_height) = self.cell_size();
        let height = (cell_height * f64::from(self.image_rows())).floor() as u32;
        Size::new(self.pixel_width, height)
    }

    /// Cell that contains the pixel offset.
    pub fn cell_at(&self, offset_x: i32, offset_y: i32) -> (u16, u16) {
        let (cell_width, cell_height) = self.cell_size();
        let col = (f64::from(offset_x.max(0)) / cell_width).floor() as u16;
        let row = (f64::from(offset_y.max(0)) / cell_height).floor() as u16;
        (
            col.min(self.columns - 1),
            row.min(self.image_rows() - 1),
        )
    }

    /// Cells covered by an image of `width`x`height` pixels.
    pub fn span(&self, width: u32, height: u32) -> DrawParams {
        let (cell_width, cell_height) = self.cell_size();
        DrawParams::clamped(
            (f64::from(width) / cell_width).round() as u32,
            (f64::from(height) / cell_height).round() as u32,
        )
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    u8::from(more)
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", u8::from(more))?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes the page image from the screen.
    pub fn delete_image(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=i,i={},q=2\u{1b}\\", self.image_id)?;
        Ok(())
    }

    /// Paints one frame of the display surface into the image area.
    pub fn draw_frame(&mut self, frame: &Frame, metrics: &CellMetrics) -> Result<()> {
        match frame {
            Frame::Image {
                image,
                offset_x,
                offset_y,
            } => {
                let (col, row) = metrics.cell_at(*offset_x, *offset_y);
                crossterm::queue!(&mut self.writer, cursor::MoveTo(col, row))?;
                self.draw(image, metrics.span(image.width, image.height))
            }
            Frame::Placeholder => {
                self.delete_image()?;
                self.centered_text(metrics, "No page selected", None)
            }
            Frame::Error => {
                self.delete_image()?;
                self.centered_text(metrics, "X  page image unavailable  X", Some(Color::Red))
            }
        }
    }

    fn centered_text(&mut self, metrics: &CellMetrics, text: &str, color: Option<Color>) -> Result<()> {
        let width = text.chars().count() as u16;
        let col = metrics.columns.saturating_sub(width) / 2;
        let row = metrics.image_rows() / 2;
        crossterm::queue!(&mut self.writer, cursor::MoveTo(col, row))?;
        if let Some(color) = color {
            crossterm::queue!(&mut self.writer, SetForegroundColor(color))?;
        }
        crossterm::queue!(&mut self.writer, Print(text), ResetColor)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }

    pub fn status_line(&mut self, metrics: &CellMetrics, text: &str) -> Result<()> {
        let row = metrics.rows.saturating_sub(1);
        let visible: String = text.chars().take(usize::from(metrics.columns)).collect();
        crossterm::queue!(
            &mut self.writer,
            cursor::MoveTo(0, row),
            Clear(ClearType::CurrentLine)
        )?;
        write_status_line(&mut self.writer, &visible)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Advance,
    Retreat,
    Redraw,
    Resize,
    /// Zero-based position of the picked candidate.
    Choose(usize),
    CancelChoice,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    /// Picking one of `count` candidates.
    Choice { count: usize },
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Resize(..) => UiEvent::Resize,
            Event::Key(KeyEvent { kind, .. }) if kind == KeyEventKind::Release => UiEvent::None,
            Event::Key(key) => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::Choice { count } => self.map_key_choice(key, count),
            },
            _ => UiEvent::None,
        }
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            (KeyCode::Char('l'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Redraw
            }
            (KeyCode::Char(' '), _)
            | (KeyCode::Char('l'), KeyModifiers::NONE)
            | (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Right, _)
            | (KeyCode::Down, _)
            | (KeyCode::PageDown, _)
            | (KeyCode::Enter, _) => UiEvent::Advance,
            (KeyCode::Backspace, _)
            | (KeyCode::Char('h'), KeyModifiers::NONE)
            | (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Left, _)
            | (KeyCode::Up, _)
            | (KeyCode::PageUp, _) => UiEvent::Retreat,
            (KeyCode::Char('r'), _) => UiEvent::Redraw,
            (KeyCode::Char('q'), _) => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn map_key_choice(&mut self, key: KeyEvent, count: usize) -> UiEvent {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => {
                self.reset_count();
                UiEvent::CancelChoice
            }
            KeyCode::Char(c) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                // With few candidates a single digit is unambiguous.
                if count <= 9 {
                    return self.confirm(count);
                }
                UiEvent::None
            }
            KeyCode::Backspace => {
                self.pending_digits.pop();
                self.pending_count = self.pending_digits.parse().ok();
                UiEvent::None
            }
            KeyCode::Enter => self.confirm(count),
            _ => UiEvent::None,
        }
    }

    fn confirm(&mut self, count: usize) -> UiEvent {
        let picked = self.pending_count.take();
        self.pending_digits.clear();
        match picked {
            Some(n) if n >= 1 && n <= count => UiEvent::Choose(n - 1),
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

/// Blocking supply of terminal events.
pub trait EventSource {
    fn next_event(&mut self) -> io::Result<Option<Event>>;
}

/// Reads from the real terminal.
#[derive(Debug, Default)]
pub struct CrosstermEvents;

impl EventSource for CrosstermEvents {
    fn next_event(&mut self) -> io::Result<Option<Event>> {
        event::read().map(Some)
    }
}

impl EventSource for VecDeque<Event> {
    fn next_event(&mut self) -> io::Result<Option<Event>> {
        Ok(self.pop_front())
    }
}

pub fn choice_prompt(candidates: &[PageIndex], pending: Option<&str>) -> String {
    let mut prompt = String::from("Choose:");
    for (position, candidate) in candidates.iter().enumerate() {
        prompt.push_str(&format!("  [{}] page {}", position + 1, candidate));
    }
    prompt.push_str("  (Esc to stay)");
    if let Some(pending) = pending {
        prompt.push_str(" | ");
        prompt.push_str(pending);
    }
    prompt
}

/// Asks on the status line which branch to follow.
pub struct TerminalChoiceResolver<'a, W: Write, S: EventSource> {
    renderer: &'a mut KittyRenderer<W>,
    events: S,
    metrics: CellMetrics,
}

impl<'a, W: Write, S: EventSource> TerminalChoiceResolver<'a, W, S> {
    pub fn new(renderer: &'a mut KittyRenderer<W>, events: S, metrics: CellMetrics) -> Self {
        Self {
            renderer,
            events,
            metrics,
        }
    }

    fn prompt(&mut self, candidates: &[PageIndex]) -> Result<Option<usize>> {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::Choice {
            count: candidates.len(),
        });
        loop {
            let prompt = choice_prompt(candidates, mapper.pending_input().as_deref());
            self.renderer.status_line(&self.metrics, &prompt)?;
            let Some(event) = self.events.next_event()? else {
                return Ok(None);
            };
            match mapper.map_event(event) {
                UiEvent::Choose(position) => return Ok(Some(position)),
                UiEvent::CancelChoice => return Ok(None),
                _ => {}
            }
        }
    }
}

impl<W: Write, S: EventSource> ChoiceResolver for TerminalChoiceResolver<'_, W, S> {
    fn choose(&mut self, candidates: &[PageIndex]) -> Option<usize> {
        match self.prompt(candidates) {
            Ok(choice) => choice,
            Err(err) => {
                warn!(?err, "choice prompt failed; staying on the current page");
                None
            }
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;
    use std::sync::Arc;

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn metrics() -> CellMetrics {
        CellMetrics::new(80, 25, 800, 500, Size::new(1, 1))
    }

    fn idx(value: u32) -> PageIndex {
        PageIndex::new(value).unwrap()
    }

    #[test]
    fn kitty_draw_emits_protocol() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let image = RenderImage {
            width: 1,
            height: 1,
            pixels: vec![255, 0, 0, 255],
        };

        renderer.draw(&image, DrawParams::clamped(10, 5)).unwrap();
        let output = renderer.writer;
        assert_eq!(output[0], 0x1b);
        assert_eq!(output[1], b'_');
        assert_eq!(output[2], b'G');
    }

    #[test]
    fn frames_map_to_image_or_text() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let image = Arc::new(RenderImage {
            width: 2,
            height: 2,
            pixels: vec![0; 16],
        });
        renderer
            .draw_frame(
                &Frame::Image {
                    image,
                    offset_x: 100,
                    offset_y: 40,
                },
                &metrics(),
            )
            .unwrap();
        let output = String::from_utf8_lossy(renderer.writer()).to_string();
        // Cells are 10x20 pixels: column 10, row 2 (1-based 11;3).
        assert!(output.starts_with("\u{1b}[3;11H"));
        assert!(output.contains("\u{1b}_Ga=T"));

        let mut renderer = KittyRenderer::new(Vec::new());
        renderer.draw_frame(&Frame::Placeholder, &metrics()).unwrap();
        let output = String::from_utf8_lossy(renderer.writer()).to_string();
        assert!(output.contains("a=d"));
        assert!(output.contains("No page selected"));

        let mut renderer = KittyRenderer::new(Vec::new());
        renderer.draw_frame(&Frame::Error, &metrics()).unwrap();
        let output = String::from_utf8_lossy(renderer.writer()).to_string();
        assert!(output.contains("page image unavailable"));
    }

    #[test]
    fn cell_metrics_reserve_status_row() {
        let metrics = metrics();
        assert_eq!(metrics.image_rows(), 24);
        assert_eq!(metrics.viewport(), Size::new(800, 480));
        assert_eq!(metrics.cell_at(-5, 10_000), (0, 23));
        let params = metrics.span(400, 200);
        assert_eq!((params.columns, params.rows), (40, 10));
    }

    #[test]
    fn cell_metrics_fall_back_without_pixel_size() {
        let metrics = CellMetrics::new(80, 25, 0, 0, Size::new(1600, 1000));
        assert_eq!((metrics.pixel_width, metrics.pixel_height), (1600, 1000));
    }

    #[test]
    fn event_mapper_normal_mode_navigation_keys() {
        let mut mapper = EventMapper::new();
        for code in [KeyCode::Char(' '), KeyCode::Char('l'), KeyCode::Right, KeyCode::Enter] {
            assert_eq!(mapper.map_event(key_event(code)), UiEvent::Advance);
        }
        for code in [KeyCode::Backspace, KeyCode::Char('h'), KeyCode::Left] {
            assert_eq!(mapper.map_event(key_event(code)), UiEvent::Retreat);
        }
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('q'))), UiEvent::Quit);
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('c'),
                KeyModifiers::CONTROL
            )),
            UiEvent::Quit
        );
        assert_eq!(mapper.map_event(Event::Resize(10, 10)), UiEvent::Resize);
    }

    #[test]
    fn event_mapper_ignores_key_release() {
        let mut mapper = EventMapper::new();
        let release = Event::Key(KeyEvent {
            code: KeyCode::Char(' '),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        });
        assert_eq!(mapper.map_event(release), UiEvent::None);
    }

    #[test]
    fn choice_mode_single_digit_picks_immediately() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::Choice { count: 3 });
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('2'))), UiEvent::Choose(1));
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('7'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('0'))), UiEvent::None);
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Esc)),
            UiEvent::CancelChoice
        );
    }

    #[test]
    fn choice_mode_many_candidates_needs_enter() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::Choice { count: 12 });
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('3'))), UiEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("13"));
        assert_eq!(mapper.map_event(key_event(KeyCode::Backspace)), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Enter)), UiEvent::Choose(10));
        assert_eq!(mapper.pending_input(), None);
    }

    #[test]
    fn switching_modes_clears_pending_digits() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::Choice { count: 20 });
        mapper.map_event(key_event(KeyCode::Char('4')));
        mapper.set_mode(InputMode::Normal);
        assert_eq!(mapper.pending_input(), None);
        assert_eq!(mapper.mode(), InputMode::Normal);
    }

    #[test]
    fn terminal_resolver_reads_keys_until_choice() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let events: VecDeque<Event> = [
            key_event(KeyCode::Char('x')),
            key_event(KeyCode::Char('9')),
            key_event(KeyCode::Char('3')),
        ]
        .into_iter()
        .collect();
        let mut resolver = TerminalChoiceResolver::new(&mut renderer, events, metrics());

        let candidates = [idx(3), idx(7), idx(2)];
        assert_eq!(resolver.choose(&candidates), Some(2));

        let output = String::from_utf8_lossy(renderer.writer()).to_string();
        assert!(output.contains("[1] page 3  [2] page 7  [3] page 2"));
    }

    #[test]
    fn terminal_resolver_cancels_on_escape_or_exhaustion() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let events: VecDeque<Event> = [key_event(KeyCode::Esc)].into_iter().collect();
        let mut resolver = TerminalChoiceResolver::new(&mut renderer, events, metrics());
        assert_eq!(resolver.choose(&[idx(1), idx(2)]), None);

        let mut resolver = TerminalChoiceResolver::new(&mut renderer, VecDeque::new(), metrics());
        assert_eq!(resolver.choose(&[idx(1), idx(2)]), None);
    }
}
