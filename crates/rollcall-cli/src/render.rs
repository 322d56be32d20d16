//! Terminal front end for a running session: annotated preview frames and
//! keyboard quit.

use crate::term::RawMode;
use ab_glyph::{FontRef, InvalidFont, PxScale};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rollcall_core::{ClassifiedFace, RenderError, Renderer};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

const MATCHED_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_PX: f32 = 20.0;
/// Space between the label and the box edge.
const LABEL_GAP: i32 = 6;

static LABEL_FONT_TTF: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

pub fn label_font() -> Result<FontRef<'static>, InvalidFont> {
    FontRef::try_from_slice(LABEL_FONT_TTF)
}

pub struct TerminalRenderer {
    preview: Option<PathBuf>,
    font: FontRef<'static>,
    /// Held for the whole session when stdin is a terminal.
    raw: Option<RawMode>,
}

impl TerminalRenderer {
    pub fn new(preview: Option<PathBuf>) -> Result<Self> {
        let font = label_font().context("bundled label font is unreadable")?;
        let raw = if std::io::stdin().is_terminal() {
            Some(RawMode::enable().context("failed to put the terminal in raw mode")?)
        } else {
            tracing::warn!("stdin is not a terminal; quit key disabled");
            None
        };
        Ok(Self { preview, font, raw })
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, frame: &RgbImage, faces: &[ClassifiedFace]) -> Result<(), RenderError> {
        for face in faces {
            tracing::debug!(
                label = face.classification.label(),
                top = face.bbox.top,
                left = face.bbox.left,
                bottom = face.bbox.bottom,
                right = face.bbox.right,
                "face"
            );
        }
        let Some(path) = &self.preview else {
            return Ok(());
        };
        annotate(frame, faces, &self.font).save(path)?;
        Ok(())
    }

    fn poll_quit(&mut self, timeout: Duration) -> Result<bool, RenderError> {
        if self.raw.is_none() {
            std::thread::sleep(timeout);
            return Ok(false);
        }

        let mut quit = false;
        if event::poll(timeout)? {
            // Drain everything queued so stale keys don't leak into later polls.
            loop {
                quit |= is_quit_key(&event::read()?);
                if !event::poll(Duration::ZERO)? {
                    break;
                }
            }
        }
        Ok(quit)
    }
}

/// Copy of `frame` with a labelled box around each face, green if matched,
/// red otherwise.
pub fn annotate(frame: &RgbImage, faces: &[ClassifiedFace], font: &FontRef<'_>) -> RgbImage {
    let mut out = frame.clone();
    for face in faces {
        let color = if face.classification.is_match() { MATCHED_COLOR } else { UNKNOWN_COLOR };
        let b = face.bbox;
        for inset in 0..BOX_THICKNESS {
            let width = b.width().saturating_sub(2 * inset);
            let height = b.height().saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }
            let rect = Rect::at((b.left + inset) as i32, (b.top + inset) as i32).of_size(width, height);
            draw_hollow_rect_mut(&mut out, rect, color);
        }

        // Above the box, or below it when there is no room at the top.
        let above = b.top as i32 - LABEL_PX as i32 - LABEL_GAP;
        let y = if above >= 0 { above } else { b.bottom as i32 + LABEL_GAP };
        draw_text_mut(
            &mut out,
            color,
            b.left as i32,
            y,
            PxScale::from(LABEL_PX),
            font,
            face.classification.label(),
        );
    }
    out
}

fn is_quit_key(event: &Event) -> bool {
    let Event::Key(KeyEvent { code, modifiers, kind, .. }) = event else {
        return false;
    };
    if *kind == KeyEventKind::Release {
        return false;
    }
    match code {
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => true,
        KeyCode::Char('c') => modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;
    use rollcall_core::{BoundingBox, Classification};

    fn face(classification: Classification) -> ClassifiedFace {
        ClassifiedFace {
            bbox: BoundingBox::new(2, 12, 10, 4).unwrap(),
            classification,
        }
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn renderer(preview: Option<PathBuf>) -> TerminalRenderer {
        TerminalRenderer { preview, font: label_font().unwrap(), raw: None }
    }

    /// Pixels in the given rows and columns that are not black.
    fn inked(image: &RgbImage, rows: std::ops::Range<u32>, cols: std::ops::Range<u32>) -> Vec<Rgb<u8>> {
        rows.flat_map(|y| cols.clone().map(move |x| (x, y)))
            .map(|(x, y)| *image.get_pixel(x, y))
            .filter(|p| p.0 != [0, 0, 0])
            .collect()
    }

    #[test]
    fn test_annotate_matched_is_green() {
        let frame = RgbImage::new(16, 16);
        let out = annotate(&frame, &[face(Classification::Matched("alice".into()))], &label_font().unwrap());
        assert_eq!(out.get_pixel(4, 2), &MATCHED_COLOR);
        assert_eq!(out.get_pixel(5, 3), &MATCHED_COLOR);
        // interior and outside untouched
        assert_eq!(out.get_pixel(8, 6), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        // source frame not modified
        assert_eq!(frame.get_pixel(4, 2), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_unknown_is_red() {
        let frame = RgbImage::new(16, 16);
        let out = annotate(&frame, &[face(Classification::Unmatched)], &label_font().unwrap());
        assert_eq!(out.get_pixel(11, 9), &UNKNOWN_COLOR);
    }

    #[test]
    fn test_annotate_draws_name_above_box() {
        let frame = RgbImage::new(96, 96);
        let alice = ClassifiedFace {
            bbox: BoundingBox::new(50, 60, 90, 10).unwrap(),
            classification: Classification::Matched("alice".into()),
        };
        let out = annotate(&frame, &[alice], &label_font().unwrap());

        let label = inked(&out, 20..46, 10..90);
        assert!(!label.is_empty());
        // Glyph edges are blended toward black, so only the hue is fixed.
        assert!(label.iter().all(|p| p.0[0] == 0 && p.0[2] == 0 && p.0[1] > 0));
        // Nothing above the label band.
        assert!(inked(&out, 0..18, 0..96).is_empty());
    }

    #[test]
    fn test_annotate_label_goes_below_box_near_top_edge() {
        let frame = RgbImage::new(96, 96);
        let unknown = ClassifiedFace {
            bbox: BoundingBox::new(4, 60, 40, 10).unwrap(),
            classification: Classification::Unmatched,
        };
        let out = annotate(&frame, &[unknown], &label_font().unwrap());

        let label = inked(&out, 44..70, 10..96);
        assert!(!label.is_empty());
        assert!(label.iter().all(|p| p.0[1] == 0 && p.0[2] == 0));
        assert!(inked(&out, 0..4, 0..96).is_empty());
    }

    #[test]
    fn test_annotate_no_faces() {
        let frame = RgbImage::from_pixel(8, 8, Rgb([9, 9, 9]));
        assert_eq!(annotate(&frame, &[], &label_font().unwrap()), frame);
    }

    #[test]
    fn test_render_writes_preview() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("preview.png");
        let mut renderer = renderer(Some(path.clone()));

        renderer
            .render(&RgbImage::new(16, 16), &[face(Classification::Unmatched)])
            .unwrap();

        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.get_pixel(4, 2), &UNKNOWN_COLOR);
    }

    #[test]
    fn test_render_without_preview_is_noop() {
        renderer(None).render(&RgbImage::new(4, 4), &[]).unwrap();
    }

    #[test]
    fn test_non_interactive_poll_never_quits() {
        assert!(!renderer(None).poll_quit(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_quit_keys() {
        assert!(is_quit_key(&key(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit_key(&key(KeyCode::Char('Q'), KeyModifiers::SHIFT)));
        assert!(is_quit_key(&key(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_quit_key(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_quit_key(&key(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!is_quit_key(&key(KeyCode::Enter, KeyModifiers::NONE)));
        assert!(!is_quit_key(&Event::FocusGained));
    }
}
