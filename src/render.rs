//! Summary card rendering.
//!
//! A card is the background image upscaled ×2 with the paper title centered
//! at the top, the three summary bullets centered in the middle, the subject
//! area in the bottom-left corner and the account handle in the bottom-right
//! corner. The first capital letter of the handle is drawn in the accent
//! colour (`@bioRxivGPT` → red `R`).

use crate::error::RenderError;
use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{FilterType, resize};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

const INK: Rgb<u8> = Rgb([0, 0, 0]);
const ACCENT: Rgb<u8> = Rgb([0xB3, 0x1B, 0x1B]);
const BULLET: &str = "•";
const BULLET_WRAP: usize = 90;
const JPEG_QUALITY: u8 = 95;

/// What goes on a card.
#[derive(Debug, Clone, Copy)]
pub struct Card<'a> {
    pub title: &'a str,
    pub bullets: [&'a str; 3],
    pub label: &'a str,
}

/// Anything that can turn a [`Card`] into an image file.
pub trait RenderCard {
    fn render(&self, card: &Card<'_>, output: &Path) -> Result<PathBuf, RenderError>;
}

/// Renders cards with `image` + `imageproc`.
pub struct CardRenderer {
    background: RgbImage,
    text_font: FontVec,
    brand_font: FontVec,
    brand: String,
    scale: u32,
}

impl CardRenderer {
    /// Load the background and fonts once for the whole run.
    #[instrument(level = "info", skip_all, fields(background = %background.display()))]
    pub fn load(
        background: &Path,
        text_font: &Path,
        brand_font: &Path,
        brand: &str,
    ) -> Result<Self, RenderError> {
        let background = image::open(background)?.to_rgb8();
        let renderer = Self {
            background,
            text_font: load_font(text_font)?,
            brand_font: load_font(brand_font)?,
            brand: brand.to_string(),
            scale: 2,
        };
        info!(
            width = renderer.background.width(),
            height = renderer.background.height(),
            "Loaded card assets"
        );
        Ok(renderer)
    }

    fn px(&self, size: u32) -> u32 {
        size * self.scale
    }

    fn draw(&self, card: &Card<'_>) -> RgbImage {
        let s = self.scale;
        let mut canvas = resize(
            &self.background,
            self.background.width() * s,
            self.background.height() * s,
            FilterType::Lanczos3,
        );
        let (width, height) = canvas.dimensions();
        let margin = self.px(50);
        let offset = 20;

        let title_scale = PxScale::from(self.px(35) as f32);
        let text_scale = PxScale::from(self.px(20) as f32);
        let brand_scale = PxScale::from(self.px(50) as f32);

        // Title, centered line by line from the top margin.
        let mut y = self.px(50) as i32;
        for line in wrap(card.title, title_columns(width.saturating_sub(2 * margin), s)) {
            let (w, h) = text_size(title_scale, &self.text_font, &line);
            let x = (width as i32 - w as i32) / 2;
            draw_text_mut(&mut canvas, INK, x, y, title_scale, &self.text_font, &line);
            y += h as i32 + self.px(10) as i32;
        }

        // Bullets, as one block centered both ways.
        let wrapped: Vec<Vec<String>> = card
            .bullets
            .iter()
            .map(|b| wrap(b, BULLET_WRAP))
            .collect();
        let line_height = self.px(25) as i32;
        let gap = self.px(20) as i32;
        let block_height: i32 = wrapped
            .iter()
            .map(|lines| lines.len() as i32 * line_height + gap)
            .sum();
        let bullet_width = text_size(text_scale, &self.text_font, &format!("{BULLET} ")).0 as i32;
        let widest = wrapped
            .iter()
            .flatten()
            .map(|line| text_size(text_scale, &self.text_font, line).0 as i32)
            .max()
            .unwrap_or(0);
        let start_x = (width as i32 - widest - bullet_width) / 2;
        let mut y = (height as i32 - block_height) / 2;
        for lines in &wrapped {
            draw_text_mut(&mut canvas, INK, start_x, y, text_scale, &self.text_font, BULLET);
            for (i, line) in lines.iter().enumerate() {
                let line_y = y + line_height * i as i32;
                draw_text_mut(
                    &mut canvas,
                    INK,
                    start_x + bullet_width,
                    line_y,
                    text_scale,
                    &self.text_font,
                    line,
                );
            }
            y += line_height * lines.len() as i32 + gap;
        }

        // Subject area, bottom left.
        let label = format!("Subject Area: {}", card.label);
        let (_, label_h) = text_size(text_scale, &self.text_font, &label);
        let label_y = height as i32 - margin as i32 - label_h as i32 - offset;
        draw_text_mut(&mut canvas, INK, margin as i32, label_y, text_scale, &self.text_font, &label);

        // Handle, bottom right, with the accent letter.
        let (brand_w, brand_h) = text_size(brand_scale, &self.brand_font, &self.brand);
        let mut x = width as i32 - margin as i32 - brand_w as i32;
        let brand_y = height as i32 - margin as i32 - brand_h as i32 - offset;
        for (part, color) in split_brand(&self.brand) {
            if part.is_empty() {
                continue;
            }
            draw_text_mut(&mut canvas, color, x, brand_y, brand_scale, &self.brand_font, part);
            x += text_size(brand_scale, &self.brand_font, part).0 as i32;
        }

        canvas
    }
}

impl RenderCard for CardRenderer {
    #[instrument(level = "info", skip_all, fields(output = %output.display()))]
    fn render(&self, card: &Card<'_>, output: &Path) -> Result<PathBuf, RenderError> {
        let canvas = self.draw(card);
        let mut writer = BufWriter::new(File::create(output)?);
        canvas.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY))?;
        info!("Rendered card");
        Ok(output.to_path_buf())
    }
}

fn load_font(path: &Path) -> Result<FontVec, RenderError> {
    let bytes = std::fs::read(path)?;
    FontVec::try_from_vec(bytes).map_err(|e| RenderError::Font(format!("{}: {e}", path.display())))
}

/// Columns for the title wrap: roughly how many 35px glyphs fit the width.
fn title_columns(max_width: u32, scale: u32) -> usize {
    let glyph = 35.0 * scale as f32 * 0.6;
    ((max_width as f32 / glyph) as usize).max(1)
}

/// Greedy word wrap to at most `width` characters per line.
///
/// A single word longer than `width` gets a line of its own.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Split a handle around its first capital letter after the `@`.
fn split_brand(brand: &str) -> [(&str, Rgb<u8>); 3] {
    let accent = brand
        .char_indices()
        .skip(1)
        .find(|(_, c)| c.is_uppercase());
    match accent {
        Some((i, c)) => {
            let end = i + c.len_utf8();
            [(&brand[..i], INK), (&brand[i..end], ACCENT), (&brand[end..], INK)]
        }
        None => [(brand, INK), ("", ACCENT), ("", INK)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_respects_width() {
        let text = "Plasmodesmal closure elicits stress responses in the leaf";
        let lines = wrap(text, 20);
        assert!(lines.iter().all(|l| l.chars().count() <= 20));
        assert_eq!(lines.join(" "), text);
    }

    #[test]
    fn test_wrap_long_word_gets_own_line() {
        assert_eq!(
            wrap("a supercalifragilistic b", 5),
            vec!["a", "supercalifragilistic", "b"]
        );
    }

    #[test]
    fn test_wrap_empty() {
        assert!(wrap("   ", 10).is_empty());
    }

    #[test]
    fn test_split_brand_accents_first_capital() {
        let parts = split_brand("@bioRxivGPT");
        assert_eq!(parts[0], ("@bio", INK));
        assert_eq!(parts[1], ("R", ACCENT));
        assert_eq!(parts[2], ("xivGPT", INK));

        let parts = split_brand("@arXivGPT");
        assert_eq!(parts[0].0, "@ar");
        assert_eq!(parts[1].0, "X");
    }

    #[test]
    fn test_split_brand_without_capital() {
        let parts = split_brand("@papers");
        assert_eq!(parts[0].0, "@papers");
        assert_eq!(parts[1].0, "");
    }

    #[test]
    fn test_title_columns() {
        // 1000px canvas at 2x: 900px usable / 42px per glyph.
        assert_eq!(title_columns(900, 2), 21);
        assert_eq!(title_columns(0, 2), 1);
    }
}
