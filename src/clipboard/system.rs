//! OS clipboard backend built on `arboard`
//!
//! Captures carry the text first and, when the clipboard holds a bitmap, a PNG
//! item after it. On write the text wins; a snapshot without text puts its
//! first PNG item on the clipboard as an image.

use std::borrow::Cow;

use arboard::{Clipboard, ImageData};
use image::ImageEncoder;
use tracing::debug;

use super::formats::{self, FormatRegistry};
use super::{ClipboardError, ClipboardProvider, Item};

pub struct SystemClipboard {
    clipboard: Clipboard,
    formats: FormatRegistry,
}

impl SystemClipboard {
    /// Open the system clipboard. Must run on the thread that will own it.
    pub fn open(formats: FormatRegistry) -> Result<Self, ClipboardError> {
        let clipboard =
            Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        Ok(Self { clipboard, formats })
    }

    fn read_text(&mut self) -> Result<Option<String>, ClipboardError> {
        match self.clipboard.get_text() {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable | arboard::Error::ConversionFailure) => {
                Ok(None)
            }
            Err(e) => Err(ClipboardError::Unavailable(e.to_string())),
        }
    }

    /// Current bitmap as PNG. Conversion failures only lose the image.
    fn read_png(&mut self) -> Option<Vec<u8>> {
        let image = match self.clipboard.get_image() {
            Ok(image) => image,
            Err(arboard::Error::ContentNotAvailable) => return None,
            Err(e) => {
                debug!("Clipboard: failed to read image: {}", e);
                return None;
            }
        };

        match encode_png(image.width, image.height, &image.bytes) {
            Ok(png) => Some(png),
            Err(e) => {
                debug!("Clipboard: {}", e);
                None
            }
        }
    }
}

impl ClipboardProvider for SystemClipboard {
    fn read(&mut self) -> Result<Vec<Item>, ClipboardError> {
        let text = self.read_text()?;
        let png = self.read_png();
        Ok(capture_items(&self.formats, text.as_deref(), png.as_deref()))
    }

    fn write(&mut self, items: &[Item]) -> Result<(), ClipboardError> {
        let Some(selection) = select(&self.formats, items) else {
            let format = items.first().map(Item::format).unwrap_or_default();
            return Err(ClipboardError::UnsupportedFormat(format));
        };

        let chosen = selection.item();
        for skipped in items.iter().filter(|i| !std::ptr::eq(*i, chosen)) {
            debug!(
                "Skipping clipboard format {} ({})",
                skipped.format(),
                self.formats.name(skipped.format()).unwrap_or("unregistered")
            );
        }

        let bytes = chosen.decode_payload()?;
        match selection {
            Selection::Text(_) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                self.clipboard
                    .set_text(text)
                    .map_err(|e| ClipboardError::Unavailable(e.to_string()))
            }
            Selection::Png(_) => {
                let (width, height, rgba) = decode_png(&bytes)?;
                let image = ImageData {
                    width,
                    height,
                    bytes: Cow::Owned(rgba),
                };
                self.clipboard
                    .set_image(image)
                    .map_err(|e| ClipboardError::Unavailable(e.to_string()))
            }
        }
    }

    fn name(&self) -> &str {
        "system"
    }
}

/// Item a snapshot puts on the clipboard
#[derive(Debug, PartialEq, Eq)]
enum Selection<'a> {
    Text(&'a Item),
    Png(&'a Item),
}

impl<'a> Selection<'a> {
    fn item(&self) -> &'a Item {
        match self {
            Selection::Text(item) | Selection::Png(item) => item,
        }
    }
}

/// Items for one capture: text first, then the PNG rendition
fn capture_items(formats: &FormatRegistry, text: Option<&str>, png: Option<&[u8]>) -> Vec<Item> {
    let mut items = Vec::with_capacity(2);
    if let Some(text) = text {
        items.push(Item::text(formats::TEXT, text));
    }
    if let (Some(png), Some(id)) = (png, formats.png()) {
        items.push(
            Item::from_bytes(id, png)
                .with_format_name(formats::PNG)
                .with_mime_type(formats::PNG_MIME),
        );
    }
    items
}

/// Text wins; otherwise the first PNG item
fn select<'a>(formats: &FormatRegistry, items: &'a [Item]) -> Option<Selection<'a>> {
    if let Some(text) = items.iter().find(|item| formats.is_text(item.format())) {
        return Some(Selection::Text(text));
    }
    items
        .iter()
        .find(|item| formats.is_png(item.format()))
        .map(Selection::Png)
}

/// Encode RGBA pixels as PNG
fn encode_png(width: usize, height: usize, rgba: &[u8]) -> Result<Vec<u8>, ClipboardError> {
    let too_large = || ClipboardError::Image(format!("image of {width}x{height} is too large"));
    let w = u32::try_from(width).map_err(|_| too_large())?;
    let h = u32::try_from(height).map_err(|_| too_large())?;

    let expected = width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(too_large)?;
    if rgba.len() != expected {
        return Err(ClipboardError::Image(format!(
            "expected {} RGBA bytes for {}x{}, got {}",
            expected,
            width,
            height,
            rgba.len()
        )));
    }

    let mut png = Vec::new();
    image::codecs::png::PngEncoder::new_with_quality(
        &mut png,
        image::codecs::png::CompressionType::Fast,
        image::codecs::png::FilterType::Adaptive,
    )
    .write_image(rgba, w, h, image::ExtendedColorType::Rgba8)
    .map_err(|e| ClipboardError::Image(format!("failed to encode PNG: {e}")))?;
    Ok(png)
}

/// Decode PNG bytes into width, height and RGBA pixels
fn decode_png(data: &[u8]) -> Result<(usize, usize, Vec<u8>), ClipboardError> {
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Png)
        .map_err(|e| ClipboardError::Image(format!("failed to decode PNG: {e}")))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok((width as usize, height as usize, rgba.into_raw()))
}
