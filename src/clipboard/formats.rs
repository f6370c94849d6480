//! Clipboard format identifiers
//!
//! Formats are numeric ids agreed between peers. Well-known ids are fixed;
//! named formats ("PNG", "image/png") get ids handed out by a
//! [`FormatRegistry`] built once at startup and passed to whoever needs it.

use std::collections::HashMap;

/// Unicode text
pub const TEXT: u32 = 13;

/// Device-independent bitmap
pub const DIB: u32 = 8;

/// First id handed out to registered names
pub const FIRST_REGISTERED: u32 = 0xC000;

/// Registered name of PNG images
pub const PNG: &str = "PNG";

/// MIME name some peers register for PNG images
pub const PNG_MIME: &str = "image/png";

/// Names registered by [`FormatRegistry::with_defaults`]
pub const DEFAULT_NAMES: [&str; 2] = [PNG, PNG_MIME];

/// Mapping between format names and ids
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, String>,
    next_id: u32,
}

impl FormatRegistry {
    /// Registry holding only the predefined formats
    pub fn new() -> Self {
        let mut registry = Self {
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            next_id: FIRST_REGISTERED,
        };
        registry.insert("CF_UNICODETEXT", TEXT);
        registry.insert("CF_DIB", DIB);
        registry
    }

    /// Registry with the image formats peers exchange out of the box
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in DEFAULT_NAMES {
            registry.register(name);
        }
        registry
    }

    /// Return the id for `name`, allocating one on first use
    pub fn register(&mut self, name: &str) -> u32 {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.insert(name, id);
        id
    }

    pub fn id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Whether `id` carries UTF-8 text
    pub fn is_text(&self, id: u32) -> bool {
        id == TEXT
    }

    /// Id used when emitting PNG items, if "PNG" is registered
    pub fn png(&self) -> Option<u32> {
        self.id(PNG)
    }

    /// Whether `id` carries PNG bytes
    pub fn is_png(&self, id: u32) -> bool {
        matches!(self.name(id), Some(PNG | PNG_MIME))
    }

    fn insert(&mut self, name: &str, id: u32) {
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, name.to_string());
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_formats() {
        let registry = FormatRegistry::new();
        assert_eq!(registry.id("CF_UNICODETEXT"), Some(TEXT));
        assert_eq!(registry.name(DIB), Some("CF_DIB"));
        assert!(registry.is_text(TEXT));
        assert!(!registry.is_text(DIB));
    }

    #[test]
    fn test_register_is_stable() {
        let mut registry = FormatRegistry::new();
        let png = registry.register("PNG");
        let mime = registry.register("image/png");

        assert_eq!(png, FIRST_REGISTERED);
        assert_eq!(mime, FIRST_REGISTERED + 1);
        assert_eq!(registry.register("PNG"), png);
        assert_eq!(registry.name(mime), Some("image/png"));
    }

    #[test]
    fn test_defaults_register_image_names() {
        let registry = FormatRegistry::default();
        assert!(registry.id("PNG").is_some());
        assert!(registry.id("image/png").is_some());
        assert_eq!(registry.png(), registry.id("PNG"));
    }

    #[test]
    fn test_png_ids() {
        let registry = FormatRegistry::with_defaults();
        let png = registry.id(PNG).unwrap();
        let mime = registry.id(PNG_MIME).unwrap();

        assert!(registry.is_png(png));
        assert!(registry.is_png(mime));
        assert!(!registry.is_png(TEXT));
        assert!(!registry.is_png(DIB));
        assert!(FormatRegistry::new().png().is_none());
    }
}
