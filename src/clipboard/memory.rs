//! In-process clipboard backend
//!
//! Used for headless runs and tests. Clones share the same contents, so a
//! copy kept outside the clipboard thread observes every write.

use std::sync::{Arc, Mutex};

use super::{ClipboardError, ClipboardProvider, Item};

#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    items: Arc<Mutex<Vec<Item>>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clipboard pre-filled with `items`
    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            items: Arc::new(Mutex::new(items)),
        }
    }

    /// Current contents
    pub fn contents(&self) -> Vec<Item> {
        self.items.lock().map(|items| items.clone()).unwrap_or_default()
    }

    /// Replace the contents from outside the clipboard thread, as a user
    /// copying in another application would
    pub fn set(&self, items: Vec<Item>) {
        if let Ok(mut guard) = self.items.lock() {
            *guard = items;
        }
    }
}

impl ClipboardProvider for MemoryClipboard {
    fn read(&mut self) -> Result<Vec<Item>, ClipboardError> {
        self.items
            .lock()
            .map(|items| items.clone())
            .map_err(|_| ClipboardError::Unavailable("memory clipboard poisoned".to_string()))
    }

    fn write(&mut self, items: &[Item]) -> Result<(), ClipboardError> {
        let mut guard = self
            .items
            .lock()
            .map_err(|_| ClipboardError::Unavailable("memory clipboard poisoned".to_string()))?;
        *guard = items.to_vec();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_contents() {
        let observer = MemoryClipboard::new();
        let mut writer = observer.clone();

        writer.write(&[Item::from_bytes(13, b"shared")]).unwrap();
        assert_eq!(observer.contents().len(), 1);
        assert_eq!(observer.contents()[0].decode_payload().unwrap(), b"shared");
    }
}
