use std::sync::{Mutex, OnceLock};

use crate::CommandError;

/// A system clipboard that must be opened once before use.
pub trait ClipboardBackend: Sized {
    type Error: std::fmt::Display;

    fn open() -> Result<Self, Self::Error>;

    fn set_text(&mut self, text: &str) -> Result<(), Self::Error>;

    /// Sets the text and blocks for as long as this process must keep
    /// serving it. Backends whose contents outlive the process return
    /// right after setting.
    fn set_text_and_hold(&mut self, text: &str) -> Result<(), Self::Error> {
        self.set_text(text)
    }
}

impl ClipboardBackend for arboard::Clipboard {
    type Error = arboard::Error;

    fn open() -> Result<Self, Self::Error> {
        arboard::Clipboard::new()
    }

    fn set_text(&mut self, text: &str) -> Result<(), Self::Error> {
        arboard::Clipboard::set_text(self, text)
    }

    // X11 and Wayland selections die with their owner, so hold until
    // another client takes ownership.
    #[cfg(all(
        unix,
        not(any(target_os = "macos", target_os = "android", target_os = "emscripten"))
    ))]
    fn set_text_and_hold(&mut self, text: &str) -> Result<(), Self::Error> {
        use arboard::SetExtLinux;

        self.set().wait().text(text)
    }
}

/// Opens the clipboard at most once for the life of the process. A failed
/// open is remembered and reported on every later use.
pub struct ClipboardGate<B = arboard::Clipboard> {
    slot: OnceLock<Result<Mutex<B>, String>>,
}

impl<B> Default for ClipboardGate<B> {
    fn default() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }
}

impl<B: ClipboardBackend> ClipboardGate<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_initialized(&self) -> Result<(), CommandError> {
        self.backend().map(|_| ())
    }

    pub fn copy(&self, text: &str) -> Result<(), CommandError> {
        let mut clipboard = self
            .backend()?
            .lock()
            .map_err(|_| CommandError::Clipboard("clipboard lock poisoned".to_owned()))?;
        clipboard
            .set_text(text)
            .map_err(|err| CommandError::Clipboard(err.to_string()))
    }

    /// Copies for a short-lived process: returns once the system no longer
    /// needs this process to serve the text.
    pub fn copy_and_hold(&self, text: &str) -> Result<(), CommandError> {
        let mut clipboard = self
            .backend()?
            .lock()
            .map_err(|_| CommandError::Clipboard("clipboard lock poisoned".to_owned()))?;
        clipboard
            .set_text_and_hold(text)
            .map_err(|err| CommandError::Clipboard(err.to_string()))
    }

    fn backend(&self) -> Result<&Mutex<B>, CommandError> {
        self.slot
            .get_or_init(|| B::open().map(Mutex::new).map_err(|err| err.to_string()))
            .as_ref()
            .map_err(|message| CommandError::Clipboard(message.clone()))
    }
}
