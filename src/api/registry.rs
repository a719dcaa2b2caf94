use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::debug;

use crate::api::image_io::ImageIo;

/// A registered image format handler.
///
/// Handlers are looked up by probing, not by inheritance: the first
/// handler whose probe accepts a file name wins.
pub trait ImageFormat: Send + Sync {
    /// Unique handler name; re-registering the same name is a no-op.
    fn name(&self) -> &'static str;

    /// Whether the handler can read the file. A probe: must not panic.
    fn can_read(&self, file_name: &str) -> bool;

    /// Whether the handler can write the file name.
    fn can_write(&self, file_name: &str) -> bool;
}

/// The container image format handled by [`ImageIo`].
pub struct HicFormat;

impl ImageFormat for HicFormat {
    fn name(&self) -> &'static str {
        "hic"
    }

    fn can_read(&self, file_name: &str) -> bool {
        ImageIo::can_read(file_name)
    }

    fn can_write(&self, file_name: &str) -> bool {
        ImageIo::can_write(file_name)
    }
}

fn registry() -> &'static Mutex<Vec<Arc<dyn ImageFormat>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Arc<dyn ImageFormat>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

fn lock() -> std::sync::MutexGuard<'static, Vec<Arc<dyn ImageFormat>>> {
    registry()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Register a handler. Idempotent: a handler whose name is already
/// registered is dropped.
pub fn register(handler: Arc<dyn ImageFormat>) {
    let mut handlers = lock();
    if handlers.iter().any(|h| h.name() == handler.name()) {
        return;
    }
    debug!("registering image format handler {}", handler.name());
    handlers.push(handler);
}

/// Register the built-in handlers. Guarded so that repeated calls from
/// application init paths register only once.
pub fn register_defaults() {
    static DONE: AtomicBool = AtomicBool::new(false);
    if DONE.swap(true, Ordering::SeqCst) {
        return;
    }
    register(Arc::new(HicFormat));
}

/// First registered handler that can read the file.
pub fn find_reader(file_name: &str) -> Option<Arc<dyn ImageFormat>> {
    lock()
        .iter()
        .find(|h| h.can_read(file_name))
        .map(Arc::clone)
}

/// First registered handler that accepts the file name for writing.
pub fn find_writer(file_name: &str) -> Option<Arc<dyn ImageFormat>> {
    lock()
        .iter()
        .find(|h| h.can_write(file_name))
        .map(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registration_is_idempotent() {
        register_defaults();
        register_defaults();
        register(Arc::new(HicFormat));
        assert_eq!(lock().iter().filter(|h| h.name() == "hic").count(), 1);
    }

    #[test]
    fn writer_lookup_uses_the_extension() {
        register_defaults();
        assert!(find_writer("out.hdf5").is_some());
        assert!(find_writer("out.png").is_none());
    }
}
