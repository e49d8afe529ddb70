use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard, PoisonError,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a process wide unique identifier.
/// Used to tell globes, layers and elevation models apart in notifications and cache keys.
pub(crate) fn unique_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Locks the mutex, recovering the data if a worker panicked while holding the lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maps a mime type like `image/png` to the file suffix used in the local tile cache.
pub fn suffix_for_mime_type(mime_type: &str) -> &str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/tiff" => "tif",
        "application/bil16" | "application/bil32" | "application/bil" => "bil",
        _ => mime_type
            .rsplit_once('/')
            .map_or(mime_type, |(_, suffix)| suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_type_suffixes() {
        assert_eq!(suffix_for_mime_type("image/png"), "png");
        assert_eq!(suffix_for_mime_type("image/jpeg"), "jpg");
        assert_eq!(suffix_for_mime_type("application/bil16"), "bil");
        assert_eq!(suffix_for_mime_type("dds"), "dds");
    }

    #[test]
    fn unique_ids_increase() {
        let a = unique_id();
        let b = unique_id();
        assert!(b > a);
    }
}
