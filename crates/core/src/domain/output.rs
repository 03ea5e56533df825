// Thread-safe append-only output buffer

use std::sync::{PoisonError, RwLock};

/// Accumulated command output
///
/// Writers append under the write lock; readers take a snapshot under the
/// read lock, so progress polling can run while the command is still writing.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    inner: RwLock<Vec<u8>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, bytes: &[u8]) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    pub fn write_str(&self, s: &str) {
        self.write(s.as_bytes());
    }

    /// Current contents (invalid UTF-8 replaced)
    pub fn contents(&self) -> String {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&guard).into_owned()
    }

    /// Bytes appended after `offset`
    pub fn bytes_since(&self, offset: usize) -> Vec<u8> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(offset..).map(<[u8]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_bytes_since_returns_tail() {
        let buffer = OutputBuffer::new();
        buffer.write_str("hello ");
        let offset = buffer.len();
        buffer.write_str("world");

        assert_eq!(buffer.bytes_since(offset), b"world");
        assert_eq!(buffer.bytes_since(100), Vec::<u8>::new());
        assert_eq!(buffer.contents(), "hello world");
    }

    #[test]
    fn test_concurrent_writers() {
        let buffer = Arc::new(OutputBuffer::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        buffer.write(b"x");
                        let _ = buffer.contents();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buffer.len(), 800);
    }
}
