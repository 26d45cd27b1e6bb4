//! Thread-safe byte accumulator for pending outbound data.

use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

/// Byte buffer that many writers may append to while one drainer empties it.
///
/// There is no bound on growth; the poll schedule is what keeps it small.
#[derive(Debug, Default)]
pub struct SyncBuffer {
    inner: Mutex<Vec<u8>>,
}

impl SyncBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append bytes to the tail.
    pub fn append(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    /// Take the whole content, write it to `sink` and leave the buffer empty.
    ///
    /// The content is removed even if the write fails. An empty buffer is a
    /// no-op that never touches `sink`.
    pub fn drain_to<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<usize> {
        let taken = {
            let mut guard = self.lock();
            if guard.is_empty() {
                return Ok(0);
            }
            std::mem::take(&mut *guard)
        };
        sink.write_all(&taken)?;
        Ok(taken.len())
    }

    /// Copy the first available bytes into `buf`, consuming them.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut guard = self.lock();
        let n = buf.len().min(guard.len());
        buf[..n].copy_from_slice(&guard[..n]);
        guard.drain(..n);
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// Sink that counts how often it was written to.
    #[derive(Default)]
    struct CountingSink {
        writes: usize,
        data: Vec<u8>,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn drain_empty_is_noop() {
        let buffer = SyncBuffer::new();
        let mut sink = CountingSink::default();
        assert_eq!(buffer.drain_to(&mut sink).unwrap(), 0);
        assert_eq!(sink.writes, 0);
    }

    #[test]
    fn drain_moves_everything_once() {
        let buffer = SyncBuffer::new();
        buffer.append(b"hello ");
        buffer.append(b"world");

        let mut out = Vec::new();
        assert_eq!(buffer.drain_to(&mut out).unwrap(), 11);
        assert_eq!(out, b"hello world");
        assert!(buffer.is_empty());

        assert_eq!(buffer.drain_to(&mut out).unwrap(), 0);
        assert_eq!(out.len(), 11);
    }

    #[test]
    fn concurrent_appenders_then_drain() {
        let buffer = Arc::new(SyncBuffer::new());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        buffer.append(&[i; 3]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(buffer.drain_to(&mut out).unwrap(), 8 * 1000 * 3);
        for i in 0..8u8 {
            assert_eq!(out.iter().filter(|b| **b == i).count(), 3000);
        }
        assert_eq!(buffer.drain_to(&mut out).unwrap(), 0);
    }

    #[test]
    fn failed_drain_still_empties() {
        let buffer = SyncBuffer::new();
        buffer.append(b"lost");
        assert!(buffer.drain_to(&mut BrokenSink).is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn read_consumes_from_head() {
        let buffer = SyncBuffer::new();
        buffer.append(b"abcdef");

        let mut buf = [0u8; 4];
        assert_eq!(buffer.read(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(buffer.read(&mut buf), 0);
    }
}
