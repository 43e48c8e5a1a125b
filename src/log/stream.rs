//! Releasable sources of log data.
//!
//! Logs travel through the result pipeline as [`InputStreamSource`]s: each
//! consumer opens its own reader, and whoever created the source releases
//! it with [`cancel`](InputStreamSource::cancel) once every listener has
//! seen it. Saving a copy through a log saver does not release the source.

use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex};

/// A source that can open any number of independent readers over the same data.
pub trait InputStreamSource: Send + Sync {
    /// Opens a new reader positioned at the start of the data.
    ///
    /// Returns an empty reader once the source has been cancelled.
    fn create_input_stream(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Size of the data in bytes, `0` once cancelled.
    fn size(&self) -> usize;

    /// Releases the underlying data.
    fn cancel(&self);
}

/// In-memory [`InputStreamSource`].
///
/// # Example
///
/// ```
/// use std::io::Read;
/// use tradeflow::log::{ByteArraySource, InputStreamSource};
///
/// let source = ByteArraySource::new(b"logcat line".to_vec());
/// let mut text = String::new();
/// source.create_input_stream()?.read_to_string(&mut text)?;
/// assert_eq!(text, "logcat line");
///
/// source.cancel();
/// assert_eq!(source.size(), 0);
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct ByteArraySource {
    data: Mutex<Option<Arc<[u8]>>>,
}

impl ByteArraySource {
    /// Creates a source over `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Mutex::new(Some(Arc::from(data.into()))),
        }
    }

    /// Returns `true` once [`cancel`](InputStreamSource::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    fn snapshot(&self) -> Option<Arc<[u8]>> {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl InputStreamSource for ByteArraySource {
    fn create_input_stream(&self) -> io::Result<Box<dyn Read + Send>> {
        match self.snapshot() {
            Some(data) => Ok(Box::new(Cursor::new(data))),
            None => Ok(Box::new(io::empty())),
        }
    }

    fn size(&self) -> usize {
        self.snapshot().map(|d| d.len()).unwrap_or(0)
    }

    fn cancel(&self) {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// Reads a source fully into memory.
pub fn read_all(source: &dyn InputStreamSource) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(source.size());
    source.create_input_stream()?.read_to_end(&mut buf)?;
    Ok(buf)
}
