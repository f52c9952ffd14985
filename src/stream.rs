//! In-memory implementations of the CLAP stream ABI.
//!
//! State save and load go through `clap_ostream`/`clap_istream`, a pair of C
//! structs carrying a context pointer and a single read or write callback.
//! The adapters here wrap a growable byte buffer. They are boxed so that the
//! context pointer handed to the plugin stays stable for the adapter's
//! lifetime.

use std::os::raw::c_void;
use std::ptr;
use std::slice;

use clap_sys::stream::{clap_istream, clap_ostream};

/// The read granularity used by the buffered-streams test. Deliberately a
/// small prime so plugins that assume reads come back in one piece get caught.
pub const CHUNKED_READ_LIMIT: u64 = 7;

/// An output stream that appends every write to an owned byte buffer.
pub struct OutputStream {
    raw: clap_ostream,
    buffer: Vec<u8>,
}

impl OutputStream {
    pub fn new() -> Box<Self> {
        let mut stream = Box::new(Self {
            raw: clap_ostream {
                ctx: ptr::null_mut(),
                write: Some(ostream_write),
            },
            buffer: Vec::new(),
        });
        stream.raw.ctx = &mut *stream as *mut Self as *mut c_void;
        stream
    }

    /// The `clap_ostream` to pass to `clap_plugin_state::save()`.
    pub fn as_raw(&self) -> *const clap_ostream {
        &self.raw
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self: Box<Self>) -> Vec<u8> {
        self.buffer
    }
}

unsafe extern "C" fn ostream_write(
    stream: *const clap_ostream,
    buffer: *const c_void,
    size: u64,
) -> i64 {
    let this = &mut *((*stream).ctx as *mut OutputStream);
    let data = slice::from_raw_parts(buffer as *const u8, size as usize);
    this.buffer.extend_from_slice(data);

    size as i64
}

/// An input stream that reads from an owned byte buffer through a cursor.
/// Reads return `min(requested, remaining)` bytes and 0 once the buffer is
/// exhausted; a negative value is never produced.
pub struct InputStream {
    raw: clap_istream,
    data: Vec<u8>,
    position: usize,
    read_limit: Option<u64>,
}

impl InputStream {
    pub fn new(data: Vec<u8>) -> Box<Self> {
        Self::with_read_limit(data, None)
    }

    /// A stream that hands out at most [`CHUNKED_READ_LIMIT`] bytes per read.
    pub fn chunked(data: Vec<u8>) -> Box<Self> {
        Self::with_read_limit(data, Some(CHUNKED_READ_LIMIT))
    }

    /// A stream whose reads immediately report end-of-stream.
    pub fn empty() -> Box<Self> {
        Self::new(Vec::new())
    }

    fn with_read_limit(data: Vec<u8>, read_limit: Option<u64>) -> Box<Self> {
        let mut stream = Box::new(Self {
            raw: clap_istream {
                ctx: ptr::null_mut(),
                read: Some(istream_read),
            },
            data,
            position: 0,
            read_limit,
        });
        stream.raw.ctx = &mut *stream as *mut Self as *mut c_void;
        stream
    }

    /// The `clap_istream` to pass to `clap_plugin_state::load()`.
    pub fn as_raw(&self) -> *const clap_istream {
        &self.raw
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

unsafe extern "C" fn istream_read(
    stream: *const clap_istream,
    buffer: *mut c_void,
    size: u64,
) -> i64 {
    let this = &mut *((*stream).ctx as *mut InputStream);

    let mut to_read = (size as usize).min(this.remaining());
    if let Some(limit) = this.read_limit {
        to_read = to_read.min(limit as usize);
    }
    if to_read == 0 {
        return 0;
    }

    let source = &this.data[this.position..this.position + to_read];
    let dest = slice::from_raw_parts_mut(buffer as *mut u8, to_read);
    dest.copy_from_slice(source);
    this.position += to_read;

    to_read as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn read(stream: &InputStream, dest: &mut [u8]) -> i64 {
        let raw = stream.as_raw();
        ((*raw).read.unwrap())(raw, dest.as_mut_ptr() as *mut c_void, dest.len() as u64)
    }

    unsafe fn write(stream: &OutputStream, src: &[u8]) -> i64 {
        let raw = stream.as_raw();
        ((*raw).write.unwrap())(raw, src.as_ptr() as *const c_void, src.len() as u64)
    }

    #[test]
    fn test_output_stream_appends_verbatim() {
        let stream = OutputStream::new();
        unsafe {
            assert_eq!(write(&stream, b"abc"), 3);
            assert_eq!(write(&stream, b"defg"), 4);
        }
        assert_eq!(stream.bytes(), b"abcdefg");
        assert_eq!(stream.into_bytes(), b"abcdefg".to_vec());
    }

    #[test]
    fn test_input_stream_reads_and_hits_eof() {
        let stream = InputStream::new(b"hello world".to_vec());
        let mut buffer = [0u8; 6];

        unsafe {
            assert_eq!(read(&stream, &mut buffer), 6);
            assert_eq!(&buffer, b"hello ");
            assert_eq!(read(&stream, &mut buffer), 5);
            assert_eq!(&buffer[..5], b"world");
            // Exhausted streams report 0, never a negative value.
            assert_eq!(read(&stream, &mut buffer), 0);
            assert_eq!(read(&stream, &mut buffer), 0);
        }
    }

    #[test]
    fn test_input_stream_short_request() {
        let stream = InputStream::new(vec![1, 2, 3]);
        let mut buffer = [0u8; 64];
        unsafe {
            assert_eq!(read(&stream, &mut buffer), 3);
            assert_eq!(read(&stream, &mut buffer), 0);
        }
    }

    #[test]
    fn test_chunked_stream_clamps_every_read() {
        let data: Vec<u8> = (0..20).collect();
        let stream = InputStream::chunked(data.clone());
        let mut collected = Vec::new();
        let mut buffer = [0u8; 64];

        loop {
            let n = unsafe { read(&stream, &mut buffer) };
            assert!(n >= 0);
            if n == 0 {
                break;
            }
            assert!(n as u64 <= CHUNKED_READ_LIMIT);
            collected.extend_from_slice(&buffer[..n as usize]);
        }

        assert_eq!(collected, data);
    }

    #[test]
    fn test_empty_stream_reads_zero() {
        let stream = InputStream::empty();
        let mut buffer = [0u8; 16];
        unsafe {
            assert_eq!(read(&stream, &mut buffer), 0);
        }
    }
}
