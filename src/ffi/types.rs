//! FFI Buffer Types
//!
//! Descriptors for memory shared across the native boundary. A descriptor is a
//! `(address, length)` pair laid out the way C expects it:
//!
//! ```c
//! typedef struct { uintptr_t addr; size_t len; } nxt_rust_buf_t;
//! ```
//!
//! Descriptors never own memory. On the Rust side a descriptor carries the
//! lifetime of the slice it was built from, so safe code cannot hand native
//! code a view of a buffer that has already been dropped or moved. Descriptors
//! that arrive *from* native code are only reachable through `unsafe`, where
//! the caller vouches for the memory for the duration of the call.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::str::Utf8Error;

/// Borrowed `(address, length)` view over a contiguous byte region.
///
/// `len == 0` always pairs with `addr == 0`; an empty descriptor is never
/// dereferenced.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufDesc<'a> {
    addr: usize,
    len: usize,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> BufDesc<'a> {
    /// The `{0, 0}` sentinel used for every empty buffer
    pub const EMPTY: Self = Self {
        addr: 0,
        len: 0,
        _marker: PhantomData,
    };

    /// Describe a byte slice without copying it
    pub fn from_bytes(data: &'a [u8]) -> Self {
        if data.is_empty() {
            return Self::EMPTY;
        }
        Self {
            addr: data.as_ptr() as usize,
            len: data.len(),
            _marker: PhantomData,
        }
    }

    /// Describe the UTF-8 bytes of a string without copying it
    pub fn from_str(s: &'a str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Rebuild a descriptor from the two fields native code passes separately.
    ///
    /// # Safety
    ///
    /// When `len > 0`, `addr` must point to `len` initialized bytes that stay
    /// valid and unmodified for `'a`.
    pub unsafe fn from_raw(addr: usize, len: usize) -> Self {
        if len == 0 {
            return Self::EMPTY;
        }
        if addr == 0 {
            warn_null_descriptor(len);
            return Self::EMPTY;
        }
        Self {
            addr,
            len,
            _marker: PhantomData,
        }
    }

    /// Base address (0 for the empty sentinel)
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the described bytes in place.
    pub fn as_bytes(&self) -> &'a [u8] {
        // SAFETY: every constructor either borrowed a live slice for 'a or was
        // `unsafe` and put the validity burden on its caller.
        unsafe { bytes_from_raw(self.addr, self.len) }
    }

    /// View the described bytes as UTF-8 text.
    pub fn as_str(&self) -> Result<&'a str, Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    /// Copy the bytes out, for data that must outlive the current call
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Default for BufDesc<'_> {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for BufDesc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufDesc")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("len", &self.len)
            .finish()
    }
}

impl<'a> From<&'a [u8]> for BufDesc<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::from_bytes(data)
    }
}

impl<'a> From<&'a str> for BufDesc<'a> {
    fn from(s: &'a str) -> Self {
        Self::from_str(s)
    }
}

/// View `len` bytes at `addr` without copying.
///
/// Returns an empty slice when `len` is 0, whatever `addr` holds.
///
/// # Safety
///
/// When `len > 0` and `addr != 0`, `addr` must point to `len` initialized bytes
/// valid for `'a`, and nothing may write to them while the slice is alive.
pub unsafe fn bytes_from_raw<'a>(addr: usize, len: usize) -> &'a [u8] {
    if len == 0 {
        return &[];
    }
    if addr == 0 {
        warn_null_descriptor(len);
        return &[];
    }
    std::slice::from_raw_parts(addr as *const u8, len)
}

/// A null address with a nonzero length is a native-side bug; decoded as empty
fn warn_null_descriptor(len: usize) {
    crate::bridge_warn!("descriptor with null address and length {} decoded as empty", len);
}

/// One HTTP header as a pair of descriptors
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderDesc<'a> {
    pub name: BufDesc<'a>,
    pub value: BufDesc<'a>,
}

impl<'a> HeaderDesc<'a> {
    pub fn new(name: &'a [u8], value: &'a [u8]) -> Self {
        Self {
            name: BufDesc::from_bytes(name),
            value: BufDesc::from_bytes(value),
        }
    }
}

/// Request as the native runtime presents it for one dispatch call.
///
/// Every descriptor is valid only until the dispatch call returns.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RequestDesc<'a> {
    method: BufDesc<'a>,
    target: BufDesc<'a>,
    version: BufDesc<'a>,
    headers: *const HeaderDesc<'a>,
    header_count: usize,
    body: BufDesc<'a>,
    remote: BufDesc<'a>,
}

impl<'a> RequestDesc<'a> {
    /// Describe a request held in Rust memory
    pub fn new(
        method: &'a str,
        target: &'a str,
        headers: &'a [HeaderDesc<'a>],
        body: &'a [u8],
    ) -> Self {
        Self {
            method: BufDesc::from_str(method),
            target: BufDesc::from_str(target),
            version: BufDesc::EMPTY,
            headers: if headers.is_empty() {
                std::ptr::null()
            } else {
                headers.as_ptr()
            },
            header_count: headers.len(),
            body: BufDesc::from_bytes(body),
            remote: BufDesc::EMPTY,
        }
    }

    pub fn with_version(mut self, version: &'a str) -> Self {
        self.version = BufDesc::from_str(version);
        self
    }

    pub fn with_remote(mut self, remote: &'a str) -> Self {
        self.remote = BufDesc::from_str(remote);
        self
    }

    pub fn method(&self) -> BufDesc<'a> {
        self.method
    }

    pub fn target(&self) -> BufDesc<'a> {
        self.target
    }

    /// Protocol version text, e.g. `HTTP/1.1` (may be empty)
    pub fn version(&self) -> BufDesc<'a> {
        self.version
    }

    pub fn body(&self) -> BufDesc<'a> {
        self.body
    }

    /// Peer address text (may be empty)
    pub fn remote(&self) -> BufDesc<'a> {
        self.remote
    }

    pub fn headers(&self) -> &'a [HeaderDesc<'a>] {
        if self.header_count == 0 || self.headers.is_null() {
            return &[];
        }
        // SAFETY: `new` borrowed the array for 'a; descriptors written by
        // native code are only reachable through an unsafe pointer read whose
        // caller guarantees the array outlives the call.
        unsafe { std::slice::from_raw_parts(self.headers, self.header_count) }
    }
}

/// Response handed back to the native runtime
#[derive(Debug, Clone, Copy)]
pub struct ResponseParts<'a> {
    pub status: u16,
    pub headers: &'a [HeaderDesc<'a>],
    pub body: BufDesc<'a>,
}

/// Native callback that writes a response for the request being dispatched.
///
/// The descriptors are valid only until the callback returns; the native side
/// copies or writes them out before returning. Returns 0 on success.
pub type ResponseWriter = unsafe extern "C" fn(
    ctx: *mut c_void,
    status: u16,
    headers: *const HeaderDesc<'_>,
    header_count: usize,
    body: BufDesc<'_>,
) -> i32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bytes_encode_to_sentinel() {
        let desc = BufDesc::from_bytes(&[]);
        assert_eq!(desc, BufDesc::EMPTY);
        assert_eq!(desc.addr(), 0);
        assert_eq!(desc.len(), 0);

        let desc = BufDesc::from_str("");
        assert_eq!(desc, BufDesc::EMPTY);
    }

    #[test]
    fn test_decode_sentinel_is_empty() {
        assert!(BufDesc::EMPTY.as_bytes().is_empty());
        assert!(unsafe { bytes_from_raw(0, 0) }.is_empty());
    }

    #[test]
    fn test_zero_length_ignores_address() {
        let desc = unsafe { BufDesc::from_raw(0xdead_beef, 0) };
        assert_eq!(desc, BufDesc::EMPTY);
        assert!(unsafe { bytes_from_raw(0xdead_beef, 0) }.is_empty());
    }

    #[test]
    fn test_bytes_decode_in_place() {
        let data = b"GET / HTTP/1.1".to_vec();
        let desc = BufDesc::from_bytes(&data);

        assert_eq!(desc.addr(), data.as_ptr() as usize);
        assert_eq!(desc.len(), data.len());

        let view = desc.as_bytes();
        assert_eq!(view, &data[..]);
        assert_eq!(view.as_ptr(), data.as_ptr());
    }

    #[test]
    fn test_text_decodes_to_utf8_bytes() {
        let s = String::from("héllo wörld");
        let desc = BufDesc::from_str(&s);
        assert_eq!(desc.len(), s.len());
        assert_eq!(desc.as_bytes(), s.as_bytes());
        assert_eq!(desc.as_str().unwrap(), s);
    }

    #[test]
    fn test_raw_fields_decode() {
        let data = vec![1u8, 2, 3, 4, 5];
        let view = unsafe { bytes_from_raw(data.as_ptr() as usize, data.len()) };
        assert_eq!(view, &data[..]);

        let desc = unsafe { BufDesc::from_raw(data.as_ptr() as usize, 3) };
        assert_eq!(desc.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_null_address_with_length_is_reported() {
        use crate::diagnostics::{self, tests::RecordingRuntime, DiagnosticSink};
        use std::sync::Arc;

        let _lock = crate::TEST_LOCK.lock();
        let runtime = Arc::new(RecordingRuntime::default());
        let previous = diagnostics::install(DiagnosticSink::new(runtime.clone()));

        let desc = unsafe { BufDesc::from_raw(0, 5) };
        let view = unsafe { bytes_from_raw(0, 7) };
        // zero length with a null address is the sentinel, not a bug
        let sentinel = unsafe { BufDesc::from_raw(0, 0) };

        match previous {
            Some(sink) => {
                diagnostics::install(sink);
            }
            None => {
                diagnostics::uninstall();
            }
        }

        assert_eq!(desc, BufDesc::EMPTY);
        assert!(view.is_empty());
        assert_eq!(sentinel, BufDesc::EMPTY);
        assert_eq!(
            *runtime.messages.lock(),
            vec![
                "[rust] descriptor with null address and length 5 decoded as empty".to_string(),
                "[rust] descriptor with null address and length 7 decoded as empty".to_string(),
            ]
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let data = [0xffu8, 0xfe];
        assert!(BufDesc::from_bytes(&data).as_str().is_err());
    }

    #[test]
    fn test_layout_matches_c() {
        assert_eq!(
            std::mem::size_of::<BufDesc<'_>>(),
            2 * std::mem::size_of::<usize>()
        );
        assert_eq!(
            std::mem::size_of::<HeaderDesc<'_>>(),
            4 * std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_request_desc_accessors() {
        let headers = [
            HeaderDesc::new(b"host", b"localhost"),
            HeaderDesc::new(b"accept", b"*/*"),
        ];
        let req = RequestDesc::new("POST", "/submit?x=1", &headers, b"payload")
            .with_version("HTTP/1.1")
            .with_remote("10.0.0.1:5000");

        assert_eq!(req.method().as_str().unwrap(), "POST");
        assert_eq!(req.target().as_str().unwrap(), "/submit?x=1");
        assert_eq!(req.version().as_str().unwrap(), "HTTP/1.1");
        assert_eq!(req.body().as_bytes(), b"payload");
        assert_eq!(req.remote().as_str().unwrap(), "10.0.0.1:5000");
        assert_eq!(req.headers().len(), 2);
        assert_eq!(req.headers()[1].value.as_bytes(), b"*/*");
    }

    #[test]
    fn test_request_desc_without_headers() {
        let req = RequestDesc::new("GET", "/", &[], b"");
        assert!(req.headers().is_empty());
        assert!(req.body().is_empty());
        assert!(req.version().is_empty());
    }
}
