use luars::{LuaMethodProvider, LuaUserData};

/// Caller bytes lent to the runtime module for one scripted-path call.
///
/// The wrapper never owns the bytes: it records where they are, and the
/// boundary revokes it as soon as the call returns. Lua code that keeps the
/// userdata around afterwards sees an empty buffer.
#[derive(LuaUserData)]
pub struct InputBuffer {
    ptr: *const u8,
    len: usize,
}

impl InputBuffer {
    /// # Safety
    /// `bytes` must stay alive and unmodified until [`InputBuffer::revoke`]
    /// is called on the returned wrapper.
    pub unsafe fn lend(bytes: &[u8]) -> Self {
        InputBuffer {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `lend` requires the bytes to outlive the wrapper until
        // `revoke`, which zeroes `len` before they can go away.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn revoke(&mut self) {
        self.ptr = std::ptr::null();
        self.len = 0;
    }
}
