//! C ABI for the rosie embedding boundary.
//!
//! Engines cross the boundary as opaque pointers from [`rosie_new`]. Every
//! other function takes that pointer first and returns a status code:
//! [`SUCCESS`] or one of the negative `ERR_*` values. Expected negative
//! outcomes (compile failures, no-match, stale handles, unknown encoders) are
//! reported in-band and still return [`SUCCESS`].
//!
//! Strings written to `RosieString` out-parameters are owned by the caller and
//! must be released with [`rosie_free_string`]. The `data` of a
//! [`RosieMatch`] is borrowed from the engine and stays valid only until the
//! next call on the same engine.

use std::ffi::{CStr, c_char, c_int};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

use rosie::{
    Engine, FileMatch, FileMatchRequest, MatchStatus, PatternHandle, RosieError, Trace,
};
use tracing::error;

pub const SUCCESS: c_int = 0;
pub const ERR_OUT_OF_MEMORY: c_int = -2;
pub const ERR_SYSCALL_FAILED: c_int = -3;
pub const ERR_ENGINE_CALL_FAILED: c_int = -4;

/// Sentinel lengths carried by a null `data`/`trace` string.
pub const NO_MATCH: u32 = 0;
pub const NO_SUCH_PATTERN: u32 = 1;
pub const NO_SUCH_ENCODER: u32 = 2;
pub const INVALID_TRACE_STYLE: u32 = 2;

/// `rosie_matchfile` failure codes, reported through `cout` with `cin = -1`.
pub const MATCHFILE_INVALID_ENCODER: c_int = 2;
pub const MATCHFILE_IO_ERROR: c_int = 3;
pub const MATCHFILE_NO_SUCH_PATTERN: c_int = 4;

/// Byte string. Owned strings carry a trailing NUL that `len` excludes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RosieString {
    pub len: u32,
    pub ptr: *mut u8,
}

impl RosieString {
    const NULL: RosieString = RosieString {
        len: 0,
        ptr: ptr::null_mut(),
    };

    fn sentinel(len: u32) -> Self {
        RosieString {
            len,
            ptr: ptr::null_mut(),
        }
    }

    fn owned(bytes: &[u8]) -> Result<Self, RosieError> {
        let len = wire_len("string", bytes.len())?;
        let mut storage = Vec::with_capacity(bytes.len() + 1);
        storage.extend_from_slice(bytes);
        storage.push(0);
        let ptr = Box::into_raw(storage.into_boxed_slice()) as *mut u8;
        Ok(RosieString { len, ptr })
    }

    fn borrowed(bytes: &[u8]) -> Result<Self, RosieError> {
        Ok(RosieString {
            len: wire_len("match data", bytes.len())?,
            ptr: bytes.as_ptr() as *mut u8,
        })
    }

    /// # Safety
    /// `ptr` must be null or point to `len` readable bytes.
    unsafe fn as_bytes<'a>(&self) -> Option<&'a [u8]> {
        if self.ptr.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(self.ptr, self.len as usize) })
    }
}

fn wire_len(what: &'static str, len: usize) -> Result<u32, RosieError> {
    u32::try_from(len).map_err(|_| RosieError::TooLarge { what, len })
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RosieMatch {
    pub data: RosieString,
    pub leftover: c_int,
    pub abend: c_int,
    pub ttotal: c_int,
    pub tmatch: c_int,
}

fn status(e: &RosieError) -> c_int {
    match e {
        RosieError::OutOfMemory => ERR_OUT_OF_MEMORY,
        RosieError::Home(_) => ERR_SYSCALL_FAILED,
        _ => ERR_ENGINE_CALL_FAILED,
    }
}

/// Runs `f`, converting errors and panics into status codes.
fn guarded(call: &str, f: impl FnOnce() -> Result<c_int, RosieError>) -> c_int {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            error!(call, error = %e, "engine call failed");
            status(&e)
        }
        Err(_) => {
            error!(call, "panic caught at the C boundary");
            ERR_ENGINE_CALL_FAILED
        }
    }
}

fn null_argument(call: &'static str, name: &str) -> RosieError {
    RosieError::Contract {
        call,
        detail: format!("null {name}"),
    }
}

/// # Safety
/// `engine` must be null or a live pointer from [`rosie_new`].
unsafe fn engine_ref<'a>(engine: *mut Engine, call: &'static str) -> Result<&'a Engine, RosieError> {
    unsafe { engine.as_ref() }.ok_or_else(|| null_argument(call, "engine"))
}

/// # Safety
/// `s` must be null or point to a valid `RosieString`.
unsafe fn input_bytes<'a>(
    s: *const RosieString,
    call: &'static str,
    name: &str,
) -> Result<&'a [u8], RosieError> {
    let s = unsafe { s.as_ref() }.ok_or_else(|| null_argument(call, name))?;
    if s.len == 0 {
        return Ok(&[]);
    }
    unsafe { s.as_bytes() }.ok_or_else(|| null_argument(call, name))
}

/// # Safety
/// `s` must be null or a NUL-terminated string.
unsafe fn c_str<'a>(s: *const c_char, call: &'static str, name: &str) -> Result<&'a str, RosieError> {
    if s.is_null() {
        return Err(null_argument(call, name));
    }
    unsafe { CStr::from_ptr(s) }
        .to_str()
        .map_err(|_| RosieError::Contract {
            call,
            detail: format!("{name} is not valid UTF-8"),
        })
}

/// # Safety
/// `out` must be null or writable.
unsafe fn put<T>(out: *mut T, value: T) {
    if let Some(out) = unsafe { out.as_mut() } {
        *out = value;
    }
}

fn owned_or_null(bytes: Option<&[u8]>) -> Result<RosieString, RosieError> {
    bytes.map_or(Ok(RosieString::NULL), RosieString::owned)
}

fn clamp(value: i64) -> c_int {
    value.clamp(c_int::MIN as i64, c_int::MAX as i64) as c_int
}

/// Creates an engine. On failure returns null and, when `errors` is not null,
/// stores a message there.
///
/// # Safety
/// `errors` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_new(errors: *mut RosieString) -> *mut Engine {
    let created = catch_unwind(Engine::new).unwrap_or_else(|_| {
        Err(RosieError::Boot("panic while creating the engine".to_string()))
    });
    match created {
        Ok(engine) => {
            unsafe { put(errors, RosieString::NULL) };
            Box::into_raw(Box::new(engine))
        }
        Err(e) => {
            error!(error = %e, "cannot create engine");
            let message = RosieString::owned(e.to_string().as_bytes()).unwrap_or(RosieString::NULL);
            unsafe { put(errors, message) };
            ptr::null_mut()
        }
    }
}

/// Destroys an engine. The pointer must not be used afterwards.
///
/// # Safety
/// `engine` must be null or a live pointer from [`rosie_new`], with no call
/// on it in flight.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_finalize(engine: *mut Engine) {
    if engine.is_null() {
        return;
    }
    let engine = unsafe { Box::from_raw(engine) };
    if catch_unwind(AssertUnwindSafe(move || engine.finalize())).is_err() {
        error!("panic caught while finalizing an engine");
    }
}

/// Sets (`*newlimit >= 0`) or queries (`*newlimit == -1`) the allocation
/// limit. On return `*newlimit` holds the limit and `*usage` the heap usage
/// in KB.
///
/// # Safety
/// Pointers must be null or valid; `newlimit` is required.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_alloc_limit(
    engine: *mut Engine,
    newlimit: *mut c_int,
    usage: *mut c_int,
) -> c_int {
    guarded("rosie_alloc_limit", || {
        let engine = unsafe { engine_ref(engine, "rosie_alloc_limit") }?;
        let requested = unsafe { newlimit.as_mut() }
            .ok_or_else(|| null_argument("rosie_alloc_limit", "newlimit"))?;
        let current = match *requested {
            -1 => engine.alloc_limit()?,
            limit => {
                let limit = u32::try_from(limit).map_err(|_| RosieError::Contract {
                    call: "rosie_alloc_limit",
                    detail: format!("negative limit {limit}"),
                })?;
                engine.set_alloc_limit(limit)?
            }
        };
        *requested = clamp(i64::from(current.limit_mb));
        unsafe { put(usage, clamp(current.usage_kb as i64)) };
        Ok(SUCCESS)
    })
}

/// # Safety
/// `engine` must be live; `retval` must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_config(engine: *mut Engine, retval: *mut RosieString) -> c_int {
    guarded("rosie_config", || {
        let engine = unsafe { engine_ref(engine, "rosie_config") }?;
        if retval.is_null() {
            return Err(null_argument("rosie_config", "retval"));
        }
        let config = owned_or_null(engine.config()?.as_deref())?;
        unsafe { put(retval, config) };
        Ok(SUCCESS)
    })
}

/// Queries the library path when `newpath->ptr` is null (storing a new string
/// in `*newpath`), otherwise replaces it.
///
/// # Safety
/// `engine` must be live; `newpath` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_libpath(engine: *mut Engine, newpath: *mut RosieString) -> c_int {
    guarded("rosie_libpath", || {
        let engine = unsafe { engine_ref(engine, "rosie_libpath") }?;
        let path = unsafe { newpath.as_mut() }
            .ok_or_else(|| null_argument("rosie_libpath", "newpath"))?;
        match unsafe { path.as_bytes() } {
            Some(bytes) => engine.set_libpath(&String::from_utf8_lossy(bytes))?,
            None => *path = RosieString::owned(engine.libpath()?.as_bytes())?,
        }
        Ok(SUCCESS)
    })
}

/// Compiles `expression`. `*pat` is 0 on failure, with `*errors` explaining.
///
/// # Safety
/// `engine` must be live; other pointers must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_compile(
    engine: *mut Engine,
    expression: *const RosieString,
    pat: *mut c_int,
    errors: *mut RosieString,
) -> c_int {
    guarded("rosie_compile", || {
        let engine = unsafe { engine_ref(engine, "rosie_compile") }?;
        let expression = unsafe { input_bytes(expression, "rosie_compile", "expression") }?;
        if pat.is_null() {
            return Err(null_argument("rosie_compile", "pat"));
        }
        let compiled = engine.compile(expression)?;
        let handle =
            c_int::try_from(compiled.pattern.get()).map_err(|_| RosieError::HandlesExhausted)?;
        let diagnostics = owned_or_null(compiled.diagnostics.as_deref())?;
        unsafe {
            put(pat, handle);
            put(errors, diagnostics);
        }
        Ok(SUCCESS)
    })
}

/// # Safety
/// `engine` must be live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_free_rplx(engine: *mut Engine, pat: c_int) -> c_int {
    guarded("rosie_free_rplx", || {
        let engine = unsafe { engine_ref(engine, "rosie_free_rplx") }?;
        if let Ok(raw) = u32::try_from(pat) {
            engine.free_pattern(PatternHandle::from_raw(raw));
        }
        Ok(SUCCESS)
    })
}

fn handle(pat: c_int) -> PatternHandle {
    u32::try_from(pat).map_or(PatternHandle::NONE, PatternHandle::from_raw)
}

/// Matches `input` against `pat`. `match->data` is borrowed; when its `ptr`
/// is null, `len` is [`NO_MATCH`], [`NO_SUCH_PATTERN`] or [`NO_SUCH_ENCODER`].
///
/// # Safety
/// `engine` must be live; other pointers must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_match(
    engine: *mut Engine,
    pat: c_int,
    start: c_int,
    encoder: *const c_char,
    input: *const RosieString,
    result: *mut RosieMatch,
) -> c_int {
    guarded("rosie_match", || {
        let engine = unsafe { engine_ref(engine, "rosie_match") }?;
        let encoder = unsafe { c_str(encoder, "rosie_match", "encoder") }?;
        let input = unsafe { input_bytes(input, "rosie_match", "input") }?;
        if result.is_null() {
            return Err(null_argument("rosie_match", "match"));
        }
        let m = engine.match_input(handle(pat), i64::from(start), encoder, input)?;
        let data = match (m.status(), m.data()) {
            (MatchStatus::Matched, Some(bytes)) => RosieString::borrowed(bytes)?,
            (MatchStatus::NoSuchPattern, _) => RosieString::sentinel(NO_SUCH_PATTERN),
            (MatchStatus::NoSuchEncoder, _) => RosieString::sentinel(NO_SUCH_ENCODER),
            _ => RosieString::sentinel(NO_MATCH),
        };
        let matched = RosieMatch {
            data,
            leftover: clamp(m.leftover()),
            abend: c_int::from(m.abend()),
            ttotal: clamp(m.total_time()),
            tmatch: clamp(m.match_time()),
        };
        drop(m);
        unsafe { put(result, matched) };
        Ok(SUCCESS)
    })
}

/// Matches a file. Empty paths select stdio. On failure `*cin` is -1 and
/// `*cout` holds one of the `MATCHFILE_*` codes; I/O failures also store a
/// message in `*err`.
///
/// # Safety
/// `engine` must be live; other pointers must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_matchfile(
    engine: *mut Engine,
    pat: c_int,
    encoder: *const c_char,
    wholefileflag: c_int,
    infilename: *const c_char,
    outfilename: *const c_char,
    errfilename: *const c_char,
    cin: *mut c_int,
    cout: *mut c_int,
    cerr: *mut c_int,
    err: *mut RosieString,
) -> c_int {
    guarded("rosie_matchfile", || {
        let engine = unsafe { engine_ref(engine, "rosie_matchfile") }?;
        let call = "rosie_matchfile";
        let encoder = unsafe { c_str(encoder, call, "encoder") }?;
        let request = FileMatchRequest::new(handle(pat), encoder)
            .with_input(unsafe { c_str(infilename, call, "infilename") }?)
            .with_output(unsafe { c_str(outfilename, call, "outfilename") }?)
            .with_errors(unsafe { c_str(errfilename, call, "errfilename") }?)
            .with_wholefile(wholefileflag != 0);
        let (counts, message) = match engine.matchfile(&request)? {
            FileMatch::Counts { cin, cout, cerr } => {
                let count = |n: u64| clamp(n as i64);
                ((count(cin), count(cout), count(cerr)), None)
            }
            FileMatch::InvalidEncoder => ((-1, MATCHFILE_INVALID_ENCODER, 0), None),
            FileMatch::NoSuchPattern => ((-1, MATCHFILE_NO_SUCH_PATTERN, 0), None),
            FileMatch::Io(message) => ((-1, MATCHFILE_IO_ERROR, 0), Some(message)),
        };
        let message = owned_or_null(message.as_deref().map(str::as_bytes))?;
        unsafe {
            put(cin, counts.0);
            put(cout, counts.1);
            put(cerr, counts.2);
            put(err, message);
        }
        Ok(SUCCESS)
    })
}

/// Traces a match. When `trace->ptr` is null, `len` is [`NO_SUCH_PATTERN`]
/// or [`INVALID_TRACE_STYLE`].
///
/// # Safety
/// `engine` must be live; other pointers must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_trace(
    engine: *mut Engine,
    pat: c_int,
    start: c_int,
    trace_style: *const c_char,
    input: *const RosieString,
    matched: *mut c_int,
    trace: *mut RosieString,
) -> c_int {
    guarded("rosie_trace", || {
        let engine = unsafe { engine_ref(engine, "rosie_trace") }?;
        let style = unsafe { c_str(trace_style, "rosie_trace", "trace_style") }?;
        let input = unsafe { input_bytes(input, "rosie_trace", "input") }?;
        if trace.is_null() {
            return Err(null_argument("rosie_trace", "trace"));
        }
        let (was_matched, text) = match engine.trace(handle(pat), i64::from(start), style, input)? {
            Trace::NoSuchPattern => (false, RosieString::sentinel(NO_SUCH_PATTERN)),
            Trace::InvalidStyle => (false, RosieString::sentinel(INVALID_TRACE_STYLE)),
            Trace::Traced { matched, trace } => (matched, RosieString::owned(&trace)?),
        };
        unsafe {
            put(matched, c_int::from(was_matched));
            put(trace, text);
        }
        Ok(SUCCESS)
    })
}

/// # Safety
/// `ok`, `pkgname` and `errors` must be null or writable.
unsafe fn put_load_outcome(
    outcome: rosie::LoadOutcome,
    ok: *mut c_int,
    pkgname: *mut RosieString,
    errors: *mut RosieString,
) -> Result<(), RosieError> {
    let diagnostics = owned_or_null(outcome.diagnostics.as_deref())?;
    let package = owned_or_null(outcome.package.as_deref().map(str::as_bytes)).inspect_err(|_| {
        unsafe { rosie_free_string(diagnostics) };
    })?;
    unsafe {
        put(ok, c_int::from(outcome.ok));
        put(pkgname, package);
        put(errors, diagnostics);
    }
    Ok(())
}

/// # Safety
/// `engine` must be live; other pointers must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_load(
    engine: *mut Engine,
    ok: *mut c_int,
    src: *const RosieString,
    pkgname: *mut RosieString,
    errors: *mut RosieString,
) -> c_int {
    guarded("rosie_load", || {
        let engine = unsafe { engine_ref(engine, "rosie_load") }?;
        let src = unsafe { input_bytes(src, "rosie_load", "src") }?;
        let outcome = engine.load(src)?;
        unsafe { put_load_outcome(outcome, ok, pkgname, errors) }?;
        Ok(SUCCESS)
    })
}

/// # Safety
/// `engine` must be live; other pointers must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_loadfile(
    engine: *mut Engine,
    ok: *mut c_int,
    filename: *const RosieString,
    pkgname: *mut RosieString,
    errors: *mut RosieString,
) -> c_int {
    guarded("rosie_loadfile", || {
        let engine = unsafe { engine_ref(engine, "rosie_loadfile") }?;
        let filename = unsafe { input_bytes(filename, "rosie_loadfile", "filename") }?;
        let outcome = engine.loadfile(&String::from_utf8_lossy(filename))?;
        unsafe { put_load_outcome(outcome, ok, pkgname, errors) }?;
        Ok(SUCCESS)
    })
}

/// Imports `pkgname`, optionally as `as_name` (null for no alias).
///
/// # Safety
/// `engine` must be live; other pointers must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_import(
    engine: *mut Engine,
    ok: *mut c_int,
    pkgname: *const RosieString,
    as_name: *const RosieString,
    actual_pkgname: *mut RosieString,
    errors: *mut RosieString,
) -> c_int {
    guarded("rosie_import", || {
        let engine = unsafe { engine_ref(engine, "rosie_import") }?;
        let package = unsafe { input_bytes(pkgname, "rosie_import", "pkgname") }?;
        let package = String::from_utf8_lossy(package);
        let alias = unsafe { as_name.as_ref().and_then(|s| s.as_bytes()) }
            .map(String::from_utf8_lossy);
        let outcome = engine.import(&package, alias.as_deref())?;
        unsafe { put_load_outcome(outcome, ok, actual_pkgname, errors) }?;
        Ok(SUCCESS)
    })
}

/// Copies `len` bytes from `msg` into a new caller-owned string. Returns a
/// null string when `len` does not fit the 32-bit length field.
///
/// # Safety
/// `msg` must point to `len` readable bytes (or be null with `len == 0`).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_new_string(msg: *const u8, len: usize) -> RosieString {
    if wire_len("string", len).is_err() {
        return RosieString::NULL;
    }
    let bytes = if msg.is_null() || len == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(msg, len) }
    };
    RosieString::owned(bytes).unwrap_or(RosieString::NULL)
}

/// # Safety
/// Same as [`rosie_new_string`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_new_string_ptr(msg: *const u8, len: usize) -> *mut RosieString {
    Box::into_raw(Box::new(unsafe { rosie_new_string(msg, len) }))
}

/// # Safety
/// `s` must come from this library and not have been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_free_string(s: RosieString) {
    if s.ptr.is_null() {
        return;
    }
    let storage = ptr::slice_from_raw_parts_mut(s.ptr, s.len as usize + 1);
    drop(unsafe { Box::from_raw(storage) });
}

/// # Safety
/// `s` must come from [`rosie_new_string_ptr`] and not have been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_free_string_ptr(s: *mut RosieString) {
    if s.is_null() {
        return;
    }
    let s = unsafe { Box::from_raw(s) };
    unsafe { rosie_free_string(*s) };
}
