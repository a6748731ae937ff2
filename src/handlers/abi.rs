//! C ABI shared by the executor and handlers built as `cdylib`s.
//!
//! The host calls an exported symbol with a [`HandlerCall`]. Params and
//! context travel as borrowed UTF-8 JSON slices; the guest answers through
//! the host's callbacks, so no allocation ever changes hands across the
//! boundary. A guest must call `finish` exactly once; later calls are
//! ignored by the host. Callbacks are only valid on the calling thread and
//! before the exported symbol returns.
//!
//! Handler crates normally do not touch these types directly and use
//! [`export_handler!`](crate::export_handler) instead.

use std::cell::RefCell;
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::capture::{OutputSink, Stream};
use crate::types::JsonObject;
use crate::utils::panic_message;

/// Bumped on any layout change of [`HandlerCall`].
pub const ABI_VERSION: u32 = 1;

pub const STREAM_STDOUT: u32 = 1;
pub const STREAM_STDERR: u32 = 2;

pub const STATUS_OK: u32 = 0;
pub const STATUS_ERR: u32 = 1;

pub type WriteFn = extern "C" fn(host: *mut c_void, stream: u32, ptr: *const u8, len: usize);
pub type FinishFn = extern "C" fn(host: *mut c_void, status: u32, ptr: *const u8, len: usize);

/// Arguments of one native handler call.
#[repr(C)]
pub struct HandlerCall {
    pub abi_version: u32,
    /// Non-zero when the host keeps what the guest writes.
    pub capture: u32,
    pub params_ptr: *const u8,
    pub params_len: usize,
    pub context_ptr: *const u8,
    pub context_len: usize,
    pub host: *mut c_void,
    pub write: WriteFn,
    pub finish: FinishFn,
}

/// Signature of every exported handler symbol.
pub type RawHandlerFn = unsafe extern "C" fn(call: *const HandlerCall);

struct HostState<'a> {
    sink: &'a OutputSink,
    outcome: RefCell<Option<Result<Value, String>>>,
}

/// Borrow `len` bytes at `ptr`, treating null as empty.
///
/// # Safety
/// A non-null `ptr` must be valid for reads of `len` bytes for `'a`.
unsafe fn borrow_bytes<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: upheld by the caller.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }
}

extern "C" fn host_write(host: *mut c_void, stream: u32, ptr: *const u8, len: usize) {
    // SAFETY: `host` is the `HostState` owned by `call_native` for the whole
    // call, and the guest passes a slice it owns for the duration of this call.
    let state = unsafe { &*(host as *const HostState<'_>) };
    let bytes = unsafe { borrow_bytes(ptr, len) };
    let stream = match stream {
        STREAM_STDERR => Stream::Stderr,
        _ => Stream::Stdout,
    };
    state.sink.write_bytes(stream, bytes);
}

extern "C" fn host_finish(host: *mut c_void, status: u32, ptr: *const u8, len: usize) {
    // SAFETY: see `host_write`.
    let state = unsafe { &*(host as *const HostState<'_>) };
    let bytes = unsafe { borrow_bytes(ptr, len) };

    let mut outcome = state.outcome.borrow_mut();
    if outcome.is_some() {
        return;
    }
    *outcome = Some(if status == STATUS_OK {
        serde_json::from_slice(bytes).map_err(|e| format!("handler returned invalid JSON: {}", e))
    } else {
        Err(String::from_utf8_lossy(bytes).into_owned())
    });
}

/// Call a native handler, routing its output into `sink`.
///
/// # Safety
/// `func` must follow the [`RawHandlerFn`] contract, and the library it came
/// from must stay loaded for the duration of the call.
pub unsafe fn call_native(
    func: RawHandlerFn,
    params: &JsonObject,
    context: &JsonObject,
    sink: &OutputSink,
) -> Result<Value> {
    let params = serde_json::to_vec(params)?;
    let context = serde_json::to_vec(context)?;
    let state = HostState {
        sink,
        outcome: RefCell::new(None),
    };

    let call = HandlerCall {
        abi_version: ABI_VERSION,
        capture: u32::from(sink.is_enabled()),
        params_ptr: params.as_ptr(),
        params_len: params.len(),
        context_ptr: context.as_ptr(),
        context_len: context.len(),
        host: &state as *const HostState<'_> as *mut c_void,
        write: host_write,
        finish: host_finish,
    };

    // SAFETY: upheld by the caller; `call` and everything it points to
    // outlive the call.
    unsafe { func(&call) };

    match state.outcome.into_inner() {
        Some(Ok(value)) => Ok(value),
        Some(Err(message)) => Err(anyhow!(message)),
        None => Err(anyhow!("handler returned without reporting a result")),
    }
}

fn decode_object(bytes: &[u8], what: &str) -> Result<JsonObject> {
    if bytes.is_empty() {
        return Ok(JsonObject::new());
    }
    serde_json::from_slice(bytes).map_err(|e| anyhow!("invalid {} from host: {}", what, e))
}

/// Guest side of a call: decode arguments, run `func`, report back.
///
/// Panics in `func` are caught here and reported as errors so they never
/// unwind into the host.
///
/// # Safety
/// `call` must be null or point to a valid [`HandlerCall`] from the host.
pub unsafe fn run_guest<F>(call: *const HandlerCall, func: F)
where
    F: Fn(&JsonObject, &JsonObject, &OutputSink) -> Result<Value>,
{
    // SAFETY: upheld by the caller.
    let Some(call) = (unsafe { call.as_ref() }) else {
        return;
    };

    let finish = |status: u32, bytes: &[u8]| {
        (call.finish)(call.host, status, bytes.as_ptr(), bytes.len());
    };

    if call.abi_version != ABI_VERSION {
        let message = format!(
            "incompatible handler ABI: host={}, guest={}",
            call.abi_version, ABI_VERSION
        );
        finish(STATUS_ERR, message.as_bytes());
        return;
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<Value> {
        // SAFETY: the host keeps both buffers alive for the whole call.
        let params = decode_object(unsafe { borrow_bytes(call.params_ptr, call.params_len) }, "params")?;
        let context = decode_object(
            unsafe { borrow_bytes(call.context_ptr, call.context_len) },
            "context",
        )?;

        let sink = OutputSink::new(call.capture != 0);
        let result = func(&params, &context, &sink);

        let (stdout, stderr) = sink.into_parts();
        for (stream, text) in [(STREAM_STDOUT, stdout), (STREAM_STDERR, stderr)] {
            if !text.is_empty() {
                (call.write)(call.host, stream, text.as_ptr(), text.len());
            }
        }
        result
    }));

    match outcome {
        Ok(Ok(value)) => match serde_json::to_vec(&value) {
            Ok(encoded) => finish(STATUS_OK, &encoded),
            Err(e) => finish(STATUS_ERR, format!("result is not serializable: {}", e).as_bytes()),
        },
        Ok(Err(e)) => finish(STATUS_ERR, format!("{:#}", e).as_bytes()),
        Err(panic) => finish(
            STATUS_ERR,
            format!("handler panicked: {}", panic_message(panic.as_ref())).as_bytes(),
        ),
    }
}

/// Export a Rust function as a native handler symbol.
///
/// The function has the same signature as an in-process
/// [`Handler`](crate::handlers::Handler):
///
/// ```ignore
/// fn handler(params: &JsonObject, context: &JsonObject, out: &OutputSink) -> anyhow::Result<Value> {
///     out.println("working");
///     Ok(serde_json::json!({"Success": true}))
/// }
///
/// funcexec::export_handler!(handler, handler);
/// ```
#[macro_export]
macro_rules! export_handler {
    ($symbol:ident, $func:path) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $symbol(call: *const $crate::handlers::abi::HandlerCall) {
            // SAFETY: the executor always passes a valid `HandlerCall`.
            unsafe { $crate::handlers::abi::run_guest(call, $func) }
        }
    };
}
