//! C ABI for embedding the bridge in native plugin shells (Android NDK, iOS, other C hosts).
//! Commands and results cross as NUL-terminated JSON strings. The bridge behind these
//! functions runs on the loopback library.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::event::EventRecord;
use crate::listener::{EventCategory, EventSink};
use crate::loopback::LoopbackLibrary;

/// Receives each event record as JSON. The string is only valid during the call.
pub type EventCallback = extern "C" fn(user_data: *mut c_void, record_json: *const c_char);

struct CallbackSink {
    callback: EventCallback,
    // Opaque to us; kept as an address so the sink is Send + Sync.
    user_data: usize,
}

impl EventSink for CallbackSink {
    fn deliver(&self, record: &EventRecord) {
        let Ok(json) = serde_json::to_string(record) else {
            return;
        };
        if let Ok(s) = CString::new(json) {
            (self.callback)(self.user_data as *mut c_void, s.as_ptr());
        }
    }
}

unsafe fn str_arg<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

fn into_c_string(v: Value) -> *mut c_char {
    CString::new(v.to_string())
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

/// Library version as a static NUL-terminated string. Never free it.
#[no_mangle]
pub extern "C" fn carrier_bridge_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Create a bridge. `config_json` may be null for defaults. Returns null on a bad config.
#[no_mangle]
pub extern "C" fn carrier_bridge_new(config_json: *const c_char) -> *mut c_void {
    let config = if config_json.is_null() {
        BridgeConfig::default()
    } else {
        let Some(s) = (unsafe { str_arg(config_json) }) else {
            return std::ptr::null_mut();
        };
        match serde_json::from_str::<BridgeConfig>(s) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting bridge config");
                return std::ptr::null_mut();
            }
        }
    };
    let created = catch_unwind(|| Bridge::new(Arc::new(LoopbackLibrary::new()), config));
    match created {
        Ok(bridge) => Box::into_raw(Box::new(bridge)) as *mut c_void,
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy every carrier instance and free the bridge. No-op if h is null.
#[no_mangle]
pub extern "C" fn carrier_bridge_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let bridge = unsafe { Box::from_raw(h as *mut Bridge) };
    let _ = catch_unwind(AssertUnwindSafe(|| bridge.shutdown()));
}

/// Run one command. `args_json` is a JSON array (null means no arguments).
/// Returns `{"ok": result}` or `{"error": message}`; free it with `carrier_bridge_free_string`.
/// Returns null only if h or command is null or not UTF-8.
#[no_mangle]
pub extern "C" fn carrier_bridge_dispatch(
    h: *mut c_void,
    command: *const c_char,
    args_json: *const c_char,
) -> *mut c_char {
    if h.is_null() {
        return std::ptr::null_mut();
    }
    let Some(command) = (unsafe { str_arg(command) }) else {
        return std::ptr::null_mut();
    };
    let bridge = unsafe { &*(h as *const Bridge) };
    let args = if args_json.is_null() {
        Vec::new()
    } else {
        let parsed = unsafe { str_arg(args_json) }.and_then(|s| serde_json::from_str::<Value>(s).ok());
        match parsed {
            Some(Value::Array(values)) => values,
            _ => return into_c_string(json!({ "error": "invalid argument: args must be a JSON array" })),
        }
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| bridge.dispatch(command, &args)));
    let reply = match outcome {
        Ok(Ok(value)) => json!({ "ok": value }),
        Ok(Err(e)) => json!({ "error": e.to_string() }),
        Err(_) => {
            tracing::error!(command, "panic while dispatching command");
            json!({ "error": format!("{command} error (internal)") })
        }
    };
    into_c_string(reply)
}

/// Install (or with a null callback, clear) the sink for one event category.
/// Returns 0 on success, -1 if h is null or the category is unknown.
#[no_mangle]
pub extern "C" fn carrier_bridge_set_listener(
    h: *mut c_void,
    category: c_int,
    callback: Option<EventCallback>,
    user_data: *mut c_void,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let Some(category) = u8::try_from(category).ok().and_then(EventCategory::from_code) else {
        return -1;
    };
    let bridge = unsafe { &*(h as *const Bridge) };
    match callback {
        Some(callback) => bridge.set_listener(
            category,
            Arc::new(CallbackSink {
                callback,
                user_data: user_data as usize,
            }),
        ),
        None => {
            bridge.listeners().clear_listener(category);
        }
    }
    0
}

/// Free a string returned by `carrier_bridge_dispatch`. No-op if s is null.
#[no_mangle]
pub extern "C" fn carrier_bridge_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    let _ = unsafe { CString::from_raw(s) };
}
