//! FFI bindings for Synheart Insight
//!
//! C-compatible functions over the JSON entry points of [`InsightEngine`].
//! All functions take null-terminated C strings and return allocated memory
//! that must be freed by the caller using `insight_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::EngineConfig;
use crate::error::InsightError;
use crate::pipeline::InsightEngine;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

type JsonEntryPoint = fn(&InsightEngine, &str) -> Result<String, InsightError>;

/// Read the request, run it, and hand back the response or record the error
unsafe fn run_entry_point(
    engine: &InsightEngine,
    request: *const c_char,
    entry_point: JsonEntryPoint,
) -> *mut c_char {
    clear_last_error();

    let request = match cstr_to_string(request) {
        Some(s) => s,
        None => {
            set_last_error("Invalid request string pointer");
            return ptr::null_mut();
        }
    };

    match entry_point(engine, &request) {
        Ok(response) => string_to_cstr(&response),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn entry_point_named(name: &str) -> Option<JsonEntryPoint> {
    let entry_point: JsonEntryPoint = match name {
        "metric_summary" => InsightEngine::metric_summary_json,
        "correlations" => InsightEngine::correlations_json,
        "causal_estimate" => InsightEngine::causal_estimate_json,
        "forecast" => InsightEngine::forecast_json,
        "verdicts" => InsightEngine::verdicts_json,
        _ => return None,
    };
    Some(entry_point)
}

// ============================================================================
// Stateless API (default configuration and built-in tables)
// ============================================================================

/// Baselines, zones, momentum, classification and changepoints for one metric.
///
/// # Safety
/// - `request` must be a valid null-terminated C string holding a
///   `MetricSummaryRequest` JSON document.
/// - Returns a newly allocated string that must be freed with `insight_free_string`.
/// - Returns NULL on error; call `insight_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn insight_metric_summary(request: *const c_char) -> *mut c_char {
    run_entry_point(&InsightEngine::default(), request, InsightEngine::metric_summary_json)
}

/// Before/after correlations of an intervention against every metric.
///
/// # Safety
/// Same contract as `insight_metric_summary`, with a `CorrelationRequest`.
#[no_mangle]
pub unsafe extern "C" fn insight_correlations(request: *const c_char) -> *mut c_char {
    run_entry_point(&InsightEngine::default(), request, InsightEngine::correlations_json)
}

/// N-of-1 causal estimate.
///
/// # Safety
/// Same contract as `insight_metric_summary`, with a `CausalRequest`.
#[no_mangle]
pub unsafe extern "C" fn insight_causal_estimate(request: *const c_char) -> *mut c_char {
    run_entry_point(&InsightEngine::default(), request, InsightEngine::causal_estimate_json)
}

/// GP biomarker forecast.
///
/// # Safety
/// Same contract as `insight_metric_summary`, with a `ForecastRequest`.
#[no_mangle]
pub unsafe extern "C" fn insight_forecast(request: *const c_char) -> *mut c_char {
    run_entry_point(&InsightEngine::default(), request, InsightEngine::forecast_json)
}

/// Effectiveness verdicts for every active or paused intervention.
///
/// # Safety
/// Same contract as `insight_metric_summary`, with a `VerdictRequest`.
#[no_mangle]
pub unsafe extern "C" fn insight_verdicts(request: *const c_char) -> *mut c_char {
    run_entry_point(&InsightEngine::default(), request, InsightEngine::verdicts_json)
}

// ============================================================================
// Configured engine API
// ============================================================================

/// Opaque handle to a configured engine
pub struct InsightEngineHandle {
    engine: InsightEngine,
}

/// Create an engine from a configuration JSON document.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for the
///   default configuration.
/// - Returns a pointer that must be freed with `insight_engine_free`.
/// - Returns NULL on error; call `insight_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn insight_engine_new(
    config_json: *const c_char,
) -> *mut InsightEngineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        EngineConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string");
                return ptr::null_mut();
            }
        };
        match EngineConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let engine = match InsightEngine::with_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };
    let handle = Box::new(InsightEngineHandle { engine });
    Box::into_raw(handle)
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `insight_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn insight_engine_free(engine: *mut InsightEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Run a named entry point on a configured engine.
///
/// `entry_point` is one of `metric_summary`, `correlations`,
/// `causal_estimate`, `forecast` or `verdicts`.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `insight_engine_new`.
/// - `entry_point` and `request` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `insight_free_string`.
/// - Returns NULL on error; call `insight_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn insight_engine_run(
    engine: *const InsightEngineHandle,
    entry_point: *const c_char,
    request: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let name = match cstr_to_string(entry_point) {
        Some(s) => s,
        None => {
            set_last_error("Invalid entry point string");
            return ptr::null_mut();
        }
    };
    let Some(entry_point) = entry_point_named(&name) else {
        set_last_error(&format!("Unknown entry point: {}", name));
        return ptr::null_mut();
    };

    run_entry_point(&handle.engine, request, entry_point)
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Insight functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an Insight function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn insight_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Insight function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn insight_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Insight library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn insight_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
