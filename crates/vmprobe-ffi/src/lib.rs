//! C API for vmprobe
//!
//! This module exposes the flag registry, the reference VM and the
//! introspection bridge to C hosts. The API follows these principles:
//! - ABI-stable (uses only C-compatible types)
//! - Error handling via out-parameters
//! - Opaque pointers for VM objects
//! - Manual memory management
//!
//! Flag entry points operate on the process-wide registry. The VM's own
//! flags are registered there the first time any entry point that touches
//! flags or creates a VM is called.

use once_cell::sync::OnceCell;
use std::ffi::{c_void, CStr, CString};
use std::io::{self, Write};
use std::os::raw::{c_char, c_int};
use std::ptr;
use vmprobe_bridge::{associated_descriptor, dump_memory, dump_memory_categories, MemoryCategory};
use vmprobe_vm::{VmError, VmOptions, VmState};

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque handle to a VM state
#[repr(C)]
pub struct ProbeVM {
    _private: [u8; 0],
}

/// Error information
#[repr(C)]
pub struct ProbeError {
    message: *mut c_char,
}

/// Category label callback for [`probe_gcdump`]
///
/// Returns a NUL-terminated label, or NULL to fall back to the category id.
/// The string must stay valid until the callback is called again or the dump
/// returns. The callback must not modify the VM.
pub type ProbeCategoryName =
    Option<unsafe extern "C" fn(vm: *mut ProbeVM, category: u8) -> *const c_char>;

// Internal representation of VM (not exposed to C)
struct VmHandle {
    vm: VmState,
}

/// Errors reported through `ProbeError`
#[derive(Debug, thiserror::Error)]
enum FfiError {
    #[error("Invalid arguments (null {0})")]
    NullArgument(&'static str),

    #[error("Memory category out of range: {0}")]
    InvalidCategory(c_int),

    #[error(transparent)]
    Vm(#[from] VmError),
}

// ============================================================================
// Helper Functions
// ============================================================================

static BUILTIN_FLAGS: OnceCell<()> = OnceCell::new();

/// Register the VM's flags in the process-wide registry, once
fn ensure_builtin_flags() {
    BUILTIN_FLAGS.get_or_init(|| {
        if let Err(e) = vmprobe_vm::register_flags(vmprobe_flags::global()) {
            tracing::warn!(error = %e, "builtin flags not registered");
        }
    });
}

/// Convert Rust string to C string (caller must free)
fn rust_to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Set error out-parameter
unsafe fn set_error(error_out: *mut *mut ProbeError, error: FfiError) {
    if !error_out.is_null() {
        let message = rust_to_c_string(&error.to_string());
        *error_out = Box::into_raw(Box::new(ProbeError { message }));
    }
}

/// Report the outcome of a VM call as 0 / -1
unsafe fn report(result: Result<(), FfiError>, error: *mut *mut ProbeError) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_error(error, e);
            -1
        }
    }
}

/// Borrow the state behind a handle
unsafe fn state<'a>(vm: *mut ProbeVM) -> Result<&'a mut VmState, FfiError> {
    if vm.is_null() {
        return Err(FfiError::NullArgument("vm"));
    }
    Ok(&mut (*(vm as *mut VmHandle)).vm)
}

/// Flag name as `&str`; names that are not UTF-8 cannot match any flag
unsafe fn flag_name<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

/// `Write` adapter over a caller-owned `FILE*`
struct CFileWriter {
    file: *mut libc::FILE,
}

impl Write for CFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let written =
            unsafe { libc::fwrite(buf.as_ptr() as *const c_void, 1, buf.len(), self.file) };
        if written == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        if unsafe { libc::fflush(self.file) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

// ============================================================================
// Flag Functions
// ============================================================================

/// Set a flag by name
///
/// # Arguments
/// * `name` - Null-terminated flag name
/// * `value` - 0 = false, non-zero = true
///
/// # Returns
/// * 1 if the flag exists and was set
/// * 0 if no flag has that name (nothing changes)
///
/// # Safety
/// `name` must be NULL or a valid null-terminated string
///
/// # Example (C)
/// ```c
/// if (!probe_setfflag("DebugDumpObjects", 0)) {
///     fprintf(stderr, "unknown flag\n");
/// }
/// ```
#[no_mangle]
pub unsafe extern "C" fn probe_setfflag(name: *const c_char, value: c_int) -> c_int {
    ensure_builtin_flags();
    match flag_name(name) {
        Some(name) => vmprobe_flags::set_by_name(name, value != 0) as c_int,
        None => 0,
    }
}

/// Read a flag by name
///
/// # Arguments
/// * `name` - Null-terminated flag name
/// * `value_out` - Optional pointer receiving 0 or 1
///
/// # Returns
/// * 1 if the flag exists
/// * 0 if no flag has that name (`value_out` untouched)
///
/// # Safety
/// - `name` must be NULL or a valid null-terminated string
/// - `value_out` must be NULL or valid for writes
#[no_mangle]
pub unsafe extern "C" fn probe_getfflag(name: *const c_char, value_out: *mut c_int) -> c_int {
    ensure_builtin_flags();
    let Some(flag) = flag_name(name).and_then(vmprobe_flags::lookup) else {
        return 0;
    };
    if !value_out.is_null() {
        *value_out = flag.get() as c_int;
    }
    1
}

// ============================================================================
// VM Lifecycle Functions
// ============================================================================

/// Create a new VM state with default options
///
/// # Arguments
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * Non-null pointer to ProbeVM on success
/// * NULL on failure (check error parameter)
///
/// # Safety
/// The returned VM must be freed with `probe_vm_destroy()`
#[no_mangle]
pub unsafe extern "C" fn probe_vm_new(error: *mut *mut ProbeError) -> *mut ProbeVM {
    ensure_builtin_flags();
    match VmState::new(VmOptions::default()) {
        Ok(vm) => Box::into_raw(Box::new(VmHandle { vm })) as *mut ProbeVM,
        Err(e) => {
            set_error(error, e.into());
            ptr::null_mut()
        }
    }
}

/// Destroy a VM state and free all its objects
///
/// # Safety
/// - VM pointer must be NULL or created by `probe_vm_new()`
/// - VM must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn probe_vm_destroy(vm: *mut ProbeVM) {
    if vm.is_null() {
        return;
    }

    let handle = Box::from_raw(vm as *mut VmHandle);
    drop(handle);
}

// ============================================================================
// Stack Functions
// ============================================================================

/// Push a new table
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// VM pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn probe_createtable(
    vm: *mut ProbeVM,
    narray: c_int,
    nrecords: c_int,
    error: *mut *mut ProbeError,
) -> c_int {
    let result = state(vm).and_then(|vm| {
        vm.create_table(narray.max(0) as usize, nrecords.max(0) as usize)
            .map_err(FfiError::from)
    });
    report(result, error)
}

/// Push a new zero-filled userdata block
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// VM pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn probe_newuserdata(
    vm: *mut ProbeVM,
    size: usize,
    tag: u8,
    error: *mut *mut ProbeError,
) -> c_int {
    let result = state(vm).and_then(|vm| vm.new_userdata(size, tag).map_err(FfiError::from));
    report(result, error)
}

/// Push a number
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// VM pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn probe_pushnumber(
    vm: *mut ProbeVM,
    value: f64,
    error: *mut *mut ProbeError,
) -> c_int {
    let result = state(vm).and_then(|vm| vm.push_number(value).map_err(FfiError::from));
    report(result, error)
}

/// Pop a table (or nil) and make it the metatable of the value at `index`
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// VM pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn probe_setmetatable(
    vm: *mut ProbeVM,
    index: c_int,
    error: *mut *mut ProbeError,
) -> c_int {
    let result = state(vm).and_then(|vm| vm.set_metatable(index).map_err(FfiError::from));
    report(result, error)
}

/// Identity of the value at `index`
///
/// # Returns
/// * An address for collectable values and light userdata, for comparison
///   only; never dereference it
/// * NULL for other values, invalid indices or a NULL VM
///
/// # Safety
/// VM pointer must be NULL or valid
#[no_mangle]
pub unsafe extern "C" fn probe_topointer(vm: *mut ProbeVM, index: c_int) -> *const c_void {
    match state(vm) {
        Ok(vm) => vm
            .to_pointer(index)
            .map_or(ptr::null(), |id| id.to_raw() as *const c_void),
        Err(_) => ptr::null(),
    }
}

/// Number of values on the stack (0 for a NULL VM)
///
/// # Safety
/// VM pointer must be NULL or valid
#[no_mangle]
pub unsafe extern "C" fn probe_gettop(vm: *mut ProbeVM) -> c_int {
    match state(vm) {
        Ok(vm) => vm.top(),
        Err(_) => 0,
    }
}

/// Set the stack top
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// VM pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn probe_settop(
    vm: *mut ProbeVM,
    index: c_int,
    error: *mut *mut ProbeError,
) -> c_int {
    let result = state(vm).and_then(|vm| vm.set_top(index).map_err(FfiError::from));
    report(result, error)
}

/// Charge subsequent allocations to `category` (0..=255)
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// VM pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn probe_setmemcat(
    vm: *mut ProbeVM,
    category: c_int,
    error: *mut *mut ProbeError,
) -> c_int {
    let result = state(vm).and_then(|vm| {
        let id = u8::try_from(category).map_err(|_| FfiError::InvalidCategory(category))?;
        vm.set_memory_category(MemoryCategory(id));
        Ok(())
    });
    report(result, error)
}

// ============================================================================
// Introspection Functions
// ============================================================================

/// Metatable of the table or userdata at `index`
///
/// # Returns
/// * The metatable's address, for comparison only; never dereference it
/// * NULL if the value has no metatable, is not a table or userdata, the
///   index is invalid, or the VM is NULL
///
/// # Safety
/// VM pointer must be NULL or valid
///
/// # Example (C)
/// ```c
/// probe_createtable(vm, 0, 0, NULL);
/// probe_createtable(vm, 0, 0, NULL);
/// const void* mt = probe_topointer(vm, -1);
/// probe_setmetatable(vm, -2, NULL);
/// assert(probe_getmetatablepointer(vm, -1) == mt);
/// ```
#[no_mangle]
pub unsafe extern "C" fn probe_getmetatablepointer(
    vm: *mut ProbeVM,
    index: c_int,
) -> *const c_void {
    match state(vm) {
        Ok(vm) => associated_descriptor(&*vm, index)
            .map_or(ptr::null(), |id| id.to_raw() as *const c_void),
        Err(_) => ptr::null(),
    }
}

/// Write the VM's heap dump to `file`
///
/// `category_name` (may be NULL) is called once per memory category in use,
/// while the heap is being walked. Write failures are not reported; the file
/// is flushed but not closed.
///
/// # Safety
/// - VM pointer must be NULL or valid
/// - `file` must be NULL or an open, writable stream
/// - `category_name` must not modify the VM
#[no_mangle]
pub unsafe extern "C" fn probe_gcdump(
    vm: *mut ProbeVM,
    file: *mut libc::FILE,
    category_name: ProbeCategoryName,
) {
    if file.is_null() {
        return;
    }
    let Ok(vm_state) = state(vm) else {
        return;
    };
    let vm_state: &VmState = vm_state;
    let mut sink = CFileWriter { file };

    match category_name {
        Some(callback) => dump_memory_categories(vm_state, &mut sink, |_vm_state, category| {
            let label = callback(vm, category.id());
            if label.is_null() {
                category.to_string()
            } else {
                CStr::from_ptr(label).to_string_lossy().into_owned()
            }
        }),
        None => dump_memory(vm_state, &mut sink),
    }
}

// ============================================================================
// Error Handling Functions
// ============================================================================

/// Get the error message
///
/// # Returns
/// * Null-terminated error message string
/// * NULL if error is NULL
///
/// # Safety
/// - Error pointer must be valid
/// - Returned string is valid until `probe_error_free()` is called
/// - Do not free the returned string directly
#[no_mangle]
pub unsafe extern "C" fn probe_error_message(error: *const ProbeError) -> *const c_char {
    if error.is_null() {
        return ptr::null();
    }

    (*error).message
}

/// Free an error
///
/// # Safety
/// - Error pointer must be NULL or created by this API
/// - Error must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn probe_error_free(error: *mut ProbeError) {
    if error.is_null() {
        return;
    }

    if !(*error).message.is_null() {
        let _ = CString::from_raw((*error).message);
    }

    let _ = Box::from_raw(error);
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the vmprobe version string
///
/// # Safety
/// - The returned string is a static string and must not be freed
#[no_mangle]
pub unsafe extern "C" fn probe_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// Tests
// ============================================================================
