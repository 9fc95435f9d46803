//! Environments and bindings.
//!
//! An environment is a chain of frames; each frame holds a linked list
//! of bindings. Both live on the GC heap as POD structs, with the trace
//! callbacks keeping the chain reachable. Mutation of any pointer field
//! goes through the interpreter's barrier-routed store helper.

use minilisp_gc::Tracer;

use crate::value::{GcStr, Value};

/// One scope frame.
#[repr(C)]
pub struct Env {
    /// Enclosing scope (managed, null for the global frame).
    pub parent: *mut Env,
    /// Head of the binding list (managed).
    pub bindings: *mut Binding,
}

/// One name-to-value binding.
#[repr(C)]
pub struct Binding {
    /// Binding name (managed).
    pub name: *mut GcStr,
    /// Bound value (managed).
    pub value: *mut Value,
    /// Next binding in the frame (managed).
    pub next: *mut Binding,
}

/// Trace callback for [`Env`] payloads.
///
/// # Safety
///
/// Invoked by the collector on live `Env` payloads only.
pub unsafe fn trace_env(payload: *mut u8, tracer: &mut dyn Tracer) {
    let env = payload.cast::<Env>();
    (*env).parent = tracer.mark_ptr((*env).parent.cast()).cast();
    (*env).bindings = tracer.mark_ptr((*env).bindings.cast()).cast();
}

/// Trace callback for [`Binding`] payloads.
///
/// # Safety
///
/// Invoked by the collector on live `Binding` payloads only.
pub unsafe fn trace_binding(payload: *mut u8, tracer: &mut dyn Tracer) {
    let binding = payload.cast::<Binding>();
    (*binding).name = tracer.mark_ptr((*binding).name.cast()).cast();
    (*binding).value = tracer.mark_ptr((*binding).value.cast()).cast();
    (*binding).next = tracer.mark_ptr((*binding).next.cast()).cast();
}

/// Find a binding in `env`'s own frame, not the enclosing chain.
///
/// # Safety
///
/// `env` must be live; the result must be used before the next
/// potential collection point.
pub unsafe fn find_local(env: *mut Env, name: &str) -> *mut Binding {
    let mut binding = (*env).bindings;
    while !binding.is_null() {
        if GcStr::eq_str((*binding).name, name) {
            return binding;
        }
        binding = (*binding).next;
    }
    std::ptr::null_mut()
}

/// Find a binding anywhere along the scope chain.
///
/// # Safety
///
/// Same contract as [`find_local`].
pub unsafe fn find(env: *mut Env, name: &str) -> *mut Binding {
    let mut frame = env;
    while !frame.is_null() {
        let binding = find_local(frame, name);
        if !binding.is_null() {
            return binding;
        }
        frame = (*frame).parent;
    }
    std::ptr::null_mut()
}
