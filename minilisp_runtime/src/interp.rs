//! The interpreter: reader, evaluator, and the mutator-side GC
//! discipline.
//!
//! The interpreter is the collector's workload generator, and its
//! structure is dictated by the mutator obligations:
//!
//! - every value, environment, binding, and name string is allocated
//!   through the GC runtime with a trace callback and tag installed;
//! - every pointer store into a heap object goes through
//!   [`Interp::heap_store`], which runs the write barrier first;
//! - intermediate results live in the temporary-root pool and are
//!   addressed through [`Handle`]s. Any allocation is a potential
//!   collection point, and the moving backends rewrite root cells, so
//!   code here re-reads through handles after each allocating call
//!   instead of trusting raw locals.

use minilisp_gc::{GcConfig, GcRuntime, ObjectTag, TraceFn};

use crate::env::{self, trace_binding, trace_env, Binding, Env};
use crate::error::{LispError, LispResult};
use crate::lexer::{Token, TokenStream};
use crate::printer::format_value;
use crate::shadow::ShadowStack;
use crate::value::{is_nil, is_truthy, trace_value, BuiltinFn, GcStr, Value, ValueKind};

pub use crate::shadow::Handle;

/// Permanent root cells: boxed so the registered slot addresses never
/// move for the lifetime of the interpreter.
struct Pinned {
    global_env: *mut u8,
    nil: *mut u8,
    t: *mut u8,
}

/// The interpreter. Owns the GC runtime, the temporary-root pool, and
/// the pinned globals.
pub struct Interp {
    gc: GcRuntime,
    shadow: ShadowStack,
    pinned: Box<Pinned>,
}

impl Interp {
    /// Build an interpreter over the configured collector backend and
    /// install the global environment and builtins.
    pub fn new(config: GcConfig) -> LispResult<Self> {
        let mut gc = GcRuntime::new(config);
        let mut shadow = ShadowStack::new();
        shadow.register(&mut gc);

        let mut pinned = Box::new(Pinned {
            global_env: std::ptr::null_mut(),
            nil: std::ptr::null_mut(),
            t: std::ptr::null_mut(),
        });
        gc.add_root(&mut pinned.global_env as *mut *mut u8);
        gc.add_root(&mut pinned.nil as *mut *mut u8);
        gc.add_root(&mut pinned.t as *mut *mut u8);

        let mut interp = Self { gc, shadow, pinned };
        interp.bootstrap()?;
        Ok(interp)
    }

    /// Interpreter over the backend selected by the environment.
    pub fn from_env() -> LispResult<Self> {
        Self::new(GcConfig::from_env())
    }

    fn bootstrap(&mut self) -> LispResult<()> {
        // Each pinned cell is filled before the next allocation so the
        // singleton is rooted from its first moment.
        let nil = self.alloc_value(ValueKind::Nil, ObjectTag::Unknown);
        self.pinned.nil = nil.cast();

        let t = self.make_symbol("t")?;
        self.pinned.t = t.cast();

        let global = self.env_new(None);
        self.pinned.global_env = global.cast();

        let mark = self.shadow.mark();
        let global_h = self.shadow.push(self.pinned.global_env)?;
        let nil_h = self.push_value(self.nil())?;
        self.env_define(global_h, "nil", nil_h)?;
        let t_h = self.push_value(self.t())?;
        self.env_define(global_h, "t", t_h)?;

        for &(name, func) in crate::builtins::BUILTINS {
            let loop_mark = self.shadow.mark();
            let builtin = self.make_builtin(func);
            let builtin_h = self.push_value(builtin)?;
            self.env_define(global_h, name, builtin_h)?;
            self.shadow.truncate(loop_mark);
        }
        self.shadow.truncate(mark);
        log::debug!(
            "interpreter ready: {} backend, {} builtins",
            self.gc.backend_kind().as_str(),
            crate::builtins::BUILTINS.len()
        );
        Ok(())
    }

    // =========================================================================
    // Handles and root scopes
    // =========================================================================

    /// Current value of a handle, as a value pointer.
    #[inline]
    pub(crate) fn value(&self, handle: Handle) -> *mut Value {
        self.shadow.get(handle).cast()
    }

    /// Current value of a handle, as an environment pointer.
    #[inline]
    pub(crate) fn env(&self, handle: Handle) -> *mut Env {
        self.shadow.get(handle).cast()
    }

    /// Root a value pointer in the temp pool.
    #[inline]
    pub(crate) fn push_value(&mut self, value: *mut Value) -> LispResult<Handle> {
        self.shadow.push(value.cast())
    }

    /// Overwrite a rooted cell.
    #[inline]
    pub(crate) fn set_handle(&mut self, handle: Handle, value: *mut Value) {
        self.shadow.set(handle, value.cast());
    }

    /// Open a root scope; pass the result to [`Interp::root_release`].
    #[inline]
    pub fn root_mark(&self) -> usize {
        self.shadow.mark()
    }

    /// Close a root scope, nulling the cells it used.
    #[inline]
    pub fn root_release(&mut self, mark: usize) {
        self.shadow.truncate(mark);
    }

    /// The nil singleton.
    #[inline]
    pub fn nil(&self) -> *mut Value {
        self.pinned.nil.cast()
    }

    /// The `t` singleton.
    #[inline]
    pub(crate) fn t(&self) -> *mut Value {
        self.pinned.t.cast()
    }

    /// Direct access to the collector runtime (stats, thresholds,
    /// forced collection).
    pub fn heap(&mut self) -> &mut GcRuntime {
        &mut self.gc
    }

    /// Render the value a handle currently addresses.
    pub fn format_handle(&self, handle: Handle) -> String {
        unsafe { format_value(self.value(handle)) }
    }

    /// Whether a handle currently addresses nil.
    pub fn handle_is_nil(&self, handle: Handle) -> bool {
        is_nil(self.value(handle))
    }

    /// Numeric content of a handle, if it addresses a number.
    pub fn handle_number(&self, handle: Handle) -> Option<f64> {
        let value = self.value(handle);
        unsafe {
            if !value.is_null() && (*value).kind == ValueKind::Number {
                Some((*value).number)
            } else {
                None
            }
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Write `child` into `*slot`, a field of `owner`, running the
    /// write barrier first.
    ///
    /// # Safety
    ///
    /// `slot` must point into `owner`'s live payload.
    pub(crate) unsafe fn heap_store<T>(&mut self, owner: *mut u8, slot: *mut *mut T, child: *mut T) {
        self.gc
            .write_barrier(owner, slot as *mut *mut u8, child.cast());
        *slot = child;
    }

    fn alloc_value(&mut self, kind: ValueKind, tag: ObjectTag) -> *mut Value {
        let payload = self.gc.allocate(std::mem::size_of::<Value>());
        self.gc.set_trace(payload, Some(trace_value as TraceFn));
        self.gc.set_tag(payload, tag);
        let value = payload.cast::<Value>();
        unsafe { (*value).kind = kind };
        value
    }

    /// Allocate a name string on the GC heap.
    fn alloc_str(&mut self, text: &str) -> *mut GcStr {
        let payload = self.gc.allocate(GcStr::HEADER + text.len());
        self.gc.set_tag(payload, ObjectTag::String);
        unsafe {
            (*payload.cast::<GcStr>()).len = text.len();
            std::ptr::copy_nonoverlapping(
                text.as_ptr(),
                payload.add(GcStr::HEADER),
                text.len(),
            );
        }
        payload.cast()
    }

    /// New number value. The caller must root the result before the
    /// next allocation.
    pub fn make_number(&mut self, number: f64) -> *mut Value {
        let value = self.alloc_value(ValueKind::Number, ObjectTag::Number);
        unsafe { (*value).number = number };
        value
    }

    /// New symbol with a freshly allocated name string. `name` must not
    /// alias the GC heap (copy heap-resident names out first).
    pub fn make_symbol(&mut self, name: &str) -> LispResult<*mut Value> {
        let mark = self.shadow.mark();
        let value = self.alloc_value(ValueKind::Symbol, ObjectTag::Symbol);
        let value_h = self.push_value(value)?;
        let string = self.alloc_str(name);
        let value = self.value(value_h);
        unsafe { self.heap_store(value.cast(), &mut (*value).name, string) };
        self.shadow.truncate(mark);
        Ok(value)
    }

    /// New pair from rooted car/cdr.
    pub fn make_pair(&mut self, car_h: Handle, cdr_h: Handle) -> *mut Value {
        let value = self.alloc_value(ValueKind::Pair, ObjectTag::Pair);
        unsafe {
            let car = self.value(car_h);
            self.heap_store(value.cast(), &mut (*value).car, car);
            let cdr = self.value(cdr_h);
            self.heap_store(value.cast(), &mut (*value).cdr, cdr);
        }
        value
    }

    /// New closure from rooted parts.
    fn make_lambda(&mut self, params_h: Handle, body_h: Handle, env_h: Handle) -> *mut Value {
        let value = self.alloc_value(ValueKind::Lambda, ObjectTag::Lambda);
        unsafe {
            let params = self.value(params_h);
            self.heap_store(value.cast(), &mut (*value).params, params);
            let body = self.value(body_h);
            self.heap_store(value.cast(), &mut (*value).body, body);
            let env = self.env(env_h);
            self.heap_store(value.cast(), &mut (*value).env, env);
        }
        value
    }

    fn make_builtin(&mut self, func: BuiltinFn) -> *mut Value {
        let value = self.alloc_value(ValueKind::Builtin, ObjectTag::Builtin);
        unsafe { (*value).builtin = Some(func) };
        value
    }

    fn env_new(&mut self, parent_h: Option<Handle>) -> *mut Env {
        let payload = self.gc.allocate(std::mem::size_of::<Env>());
        self.gc.set_trace(payload, Some(trace_env as TraceFn));
        self.gc.set_tag(payload, ObjectTag::Env);
        let env = payload.cast::<Env>();
        if let Some(parent_h) = parent_h {
            unsafe {
                let parent = self.env(parent_h);
                self.heap_store(env.cast(), &mut (*env).parent, parent);
            }
        }
        env
    }

    // =========================================================================
    // Environment operations
    // =========================================================================

    /// Bind `name` in the frame addressed by `env_h`, overwriting an
    /// existing local binding.
    pub(crate) fn env_define(
        &mut self,
        env_h: Handle,
        name: &str,
        value_h: Handle,
    ) -> LispResult<()> {
        unsafe {
            let frame = self.env(env_h);
            let binding = env::find_local(frame, name);
            if !binding.is_null() {
                let value = self.value(value_h);
                self.heap_store(binding.cast(), &mut (*binding).value, value);
                return Ok(());
            }
        }

        let mark = self.shadow.mark();
        let payload = self.gc.allocate(std::mem::size_of::<Binding>());
        self.gc.set_trace(payload, Some(trace_binding as TraceFn));
        self.gc.set_tag(payload, ObjectTag::Binding);
        let binding_h = self.shadow.push(payload)?;

        let string = self.alloc_str(name);
        unsafe {
            let binding = self.shadow.get(binding_h).cast::<Binding>();
            self.heap_store(binding.cast(), &mut (*binding).name, string);
            let value = self.value(value_h);
            self.heap_store(binding.cast(), &mut (*binding).value, value);
            let frame = self.env(env_h);
            self.heap_store(binding.cast(), &mut (*binding).next, (*frame).bindings);
            self.heap_store(frame.cast(), &mut (*frame).bindings, binding);
        }
        self.shadow.truncate(mark);
        Ok(())
    }

    fn lookup(&self, env: *mut Env, name: &str) -> Option<*mut Value> {
        unsafe {
            let binding = env::find(env, name);
            if binding.is_null() {
                None
            } else {
                Some((*binding).value)
            }
        }
    }

    /// Owned copy of a symbol's name (safe to hold across allocations).
    fn symbol_name(&self, value: *mut Value) -> LispResult<String> {
        unsafe {
            if value.is_null() || (*value).kind != ValueKind::Symbol || (*value).name.is_null() {
                return Err(LispError::type_error("expected a symbol"));
            }
            Ok(GcStr::as_str((*value).name).to_owned())
        }
    }

    // =========================================================================
    // Reader
    // =========================================================================

    /// Read one form, returning it rooted. Partially built lists are
    /// held in temp roots so an opportunistic collection mid-read
    /// cannot reclaim or orphan them.
    fn read_form(&mut self, tokens: &mut TokenStream) -> LispResult<Handle> {
        match tokens.advance()? {
            Token::Number(n) => {
                let value = self.make_number(n);
                self.push_value(value)
            }
            Token::Symbol(text) => {
                if text == "nil" {
                    self.push_value(self.nil())
                } else {
                    let value = self.make_symbol(&text)?;
                    self.push_value(value)
                }
            }
            Token::LParen => self.read_list(tokens),
            Token::Quote => {
                let inner_h = self.read_form(tokens)?;
                let quote = self.make_symbol("quote")?;
                let quote_h = self.push_value(quote)?;
                let nil_h = self.push_value(self.nil())?;
                let tail = self.make_pair(inner_h, nil_h);
                let tail_h = self.push_value(tail)?;
                let value = self.make_pair(quote_h, tail_h);
                self.push_value(value)
            }
            Token::RParen => Err(LispError::syntax("unexpected )")),
            Token::Eof => Err(LispError::syntax("unexpected end of input")),
        }
    }

    fn read_list(&mut self, tokens: &mut TokenStream) -> LispResult<Handle> {
        let mark = self.shadow.mark();
        let head_h = self.push_value(self.nil())?;
        let mut tail_h: Option<Handle> = None;

        loop {
            match tokens.current() {
                Token::RParen => {
                    tokens.advance()?;
                    break;
                }
                Token::Eof => return Err(LispError::syntax("unterminated list")),
                _ => {}
            }
            let elem_h = self.read_form(tokens)?;
            let nil_h = self.push_value(self.nil())?;
            let node = self.make_pair(elem_h, nil_h);
            let node_h = self.push_value(node)?;
            match tail_h {
                None => self.set_handle(head_h, node),
                Some(tail_h) => unsafe {
                    let tail = self.value(tail_h);
                    let node = self.value(node_h);
                    self.heap_store(tail.cast(), &mut (*tail).cdr, node);
                },
            }
            tail_h = Some(node_h);
        }

        let result = self.value(head_h);
        self.shadow.truncate(mark);
        self.push_value(result)
    }

    // =========================================================================
    // Evaluator
    // =========================================================================

    /// Evaluate a rooted expression in a rooted environment; the result
    /// comes back rooted. The temp-root scope opened here is collapsed
    /// to exactly one cell on return.
    pub fn eval(&mut self, expr_h: Handle, env_h: Handle) -> LispResult<Handle> {
        let mark = self.shadow.mark();
        match self.eval_raw(expr_h, env_h) {
            Ok(value) => {
                self.shadow.truncate(mark);
                self.push_value(value)
            }
            Err(e) => {
                self.shadow.truncate(mark);
                Err(e)
            }
        }
    }

    /// Evaluate and return a raw pointer, valid until the next
    /// allocation. Callers root it immediately.
    fn eval_raw(&mut self, expr_h: Handle, env_h: Handle) -> LispResult<*mut Value> {
        let expr = self.value(expr_h);
        if expr.is_null() {
            return Ok(self.nil());
        }
        match unsafe { (*expr).kind } {
            ValueKind::Number | ValueKind::Nil | ValueKind::Lambda | ValueKind::Builtin => Ok(expr),
            ValueKind::Symbol => {
                let name = self.symbol_name(expr)?;
                self.lookup(self.env(env_h), &name)
                    .ok_or_else(|| LispError::undefined(name))
            }
            ValueKind::Pair => self.eval_pair(expr_h, env_h),
        }
    }

    fn eval_pair(&mut self, expr_h: Handle, env_h: Handle) -> LispResult<*mut Value> {
        let expr = self.value(expr_h);
        let op = unsafe { (*expr).car };
        if op.is_null() {
            return Ok(self.nil());
        }
        if unsafe { (*op).kind } == ValueKind::Symbol {
            let name = self.symbol_name(op)?;
            match name.as_str() {
                "quote" => return self.eval_quote(expr_h),
                "define" => return self.eval_define(expr_h, env_h),
                "lambda" => return self.eval_lambda(expr_h, env_h),
                "if" => return self.eval_if(expr_h, env_h),
                "begin" => {
                    let expr = self.value(expr_h);
                    let body_h = self.push_value(unsafe { (*expr).cdr })?;
                    return self.eval_sequence(body_h, env_h);
                }
                _ => {}
            }
        }
        self.eval_application(expr_h, env_h)
    }

    fn eval_quote(&mut self, expr_h: Handle) -> LispResult<*mut Value> {
        let expr = self.value(expr_h);
        unsafe {
            let args = (*expr).cdr;
            if is_nil(args) || (*args).kind != ValueKind::Pair {
                return Err(LispError::syntax("quote expects an argument"));
            }
            let quoted = (*args).car;
            Ok(if quoted.is_null() { self.nil() } else { quoted })
        }
    }

    fn eval_define(&mut self, expr_h: Handle, env_h: Handle) -> LispResult<*mut Value> {
        let expr = self.value(expr_h);
        let (target, value_exprs) = unsafe {
            let args = (*expr).cdr;
            if is_nil(args) || (*args).kind != ValueKind::Pair {
                return Err(LispError::syntax("define expects a symbol or list"));
            }
            let value_exprs = (*args).cdr;
            if is_nil(value_exprs) || (*value_exprs).kind != ValueKind::Pair {
                return Err(LispError::syntax("define missing value"));
            }
            ((*args).car, value_exprs)
        };
        if target.is_null() {
            return Err(LispError::syntax("define expects a symbol or (name args)"));
        }

        match unsafe { (*target).kind } {
            ValueKind::Symbol => {
                let name = self.symbol_name(target)?;
                let target_h = self.push_value(target)?;
                let value_expr_h = self.push_value(unsafe { (*value_exprs).car })?;
                let value_h = self.eval(value_expr_h, env_h)?;
                self.env_define(env_h, &name, value_h)?;
                Ok(self.value(target_h))
            }
            ValueKind::Pair => {
                let fn_name = unsafe { (*target).car };
                if fn_name.is_null() || unsafe { (*fn_name).kind } != ValueKind::Symbol {
                    return Err(LispError::syntax("define function requires a name"));
                }
                let name = self.symbol_name(fn_name)?;
                let fn_name_h = self.push_value(fn_name)?;
                let params_h = self.push_value(unsafe { (*target).cdr })?;
                let body_h = self.push_value(value_exprs)?;
                let lambda = self.make_lambda(params_h, body_h, env_h);
                let lambda_h = self.push_value(lambda)?;
                self.env_define(env_h, &name, lambda_h)?;
                Ok(self.value(fn_name_h))
            }
            _ => Err(LispError::syntax("define expects a symbol or (name args)")),
        }
    }

    fn eval_lambda(&mut self, expr_h: Handle, env_h: Handle) -> LispResult<*mut Value> {
        let expr = self.value(expr_h);
        let (params, body) = unsafe {
            let args = (*expr).cdr;
            if is_nil(args) || (*args).kind != ValueKind::Pair {
                return Err(LispError::syntax("lambda expects parameters"));
            }
            ((*args).car, (*args).cdr)
        };
        if is_nil(body) {
            return Err(LispError::syntax("lambda body cannot be empty"));
        }
        let params_h = self.push_value(params)?;
        let body_h = self.push_value(body)?;
        Ok(self.make_lambda(params_h, body_h, env_h))
    }

    fn eval_if(&mut self, expr_h: Handle, env_h: Handle) -> LispResult<*mut Value> {
        fn is_pair(v: *mut Value) -> bool {
            !is_nil(v) && unsafe { (*v).kind == ValueKind::Pair }
        }
        let expr = self.value(expr_h);
        let (test, then_branch, else_branch) = unsafe {
            let args = (*expr).cdr;
            let test = if is_pair(args) { (*args).car } else { self.nil() };
            let rest = if is_pair(args) { (*args).cdr } else { self.nil() };
            let then_branch = if is_pair(rest) { (*rest).car } else { self.nil() };
            let tail = if is_pair(rest) { (*rest).cdr } else { self.nil() };
            let else_branch = if is_pair(tail) { (*tail).car } else { self.nil() };
            (test, then_branch, else_branch)
        };

        let test_h = self.push_value(test)?;
        let then_h = self.push_value(then_branch)?;
        let else_h = self.push_value(else_branch)?;
        let test_value_h = self.eval(test_h, env_h)?;
        if is_truthy(self.value(test_value_h)) {
            let result_h = self.eval(then_h, env_h)?;
            Ok(self.value(result_h))
        } else if !self.handle_is_nil(else_h) {
            let result_h = self.eval(else_h, env_h)?;
            Ok(self.value(result_h))
        } else {
            Ok(self.nil())
        }
    }

    fn eval_sequence(&mut self, list_h: Handle, env_h: Handle) -> LispResult<*mut Value> {
        let mut result_h: Option<Handle> = None;
        let cursor_h = self.push_value(self.value(list_h))?;
        loop {
            let cursor = self.value(cursor_h);
            if is_nil(cursor) {
                break;
            }
            if unsafe { (*cursor).kind } != ValueKind::Pair {
                return Err(LispError::syntax("malformed expression list"));
            }
            let form_h = self.push_value(unsafe { (*cursor).car })?;
            result_h = Some(self.eval(form_h, env_h)?);
            let cursor = self.value(cursor_h);
            self.set_handle(cursor_h, unsafe { (*cursor).cdr });
        }
        Ok(result_h.map(|h| self.value(h)).unwrap_or_else(|| self.nil()))
    }

    fn eval_application(&mut self, expr_h: Handle, env_h: Handle) -> LispResult<*mut Value> {
        let expr = self.value(expr_h);
        let op_h = self.push_value(unsafe { (*expr).car })?;
        let operator_h = self.eval(op_h, env_h)?;

        let mut args: Vec<Handle> = Vec::new();
        let expr = self.value(expr_h);
        let cursor_h = self.push_value(unsafe { (*expr).cdr })?;
        loop {
            let cursor = self.value(cursor_h);
            if is_nil(cursor) {
                break;
            }
            if unsafe { (*cursor).kind } != ValueKind::Pair {
                return Err(LispError::syntax("malformed argument list"));
            }
            let arg_expr_h = self.push_value(unsafe { (*cursor).car })?;
            args.push(self.eval(arg_expr_h, env_h)?);
            let cursor = self.value(cursor_h);
            self.set_handle(cursor_h, unsafe { (*cursor).cdr });
        }

        let operator = self.value(operator_h);
        if operator.is_null() {
            return Err(LispError::type_error("attempt to call nil"));
        }
        match unsafe { (*operator).kind } {
            ValueKind::Builtin => {
                let func = unsafe { (*operator).builtin }
                    .ok_or_else(|| LispError::type_error("builtin without implementation"))?;
                func(self, &args)
            }
            ValueKind::Lambda => self.apply_lambda(operator_h, &args, env_h),
            _ => Err(LispError::type_error("attempt to call non-procedure")),
        }
    }

    fn apply_lambda(
        &mut self,
        operator_h: Handle,
        args: &[Handle],
        env_h: Handle,
    ) -> LispResult<*mut Value> {
        let operator = self.value(operator_h);
        let parent_h = if unsafe { (*operator).env }.is_null() {
            env_h
        } else {
            self.shadow.push(unsafe { (*operator).env }.cast())?
        };
        let call_env = self.env_new(Some(parent_h));
        let call_env_h = self.shadow.push(call_env.cast())?;

        // Bind parameters left to right; env_define allocates, so the
        // parameter cursor is re-read through its handle each step.
        let operator = self.value(operator_h);
        let cursor_h = self.push_value(unsafe { (*operator).params })?;
        let mut index = 0usize;
        loop {
            let cursor = self.value(cursor_h);
            if is_nil(cursor) {
                break;
            }
            if unsafe { (*cursor).kind } != ValueKind::Pair {
                return Err(LispError::syntax("malformed parameter list"));
            }
            let param = unsafe { (*cursor).car };
            let name = self.symbol_name(param).map_err(|_| {
                LispError::syntax("parameters must be symbols")
            })?;
            if index >= args.len() {
                return Err(LispError::arity("too few arguments supplied"));
            }
            self.env_define(call_env_h, &name, args[index])?;
            index += 1;
            let cursor = self.value(cursor_h);
            self.set_handle(cursor_h, unsafe { (*cursor).cdr });
        }
        if index != args.len() {
            return Err(LispError::arity("too many arguments supplied"));
        }

        let operator = self.value(operator_h);
        let body_h = self.push_value(unsafe { (*operator).body })?;
        self.eval_sequence(body_h, call_env_h)
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Read and evaluate every form in `src` against the global
    /// environment. Returns the last result, rooted; a collection runs
    /// after evaluation with the result protected, which keeps REPL
    /// sessions from accumulating garbage between inputs.
    pub fn eval_source(&mut self, src: &str) -> LispResult<Handle> {
        let mark = self.shadow.mark();
        let outcome = self.eval_source_raw(src);
        match outcome {
            Ok(result) => {
                self.shadow.truncate(mark);
                let handle = self.push_value(result)?;
                self.gc.collect();
                Ok(handle)
            }
            Err(e) => {
                self.shadow.truncate(mark);
                self.gc.collect();
                Err(e)
            }
        }
    }

    fn eval_source_raw(&mut self, src: &str) -> LispResult<*mut Value> {
        let mut tokens = TokenStream::new(src)?;
        let global_h = self.shadow.push(self.pinned.global_env)?;
        let mut last: Option<Handle> = None;
        while !tokens.at_eof() {
            let form_h = self.read_form(&mut tokens)?;
            last = Some(self.eval(form_h, global_h)?);
        }
        Ok(last.map(|h| self.value(h)).unwrap_or_else(|| self.nil()))
    }
}
