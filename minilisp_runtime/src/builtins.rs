//! Builtin functions.
//!
//! Builtins receive their arguments as temp-root handles: a handle
//! stays valid across any allocation the builtin performs, while a raw
//! pointer read from it is only trusted until the next allocation.

use crate::error::{LispError, LispResult};
use crate::interp::{Handle, Interp};
use crate::value::{BuiltinFn, Value, ValueKind};

/// Name-to-function table installed into the global environment.
pub const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("+", add),
    ("-", sub),
    ("*", mul),
    ("/", div),
    ("print", print),
    ("cons", cons),
    ("car", car),
    ("cdr", cdr),
    ("list", list),
    ("=", num_eq),
    ("<", num_lt),
    (">", num_gt),
    ("<=", num_le),
    (">=", num_ge),
    ("gc", gc),
    ("gc-threshold", gc_threshold),
    ("gc-stats", gc_stats),
];

fn expect_number(interp: &Interp, handle: Handle, who: &str) -> LispResult<f64> {
    let value = interp.value(handle);
    unsafe {
        if value.is_null() || (*value).kind != ValueKind::Number {
            return Err(LispError::type_error(format!("{who} expects numbers")));
        }
        Ok((*value).number)
    }
}

fn add(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    let mut sum = 0.0;
    for &arg in args {
        sum += expect_number(interp, arg, "+")?;
    }
    Ok(interp.make_number(sum))
}

fn sub(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    let Some((&first, rest)) = args.split_first() else {
        return Err(LispError::arity("- expects at least one argument"));
    };
    let mut result = expect_number(interp, first, "-")?;
    if rest.is_empty() {
        result = -result;
    } else {
        for &arg in rest {
            result -= expect_number(interp, arg, "-")?;
        }
    }
    Ok(interp.make_number(result))
}

fn mul(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    let mut product = 1.0;
    for &arg in args {
        product *= expect_number(interp, arg, "*")?;
    }
    Ok(interp.make_number(product))
}

fn div(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    let Some((&first, rest)) = args.split_first() else {
        return Err(LispError::arity("/ expects at least one argument"));
    };
    let mut result = expect_number(interp, first, "/")?;
    for &arg in rest {
        result /= expect_number(interp, arg, "/")?;
    }
    Ok(interp.make_number(result))
}

fn print(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    let line = args
        .iter()
        .map(|&h| interp.format_handle(h))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{line}");
    Ok(interp.nil())
}

fn cons(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    let [car_h, cdr_h] = args else {
        return Err(LispError::arity("cons expects two arguments"));
    };
    Ok(interp.make_pair(*car_h, *cdr_h))
}

fn car(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    let [arg] = args else {
        return Err(LispError::arity("car expects one argument"));
    };
    let value = interp.value(*arg);
    unsafe {
        if value.is_null() || (*value).kind != ValueKind::Pair {
            return Err(LispError::type_error("car expects a list"));
        }
        let head = (*value).car;
        Ok(if head.is_null() { interp.nil() } else { head })
    }
}

fn cdr(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    let [arg] = args else {
        return Err(LispError::arity("cdr expects one argument"));
    };
    let value = interp.value(*arg);
    unsafe {
        if value.is_null() || (*value).kind != ValueKind::Pair {
            return Err(LispError::type_error("cdr expects a list"));
        }
        let tail = (*value).cdr;
        Ok(if tail.is_null() { interp.nil() } else { tail })
    }
}

fn list(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    let mark = interp.root_mark();
    let acc_h = interp.push_value(interp.nil())?;
    for &arg in args.iter().rev() {
        let node = interp.make_pair(arg, acc_h);
        interp.set_handle(acc_h, node);
    }
    let result = interp.value(acc_h);
    interp.root_release(mark);
    Ok(result)
}

fn compare_chain(
    interp: &mut Interp,
    args: &[Handle],
    cmp: fn(f64, f64) -> bool,
    who: &str,
) -> LispResult<*mut Value> {
    if args.len() < 2 {
        return Err(LispError::arity(format!(
            "{who} expects at least two numbers"
        )));
    }
    let mut numbers = Vec::with_capacity(args.len());
    for &arg in args {
        numbers.push(expect_number(interp, arg, who)?);
    }
    for pair in numbers.windows(2) {
        if !cmp(pair[0], pair[1]) {
            return Ok(interp.nil());
        }
    }
    Ok(interp.t())
}

fn num_eq(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    compare_chain(interp, args, |a, b| a == b, "=")
}

fn num_lt(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    compare_chain(interp, args, |a, b| a < b, "<")
}

fn num_gt(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    compare_chain(interp, args, |a, b| a > b, ">")
}

fn num_le(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    compare_chain(interp, args, |a, b| a <= b, "<=")
}

fn num_ge(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    compare_chain(interp, args, |a, b| a >= b, ">=")
}

fn gc(interp: &mut Interp, _args: &[Handle]) -> LispResult<*mut Value> {
    interp.heap().collect();
    Ok(interp.nil())
}

fn gc_threshold(interp: &mut Interp, args: &[Handle]) -> LispResult<*mut Value> {
    match args {
        [] => {
            let threshold = interp.heap().threshold();
            Ok(interp.make_number(threshold as f64))
        }
        [arg] => {
            let bytes = expect_number(interp, *arg, "gc-threshold")?;
            if bytes < 0.0 {
                return Err(LispError::type_error("gc-threshold cannot be negative"));
            }
            interp.heap().set_threshold(bytes as usize);
            let threshold = interp.heap().threshold();
            Ok(interp.make_number(threshold as f64))
        }
        _ => Err(LispError::arity("gc-threshold accepts zero or one argument")),
    }
}

/// Association list of the headline collector counters:
/// `((collections . n) (allocated . n) (freed . n) (current . n))`.
fn gc_stats(interp: &mut Interp, _args: &[Handle]) -> LispResult<*mut Value> {
    let stats = interp.heap().stats();
    let entries = [
        ("collections", stats.collections as f64),
        ("allocated", stats.allocated_bytes as f64),
        ("freed", stats.freed_bytes as f64),
        ("current", stats.current_bytes as f64),
    ];

    let mark = interp.root_mark();
    let acc_h = interp.push_value(interp.nil())?;
    for &(name, number) in entries.iter().rev() {
        let key = interp.make_symbol(name)?;
        let key_h = interp.push_value(key)?;
        let value = interp.make_number(number);
        let value_h = interp.push_value(value)?;
        let entry = interp.make_pair(key_h, value_h);
        let entry_h = interp.push_value(entry)?;
        let node = interp.make_pair(entry_h, acc_h);
        interp.set_handle(acc_h, node);
    }
    let result = interp.value(acc_h);
    interp.root_release(mark);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minilisp_gc::{BackendKind, GcConfig};

    fn eval(src: &str) -> String {
        let mut interp =
            Interp::new(GcConfig::with_backend(BackendKind::MarkSweep)).expect("interp");
        let handle = interp.eval_source(src).expect("eval");
        interp.format_handle(handle)
    }

    #[test]
    fn test_arity_errors() {
        let mut interp =
            Interp::new(GcConfig::with_backend(BackendKind::MarkSweep)).expect("interp");
        for src in [
            "(cons 1)",
            "(car)",
            "(cdr 1 2)",
            "(-)",
            "(/)",
            "(= 1)",
            "(gc-threshold 1 2)",
        ] {
            assert!(
                matches!(interp.eval_source(src), Err(LispError::Arity { .. })),
                "{src}"
            );
        }
    }

    #[test]
    fn test_type_errors() {
        let mut interp =
            Interp::new(GcConfig::with_backend(BackendKind::MarkSweep)).expect("interp");
        for src in ["(car 1)", "(cdr 'a)", "(* 'a)", "(< 1 'x)"] {
            assert!(
                matches!(interp.eval_source(src), Err(LispError::Type { .. })),
                "{src}"
            );
        }
    }

    #[test]
    fn test_empty_variadics() {
        assert_eq!(eval("(+)"), "0");
        assert_eq!(eval("(*)"), "1");
        assert_eq!(eval("(list)"), "()");
    }

    #[test]
    fn test_print_returns_nil() {
        assert_eq!(eval("(print 1 '(2 3))"), "()");
    }
}
