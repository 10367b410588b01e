//! Built-in functions seeded into the global scope.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::{NativeFn, Value};

/// Names of the built-ins, for REPL completion.
pub const NATIVE_FUNCTIONS: &[&str] = &["clock", "len"];

/// `(name, arity, implementation)` for every built-in.
pub(crate) const NATIVES: &[(&str, usize, NativeFn)] = &[("clock", 0, clock), ("len", 1, len)];

fn clock(_args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("System clock is before the Unix epoch: {}", e))?;
    Ok(Value::Float(elapsed.as_secs_f64()))
}

fn len(args: &[Value]) -> Result<Value, String> {
    match args.first() {
        Some(Value::Str(s)) => {
            let count = s.chars().count();
            i32::try_from(count)
                .map(Value::Int)
                .map_err(|_| "String is too long for 'len'.".to_string())
        }
        _ => Err("Argument to 'len' must be a string.".to_string()),
    }
}
