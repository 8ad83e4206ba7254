//! Property access, methods of built-in value kinds, and the language globals.

use std::rc::Rc;

use super::host::Host;
use super::interp::{error_object, Interpreter, Interrupt, Scope};
use super::value::{format_number, Builtin, FloatBuf, Object, Value};
use crate::hive::epoch_ms;

/// Longest string, in bytes, that `repeat` or padding may build.
pub(super) const MAX_STRING_LENGTH: usize = 1 << 28;
/// Largest array an index write or a `length` assignment may grow to.
pub(super) const MAX_ARRAY_LENGTH: usize = 1 << 24;

pub(super) fn install_globals(globals: &Rc<Scope>) {
    use Builtin::*;
    let math = Object::new()
        .with("abs", Value::Builtin(MathAbs))
        .with("floor", Value::Builtin(MathFloor))
        .with("ceil", Value::Builtin(MathCeil))
        .with("round", Value::Builtin(MathRound))
        .with("trunc", Value::Builtin(MathTrunc))
        .with("sign", Value::Builtin(MathSign))
        .with("sqrt", Value::Builtin(MathSqrt))
        .with("pow", Value::Builtin(MathPow))
        .with("exp", Value::Builtin(MathExp))
        .with("log", Value::Builtin(MathLog))
        .with("log10", Value::Builtin(MathLog10))
        .with("sin", Value::Builtin(MathSin))
        .with("cos", Value::Builtin(MathCos))
        .with("tan", Value::Builtin(MathTan))
        .with("tanh", Value::Builtin(MathTanh))
        .with("atan2", Value::Builtin(MathAtan2))
        .with("min", Value::Builtin(MathMin))
        .with("max", Value::Builtin(MathMax))
        .with("random", Value::Builtin(MathRandom))
        .with("PI", Value::Number(std::f64::consts::PI))
        .with("E", Value::Number(std::f64::consts::E));
    let json = Object::new()
        .with("stringify", Value::Builtin(JsonStringify))
        .with("parse", Value::Builtin(JsonParse));
    let object = Object::new()
        .with("keys", Value::Builtin(ObjectKeys))
        .with("values", Value::Builtin(ObjectValues));
    let array = Object::new().with("isArray", Value::Builtin(ArrayIsArray));
    let console = Object::new()
        .with("log", Value::Builtin(ConsoleLog))
        .with("info", Value::Builtin(ConsoleLog))
        .with("warn", Value::Builtin(ConsoleLog))
        .with("error", Value::Builtin(ConsoleLog));

    let entries: Vec<(&str, Value)> = vec![
        ("Math", math.into()),
        ("JSON", json.into()),
        ("Object", object.into()),
        ("Array", array.into()),
        ("console", console.into()),
        ("String", Value::Builtin(String)),
        ("Number", Value::Builtin(Number)),
        ("Boolean", Value::Builtin(Boolean)),
        ("parseInt", Value::Builtin(ParseInt)),
        ("parseFloat", Value::Builtin(ParseFloat)),
        ("isNaN", Value::Builtin(IsNaN)),
        ("isFinite", Value::Builtin(IsFinite)),
        ("Error", Value::Builtin(Error)),
        ("NaN", Value::Number(f64::NAN)),
        ("Infinity", Value::Number(f64::INFINITY)),
    ];
    for (name, value) in entries {
        globals.declare(name.into(), value, true);
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn num_arg(args: &[Value], i: usize) -> f64 {
    arg(args, i).to_number()
}

/// Resolve a relative `slice`-style index against `len`.
fn rel_index(v: &Value, len: usize, default: usize) -> usize {
    if matches!(v, Value::Undefined) {
        return default;
    }
    let n = v.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

/// JavaScript `parseInt`: leading integer in the given radix.
fn parse_int(s: &str, radix: Option<u32>) -> f64 {
    let t = s.trim_start();
    let (negative, t) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let (radix, t) = match (radix, t.get(..2)) {
        (None | Some(16), Some("0x" | "0X")) => (16, &t[2..]),
        (Some(r), _) if (2..=36).contains(&r) => (r, t),
        _ => (10, t),
    };
    let digits: String = t.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let mut value = 0f64;
    for c in digits.chars() {
        value = value * radix as f64 + c.to_digit(radix).unwrap_or(0) as f64;
    }
    if negative {
        -value
    } else {
        value
    }
}

/// JavaScript `parseFloat`: longest numeric prefix.
fn parse_float(s: &str) -> f64 {
    let t = s.trim_start();
    if t.starts_with("Infinity") || t.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if t.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let bytes = t.as_bytes();
    while end < bytes.len() {
        let c = bytes[end];
        let ok = match c {
            b'0'..=b'9' => true,
            b'+' | b'-' => end == 0 || matches!(bytes[end - 1], b'e' | b'E'),
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            b'e' | b'E' if !seen_exp && end > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end += 1;
    }
    // Back off until the prefix parses (e.g. a trailing "e" or "-").
    while end > 0 {
        if let Ok(v) = t[..end].parse::<f64>() {
            return v;
        }
        end -= 1;
    }
    f64::NAN
}

fn js_round(x: f64) -> f64 {
    let r = (x + 0.5).floor();
    if r == 0.0 && x < 0.0 {
        -0.0
    } else {
        r
    }
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn to_radix(mut n: u64, radix: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        let d = (n % radix as u64) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('?'));
        n /= radix as u64;
    }
    digits.iter().rev().collect()
}

fn float_vec_arg(v: &Value, what: &str) -> Result<Vec<f32>, Interrupt> {
    v.to_f32_vec()
        .ok_or_else(|| Interrupt::error(format!("{what} expects a numeric array")))
}

impl<'h, H: Host + ?Sized> Interpreter<'h, H> {
    pub(super) fn get_property(&mut self, obj: &Value, key: &str) -> Result<Value, Interrupt> {
        Ok(match obj {
            Value::Undefined | Value::Null => {
                return Err(Interrupt::error(format!(
                    "Cannot read properties of {} (reading '{key}')",
                    obj.to_display()
                )))
            }
            Value::Object(o) => o.borrow().get(key).cloned().unwrap_or_default(),
            Value::Array(items) => match key {
                "length" => Value::from(items.borrow().len()),
                _ => match key.parse::<usize>() {
                    Ok(i) => items.borrow().get(i).cloned().unwrap_or_default(),
                    Err(_) => Value::Undefined,
                },
            },
            Value::Floats(buf) => match key {
                "length" => Value::from(buf.len()),
                _ => match key.parse::<usize>() {
                    Ok(i) => buf.get(i).map(Value::from).unwrap_or_default(),
                    Err(_) => Value::Undefined,
                },
            },
            Value::Str(s) => match key {
                "length" => Value::from(s.chars().count()),
                _ => match key.parse::<usize>() {
                    Ok(i) => s
                        .chars()
                        .nth(i)
                        .map(|c| Value::from(c.to_string()))
                        .unwrap_or_default(),
                    Err(_) => Value::Undefined,
                },
            },
            Value::Tensor(t) => match key {
                "shape" => Value::array(t.borrow().shape().iter().map(|&d| Value::from(d)).collect()),
                "data" => Value::Floats(FloatBuf::Tensor(t.clone())),
                "size" | "length" => Value::from(t.borrow().len()),
                _ => Value::Undefined,
            },
            Value::Layer(l) => {
                let l = l.borrow();
                match key {
                    "inSize" => Value::from(l.in_size()),
                    "outSize" => Value::from(l.out_size()),
                    "weights" => Value::from(l.weights().clone()),
                    "bias" => Value::from(l.bias().clone()),
                    _ => Value::Undefined,
                }
            }
            Value::Network(n) => {
                let n = n.borrow();
                match key {
                    "name" => Value::from(n.name()),
                    "plasticity" => Value::from(n.plasticity),
                    "satisfaction" => Value::from(n.satisfaction),
                    "capacity" => Value::Number(n.capacity),
                    "depth" => Value::from(n.depth()),
                    "layers" => Value::array(n.layers().iter().cloned().map(Value::from).collect()),
                    "lastExpansion" => Value::Number(n.last_expansion_ms() as f64),
                    _ => Value::Undefined,
                }
            }
            Value::Host(f) => f.member(key).map(Value::Host).unwrap_or_default(),
            _ => Value::Undefined,
        })
    }

    pub(super) fn get_index(&mut self, obj: &Value, key: &Value) -> Result<Value, Interrupt> {
        if let Some(i) = key.as_index() {
            match obj {
                Value::Array(items) => return Ok(items.borrow().get(i).cloned().unwrap_or_default()),
                Value::Floats(buf) => return Ok(buf.get(i).map(Value::from).unwrap_or_default()),
                _ => {}
            }
        }
        self.get_property(obj, &key.to_display())
    }

    pub(super) fn set_property(&mut self, obj: &Value, key: &str, value: Value) -> Result<(), Interrupt> {
        match obj {
            Value::Undefined | Value::Null => {
                return Err(Interrupt::error(format!(
                    "Cannot set properties of {} (setting '{key}')",
                    obj.to_display()
                )))
            }
            Value::Object(o) => o.borrow_mut().set(key, value),
            Value::Array(items) => {
                if key == "length" {
                    let len = match value.as_index() {
                        Some(len) if len <= MAX_ARRAY_LENGTH => len,
                        _ => return Err(Interrupt::error("Invalid array length")),
                    };
                    items.borrow_mut().resize(len, Value::Undefined);
                } else if let Ok(i) = key.parse::<usize>() {
                    self.set_index(obj, &Value::from(i), value)?;
                }
            }
            Value::Floats(buf) => {
                if let Ok(i) = key.parse::<usize>() {
                    buf.set(i, value.to_number() as f32);
                }
            }
            Value::Network(n) => {
                let mut n = n.borrow_mut();
                match key {
                    "plasticity" => n.plasticity = value.to_number() as f32,
                    "satisfaction" => n.satisfaction = value.to_number() as f32,
                    "capacity" => n.capacity = value.to_number(),
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn set_index(&mut self, obj: &Value, key: &Value, value: Value) -> Result<(), Interrupt> {
        if let Some(i) = key.as_index() {
            match obj {
                Value::Array(items) => {
                    let mut items = items.borrow_mut();
                    if i >= MAX_ARRAY_LENGTH {
                        return Err(Interrupt::error("Invalid array length"));
                    }
                    if i >= items.len() {
                        items.resize(i + 1, Value::Undefined);
                    }
                    items[i] = value;
                    return Ok(());
                }
                Value::Floats(buf) => {
                    buf.set(i, value.to_number() as f32);
                    return Ok(());
                }
                _ => {}
            }
        }
        self.set_property(obj, &key.to_display(), value)
    }

    pub(super) fn call_method(
        &mut self,
        this: &Value,
        name: &str,
        args: Vec<Value>,
        describe: &dyn Fn() -> String,
    ) -> Result<Value, Interrupt> {
        let not_a_function = || Interrupt::error(format!("{} is not a function", describe()));
        match this {
            Value::Undefined | Value::Null => Err(Interrupt::error(format!(
                "Cannot read properties of {} (reading '{name}')",
                this.to_display()
            ))),
            Value::Object(o) => {
                let f = o.borrow().get(name).cloned().unwrap_or_default();
                if !f.is_callable() {
                    return Err(not_a_function());
                }
                self.call_value(&f, args, Some(this.clone()))
            }
            Value::Host(func) => match func.member(name) {
                Some(member) => self.host.call(member, &args),
                None => Err(not_a_function()),
            },
            Value::Number(n) => self
                .number_method(*n, name, &args)
                .ok_or_else(not_a_function),
            Value::Str(s) => self
                .string_method(s, name, &args)?
                .ok_or_else(not_a_function),
            Value::Array(items) => {
                let items = items.clone();
                self.array_method(&items, name, args)?
                    .ok_or_else(not_a_function)
            }
            Value::Floats(buf) => {
                let buf = buf.clone();
                self.floats_method(&buf, name, args)?
                    .ok_or_else(not_a_function)
            }
            Value::Network(net) => {
                let net = net.clone();
                match name {
                    "forward" => {
                        let input = float_vec_arg(&arg(&args, 0), "forward")?;
                        let out = net.borrow().forward(&input)?;
                        Ok(Value::floats(out))
                    }
                    "expand" => {
                        net.borrow_mut().expand(epoch_ms())?;
                        Ok(Value::Bool(true))
                    }
                    "pruneWeights" => {
                        let threshold = num_arg(&args, 0) as f32;
                        Ok(Value::from(net.borrow_mut().prune_weights(threshold)))
                    }
                    "mutate" => {
                        net.borrow_mut().mutate_all(num_arg(&args, 0) as f32);
                        Ok(Value::Undefined)
                    }
                    _ => Err(not_a_function()),
                }
            }
            Value::Layer(layer) => match name {
                "forward" => {
                    let input = float_vec_arg(&arg(&args, 0), "forward")?;
                    let out = layer.borrow().forward(&input)?;
                    Ok(Value::floats(out))
                }
                "prune" => {
                    let threshold = num_arg(&args, 0) as f32;
                    Ok(Value::from(layer.borrow_mut().prune(threshold)))
                }
                _ => Err(not_a_function()),
            },
            Value::Function(_) | Value::Builtin(_) => match name {
                "call" => {
                    let mut args = args.into_iter();
                    let this_arg = args.next();
                    self.call_value(this, args.collect(), this_arg)
                }
                _ => Err(not_a_function()),
            },
            _ => Err(not_a_function()),
        }
    }

    fn number_method(&mut self, n: f64, name: &str, args: &[Value]) -> Option<Value> {
        Some(match name {
            "toFixed" => {
                let digits = num_arg(args, 0);
                let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
                if !n.is_finite() {
                    Value::from(format_number(n))
                } else {
                    Value::from(format!("{n:.digits$}"))
                }
            }
            "toString" => {
                let radix = match arg(args, 0) {
                    Value::Undefined => 10,
                    v => v.to_number() as u32,
                };
                if radix != 10 && (2..=36).contains(&radix) && n.fract() == 0.0 && n.is_finite() {
                    let digits = to_radix(n.abs() as u64, radix);
                    Value::from(if n < 0.0 { format!("-{digits}") } else { digits })
                } else {
                    Value::from(format_number(n))
                }
            }
            "valueOf" => Value::Number(n),
            _ => return None,
        })
    }

    fn string_method(
        &mut self,
        s: &Rc<str>,
        name: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Interrupt> {
        let chars: Vec<char> = s.chars().collect();
        let len = chars.len();
        let str_arg = |i: usize| match arg(args, i) {
            Value::Undefined => "undefined".to_string(),
            v => v.to_display(),
        };
        Ok(Some(match name {
            "toUpperCase" => Value::from(s.to_uppercase()),
            "toLowerCase" => Value::from(s.to_lowercase()),
            "trim" => Value::from(s.trim()),
            "trimStart" => Value::from(s.trim_start()),
            "trimEnd" => Value::from(s.trim_end()),
            "toString" | "valueOf" => Value::Str(s.clone()),
            "includes" => Value::Bool(s.contains(str_arg(0).as_str())),
            "startsWith" => Value::Bool(s.starts_with(str_arg(0).as_str())),
            "endsWith" => Value::Bool(s.ends_with(str_arg(0).as_str())),
            "indexOf" | "lastIndexOf" => {
                let needle: Vec<char> = str_arg(0).chars().collect();
                let positions = (0..=len.saturating_sub(needle.len()))
                    .filter(|&i| len >= needle.len() && chars[i..i + needle.len()] == needle[..]);
                let found = if name == "indexOf" {
                    positions.min()
                } else {
                    positions.max()
                };
                Value::Number(found.map(|i| i as f64).unwrap_or(-1.0))
            }
            "slice" => {
                let start = rel_index(&arg(args, 0), len, 0);
                let end = rel_index(&arg(args, 1), len, len);
                Value::from(chars[start..end.max(start)].iter().collect::<String>())
            }
            "substring" => {
                let clamp = |v: Value, default: usize| match v {
                    Value::Undefined => default,
                    v => {
                        let n = v.to_number();
                        if n.is_nan() || n < 0.0 {
                            0
                        } else {
                            (n as usize).min(len)
                        }
                    }
                };
                let a = clamp(arg(args, 0), 0);
                let b = clamp(arg(args, 1), len);
                let (a, b) = if a <= b { (a, b) } else { (b, a) };
                Value::from(chars[a..b].iter().collect::<String>())
            }
            "charAt" => {
                let i = num_arg(args, 0);
                let i = if i.is_nan() { 0 } else { i as usize };
                Value::from(chars.get(i).map(|c| c.to_string()).unwrap_or_default())
            }
            "charCodeAt" => {
                let i = num_arg(args, 0);
                let i = if i.is_nan() { 0 } else { i as usize };
                Value::Number(chars.get(i).map(|&c| c as u32 as f64).unwrap_or(f64::NAN))
            }
            "split" => match arg(args, 0) {
                Value::Undefined => Value::array(vec![Value::Str(s.clone())]),
                sep => {
                    let sep = sep.to_display();
                    let parts: Vec<Value> = if sep.is_empty() {
                        chars.iter().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    };
                    Value::array(parts)
                }
            },
            "replace" => Value::from(s.replacen(str_arg(0).as_str(), &str_arg(1), 1)),
            "replaceAll" => Value::from(s.replace(str_arg(0).as_str(), &str_arg(1))),
            "repeat" => {
                let n = num_arg(args, 0);
                if n < 0.0 || n == f64::INFINITY {
                    return Err(Interrupt::error(format!(
                        "Invalid count value: {}",
                        Value::Number(n).to_display()
                    )));
                }
                let n = if n.is_nan() { 0 } else { n as usize };
                match s.len().checked_mul(n) {
                    Some(total) if total <= MAX_STRING_LENGTH => Value::from(s.repeat(n)),
                    _ => return Err(Interrupt::error("Invalid string length")),
                }
            }
            "padStart" | "padEnd" => {
                let target = num_arg(args, 0);
                let target = if target.is_finite() && target > 0.0 { target as usize } else { 0 };
                if target > MAX_STRING_LENGTH {
                    return Err(Interrupt::error("Invalid string length"));
                }
                let fill = match arg(args, 1) {
                    Value::Undefined => " ".to_string(),
                    v => v.to_display(),
                };
                if target <= len || fill.is_empty() {
                    Value::Str(s.clone())
                } else {
                    let pad: String = fill.chars().cycle().take(target - len).collect();
                    if name == "padStart" {
                        Value::from(format!("{pad}{s}"))
                    } else {
                        Value::from(format!("{s}{pad}"))
                    }
                }
            }
            "concat" => {
                let mut out = s.to_string();
                for a in args {
                    out.push_str(&a.to_display());
                }
                Value::from(out)
            }
            _ => return Ok(None),
        }))
    }

    fn array_method(
        &mut self,
        items: &Rc<std::cell::RefCell<Vec<Value>>>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Interrupt> {
        let this = Value::Array(items.clone());
        let callback = arg(&args, 0);
        Ok(Some(match name {
            "push" => {
                let mut items = items.borrow_mut();
                items.extend(args);
                Value::from(items.len())
            }
            "pop" => items.borrow_mut().pop().unwrap_or_default(),
            "shift" => {
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                }
            }
            "unshift" => {
                let mut items = items.borrow_mut();
                for (i, v) in args.into_iter().enumerate() {
                    items.insert(i, v);
                }
                Value::from(items.len())
            }
            "join" => {
                let sep = match arg(&args, 0) {
                    Value::Undefined => ",".to_string(),
                    v => v.to_display(),
                };
                let joined = items
                    .borrow()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                    .collect::<Vec<_>>()
                    .join(&sep);
                Value::from(joined)
            }
            "toString" => Value::from(this.to_display()),
            "includes" => {
                let needle = arg(&args, 0);
                Value::Bool(items.borrow().iter().any(|v| same_value_zero(v, &needle)))
            }
            "indexOf" => {
                let needle = arg(&args, 0);
                let found = items.borrow().iter().position(|v| v.strict_equals(&needle));
                Value::Number(found.map(|i| i as f64).unwrap_or(-1.0))
            }
            "slice" => {
                let items = items.borrow();
                let len = items.len();
                let start = rel_index(&arg(&args, 0), len, 0);
                let end = rel_index(&arg(&args, 1), len, len);
                Value::array(items[start..end.max(start)].to_vec())
            }
            "concat" => {
                let mut out = items.borrow().clone();
                for a in args {
                    match a {
                        Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                        Value::Floats(buf) => out.extend(buf.to_vec().into_iter().map(Value::from)),
                        other => out.push(other),
                    }
                }
                Value::array(out)
            }
            "reverse" => {
                items.borrow_mut().reverse();
                this
            }
            "fill" => {
                let v = arg(&args, 0);
                for slot in items.borrow_mut().iter_mut() {
                    *slot = v.clone();
                }
                this
            }
            "map" | "forEach" | "filter" | "find" | "findIndex" | "some" | "every" => {
                let snapshot = items.borrow().clone();
                let mut mapped = Vec::new();
                for (i, item) in snapshot.into_iter().enumerate() {
                    let r = self.invoke(&callback, vec![item.clone(), Value::from(i), this.clone()])?;
                    match name {
                        "map" => mapped.push(r),
                        "filter" if r.truthy() => mapped.push(item),
                        "find" if r.truthy() => return Ok(Some(item)),
                        "findIndex" if r.truthy() => return Ok(Some(Value::from(i))),
                        "some" if r.truthy() => return Ok(Some(Value::Bool(true))),
                        "every" if !r.truthy() => return Ok(Some(Value::Bool(false))),
                        _ => {}
                    }
                }
                match name {
                    "map" | "filter" => Value::array(mapped),
                    "find" | "forEach" => Value::Undefined,
                    "findIndex" => Value::Number(-1.0),
                    "some" => Value::Bool(false),
                    _ => Value::Bool(true),
                }
            }
            "reduce" => {
                let snapshot = items.borrow().clone();
                let mut iter = snapshot.into_iter().enumerate();
                let mut acc = if args.len() >= 2 {
                    args[1].clone()
                } else {
                    match iter.next() {
                        Some((_, v)) => v,
                        None => {
                            return Err(Interrupt::error(
                                "Reduce of empty array with no initial value",
                            ))
                        }
                    }
                };
                for (i, item) in iter {
                    acc = self.invoke(&callback, vec![acc, item, Value::from(i), this.clone()])?;
                }
                acc
            }
            "sort" => {
                let snapshot = items.borrow().clone();
                let sorted = self.merge_sort(snapshot, &callback)?;
                *items.borrow_mut() = sorted;
                this
            }
            _ => return Ok(None),
        }))
    }

    /// Stable sort; the comparator may fail, so no `sort_by`.
    fn merge_sort(&mut self, mut v: Vec<Value>, cmp: &Value) -> Result<Vec<Value>, Interrupt> {
        if v.len() <= 1 {
            return Ok(v);
        }
        let right = v.split_off(v.len() / 2);
        let left = self.merge_sort(v, cmp)?;
        let right = self.merge_sort(right, cmp)?;
        let mut out = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
            let right_first = if cmp.is_callable() {
                self.invoke(cmp, vec![a.clone(), b.clone()])?.to_number() > 0.0
            } else {
                a.to_display() > b.to_display()
            };
            let next = if right_first { right.next() } else { left.next() };
            out.extend(next);
        }
        out.extend(left);
        out.extend(right);
        Ok(out)
    }

    fn floats_method(
        &mut self,
        buf: &FloatBuf,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Interrupt> {
        match (name, buf) {
            ("push" | "pop" | "shift", FloatBuf::Owned(values)) => {
                let mut values = values.borrow_mut();
                return Ok(Some(match name {
                    "push" => {
                        values.extend(args.iter().map(|a| a.to_number() as f32));
                        Value::from(values.len())
                    }
                    "pop" => values.pop().map(Value::from).unwrap_or_default(),
                    _ => {
                        if values.is_empty() {
                            Value::Undefined
                        } else {
                            Value::from(values.remove(0))
                        }
                    }
                }));
            }
            ("push" | "pop" | "shift", FloatBuf::Tensor(_)) => {
                return Err(Interrupt::error("Cannot resize a tensor's data buffer"));
            }
            ("fill", _) => {
                let v = num_arg(&args, 0) as f32;
                for i in 0..buf.len() {
                    buf.set(i, v);
                }
                return Ok(Some(Value::Floats(buf.clone())));
            }
            _ => {}
        }

        // Everything else works on a numeric copy; buffer-shaped results stay buffers.
        let copy = Rc::new(std::cell::RefCell::new(
            buf.to_vec().into_iter().map(Value::from).collect::<Vec<_>>(),
        ));
        let result = self.array_method(&copy, name, args)?;
        Ok(match (name, result) {
            ("slice" | "map" | "filter", Some(Value::Array(items))) => Some(Value::floats(
                items.borrow().iter().map(|v| v.to_number() as f32).collect(),
            )),
            (_, other) => other,
        })
    }

    pub(super) fn call_builtin(&mut self, b: Builtin, args: Vec<Value>) -> Result<Value, Interrupt> {
        use Builtin::*;
        let x = num_arg(&args, 0);
        Ok(match b {
            MathAbs => Value::Number(x.abs()),
            MathFloor => Value::Number(x.floor()),
            MathCeil => Value::Number(x.ceil()),
            MathRound => Value::Number(js_round(x)),
            MathTrunc => Value::Number(x.trunc()),
            MathSign => Value::Number(if x.is_nan() || x == 0.0 { x } else { x.signum() }),
            MathSqrt => Value::Number(x.sqrt()),
            MathPow => Value::Number(x.powf(num_arg(&args, 1))),
            MathExp => Value::Number(x.exp()),
            MathLog => Value::Number(x.ln()),
            MathLog10 => Value::Number(x.log10()),
            MathSin => Value::Number(x.sin()),
            MathCos => Value::Number(x.cos()),
            MathTan => Value::Number(x.tan()),
            MathTanh => Value::Number(x.tanh()),
            MathAtan2 => Value::Number(x.atan2(num_arg(&args, 1))),
            MathMin | MathMax => {
                let mut acc = if b == MathMin { f64::INFINITY } else { f64::NEG_INFINITY };
                for a in &args {
                    let v = a.to_number();
                    if v.is_nan() {
                        return Ok(Value::Number(f64::NAN));
                    }
                    acc = if b == MathMin { acc.min(v) } else { acc.max(v) };
                }
                Value::Number(acc)
            }
            MathRandom => Value::Number(self.builtin_random()),
            String => match args.first() {
                Some(v) => Value::from(v.to_display()),
                None => Value::from(""),
            },
            Number => match args.first() {
                Some(v) => Value::Number(v.to_number()),
                None => Value::Number(0.0),
            },
            Boolean => Value::Bool(arg(&args, 0).truthy()),
            ParseInt => {
                let radix = match arg(&args, 1) {
                    Value::Undefined => None,
                    v => Some(v.to_number() as u32),
                };
                Value::Number(parse_int(&arg(&args, 0).to_display(), radix))
            }
            ParseFloat => Value::Number(parse_float(&arg(&args, 0).to_display())),
            IsNaN => Value::Bool(x.is_nan()),
            IsFinite => Value::Bool(x.is_finite()),
            JsonStringify => {
                let v = arg(&args, 0);
                if matches!(v, Value::Undefined) || v.is_callable() {
                    return Ok(Value::Undefined);
                }
                let json = v.to_json();
                let indent = match arg(&args, 2) {
                    Value::Number(n) if n >= 1.0 => " ".repeat(n.min(10.0) as usize),
                    Value::Str(s) => s.chars().take(10).collect(),
                    _ => std::string::String::new(),
                };
                if indent.is_empty() {
                    Value::from(json.to_string())
                } else {
                    let mut out = Vec::new();
                    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
                    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
                    serde::Serialize::serialize(&json, &mut ser)
                        .map_err(|e| Interrupt::error(e.to_string()))?;
                    Value::from(std::string::String::from_utf8_lossy(&out).into_owned())
                }
            }
            JsonParse => {
                let text = arg(&args, 0).to_display();
                let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                    Interrupt::error(format!("Unexpected token in JSON at line {}", e.line()))
                })?;
                Value::from_json(&json)
            }
            ObjectKeys | ObjectValues => match arg(&args, 0) {
                Value::Object(o) => {
                    let o = o.borrow();
                    if b == ObjectKeys {
                        Value::array(o.keys().map(|k| Value::Str(k.clone())).collect())
                    } else {
                        Value::array(o.iter().map(|(_, v)| v.clone()).collect())
                    }
                }
                Value::Array(items) => {
                    if b == ObjectKeys {
                        Value::array(
                            (0..items.borrow().len())
                                .map(|i| Value::from(i.to_string()))
                                .collect(),
                        )
                    } else {
                        Value::array(items.borrow().clone())
                    }
                }
                _ => Value::array(Vec::new()),
            },
            ArrayIsArray => Value::Bool(matches!(arg(&args, 0), Value::Array(_))),
            ConsoleLog => {
                let line = args
                    .iter()
                    .map(|v| v.inspect())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.host.log(&line);
                Value::Undefined
            }
            Error => error_object(&match arg(&args, 0) {
                Value::Undefined => std::string::String::new(),
                v => v.to_display(),
            }),
        })
    }
}
