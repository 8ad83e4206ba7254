//! Runtime values of the script language.
//!
//! Scalars and strings are immutable; arrays, objects and the numeric
//! component handles are shared references, so aliasing follows JavaScript.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::ast::FunctionDef;
use super::host::HostFn;
use super::interp::Scope;
use crate::hive::Network;
use crate::layer::DenseLayer;
use crate::tensor::Tensor;

#[derive(Debug, Clone, Default)]
pub struct Object {
    props: Vec<(Rc<str>, Value)>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.props.iter().find(|(k, _)| &**k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: impl Into<Rc<str>>, value: Value) {
        let key = key.into();
        match self.props.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.props.push((key, value)),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.props.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.props.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

/// Fixed-length `f32` buffer: either owned or a live view of a tensor.
#[derive(Debug, Clone)]
pub enum FloatBuf {
    Owned(Rc<RefCell<Vec<f32>>>),
    Tensor(Rc<RefCell<Tensor>>),
}

impl FloatBuf {
    pub fn from_vec(values: Vec<f32>) -> Self {
        FloatBuf::Owned(Rc::new(RefCell::new(values)))
    }

    pub fn len(&self) -> usize {
        match self {
            FloatBuf::Owned(v) => v.borrow().len(),
            FloatBuf::Tensor(t) => t.borrow().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<f32> {
        match self {
            FloatBuf::Owned(v) => v.borrow().get(i).copied(),
            FloatBuf::Tensor(t) => t.borrow().data().get(i).copied(),
        }
    }

    /// Out-of-range writes are ignored, like a typed array.
    pub fn set(&self, i: usize, value: f32) {
        match self {
            FloatBuf::Owned(v) => {
                if let Some(slot) = v.borrow_mut().get_mut(i) {
                    *slot = value;
                }
            }
            FloatBuf::Tensor(t) => {
                if let Some(slot) = t.borrow_mut().data_mut().get_mut(i) {
                    *slot = value;
                }
            }
        }
    }

    pub fn to_vec(&self) -> Vec<f32> {
        match self {
            FloatBuf::Owned(v) => v.borrow().clone(),
            FloatBuf::Tensor(t) => t.borrow().data().to_vec(),
        }
    }

    fn ptr_eq(&self, other: &FloatBuf) -> bool {
        match (self, other) {
            (FloatBuf::Owned(a), FloatBuf::Owned(b)) => Rc::ptr_eq(a, b),
            (FloatBuf::Tensor(a), FloatBuf::Tensor(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Rc<Scope>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({:?})", self.def.name)
    }
}

/// Language built-ins that are not part of the `GB` surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    MathTrunc,
    MathSign,
    MathSqrt,
    MathPow,
    MathExp,
    MathLog,
    MathLog10,
    MathSin,
    MathCos,
    MathTan,
    MathTanh,
    MathAtan2,
    MathMin,
    MathMax,
    MathRandom,
    String,
    Number,
    Boolean,
    ParseInt,
    ParseFloat,
    IsNaN,
    IsFinite,
    JsonStringify,
    JsonParse,
    ObjectKeys,
    ObjectValues,
    ArrayIsArray,
    ConsoleLog,
    Error,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Object>>),
    Floats(FloatBuf),
    Tensor(Rc<RefCell<Tensor>>),
    Layer(Rc<RefCell<DenseLayer>>),
    Network(Rc<RefCell<Network>>),
    Function(Rc<Closure>),
    Host(HostFn),
    Builtin(Builtin),
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(o)))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Tensor(Rc::new(RefCell::new(t)))
    }
}

impl From<DenseLayer> for Value {
    fn from(l: DenseLayer) -> Self {
        Value::Layer(Rc::new(RefCell::new(l)))
    }
}

impl From<Network> for Value {
    fn from(n: Network) -> Self {
        Value::Network(Rc::new(RefCell::new(n)))
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if (1e21..).contains(&abs) || abs < 1e-6 {
        let s = format!("{n:e}");
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        };
    }
    if n.fract() == 0.0 {
        return format!("{n:.0}");
    }
    format!("{n}")
}

/// JavaScript `Number(string)`.
pub fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    let numeric = t
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !numeric {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        items.into()
    }

    pub fn floats(values: Vec<f32>) -> Value {
        Value::Floats(FloatBuf::from_vec(values))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Host(_) | Value::Builtin(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => parse_number(s),
            Value::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            Value::Floats(buf) => match buf.len() {
                0 => 0.0,
                1 => buf.get(0).map(|v| v as f64).unwrap_or(f64::NAN),
                _ => f64::NAN,
            },
            _ => f64::NAN,
        }
    }

    /// Number as a non-negative integer index, if it is one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < 9.0e15 => Some(*n as usize),
            Value::Str(s) => s.parse::<usize>().ok(),
            _ => None,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Host(_) | Value::Builtin(_) => "function",
            _ => "object",
        }
    }

    /// JavaScript `String(value)`.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| {
                    if v.is_nullish() {
                        String::new()
                    } else {
                        v.to_display()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Floats(buf) => buf
                .to_vec()
                .iter()
                .map(|v| format_number(*v as f64))
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Tensor(_) => "[object Tensor]".to_string(),
            Value::Layer(_) => "[object DenseLayer]".to_string(),
            Value::Network(_) => "[object HiveMind]".to_string(),
            Value::Function(c) => match &c.def.name {
                Some(name) => format!("function {name}() {{ ... }}"),
                None => "function () { ... }".to_string(),
            },
            Value::Host(f) => format!("function {}() {{ [native code] }}", f.name()),
            Value::Builtin(_) => "function () { [native code] }".to_string(),
        }
    }

    /// `console.log` rendering: strings raw, everything else JSON-like.
    pub fn inspect(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Array(_) | Value::Object(_) | Value::Floats(_) | Value::Tensor(_) => {
                self.to_json().to_string()
            }
            Value::Network(n) => format!("HiveMind({})", n.borrow().name()),
            Value::Layer(l) => {
                let l = l.borrow();
                format!("DenseLayer({} -> {})", l.in_size(), l.out_size())
            }
            other => other.to_display(),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Floats(a), Value::Floats(b)) => a.ptr_eq(b),
            (Value::Tensor(a), Value::Tensor(b)) => Rc::ptr_eq(a, b),
            (Value::Layer(a), Value::Layer(b)) => Rc::ptr_eq(a, b),
            (Value::Network(a), Value::Network(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            (Value::Array(_) | Value::Object(_), Value::Str(_) | Value::Number(_)) => {
                Value::from(self.to_display()).loose_equals(other)
            }
            (Value::Str(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
                self.loose_equals(&Value::from(other.to_display()))
            }
            _ => self.strict_equals(other),
        }
    }

    /// Property of a plain object, `Undefined` otherwise.
    pub fn field(&self, key: &str) -> Value {
        match self {
            Value::Object(o) => o.borrow().get(key).cloned().unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Numeric contents of arrays, float buffers and tensors.
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        match self {
            Value::Array(items) => Some(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_number() as f32)
                    .collect(),
            ),
            Value::Floats(buf) => Some(buf.to_vec()),
            Value::Tensor(t) => Some(t.borrow().data().to_vec()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Undefined | Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => J::String(s.to_string()),
            Value::Array(items) => J::Array(items.borrow().iter().map(|v| v.to_json_item()).collect()),
            Value::Floats(buf) => J::Array(
                buf.to_vec()
                    .into_iter()
                    .map(|v| number_to_json(v as f64))
                    .collect(),
            ),
            Value::Object(o) => {
                let mut map = serde_json::Map::new();
                for (k, v) in o.borrow().iter() {
                    if matches!(v, Value::Undefined) || v.is_callable() {
                        continue;
                    }
                    map.insert(k.to_string(), v.to_json());
                }
                J::Object(map)
            }
            Value::Tensor(t) => {
                let t = t.borrow();
                serde_json::json!({
                    "shape": t.shape(),
                    "data": t.data().iter().map(|v| number_to_json(*v as f64)).collect::<Vec<_>>(),
                })
            }
            Value::Layer(l) => {
                let l = l.borrow();
                serde_json::json!({ "inSize": l.in_size(), "outSize": l.out_size() })
            }
            Value::Network(n) => {
                let n = n.borrow();
                serde_json::json!({
                    "name": n.name(),
                    "plasticity": number_to_json(n.plasticity as f64),
                    "satisfaction": number_to_json(n.satisfaction as f64),
                    "capacity": number_to_json(n.capacity),
                    "depth": n.depth(),
                })
            }
            Value::Function(_) | Value::Host(_) | Value::Builtin(_) => J::Null,
        }
    }

    /// Array elements: functions and undefined become null.
    fn to_json_item(&self) -> serde_json::Value {
        if self.is_callable() {
            serde_json::Value::Null
        } else {
            self.to_json()
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            J::String(s) => Value::from(s.as_str()),
            J::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            J::Object(map) => {
                let mut o = Object::new();
                for (k, v) in map {
                    o.set(k.as_str(), Value::from_json(v));
                }
                o.into()
            }
        }
    }
}

/// Integral values serialize without a fractional part; non-finite as null.
pub fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_format_like_javascript() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(123456.0), "123456");
    }

    #[test]
    fn string_to_number() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("0x10"), 16.0);
        assert!(parse_number("abc").is_nan());
        assert!(parse_number("inf").is_nan());
    }

    #[test]
    fn truthiness() {
        assert!(!Value::from("").truthy());
        assert!(Value::from("0").truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(!Value::Null.truthy());
        assert!(Value::array(vec![]).truthy());
    }

    #[test]
    fn equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::from("1").loose_equals(&Value::Number(1.0)));
        assert!(!Value::from("1").strict_equals(&Value::Number(1.0)));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        let a = Value::array(vec![]);
        assert!(a.strict_equals(&a.clone()));
        assert!(!a.strict_equals(&Value::array(vec![])));
    }

    #[test]
    fn display_and_json() {
        let arr = Value::array(vec![Value::Number(1.0), Value::Null, Value::from("x")]);
        assert_eq!(arr.to_display(), "1,,x");
        let obj: Value = Object::new()
            .with("b", Value::Number(2.0))
            .with("a", Value::Number(0.5))
            .with("skip", Value::Undefined)
            .into();
        assert_eq!(obj.to_json().to_string(), r#"{"b":2,"a":0.5}"#);
        let back = Value::from_json(&obj.to_json());
        assert_eq!(back.field("a").to_number(), 0.5);
    }
}
