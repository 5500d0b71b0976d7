//! Runtime value type for page fragments.
//!
//! Values are integers, reals or strings.  Arithmetic coerces strings that
//! look numeric; `+` concatenates as soon as either side is a string, the
//! way page authors expect `"Temp: " + t` to behave.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Str(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            // Whole reals print without a fraction, as script output would.
            Value::Float(x) if x.fract() == 0.0 && x.abs() < 1e15 => write!(f, "{}", *x as i64),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl Value {
    /// `0`, `0.0` and `""` are false; everything else is true.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    /// Coerce to `i64` (0 for non-numeric strings).
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            Value::Float(x) => *x as i64,
            Value::Str(s) => s.trim().parse().unwrap_or(0),
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            Value::Int(n) => *n as f64,
            Value::Float(x) => *x,
            Value::Str(s) => s.trim().parse().unwrap_or(0.0),
        }
    }

    // ── Arithmetic ────────────────────────────────────────────────────────────

    fn is_float_operand(&self) -> bool {
        match self {
            Value::Float(_) => true,
            Value::Str(s) => s.contains('.'),
            Value::Int(_) => false,
        }
    }

    fn numeric(
        a: &Value,
        b: &Value,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Value {
        if a.is_float_operand() || b.is_float_operand() {
            Value::Float(float_op(a.as_float(), b.as_float()))
        } else {
            match int_op(a.as_int(), b.as_int()) {
                Some(n) => Value::Int(n),
                None => Value::Float(float_op(a.as_float(), b.as_float())),
            }
        }
    }

    pub fn add(&self, rhs: &Value) -> Value {
        if matches!(self, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
            return Value::Str(format!("{self}{rhs}"));
        }
        Self::numeric(self, rhs, i64::checked_add, |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Value) -> Value {
        Self::numeric(self, rhs, i64::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Value) -> Value {
        Self::numeric(self, rhs, i64::checked_mul, |a, b| a * b)
    }

    pub fn div(&self, rhs: &Value) -> Result<Value, String> {
        if rhs.as_float() == 0.0 {
            return Err("division by zero".into());
        }
        Ok(Self::numeric(self, rhs, i64::checked_div, |a, b| a / b))
    }

    pub fn rem(&self, rhs: &Value) -> Result<Value, String> {
        if rhs.as_float() == 0.0 {
            return Err("modulo by zero".into());
        }
        Ok(Self::numeric(self, rhs, i64::checked_rem, |a, b| a % b))
    }

    pub fn neg(&self) -> Value {
        match self {
            Value::Int(n) => Self::neg_int(*n),
            Value::Float(x) => Value::Float(-x),
            Value::Str(s) if s.contains('.') => Value::Float(-self.as_float()),
            Value::Str(_) => Self::neg_int(self.as_int()),
        }
    }

    fn neg_int(n: i64) -> Value {
        n.checked_neg().map_or(Value::Float(-(n as f64)), Value::Int)
    }

    /// Numeric comparison when both sides are numbers (or numeric strings),
    /// string comparison otherwise.
    pub fn compare(&self, rhs: &Value) -> Ordering {
        match (self, rhs) {
            (Value::Str(a), Value::Str(b)) => {
                match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                    (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                    _ => a.cmp(b),
                }
            }
            _ => self
                .as_float()
                .partial_cmp(&rhs.as_float())
                .unwrap_or(Ordering::Equal),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(i64::from(b))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
