/// A dynamically typed value as the host hands it to, and receives it from,
/// the call engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Integer(i64),
    Number(f64),
    /// A byte string. Pointer arguments pass the address of the first byte;
    /// the bytes are not copied.
    Bytes(Vec<u8>),
    /// A raw address owned by the caller.
    Address(usize),
}

impl Value {
    /// A NUL-terminated byte string, the shape C callees expect.
    pub fn string(s: &str) -> Self {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        Value::Bytes(bytes)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Integer(_) => "integer",
            Value::Number(_) => "number",
            Value::Bytes(_) => "string",
            Value::Address(_) => "address",
        }
    }

    /// Integer view, accepting floats that hold an exact integer.
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Value::Integer(n) => Some(n),
            Value::Number(n) => float_to_integer(n),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Value::Integer(n) => Some(n as f64),
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// The bytes up to the first NUL, if this is valid UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(bytes) => std::str::from_utf8(until_nul(bytes)).ok(),
            _ => None,
        }
    }
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

fn float_to_integer(n: f64) -> Option<i64> {
    // 2^63 is the first float outside i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if n.fract() == 0.0 && n >= -LIMIT && n < LIMIT {
        Some(n as i64)
    } else {
        None
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Bytes(bytes) => {
                write!(f, "{}", String::from_utf8_lossy(until_nul(bytes)))
            }
            Value::Address(addr) => write!(f, "{addr:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_is_nul_terminated() {
        assert_eq!(Value::string("ab"), Value::Bytes(vec![b'a', b'b', 0]));
        assert_eq!(Value::string("ab").as_str(), Some("ab"));
    }

    #[test]
    fn integral_floats_convert() {
        assert_eq!(Value::Number(42.0).as_integer(), Some(42));
        assert_eq!(Value::Number(-3.0).as_integer(), Some(-3));
        assert_eq!(Value::Number(1.5).as_integer(), None);
        assert_eq!(Value::Number(f64::NAN).as_integer(), None);
        assert_eq!(Value::Number(1e19).as_integer(), None);
        assert_eq!(Value::string("1").as_integer(), None);
    }

    #[test]
    fn numbers_accept_integers() {
        assert_eq!(Value::Integer(7).as_number(), Some(7.0));
        assert_eq!(Value::Nil.as_number(), None);
    }

    #[test]
    fn display() {
        assert_eq!(Value::string("hi").to_string(), "hi");
        assert_eq!(Value::Integer(-4).to_string(), "-4");
        assert_eq!(Value::Address(255).to_string(), "0xff");
    }
}
