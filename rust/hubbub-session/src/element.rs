//! Element type tags and item coercion for sink channels.
//!
//! JSON carries one number type, so a decoded stream item arrives as a
//! dynamically typed value while the hub method's sink is statically typed.
//! Each sink argument records its element type as a tag from the closed set
//! below, and the ingest path dispatches on that tag to coerce every item
//! before delivery.

use serde::de::DeserializeOwned;
use serde_json::{Number, Value};

use crate::StreamInError;

/// Element type of a sink channel, recorded at method registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
    F32,
    F64,
    Str,
    /// A sequence whose elements are coerced elementwise.
    Seq(Box<ElementType>),
    /// An arbitrary JSON value, delivered without numeric coercion.
    Json,
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementType::I8 => write!(f, "i8"),
            ElementType::I16 => write!(f, "i16"),
            ElementType::I32 => write!(f, "i32"),
            ElementType::I64 => write!(f, "i64"),
            ElementType::Isize => write!(f, "isize"),
            ElementType::U8 => write!(f, "u8"),
            ElementType::U16 => write!(f, "u16"),
            ElementType::U32 => write!(f, "u32"),
            ElementType::U64 => write!(f, "u64"),
            ElementType::Usize => write!(f, "usize"),
            ElementType::F32 => write!(f, "f32"),
            ElementType::F64 => write!(f, "f64"),
            ElementType::Str => write!(f, "string"),
            ElementType::Seq(inner) => write!(f, "[{inner}]"),
            ElementType::Json => write!(f, "json"),
        }
    }
}

impl ElementType {
    /// Coerce a decoded stream item into this element type.
    ///
    /// Numbers go through the narrowing cast table, arrays are coerced
    /// elementwise into sequence types, and anything else is delivered as-is
    /// (the typed receiver surfaces a decode error to the hub if the value
    /// does not fit).
    pub fn coerce(&self, item: Value) -> Result<Value, StreamInError> {
        if let Some(n) = item.as_f64() {
            return self.coerce_number(n);
        }
        if let Value::Array(items) = item {
            let ElementType::Seq(inner) = self else {
                return Err(StreamInError::KindMismatch(self.to_string()));
            };
            let mut out = Vec::with_capacity(items.len());
            for element in items {
                if let Some(n) = element.as_f64() {
                    out.push(inner.coerce_number(n)?);
                } else {
                    // Non-numeric sequence elements become the zero value of
                    // the element type rather than failing the item.
                    out.push(inner.zero_value());
                }
            }
            return Ok(Value::Array(out));
        }
        Ok(item)
    }

    /// Narrowing numeric cast of a JSON number into this element type.
    fn coerce_number(&self, n: f64) -> Result<Value, StreamInError> {
        let conversion = || StreamInError::Conversion {
            number: n,
            target: self.to_string(),
        };
        match self {
            ElementType::I8 => Ok(Value::from(n as i8)),
            ElementType::I16 => Ok(Value::from(n as i16)),
            ElementType::I32 => Ok(Value::from(n as i32)),
            ElementType::I64 => Ok(Value::from(n as i64)),
            ElementType::Isize => Ok(Value::from(n as isize as i64)),
            ElementType::U8 => Ok(Value::from(n as u8)),
            ElementType::U16 => Ok(Value::from(n as u16)),
            ElementType::U32 => Ok(Value::from(n as u32)),
            ElementType::U64 => Ok(Value::from(n as u64)),
            ElementType::Usize => Ok(Value::from(n as usize as u64)),
            ElementType::F32 => Number::from_f64((n as f32) as f64)
                .map(Value::Number)
                .ok_or_else(conversion),
            ElementType::F64 => Number::from_f64(n).map(Value::Number).ok_or_else(conversion),
            ElementType::Str => Ok(Value::from(format!("{n}"))),
            ElementType::Seq(_) | ElementType::Json => Err(conversion()),
        }
    }

    /// The zero value substituted for non-numeric sequence elements.
    pub fn zero_value(&self) -> Value {
        match self {
            ElementType::I8
            | ElementType::I16
            | ElementType::I32
            | ElementType::I64
            | ElementType::Isize
            | ElementType::U8
            | ElementType::U16
            | ElementType::U32
            | ElementType::U64
            | ElementType::Usize => Value::from(0),
            ElementType::F32 | ElementType::F64 => Value::from(0.0),
            ElementType::Str => Value::from(""),
            ElementType::Seq(_) => Value::Array(Vec::new()),
            ElementType::Json => Value::Null,
        }
    }
}

/// Types usable as the element of a typed sink channel.
///
/// The associated tag drives item coercion on the ingest path; `recv` on the
/// typed receiver then decodes the already-coerced value.
pub trait SinkItem: DeserializeOwned + Send + 'static {
    fn element_type() -> ElementType;
}

macro_rules! impl_sink_item {
    ($($ty:ty => $tag:ident,)*) => {
        $(
            impl SinkItem for $ty {
                fn element_type() -> ElementType {
                    ElementType::$tag
                }
            }
        )*
    };
}

impl_sink_item! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    isize => Isize,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    usize => Usize,
    f32 => F32,
    f64 => F64,
    String => Str,
}

impl<T: SinkItem> SinkItem for Vec<T> {
    fn element_type() -> ElementType {
        ElementType::Seq(Box::new(T::element_type()))
    }
}

impl SinkItem for Value {
    fn element_type() -> ElementType {
        ElementType::Json
    }
}
