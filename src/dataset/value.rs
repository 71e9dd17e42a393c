//! 셀 값 타입과 컬럼 타입 추론

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// 데이터셋 셀 값 (숫자, 문자열, null)
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// 숫자 값이면 f64로 반환
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 문자열이면 숫자로 변환 시도 (실패 시 Null)
    pub fn coerce_numeric(&self) -> Value {
        match self {
            Value::Int(_) | Value::Float(_) => self.clone(),
            Value::Text(s) => {
                let trimmed = s.trim().replace(',', "");
                if let Ok(v) = trimmed.parse::<i64>() {
                    Value::Int(v)
                } else if let Ok(v) = trimmed.parse::<f64>() {
                    if v.is_finite() {
                        Value::Float(v)
                    } else {
                        Value::Null
                    }
                } else {
                    Value::Null
                }
            }
            Value::Null => Value::Null,
        }
    }

    /// 조인/그룹 키 표현
    ///
    /// 정수와 정수값 실수는 같은 키가 됩니다. Null은 키가 없습니다.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(format!("n:{}", v)),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => {
                Some(format!("n:{}", *v as i64))
            }
            Value::Float(v) => Some(format!("n:{}", v)),
            Value::Text(s) => Some(format!("s:{}", s)),
        }
    }

    /// 전순서 비교 (Null < 숫자 < 문자열)
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Int(_) | Value::Float(_) => 1,
                Value::Text(_) => 2,
            }
        }

        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a, b) if rank(a) == 1 && rank(b) == 1 => {
                let x = a.as_f64().unwrap_or(f64::NAN);
                let y = b.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl PartialEq for Value {
    /// 숫자는 타입과 무관하게 값으로 비교합니다.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Text(b.to_string()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

// ============================================================================
// Column Type
// ============================================================================

/// 컬럼 타입 (등록 시점에 추론)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    /// 모든 값이 null
    Empty,
    /// 숫자와 문자열 혼재
    Mixed,
}

impl ColumnType {
    /// null이 아닌 값들로 타입 추론
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let (mut ints, mut floats, mut texts) = (0usize, 0usize, 0usize);

        for value in values {
            match value {
                Value::Null => {}
                Value::Int(_) => ints += 1,
                Value::Float(_) => floats += 1,
                Value::Text(_) => texts += 1,
            }
        }

        match (ints + floats > 0, texts > 0) {
            (false, false) => ColumnType::Empty,
            (true, true) => ColumnType::Mixed,
            (false, true) => ColumnType::Text,
            (true, false) if floats > 0 => ColumnType::Float,
            (true, false) => ColumnType::Integer,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Empty => "empty",
            ColumnType::Mixed => "mixed",
        };
        write!(f, "{}", name)
    }
}
