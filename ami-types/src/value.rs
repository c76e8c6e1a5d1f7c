//! Primitive values that flow through the graph.
//!
//! Mirrors `ami/data.py`'s `DataTypes`, but carries the payload alongside
//! the declared type instead of leaving it implicit in a numpy `ndarray`.

use serde::{Deserialize, Serialize};

/// The declared element type of a variable, discoverable at compile time.
///
/// `Object` covers opaque typed payloads (detector-specific blobs) that the
/// graph passes through without interpreting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// A single scalar number.
    Scalar,
    /// A one-dimensional array (a waveform).
    Waveform,
    /// A two-dimensional array (an image).
    Image,
    /// An opaque typed object, passed through without interpretation.
    Object,
}

impl ElementType {
    /// Classifies a [`Value`] by the shape of its payload.
    ///
    /// ```
    /// use ami_types::{ElementType, Value};
    /// assert_eq!(ElementType::of(&Value::Scalar(1.0)), ElementType::Scalar);
    /// assert_eq!(ElementType::of(&Value::Waveform(vec![1.0, 2.0])), ElementType::Waveform);
    /// ```
    pub fn of(value: &Value) -> ElementType {
        match value {
            Value::Scalar(_) => ElementType::Scalar,
            Value::Waveform(_) => ElementType::Waveform,
            Value::Image(_) => ElementType::Image,
            Value::Object(_) => ElementType::Object,
        }
    }
}

/// A runtime value carried by a variable.
///
/// `Object` is an opaque byte blob: AMI's compiler never looks inside it,
/// it only checks that the declared [`ElementType`] matches between a
/// producer and its consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A scalar number.
    Scalar(f64),
    /// A one-dimensional array.
    Waveform(Vec<f64>),
    /// A two-dimensional array, stored row-major.
    Image(Vec<Vec<f64>>),
    /// An opaque typed object.
    Object(Vec<u8>),
}

impl Value {
    /// Returns the element type of this value.
    pub fn element_type(&self) -> ElementType {
        ElementType::of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_type_matches_shape() {
        assert_eq!(ElementType::of(&Value::Image(vec![vec![1.0]])), ElementType::Image);
        assert_eq!(ElementType::of(&Value::Object(vec![1, 2, 3])), ElementType::Object);
    }
}
