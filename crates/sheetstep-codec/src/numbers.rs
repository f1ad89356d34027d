//! Numeric text fields
//!
//! Taskpanes keep numbers as strings so a user can clear a field while
//! typing. On the wire those fields are optional numbers.

/// Classification of a numeric text field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericInput {
    /// Absent or blank; encodes to absent
    Empty,
    /// Parses to a finite number
    Number(f64),
    /// Non-blank text that is not a finite number
    Invalid,
}

impl NumericInput {
    /// Number carried by the field, if any
    #[inline]
    #[must_use]
    pub fn number(self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(n),
            Self::Empty | Self::Invalid => None,
        }
    }

    /// Whether the field should be flagged to the user
    #[inline]
    #[must_use]
    pub fn is_invalid(self) -> bool {
        matches!(self, Self::Invalid)
    }
}

/// Classify a numeric text field
#[must_use]
pub fn parse_numeric(value: Option<&str>) -> NumericInput {
    let Some(text) = value.map(str::trim) else {
        return NumericInput::Empty;
    };
    if text.is_empty() {
        return NumericInput::Empty;
    }
    match text.parse::<f64>() {
        Ok(n) if n.is_finite() => NumericInput::Number(n),
        _ => NumericInput::Invalid,
    }
}

/// Frontend text to wire number; blank and invalid text both map to `None`
#[inline]
#[must_use]
pub fn string_to_number(value: Option<&String>) -> Option<f64> {
    parse_numeric(value.map(String::as_str)).number()
}

/// Wire number to frontend text, using the shortest round-trip form
#[inline]
#[must_use]
pub fn number_to_string(value: Option<&f64>) -> Option<String> {
    value.map(f64::to_string)
}
