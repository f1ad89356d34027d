//! sheetstep-codec - Param Codec
//!
//! Pure, stateless mappings between the parameter shape a taskpane edits
//! (the *frontend* shape) and the shape the kernel executes (the *wire*
//! shape):
//! - [`ParamCodec`] is the contract every step family implements
//! - [`IdentityCodec`] covers families whose two shapes are identical
//! - [`GraphCodec`] covers graph params, whose numeric fields are edited as text
//!
//! Conversion is per field. Fields a codec does not model are carried through
//! untouched in both directions.
//!
//! # Example
//!
//! ```rust,ignore
//! use sheetstep_codec::{GraphCodec, GraphParamsFrontend, GraphType, ParamCodec};
//!
//! let mut params = GraphParamsFrontend::new_default("graph-1", 0, GraphType::Histogram);
//! params.graph_creation.nbins = Some("20".to_string());
//!
//! let wire = GraphCodec.to_wire(&params);
//! assert_eq!(wire.graph_creation.nbins, Some(20.0));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod graph;
pub mod numbers;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

pub use graph::{
    AxisStyle, GraphCodec, GraphCreation, GraphId, GraphParams, GraphParamsBackend,
    GraphParamsFrontend, GraphPreprocessing, GraphStyling, GraphType, LegendStyle, LegendTitle,
    RangeSlider, TitleStyle,
};
pub use numbers::{number_to_string, parse_numeric, string_to_number, NumericInput};

/// Pass-through storage for fields a codec does not model
pub type ExtraFields = serde_json::Map<String, serde_json::Value>;

/// Errors converting params to or from kernel JSON
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Wire params could not be (de)serialized
    #[error("param json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bidirectional mapping between frontend and wire params
///
/// Both directions are pure and total. A frontend value the kernel cannot
/// accept (for example a numeric field holding `"abc"`) is encoded by leaving
/// that field out; reporting it is the caller's concern.
pub trait ParamCodec: Send + Sync + 'static {
    /// Shape held by the UI
    type Frontend: Clone + Send + Sync + 'static;
    /// Shape sent to the kernel
    type Wire: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Encode frontend params for the kernel
    fn to_wire(&self, frontend: &Self::Frontend) -> Self::Wire;

    /// Decode kernel params for the UI
    fn to_frontend(&self, wire: &Self::Wire) -> Self::Frontend;

    /// Encode straight to a JSON value
    fn to_wire_json(&self, frontend: &Self::Frontend) -> Result<serde_json::Value, CodecError> {
        Ok(serde_json::to_value(self.to_wire(frontend))?)
    }

    /// Decode from a JSON value received from the kernel
    fn from_wire_json(&self, wire: &serde_json::Value) -> Result<Self::Frontend, CodecError> {
        let wire: Self::Wire = serde_json::from_value(wire.clone())?;
        Ok(self.to_frontend(&wire))
    }
}

/// Codec for step families whose frontend and wire params are the same type
pub struct IdentityCodec<T>(PhantomData<fn() -> T>);

impl<T> IdentityCodec<T> {
    /// Create identity codec
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for IdentityCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for IdentityCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for IdentityCodec<T> {}

impl<T> fmt::Debug for IdentityCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityCodec")
    }
}

impl<T> ParamCodec for IdentityCodec<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Frontend = T;
    type Wire = T;

    fn to_wire(&self, frontend: &T) -> T {
        frontend.clone()
    }

    fn to_frontend(&self, wire: &T) -> T {
        wire.clone()
    }
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SplitParams {
        sheet_index: usize,
        column_id: String,
        delimiters: Vec<String>,
    }

    #[test]
    fn identity_codec_is_lossless() {
        let codec = IdentityCodec::<SplitParams>::new();
        let params = SplitParams {
            sheet_index: 1,
            column_id: "A".to_string(),
            delimiters: vec![",".to_string()],
        };

        let json = codec.to_wire_json(&params).unwrap();
        assert_eq!(json["column_id"], "A");
        assert_eq!(codec.from_wire_json(&json).unwrap(), params);
    }

    #[test]
    fn from_wire_json_rejects_wrong_shape() {
        let codec = IdentityCodec::<SplitParams>::new();
        let err = codec
            .from_wire_json(&serde_json::json!({"sheet_index": "zero"}))
            .unwrap_err();
        assert!(err.to_string().contains("param json error"));
    }
}
