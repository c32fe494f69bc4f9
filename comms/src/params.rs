//! Conversion between the trainer's per-layer `f32` tensors and the wire representation.

use std::{
    borrow::Cow,
    error::Error,
    fmt::{self, Display},
};

/// The tensor type tag for row-major dense `f32` arrays.
pub const TENSOR_TYPE: &str = "ND";

/// An ordered set of opaque tensor buffers, one per layer, tagged with their tensor type.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters<'a> {
    pub tensor_type: Cow<'a, str>,
    pub tensors: Vec<Cow<'a, [u8]>>,
}

impl Parameters<'_> {
    /// The amount of tensors in the set.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// Parameter conversion failures.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecErr {
    UnsupportedTensorType(String),
    LayerCountMismatch { expected: usize, got: usize },
    MalformedTensor { layer: usize, len: usize },
}

impl Display for CodecErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecErr::UnsupportedTensorType(tag) => {
                write!(f, "unsupported tensor type {tag:?}, expected {TENSOR_TYPE:?}")
            }
            CodecErr::LayerCountMismatch { expected, got } => {
                write!(f, "layer count mismatch: got {got} tensors, expected {expected}")
            }
            CodecErr::MalformedTensor { layer, len } => write!(
                f,
                "tensor {layer} has {len} bytes, which is not a whole number of f32 values"
            ),
        }
    }
}

impl Error for CodecErr {}

/// Stateless converter between native tensors and `Parameters`.
///
/// Tensors travel as the little-endian bytes of their `f32` values, so a
/// decode of an encode yields bit-identical values, NaN payloads included.
pub struct ParamCodec;

impl ParamCodec {
    /// Encodes the given per-layer tensors.
    ///
    /// # Arguments
    /// * `tensors` - The layers' values in order.
    ///
    /// # Returns
    /// An owned parameter set tagged with `TENSOR_TYPE`.
    pub fn encode(tensors: &[Vec<f32>]) -> Parameters<'static> {
        let tensors = tensors
            .iter()
            .map(|t| Cow::Owned(t.iter().flat_map(|v| v.to_le_bytes()).collect()))
            .collect();

        Parameters {
            tensor_type: Cow::Borrowed(TENSOR_TYPE),
            tensors,
        }
    }

    /// Decodes a parameter set into per-layer tensors.
    ///
    /// # Arguments
    /// * `params` - The received parameter set.
    ///
    /// # Returns
    /// The layers' values in order, or a `CodecErr` if the tensor type is not
    /// `TENSOR_TYPE` or some buffer is not a whole number of `f32`s.
    pub fn decode(params: &Parameters<'_>) -> Result<Vec<Vec<f32>>, CodecErr> {
        if params.tensor_type != TENSOR_TYPE {
            return Err(CodecErr::UnsupportedTensorType(
                params.tensor_type.to_string(),
            ));
        }

        params
            .tensors
            .iter()
            .enumerate()
            .map(|(layer, bytes)| {
                if bytes.len() % size_of::<f32>() != 0 {
                    return Err(CodecErr::MalformedTensor {
                        layer,
                        len: bytes.len(),
                    });
                }

                Ok(f32s_from_le(bytes))
            })
            .collect()
    }

    /// Same as `decode` but first checks that there's exactly one tensor per layer.
    ///
    /// # Arguments
    /// * `params` - The received parameter set.
    /// * `layer_count` - The amount of layers of the model.
    pub fn decode_layers(
        params: &Parameters<'_>,
        layer_count: usize,
    ) -> Result<Vec<Vec<f32>>, CodecErr> {
        if params.len() != layer_count {
            return Err(CodecErr::LayerCountMismatch {
                expected: layer_count,
                got: params.len(),
            });
        }

        Self::decode(params)
    }
}

/// Reads little-endian `f32`s out of `bytes`, whose length must be a multiple of four.
pub fn f32s_from_le(bytes: &[u8]) -> Vec<f32> {
    // The source buffer carries no alignment guarantee, so collect by copy.
    bytemuck::pod_collect_to_vec::<u8, u32>(bytes)
        .into_iter()
        .map(|bits| f32::from_bits(u32::from_le(bits)))
        .collect()
}
