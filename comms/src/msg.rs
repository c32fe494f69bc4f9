use std::{borrow::Cow, io};

use serde::{Serialize as SerdeSerialize, de::DeserializeOwned};

use crate::{Deserialize, Parameters, Serialize, specs::config::Config};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

type MetaLen = u32;
const META_LEN_SIZE: usize = size_of::<MetaLen>();

/// The kind tags written in every frame header.
pub mod kind {
    pub const GET_PARAMETERS: u32 = 1;
    pub const FIT: u32 = 2;
    pub const EVALUATE: u32 = 3;
    pub const RECONNECT: u32 = 4;
    pub const PARAMETERS_RES: u32 = 5;
    pub const FIT_RES: u32 = 6;
    pub const EVALUATE_RES: u32 = 7;
}

/// An instruction sent by the training server.
#[derive(Debug)]
pub enum ServerMsg<'a> {
    GetParameters,
    Fit {
        parameters: Parameters<'a>,
        config: Config,
    },
    Evaluate {
        parameters: Parameters<'a>,
        config: Config,
    },
    Reconnect,
    /// A frame whose kind this client does not understand.
    Unknown { kind: u32 },
}

/// A response sent back to the training server, one per handled instruction.
#[derive(Debug)]
pub enum ClientMsg<'a> {
    ParametersRes {
        parameters: Parameters<'a>,
    },
    FitRes {
        parameters: Parameters<'a>,
        num_examples: u64,
    },
    EvaluateRes {
        loss: f32,
        num_examples: u64,
    },
}

impl ServerMsg<'_> {
    /// A short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ServerMsg::GetParameters => "get_parameters",
            ServerMsg::Fit { .. } => "fit",
            ServerMsg::Evaluate { .. } => "evaluate",
            ServerMsg::Reconnect => "reconnect",
            ServerMsg::Unknown { .. } => "unknown",
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct TensorMeta<M> {
    tensor_type: String,
    tensor_lens: Vec<usize>,
    extra: M,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct InsExtra {
    #[serde(default)]
    config: Config,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct NoExtra {}

#[derive(serde::Serialize, serde::Deserialize)]
struct FitResExtra {
    num_examples: u64,
}

type Loss = f32;
const LOSS_SIZE: usize = size_of::<Loss>();

type Count = u64;
const COUNT_SIZE: usize = size_of::<Count>();

fn invalid<T>(text: String) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, text))
}

fn write_header(buf: &mut Vec<u8>, kind: Header) {
    buf.extend_from_slice(&kind.to_be_bytes());
}

/// Writes `[meta_len][meta json][tensor bytes...]`.
///
/// Every tensor but the last is copied into `buf`, the last one is returned
/// to be written right after it.
fn write_tensors<'a, M: SerdeSerialize>(
    buf: &mut Vec<u8>,
    params: &'a Parameters<'a>,
    extra: M,
) -> Option<&'a [u8]> {
    let meta = TensorMeta {
        tensor_type: params.tensor_type.to_string(),
        tensor_lens: params.tensors.iter().map(|t| t.len()).collect(),
        extra,
    };

    let meta_start = buf.len();
    buf.extend_from_slice(&[0; META_LEN_SIZE]);

    // SAFETY: The meta types derive `Serialize` and only hold string-keyed maps.
    serde_json::to_writer(&mut *buf, &meta).unwrap();

    let meta_len = (buf.len() - meta_start - META_LEN_SIZE) as MetaLen;
    buf[meta_start..meta_start + META_LEN_SIZE].copy_from_slice(&meta_len.to_be_bytes());

    let (last, init) = params.tensors.split_last()?;
    for tensor in init {
        buf.extend_from_slice(tensor);
    }

    Some(&**last)
}

/// Reads a tensor section, the tensors borrow from `body`.
fn read_tensors<M: DeserializeOwned>(body: &[u8]) -> io::Result<(Parameters<'_>, M)> {
    let Some((meta_len, rest)) = body.split_first_chunk::<META_LEN_SIZE>() else {
        return invalid(format!("tensor section of {} bytes has no meta length", body.len()));
    };

    let meta_len = MetaLen::from_be_bytes(*meta_len) as usize;
    if rest.len() < meta_len {
        return invalid(format!(
            "tensor meta of {meta_len} bytes does not fit in {} remaining bytes",
            rest.len()
        ));
    }

    let (meta, mut data) = rest.split_at(meta_len);
    let meta: TensorMeta<M> = serde_json::from_slice(meta)?;

    let total = meta
        .tensor_lens
        .iter()
        .try_fold(0usize, |acc, len| acc.checked_add(*len));

    if total != Some(data.len()) {
        return invalid(format!(
            "declared tensor lengths {:?} do not match the {} bytes of tensor data",
            meta.tensor_lens,
            data.len()
        ));
    }

    let mut tensors = Vec::with_capacity(meta.tensor_lens.len());
    for len in meta.tensor_lens {
        let (tensor, tail) = data.split_at(len);
        tensors.push(Cow::Borrowed(tensor));
        data = tail;
    }

    let params = Parameters {
        tensor_type: Cow::Owned(meta.tensor_type),
        tensors,
    };

    Ok((params, meta.extra))
}

fn split_header(buf: &[u8]) -> io::Result<(Header, &[u8])> {
    let Some((kind, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
        return invalid(format!(
            "The given buffer is too small {}, must at least be {HEADER_SIZE} bytes",
            buf.len()
        ));
    };

    Ok((Header::from_be_bytes(*kind), rest))
}

impl<'a> Serialize<'a> for ServerMsg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            ServerMsg::GetParameters => {
                write_header(buf, kind::GET_PARAMETERS);
                None
            }
            ServerMsg::Fit { parameters, config } => {
                write_header(buf, kind::FIT);
                let extra = InsExtra {
                    config: config.clone(),
                };
                write_tensors(buf, parameters, extra)
            }
            ServerMsg::Evaluate { parameters, config } => {
                write_header(buf, kind::EVALUATE);
                let extra = InsExtra {
                    config: config.clone(),
                };
                write_tensors(buf, parameters, extra)
            }
            ServerMsg::Reconnect => {
                write_header(buf, kind::RECONNECT);
                None
            }
            ServerMsg::Unknown { kind } => {
                write_header(buf, *kind);
                None
            }
        }
    }
}

impl<'a> Deserialize<'a> for ServerMsg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let (header, body) = split_header(buf)?;

        let msg = match header {
            kind::GET_PARAMETERS => ServerMsg::GetParameters,
            kind::FIT => {
                let (parameters, InsExtra { config }) = read_tensors(body)?;
                ServerMsg::Fit { parameters, config }
            }
            kind::EVALUATE => {
                let (parameters, InsExtra { config }) = read_tensors(body)?;
                ServerMsg::Evaluate { parameters, config }
            }
            kind::RECONNECT => ServerMsg::Reconnect,
            other => ServerMsg::Unknown { kind: other },
        };

        Ok(msg)
    }
}

impl<'a> Serialize<'a> for ClientMsg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            ClientMsg::ParametersRes { parameters } => {
                write_header(buf, kind::PARAMETERS_RES);
                write_tensors(buf, parameters, NoExtra {})
            }
            ClientMsg::FitRes {
                parameters,
                num_examples,
            } => {
                write_header(buf, kind::FIT_RES);
                let extra = FitResExtra {
                    num_examples: *num_examples,
                };
                write_tensors(buf, parameters, extra)
            }
            ClientMsg::EvaluateRes { loss, num_examples } => {
                // Raw bits, NaN and infinities included.
                write_header(buf, kind::EVALUATE_RES);
                buf.extend_from_slice(&loss.to_le_bytes());
                buf.extend_from_slice(&num_examples.to_be_bytes());
                None
            }
        }
    }
}

impl<'a> Deserialize<'a> for ClientMsg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let (header, body) = split_header(buf)?;

        match header {
            kind::PARAMETERS_RES => {
                let (parameters, NoExtra {}) = read_tensors(body)?;
                Ok(ClientMsg::ParametersRes { parameters })
            }
            kind::FIT_RES => {
                let (parameters, FitResExtra { num_examples }) = read_tensors(body)?;
                Ok(ClientMsg::FitRes {
                    parameters,
                    num_examples,
                })
            }
            kind::EVALUATE_RES => {
                if body.len() != LOSS_SIZE + COUNT_SIZE {
                    return invalid(format!(
                        "evaluate result of {} bytes, must be {} bytes",
                        body.len(),
                        LOSS_SIZE + COUNT_SIZE
                    ));
                }

                let (loss, num_examples) = body.split_at(LOSS_SIZE);

                // SAFETY: Both halves have the sizes checked above.
                Ok(ClientMsg::EvaluateRes {
                    loss: Loss::from_le_bytes(loss.try_into().unwrap()),
                    num_examples: Count::from_be_bytes(num_examples.try_into().unwrap()),
                })
            }
            other => invalid(format!("Received an invalid kind {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParamCodec, specs::config::Scalar};

    fn body<'a, T: Serialize<'a>>(msg: &'a T) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf);
        buf.extend_from_slice(tail.unwrap_or_default());
        buf
    }

    #[test]
    fn fit_keeps_tensors_and_config() {
        let parameters = ParamCodec::encode(&[vec![1.0, 2.0], vec![3.0]]);
        let config = Config::from([("local_epochs".to_string(), Scalar::Int(3))]);
        let msg = ServerMsg::Fit { parameters, config };

        let buf = body(&msg);
        let ServerMsg::Fit { parameters, config } = ServerMsg::deserialize(&buf).unwrap() else {
            panic!("expected fit");
        };

        assert_eq!(config["local_epochs"], Scalar::Int(3));
        assert_eq!(parameters.tensors[0].len(), 8);
        assert_eq!(parameters.tensors[1].len(), 4);
        assert_eq!(
            ParamCodec::decode(&parameters).unwrap(),
            vec![vec![1.0, 2.0], vec![3.0]]
        );
    }

    #[test]
    fn unrecognized_kind_is_unknown() {
        let buf = 42u32.to_be_bytes();
        let msg = ServerMsg::deserialize(&buf).unwrap();
        assert!(matches!(msg, ServerMsg::Unknown { kind: 42 }));
    }

    #[test]
    fn truncated_tensor_data_is_rejected() {
        let parameters = ParamCodec::encode(&[vec![1.0, 2.0]]);
        let msg = ClientMsg::ParametersRes { parameters };

        let mut buf = body(&msg);
        buf.pop();

        let err = ClientMsg::deserialize(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn short_header_is_rejected() {
        let err = ServerMsg::deserialize(&[0, 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn tensor_section_leaves_last_tensor_uncopied() {
        let parameters = ParamCodec::encode(&[vec![1.0], vec![2.0, 3.0]]);
        let msg = ClientMsg::ParametersRes { parameters };

        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf);

        let ClientMsg::ParametersRes { parameters } = &msg else {
            unreachable!();
        };
        assert_eq!(tail, Some(&parameters.tensors[1][..]));
        assert!(buf.ends_with(&parameters.tensors[0]));
    }

    #[test]
    fn non_finite_loss_survives() {
        for loss in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let msg = ClientMsg::EvaluateRes {
                loss,
                num_examples: 20,
            };

            let buf = body(&msg);
            assert_eq!(buf.len(), HEADER_SIZE + LOSS_SIZE + COUNT_SIZE);

            let ClientMsg::EvaluateRes {
                loss: decoded,
                num_examples,
            } = ClientMsg::deserialize(&buf).unwrap()
            else {
                panic!("expected evaluate res");
            };

            assert_eq!(decoded.to_bits(), loss.to_bits());
            assert_eq!(num_examples, 20);
        }
    }

    #[test]
    fn short_evaluate_res_is_rejected() {
        let mut buf = kind::EVALUATE_RES.to_be_bytes().to_vec();
        buf.extend_from_slice(&0.5f32.to_le_bytes());

        let err = ClientMsg::deserialize(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn evaluate_res_body() {
        let msg = ClientMsg::EvaluateRes {
            loss: 0.25,
            num_examples: 20,
        };

        let buf = body(&msg);
        let ClientMsg::EvaluateRes { loss, num_examples } = ClientMsg::deserialize(&buf).unwrap()
        else {
            panic!("expected evaluate res");
        };

        assert_eq!(loss, 0.25);
        assert_eq!(num_examples, 20);
    }
}
