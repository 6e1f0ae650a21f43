//! Messages exchanged between workers and parameter servers.
//!
//! A message payload is an `i32` [`MessageType`] followed by the type's
//! fields. Opaque bodies (pull requests, pulled tensors, pushed deltas, user
//! data) travel as a `u64` length and raw bytes and decode as slices of the
//! receive buffer, so a pull response can in turn be decoded into view
//! tensors without copying.

use std::borrow::Cow;

use shardps_core::codec::{decode_view_exact, DecodeView, Encode, Reader, Writer};
use shardps_core::CoreError;

/// Message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageType {
    /// No message.
    None = 0,
    /// Echo request.
    EchoRequest = 1,
    /// Echo response.
    EchoResponse = 2,
    /// Liveness notification.
    HeartBeatNotify = 3,
    /// Asks the coordinator for the next training file.
    FileRequest = 11,
    /// The next training file.
    FileResponse = 12,
    /// A training file has been consumed.
    FileFinishNotify = 13,
    /// Pull request.
    PullRequest = 14,
    /// Pulled tensors.
    PullResponse = 15,
    /// Pushed deltas.
    PushNotify = 16,
    /// Asks a server to checkpoint.
    ModelSaveRequest = 17,
    /// Checkpoint done.
    ModelSaveResponse = 18,
    /// Shuts a server down.
    TerminationNotify = 19,
    /// Application-defined request.
    UserRequest = 31,
    /// Application-defined response.
    UserResponse = 32,
    /// Application-defined notification.
    UserNotify = 33,
}

impl MessageType {
    /// Maps a wire tag to its type.
    pub fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            0 => MessageType::None,
            1 => MessageType::EchoRequest,
            2 => MessageType::EchoResponse,
            3 => MessageType::HeartBeatNotify,
            11 => MessageType::FileRequest,
            12 => MessageType::FileResponse,
            13 => MessageType::FileFinishNotify,
            14 => MessageType::PullRequest,
            15 => MessageType::PullResponse,
            16 => MessageType::PushNotify,
            17 => MessageType::ModelSaveRequest,
            18 => MessageType::ModelSaveResponse,
            19 => MessageType::TerminationNotify,
            31 => MessageType::UserRequest,
            32 => MessageType::UserResponse,
            33 => MessageType::UserNotify,
            _ => return None,
        })
    }

    /// Returns `true` if the sender waits for a reply.
    pub fn has_response(self) -> bool {
        matches!(
            self,
            MessageType::EchoRequest
                | MessageType::FileRequest
                | MessageType::PullRequest
                | MessageType::ModelSaveRequest
                | MessageType::UserRequest
        )
    }
}

/// A decoded message.
///
/// Byte bodies borrow from the buffer the message was decoded from; use
/// [`into_owned`](Self::into_owned) to keep one past the next read.
#[derive(Debug, Clone, PartialEq)]
pub enum DistMessage<'a> {
    /// Asks the peer to send `buf` back.
    EchoRequest {
        /// Arbitrary bytes.
        buf: Cow<'a, [u8]>,
    },
    /// The bytes of an [`EchoRequest`](Self::EchoRequest).
    EchoResponse {
        /// The echoed bytes.
        buf: Cow<'a, [u8]>,
    },
    /// Liveness notification.
    HeartBeatNotify,
    /// Asks for the next training file.
    FileRequest,
    /// The next training file. An empty name means there are no more.
    FileResponse {
        /// Training epoch of the file.
        epoch: i32,
        /// Path of the file.
        file: String,
    },
    /// A training file has been consumed.
    FileFinishNotify {
        /// Path of the file.
        file: String,
        /// Summed loss over the file.
        loss: f64,
        /// Summed loss weight over the file.
        loss_weight: f64,
    },
    /// An encoded [`PullRequest`](crate::PullRequest).
    PullRequest {
        /// The encoded request.
        buf: Cow<'a, [u8]>,
    },
    /// An encoded [`TensorMap`](crate::TensorMap) of pulled tensors.
    PullResponse {
        /// The encoded tensors.
        buf: Cow<'a, [u8]>,
    },
    /// An encoded [`TensorMap`](crate::TensorMap) of deltas to apply.
    PushNotify {
        /// The encoded deltas.
        buf: Cow<'a, [u8]>,
    },
    /// Asks a server to checkpoint.
    ModelSaveRequest {
        /// Training epoch being saved.
        epoch: i32,
        /// Caller-chosen checkpoint label.
        timestamp: String,
        /// Version of the export format the caller expects.
        feature_kv_protocol_version: i32,
    },
    /// Checkpoint done.
    ModelSaveResponse,
    /// Shuts a server down.
    TerminationNotify,
    /// Application-defined request.
    UserRequest {
        /// Application bytes.
        buf: Cow<'a, [u8]>,
    },
    /// Application-defined response.
    UserResponse {
        /// Application bytes.
        buf: Cow<'a, [u8]>,
    },
    /// Application-defined notification.
    UserNotify {
        /// Application bytes.
        buf: Cow<'a, [u8]>,
    },
}

impl<'a> DistMessage<'a> {
    /// Returns the type tag.
    pub fn message_type(&self) -> MessageType {
        match self {
            DistMessage::EchoRequest { .. } => MessageType::EchoRequest,
            DistMessage::EchoResponse { .. } => MessageType::EchoResponse,
            DistMessage::HeartBeatNotify => MessageType::HeartBeatNotify,
            DistMessage::FileRequest => MessageType::FileRequest,
            DistMessage::FileResponse { .. } => MessageType::FileResponse,
            DistMessage::FileFinishNotify { .. } => MessageType::FileFinishNotify,
            DistMessage::PullRequest { .. } => MessageType::PullRequest,
            DistMessage::PullResponse { .. } => MessageType::PullResponse,
            DistMessage::PushNotify { .. } => MessageType::PushNotify,
            DistMessage::ModelSaveRequest { .. } => MessageType::ModelSaveRequest,
            DistMessage::ModelSaveResponse => MessageType::ModelSaveResponse,
            DistMessage::TerminationNotify => MessageType::TerminationNotify,
            DistMessage::UserRequest { .. } => MessageType::UserRequest,
            DistMessage::UserResponse { .. } => MessageType::UserResponse,
            DistMessage::UserNotify { .. } => MessageType::UserNotify,
        }
    }

    /// Returns `true` if the sender waits for a reply.
    pub fn has_response(&self) -> bool {
        self.message_type().has_response()
    }

    /// Returns the opaque body of the byte-carrying types.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            DistMessage::EchoRequest { buf }
            | DistMessage::EchoResponse { buf }
            | DistMessage::PullRequest { buf }
            | DistMessage::PullResponse { buf }
            | DistMessage::PushNotify { buf }
            | DistMessage::UserRequest { buf }
            | DistMessage::UserResponse { buf }
            | DistMessage::UserNotify { buf } => Some(buf),
            _ => None,
        }
    }

    /// Decodes a complete payload, borrowing byte bodies from it.
    ///
    /// # Errors
    ///
    /// Fails on an unknown type tag, a truncated payload or trailing bytes.
    pub fn decode_payload(payload: &'a [u8]) -> shardps_core::Result<Self> {
        decode_view_exact(payload)
    }

    /// Returns a message that owns its bodies.
    pub fn into_owned(self) -> DistMessage<'static> {
        fn own(buf: Cow<'_, [u8]>) -> Cow<'static, [u8]> {
            Cow::Owned(buf.into_owned())
        }
        match self {
            DistMessage::EchoRequest { buf } => DistMessage::EchoRequest { buf: own(buf) },
            DistMessage::EchoResponse { buf } => DistMessage::EchoResponse { buf: own(buf) },
            DistMessage::HeartBeatNotify => DistMessage::HeartBeatNotify,
            DistMessage::FileRequest => DistMessage::FileRequest,
            DistMessage::FileResponse { epoch, file } => DistMessage::FileResponse { epoch, file },
            DistMessage::FileFinishNotify {
                file,
                loss,
                loss_weight,
            } => DistMessage::FileFinishNotify {
                file,
                loss,
                loss_weight,
            },
            DistMessage::PullRequest { buf } => DistMessage::PullRequest { buf: own(buf) },
            DistMessage::PullResponse { buf } => DistMessage::PullResponse { buf: own(buf) },
            DistMessage::PushNotify { buf } => DistMessage::PushNotify { buf: own(buf) },
            DistMessage::ModelSaveRequest {
                epoch,
                timestamp,
                feature_kv_protocol_version,
            } => DistMessage::ModelSaveRequest {
                epoch,
                timestamp,
                feature_kv_protocol_version,
            },
            DistMessage::ModelSaveResponse => DistMessage::ModelSaveResponse,
            DistMessage::TerminationNotify => DistMessage::TerminationNotify,
            DistMessage::UserRequest { buf } => DistMessage::UserRequest { buf: own(buf) },
            DistMessage::UserResponse { buf } => DistMessage::UserResponse { buf: own(buf) },
            DistMessage::UserNotify { buf } => DistMessage::UserNotify { buf: own(buf) },
        }
    }
}

fn put_buf(w: &mut Writer, buf: &[u8]) {
    w.put_len(buf.len()).put_raw(buf);
}

fn read_buf<'a>(r: &mut Reader<'a>) -> shardps_core::Result<Cow<'a, [u8]>> {
    let len = r.read_len()?;
    Ok(Cow::Borrowed(r.read_raw(len)?))
}

impl Encode for DistMessage<'_> {
    fn encode(&self, w: &mut Writer) {
        w.put_i32(self.message_type() as i32);
        match self {
            DistMessage::FileResponse { epoch, file } => {
                w.put_i32(*epoch).put(file);
            }
            DistMessage::FileFinishNotify {
                file,
                loss,
                loss_weight,
            } => {
                w.put(file).put_f64(*loss).put_f64(*loss_weight);
            }
            DistMessage::ModelSaveRequest {
                epoch,
                timestamp,
                feature_kv_protocol_version,
            } => {
                w.put_i32(*epoch)
                    .put(timestamp)
                    .put_i32(*feature_kv_protocol_version);
            }
            other => {
                if let Some(buf) = other.body() {
                    put_buf(w, buf);
                }
            }
        }
    }
}

impl<'a> DecodeView<'a> for DistMessage<'a> {
    fn decode_view(r: &mut Reader<'a>) -> shardps_core::Result<Self> {
        let tag = r.read_i32()?;
        let kind = MessageType::from_tag(tag).ok_or(CoreError::UnknownTag {
            kind: "message type",
            tag: i64::from(tag),
        })?;
        Ok(match kind {
            MessageType::None => {
                return Err(CoreError::invalid("message type NONE carries no message"))
            }
            MessageType::EchoRequest => DistMessage::EchoRequest { buf: read_buf(r)? },
            MessageType::EchoResponse => DistMessage::EchoResponse { buf: read_buf(r)? },
            MessageType::HeartBeatNotify => DistMessage::HeartBeatNotify,
            MessageType::FileRequest => DistMessage::FileRequest,
            MessageType::FileResponse => DistMessage::FileResponse {
                epoch: r.read_i32()?,
                file: r.get()?,
            },
            MessageType::FileFinishNotify => DistMessage::FileFinishNotify {
                file: r.get()?,
                loss: r.read_f64()?,
                loss_weight: r.read_f64()?,
            },
            MessageType::PullRequest => DistMessage::PullRequest { buf: read_buf(r)? },
            MessageType::PullResponse => DistMessage::PullResponse { buf: read_buf(r)? },
            MessageType::PushNotify => DistMessage::PushNotify { buf: read_buf(r)? },
            MessageType::ModelSaveRequest => DistMessage::ModelSaveRequest {
                epoch: r.read_i32()?,
                timestamp: r.get()?,
                feature_kv_protocol_version: r.read_i32()?,
            },
            MessageType::ModelSaveResponse => DistMessage::ModelSaveResponse,
            MessageType::TerminationNotify => DistMessage::TerminationNotify,
            MessageType::UserRequest => DistMessage::UserRequest { buf: read_buf(r)? },
            MessageType::UserResponse => DistMessage::UserResponse { buf: read_buf(r)? },
            MessageType::UserNotify => DistMessage::UserNotify { buf: read_buf(r)? },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardps_core::codec::encode_to_vec;

    #[test]
    fn test_has_response() {
        let with: Vec<i32> = (0..40)
            .filter_map(MessageType::from_tag)
            .filter(|t| t.has_response())
            .map(|t| t as i32)
            .collect();
        assert_eq!(with, vec![1, 11, 14, 17, 31]);
    }

    #[test]
    fn test_body_borrows_payload() {
        let message = DistMessage::PullResponse {
            buf: Cow::Borrowed(b"abcdef"),
        };
        let payload = encode_to_vec(&message);
        assert_eq!(&payload[..4], &15i32.to_ne_bytes());
        assert_eq!(payload.len(), 4 + 8 + 6);

        let back = DistMessage::decode_payload(&payload).unwrap();
        let body = back.body().unwrap();
        assert_eq!(body, b"abcdef");
        assert_eq!(body.as_ptr(), payload[12..].as_ptr());
    }

    #[test]
    fn test_field_messages() {
        let messages = vec![
            DistMessage::HeartBeatNotify,
            DistMessage::FileResponse {
                epoch: 2,
                file: "part-0001".to_string(),
            },
            DistMessage::FileFinishNotify {
                file: "part-0001".to_string(),
                loss: 12.5,
                loss_weight: 100.0,
            },
            DistMessage::ModelSaveRequest {
                epoch: 3,
                timestamp: "20240101".to_string(),
                feature_kv_protocol_version: 2,
            },
            DistMessage::TerminationNotify,
        ];
        for message in messages {
            let payload = encode_to_vec(&message);
            assert_eq!(DistMessage::decode_payload(&payload).unwrap(), message);
        }
        assert_eq!(encode_to_vec(&DistMessage::ModelSaveResponse).len(), 4);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            DistMessage::decode_payload(&99i32.to_ne_bytes()).unwrap_err(),
            CoreError::UnknownTag {
                kind: "message type",
                tag: 99
            }
        );
        assert!(DistMessage::decode_payload(&0i32.to_ne_bytes()).is_err());

        let mut payload = encode_to_vec(&DistMessage::HeartBeatNotify);
        payload.push(1);
        assert_eq!(
            DistMessage::decode_payload(&payload).unwrap_err(),
            CoreError::TrailingBytes { remaining: 1 }
        );
    }

    #[test]
    fn test_into_owned_outlives_buffer() {
        let owned = {
            let payload = encode_to_vec(&DistMessage::UserNotify {
                buf: Cow::Borrowed(b"hi"),
            });
            DistMessage::decode_payload(&payload).unwrap().into_owned()
        };
        assert_eq!(owned.body(), Some(&b"hi"[..]));
    }
}
