//! Messages exchanged between the search coordinator and its workers.
//!
//! Every message is a frame: a 4-byte little-endian length followed by that
//! many bytes of payload. Control messages are the bare tokens `READY` and
//! `STOP`; evaluation requests and results are JSON.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{error::ProtocolError, repr::Shape};

pub const READY: &str = "READY";
pub const STOP: &str = "STOP";

/// Largest payload either side accepts.
pub const MAX_FRAME: usize = 64 << 20;

/// Evaluator input for a batch. The correlation data stays with the
/// coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalRequest {
    pub id: u64,
    pub shape: Shape,
    pub size: usize,
    pub headers: Vec<f32>,
    pub frames: Vec<f32>,
    pub lmm: Vec<f32>,
}

impl EvalRequest {
    pub fn header(&self, row: usize) -> &[f32] {
        &self.headers[row * self.shape.header..(row + 1) * self.shape.header]
    }

    pub fn frames(&self, row: usize) -> &[f32] {
        &self.frames[row * self.shape.frames..(row + 1) * self.shape.frames]
    }

    pub fn lmm(&self, row: usize) -> &[f32] {
        &self.lmm[row * self.shape.actions..(row + 1) * self.shape.actions]
    }

    /// Check that the payload holds `size` rows of `shape`.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let Shape {
            header,
            frames,
            actions,
        } = self.shape;
        let expected = [
            ("headers", self.size * header, self.headers.len()),
            ("frames", self.size * frames, self.frames.len()),
            ("lmm", self.size * actions, self.lmm.len()),
        ];
        match expected.iter().find(|(_, expected, got)| expected != got) {
            Some((what, expected, got)) => Err(ProtocolError::Unexpected(format!(
                "request {} has {got} {what} values, expected {expected}",
                self.id
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalResponse {
    pub id: u64,
    pub policy: Vec<f32>,
    pub value: Vec<f32>,
}

/// Sent by the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Evaluate(EvalRequest),
    Stop,
}

/// Sent by a worker.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Ready,
    Result(EvalResponse),
}

impl Command {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(match self {
            Command::Evaluate(request) => serde_json::to_vec(request)?,
            Command::Stop => STOP.as_bytes().to_vec(),
        })
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload == STOP.as_bytes() {
            Ok(Command::Stop)
        } else {
            Ok(Command::Evaluate(serde_json::from_slice(payload)?))
        }
    }
}

impl Reply {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(match self {
            Reply::Ready => READY.as_bytes().to_vec(),
            Reply::Result(response) => serde_json::to_vec(response)?,
        })
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload == READY.as_bytes() {
            Ok(Reply::Ready)
        } else {
            Ok(Reply::Result(serde_json::from_slice(payload)?))
        }
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.len() > MAX_FRAME {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. A clean end of stream before the length prefix is
/// reported as `Closed`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Err(ProtocolError::Closed),
        Err(err) => return Err(err.into()),
    };
    if len > MAX_FRAME {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn frames_are_length_prefixed() {
        let (mut a, mut b) = duplex(64);
        write_frame(&mut a, READY.as_bytes()).await.unwrap();

        let mut prefix = [0; 4];
        b.read_exact(&mut prefix).await.unwrap();
        assert_eq!(prefix, [5, 0, 0, 0]);
        let mut token = [0; 5];
        b.read_exact(&mut token).await.unwrap();
        assert_eq!(&token, b"READY");
    }

    #[tokio::test]
    async fn closed_stream() {
        let (a, mut b) = duplex(64);
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(ProtocolError::Closed)));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_u32_le(MAX_FRAME as u32 + 1).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn request_round_trip() {
        let shape = Shape {
            header: 2,
            frames: 3,
            actions: 4,
        };
        let request = EvalRequest {
            id: 7,
            shape,
            size: 1,
            headers: vec![1.0, 0.0],
            frames: vec![0.0, 1.0, 0.0],
            lmm: vec![1.0, 1.0, 0.0, 0.0],
        };
        let (mut a, mut b) = duplex(1024);
        write_frame(&mut a, &Command::Evaluate(request.clone()).encode().unwrap())
            .await
            .unwrap();
        write_frame(&mut a, &Command::Stop.encode().unwrap()).await.unwrap();

        let first = Command::decode(&read_frame(&mut b).await.unwrap()).unwrap();
        assert_eq!(first, Command::Evaluate(request.clone()));
        assert_eq!(request.lmm(0), &[1.0, 1.0, 0.0, 0.0]);
        assert!(request.validate().is_ok());
        let second = Command::decode(&read_frame(&mut b).await.unwrap()).unwrap();
        assert_eq!(second, Command::Stop);
    }

    #[test]
    fn malformed_reply() {
        assert!(matches!(Reply::decode(b"READY?"), Err(ProtocolError::Json(_))));
        assert_eq!(Reply::decode(b"READY").unwrap(), Reply::Ready);
    }

    #[test]
    fn non_utf8_payload_is_malformed_json() {
        assert!(matches!(Reply::decode(&[0xff, 0xfe]), Err(ProtocolError::Json(_))));
        assert!(matches!(Command::decode(&[b'S', 0xc3]), Err(ProtocolError::Json(_))));
    }
}
