//! SFTP protocol messages.
//!
//! Defines SFTP message types, packet framing and the request/reply
//! payloads used by file streams.

use super::types::{FieldReader, FileAttributes, OpenFlags, SftpErrorCode};
use bytes::{BufMut, Bytes, BytesMut};
use keel_platform::{KeelError, KeelResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// SFTP protocol version (v3).
pub const SFTP_VERSION: u32 = 3;

/// Largest packet accepted from the peer (256 KiB plus header slack).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 + 1024;

/// SFTP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SftpMessageType {
    /// SSH_FXP_INIT - Initialize SFTP session
    Init = 1,
    /// SSH_FXP_VERSION - Version response
    Version = 2,
    /// SSH_FXP_OPEN - Open file
    Open = 3,
    /// SSH_FXP_CLOSE - Close file/directory
    Close = 4,
    /// SSH_FXP_READ - Read from file
    Read = 5,
    /// SSH_FXP_WRITE - Write to file
    Write = 6,
    /// SSH_FXP_FSTAT - Get file attributes by handle
    FStat = 8,

    // Response messages
    /// SSH_FXP_STATUS - Status response
    Status = 101,
    /// SSH_FXP_HANDLE - File handle response
    Handle = 102,
    /// SSH_FXP_DATA - Data response
    Data = 103,
    /// SSH_FXP_ATTRS - Attributes response
    Attrs = 105,
}

impl SftpMessageType {
    /// Convert from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Init),
            2 => Some(Self::Version),
            3 => Some(Self::Open),
            4 => Some(Self::Close),
            5 => Some(Self::Read),
            6 => Some(Self::Write),
            8 => Some(Self::FStat),
            101 => Some(Self::Status),
            102 => Some(Self::Handle),
            103 => Some(Self::Data),
            105 => Some(Self::Attrs),
            _ => None,
        }
    }
}

/// SFTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpMessage {
    /// Message type
    pub msg_type: SftpMessageType,
    /// Message payload
    pub payload: Bytes,
}

impl SftpMessage {
    /// Creates a new SFTP message.
    pub fn new(msg_type: SftpMessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    /// Serializes to bytes.
    ///
    /// Format:
    /// ```text
    /// uint32    length
    /// byte      type
    /// byte[n]   payload
    /// ```
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.payload.len());

        // length (payload + 1 for type byte)
        buf.put_u32((self.payload.len() + 1) as u32);
        buf.put_u8(self.msg_type as u8);
        buf.extend_from_slice(&self.payload);

        buf.freeze()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        if data.len() < 5 {
            return Err(KeelError::Protocol("SFTP message too short".to_string()));
        }

        let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

        if length == 0 || data.len() < 4 + length {
            return Err(KeelError::Protocol("SFTP message incomplete".to_string()));
        }

        Self::from_body(Bytes::copy_from_slice(&data[4..4 + length]))
    }

    /// Parses a packet body (type byte followed by payload).
    fn from_body(body: Bytes) -> KeelResult<Self> {
        let msg_type = SftpMessageType::from_u8(body[0]).ok_or_else(|| {
            KeelError::Protocol(format!("Unknown SFTP message type: {}", body[0]))
        })?;

        Ok(Self {
            msg_type,
            payload: body.slice(1..),
        })
    }
}

/// Reads one framed message from `reader`.
pub async fn read_message<R>(reader: &mut R) -> KeelResult<SftpMessage>
where
    R: AsyncRead + Unpin,
{
    let length = reader.read_u32().await? as usize;
    if length == 0 || length > MAX_MESSAGE_SIZE {
        return Err(KeelError::Protocol(format!(
            "Invalid SFTP message length: {}",
            length
        )));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    SftpMessage::from_body(Bytes::from(body))
}

/// Writes one framed message to `writer` and flushes it.
pub async fn write_message<W>(writer: &mut W, msg: &SftpMessage) -> KeelResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&msg.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn put_string(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.extend_from_slice(data);
}

/// Builds SSH_FXP_INIT.
pub fn init_message(version: u32) -> SftpMessage {
    SftpMessage::new(SftpMessageType::Init, version.to_be_bytes().to_vec())
}

/// Builds SSH_FXP_VERSION (extensions are not sent).
pub fn version_message(version: u32) -> SftpMessage {
    SftpMessage::new(SftpMessageType::Version, version.to_be_bytes().to_vec())
}

/// Extracts the protocol version from SSH_FXP_INIT or SSH_FXP_VERSION.
pub fn parse_version(msg: &SftpMessage) -> KeelResult<u32> {
    if !matches!(msg.msg_type, SftpMessageType::Init | SftpMessageType::Version) {
        return Err(KeelError::Protocol(format!(
            "Expected VERSION, got {:?}",
            msg.msg_type
        )));
    }
    FieldReader::new(&msg.payload).u32("version")
}

/// A file request, borrowing its variable-length fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// SSH_FXP_OPEN
    Open {
        /// Remote path
        path: &'a str,
        /// Open flags
        flags: OpenFlags,
        /// Attributes for a newly created file
        attrs: FileAttributes,
    },
    /// SSH_FXP_CLOSE
    Close {
        /// Handle to close
        handle: &'a [u8],
    },
    /// SSH_FXP_READ
    Read {
        /// File handle
        handle: &'a [u8],
        /// File offset
        offset: u64,
        /// Maximum bytes to return
        len: u32,
    },
    /// SSH_FXP_WRITE
    Write {
        /// File handle
        handle: &'a [u8],
        /// File offset
        offset: u64,
        /// Bytes to write
        data: &'a [u8],
    },
    /// SSH_FXP_FSTAT
    FStat {
        /// File handle
        handle: &'a [u8],
    },
}

impl<'a> Request<'a> {
    /// Encodes the request with the given request id.
    pub fn encode(&self, id: u32) -> SftpMessage {
        let mut buf = BytesMut::new();
        buf.put_u32(id);

        let msg_type = match self {
            Request::Open { path, flags, attrs } => {
                put_string(&mut buf, path.as_bytes());
                buf.put_u32(flags.bits());
                buf.extend_from_slice(&attrs.to_bytes());
                SftpMessageType::Open
            }
            Request::Close { handle } => {
                put_string(&mut buf, handle);
                SftpMessageType::Close
            }
            Request::Read {
                handle,
                offset,
                len,
            } => {
                put_string(&mut buf, handle);
                buf.put_u64(*offset);
                buf.put_u32(*len);
                SftpMessageType::Read
            }
            Request::Write {
                handle,
                offset,
                data,
            } => {
                put_string(&mut buf, handle);
                buf.put_u64(*offset);
                put_string(&mut buf, data);
                SftpMessageType::Write
            }
            Request::FStat { handle } => {
                put_string(&mut buf, handle);
                SftpMessageType::FStat
            }
        };

        SftpMessage::new(msg_type, buf.freeze())
    }

    /// Decodes a request, returning its id.
    pub fn decode(msg: &'a SftpMessage) -> KeelResult<(u32, Request<'a>)> {
        let mut reader = FieldReader::new(&msg.payload);
        let id = reader.u32("request id")?;

        let request = match msg.msg_type {
            SftpMessageType::Open => {
                let path = std::str::from_utf8(reader.string("path")?)
                    .map_err(|_| KeelError::Protocol("Path is not valid UTF-8".to_string()))?;
                let flags = OpenFlags::from_bits_retain(reader.u32("pflags")?);
                let (attrs, _) = FileAttributes::from_bytes(reader.remaining())?;
                Request::Open { path, flags, attrs }
            }
            SftpMessageType::Close => Request::Close {
                handle: reader.string("handle")?,
            },
            SftpMessageType::Read => Request::Read {
                handle: reader.string("handle")?,
                offset: reader.u64("offset")?,
                len: reader.u32("len")?,
            },
            SftpMessageType::Write => Request::Write {
                handle: reader.string("handle")?,
                offset: reader.u64("offset")?,
                data: reader.string("data")?,
            },
            SftpMessageType::FStat => Request::FStat {
                handle: reader.string("handle")?,
            },
            other => {
                return Err(KeelError::Protocol(format!(
                    "Not a file request: {:?}",
                    other
                )))
            }
        };

        Ok((id, request))
    }
}

/// A reply to a file request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// SSH_FXP_STATUS
    Status {
        /// Raw status code
        code: u32,
        /// Human-readable message
        message: String,
    },
    /// SSH_FXP_HANDLE
    Handle(Bytes),
    /// SSH_FXP_DATA
    Data(Bytes),
    /// SSH_FXP_ATTRS
    Attrs(FileAttributes),
}

impl Reply {
    /// A status reply carrying the code's default message.
    pub fn status(code: SftpErrorCode) -> Self {
        Reply::Status {
            code: code as u32,
            message: code.message().to_string(),
        }
    }

    /// Encodes the reply for the given request id.
    pub fn encode(&self, id: u32) -> SftpMessage {
        let mut buf = BytesMut::new();
        buf.put_u32(id);

        let msg_type = match self {
            Reply::Status { code, message } => {
                buf.put_u32(*code);
                put_string(&mut buf, message.as_bytes());
                put_string(&mut buf, b"en");
                SftpMessageType::Status
            }
            Reply::Handle(handle) => {
                put_string(&mut buf, handle);
                SftpMessageType::Handle
            }
            Reply::Data(data) => {
                put_string(&mut buf, data);
                SftpMessageType::Data
            }
            Reply::Attrs(attrs) => {
                buf.extend_from_slice(&attrs.to_bytes());
                SftpMessageType::Attrs
            }
        };

        SftpMessage::new(msg_type, buf.freeze())
    }

    /// Decodes a reply, returning the id of the request it answers.
    pub fn decode(msg: &SftpMessage) -> KeelResult<(u32, Reply)> {
        let mut reader = FieldReader::new(&msg.payload);
        let id = reader.u32("request id")?;

        let reply = match msg.msg_type {
            SftpMessageType::Status => {
                let code = reader.u32("status code")?;
                // Some v3 servers omit the message and language tag.
                let message = match reader.string("error message") {
                    Ok(text) => String::from_utf8_lossy(text).into_owned(),
                    Err(_) => SftpErrorCode::from_u32(code)
                        .map(|c| c.message().to_string())
                        .unwrap_or_default(),
                };
                Reply::Status { code, message }
            }
            SftpMessageType::Handle => {
                Reply::Handle(Bytes::copy_from_slice(reader.string("handle")?))
            }
            SftpMessageType::Data => {
                let len = reader.string("data")?.len();
                let end = reader.position();
                Reply::Data(msg.payload.slice(end - len..end))
            }
            SftpMessageType::Attrs => {
                let (attrs, _) = FileAttributes::from_bytes(reader.remaining())?;
                Reply::Attrs(attrs)
            }
            other => {
                return Err(KeelError::Protocol(format!(
                    "Not a reply message: {:?}",
                    other
                )))
            }
        };

        Ok((id, reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(SftpMessageType::from_u8(1), Some(SftpMessageType::Init));
        assert_eq!(SftpMessageType::from_u8(101), Some(SftpMessageType::Status));
        assert_eq!(SftpMessageType::from_u8(255), None);
    }

    #[test]
    fn test_message_serialization() {
        let msg = init_message(SFTP_VERSION);
        let bytes = msg.to_bytes();

        // length (4) + type (1) + payload (4) = 9 bytes
        assert_eq!(bytes.len(), 9);

        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(length, 5);
        assert_eq!(bytes[4], SftpMessageType::Init as u8);
    }

    #[test]
    fn test_message_deserialization() {
        let bytes = vec![
            0, 0, 0, 5, // length = 5
            2, // type = Version
            0, 0, 0, 3, // payload (version 3)
        ];

        let msg = SftpMessage::from_bytes(&bytes).unwrap();
        assert_eq!(msg.msg_type, SftpMessageType::Version);
        assert_eq!(parse_version(&msg).unwrap(), 3);
    }

    #[test]
    fn test_message_incomplete() {
        assert!(SftpMessage::from_bytes(&[0, 0, 0, 9, 2, 0]).is_err());
        assert!(SftpMessage::from_bytes(&[0, 0, 0, 1, 250]).is_err());
    }

    #[test]
    fn test_write_request_layout() {
        let msg = Request::Write {
            handle: b"h1",
            offset: 0x0102,
            data: b"xyz",
        }
        .encode(7);

        assert_eq!(msg.msg_type, SftpMessageType::Write);
        assert_eq!(
            &msg.payload[..],
            &[
                0, 0, 0, 7, // id
                0, 0, 0, 2, b'h', b'1', // handle
                0, 0, 0, 0, 0, 0, 1, 2, // offset
                0, 0, 0, 3, b'x', b'y', b'z', // data
            ]
        );
        // Non-data bytes of a framed WRITE: 25 + handle length.
        assert_eq!(msg.to_bytes().len() - 3, 25 + 2);
    }

    #[test]
    fn test_open_request_decode() {
        let msg = Request::Open {
            path: "/tmp/file",
            flags: OpenFlags::READ,
            attrs: FileAttributes::new(),
        }
        .encode(42);

        let (id, request) = Request::decode(&msg).unwrap();
        assert_eq!(id, 42);
        assert_eq!(
            request,
            Request::Open {
                path: "/tmp/file",
                flags: OpenFlags::READ,
                attrs: FileAttributes::new(),
            }
        );
    }

    #[test]
    fn test_data_reply_decode() {
        let msg = Reply::Data(Bytes::from_static(b"payload")).encode(3);
        // Data reply overhead: 13 bytes besides the data itself.
        assert_eq!(msg.to_bytes().len(), 13 + 7);

        let (id, reply) = Reply::decode(&msg).unwrap();
        assert_eq!(id, 3);
        assert_eq!(reply, Reply::Data(Bytes::from_static(b"payload")));
    }

    #[test]
    fn test_status_without_message() {
        let msg = SftpMessage::new(SftpMessageType::Status, vec![0, 0, 0, 9, 0, 0, 0, 2]);
        let (id, reply) = Reply::decode(&msg).unwrap();
        assert_eq!(id, 9);
        assert_eq!(reply, Reply::status(SftpErrorCode::NoSuchFile));
    }

    #[tokio::test]
    async fn test_framed_io() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let sent = Reply::status(SftpErrorCode::Eof).encode(11);

        write_message(&mut a, &sent).await.unwrap();
        let received = read_message(&mut b).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes())
            .await
            .unwrap();
        assert!(matches!(
            read_message(&mut b).await,
            Err(KeelError::Protocol(_))
        ));
    }
}
