//! SFTP data types and structures.

use keel_platform::KeelError;

/// SFTP error codes (SSH_FX_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SftpErrorCode {
    /// SSH_FX_OK - Success
    Ok = 0,
    /// SSH_FX_EOF - End of file
    Eof = 1,
    /// SSH_FX_NO_SUCH_FILE - No such file
    NoSuchFile = 2,
    /// SSH_FX_PERMISSION_DENIED - Permission denied
    PermissionDenied = 3,
    /// SSH_FX_FAILURE - General failure
    Failure = 4,
    /// SSH_FX_BAD_MESSAGE - Bad message
    BadMessage = 5,
    /// SSH_FX_NO_CONNECTION - No connection
    NoConnection = 6,
    /// SSH_FX_CONNECTION_LOST - Connection lost
    ConnectionLost = 7,
    /// SSH_FX_OP_UNSUPPORTED - Operation not supported
    OpUnsupported = 8,
}

impl SftpErrorCode {
    /// Convert from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Eof),
            2 => Some(Self::NoSuchFile),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::Failure),
            5 => Some(Self::BadMessage),
            6 => Some(Self::NoConnection),
            7 => Some(Self::ConnectionLost),
            8 => Some(Self::OpUnsupported),
            _ => None,
        }
    }

    /// Returns error message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::Eof => "End of file",
            Self::NoSuchFile => "No such file or directory",
            Self::PermissionDenied => "Permission denied",
            Self::Failure => "Failure",
            Self::BadMessage => "Bad message",
            Self::NoConnection => "No connection",
            Self::ConnectionLost => "Connection lost",
            Self::OpUnsupported => "Operation not supported",
        }
    }
}

/// A failure reported by (or on the way to) the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpError {
    /// Error code
    pub code: SftpErrorCode,
    /// Error message
    pub message: String,
}

impl SftpError {
    /// Creates a new SFTP error.
    pub fn new(code: SftpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates an error carrying the code's default message.
    pub fn from_code(code: SftpErrorCode) -> Self {
        Self::new(code, code.message())
    }
}

impl std::fmt::Display for SftpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SFTP error {}: {}", self.code as u32, self.message)
    }
}

impl std::error::Error for SftpError {}

impl From<KeelError> for SftpError {
    fn from(err: KeelError) -> Self {
        match err {
            KeelError::Io(e) => SftpError::new(SftpErrorCode::ConnectionLost, e.to_string()),
            KeelError::Protocol(msg) => SftpError::new(SftpErrorCode::BadMessage, msg),
            other => SftpError::new(SftpErrorCode::Failure, other.to_string()),
        }
    }
}

bitflags::bitflags! {
    /// File open flags (SSH_FXF_*) as sent in SSH_FXP_OPEN.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        /// SSH_FXF_READ - Open for reading
        const READ = 0x00000001;
        /// SSH_FXF_WRITE - Open for writing
        const WRITE = 0x00000002;
        /// SSH_FXF_APPEND - Force writes to append
        const APPEND = 0x00000004;
        /// SSH_FXF_CREAT - Create if it doesn't exist, otherwise open
        const CREATE_NEW_OR_OPEN = 0x00000008;
        /// SSH_FXF_TRUNC - Truncate to 0 length
        const TRUNCATE = 0x00000010;
        /// SSH_FXF_EXCL - Fail if the file exists (only with CREAT)
        const EXCLUSIVE = 0x00000020;
        /// SSH_FXF_CREAT | SSH_FXF_EXCL - Create, fail if the file exists
        const CREATE_NEW = Self::CREATE_NEW_OR_OPEN.bits() | Self::EXCLUSIVE.bits();
    }
}

impl std::fmt::Display for OpenFlags {
    /// Wire names, e.g. `WRITE|CREAT|TRUNC`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (OpenFlags::READ, "READ"),
            (OpenFlags::WRITE, "WRITE"),
            (OpenFlags::APPEND, "APPEND"),
            (OpenFlags::CREATE_NEW_OR_OPEN, "CREAT"),
            (OpenFlags::TRUNCATE, "TRUNC"),
            (OpenFlags::EXCLUSIVE, "EXCL"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "0")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// File permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(pub u32);

/// File attribute flags.
#[derive(Debug, Clone, Copy)]
pub struct AttrFlags(pub u32);

impl AttrFlags {
    /// SSH_FILEXFER_ATTR_SIZE
    pub const SIZE: u32 = 0x00000001;
    /// SSH_FILEXFER_ATTR_UIDGID
    pub const UIDGID: u32 = 0x00000002;
    /// SSH_FILEXFER_ATTR_PERMISSIONS
    pub const PERMISSIONS: u32 = 0x00000004;
    /// SSH_FILEXFER_ATTR_ACMODTIME
    pub const ACMODTIME: u32 = 0x00000008;
    /// SSH_FILEXFER_ATTR_EXTENDED
    pub const EXTENDED: u32 = 0x80000000;
}

/// File attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes
    pub size: Option<u64>,
    /// User ID
    pub uid: Option<u32>,
    /// Group ID
    pub gid: Option<u32>,
    /// Permissions
    pub permissions: Option<Permissions>,
    /// Access time (Unix timestamp)
    pub atime: Option<u32>,
    /// Modification time (Unix timestamp)
    pub mtime: Option<u32>,
}

impl FileAttributes {
    /// Creates empty attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut flags = 0u32;

        if self.size.is_some() {
            flags |= AttrFlags::SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= AttrFlags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= AttrFlags::PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= AttrFlags::ACMODTIME;
        }

        buf.extend_from_slice(&flags.to_be_bytes());

        if let Some(size) = self.size {
            buf.extend_from_slice(&size.to_be_bytes());
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.extend_from_slice(&uid.to_be_bytes());
            buf.extend_from_slice(&gid.to_be_bytes());
        }
        if let Some(permissions) = self.permissions {
            buf.extend_from_slice(&permissions.0.to_be_bytes());
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.extend_from_slice(&atime.to_be_bytes());
            buf.extend_from_slice(&mtime.to_be_bytes());
        }

        buf
    }

    /// Parses from bytes, returning the attributes and the number of bytes
    /// consumed.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), KeelError> {
        let mut reader = FieldReader::new(data);
        let flags = reader.u32("attribute flags")?;
        let mut attrs = Self::new();

        if flags & AttrFlags::SIZE != 0 {
            attrs.size = Some(reader.u64("size")?);
        }
        if flags & AttrFlags::UIDGID != 0 {
            attrs.uid = Some(reader.u32("uid")?);
            attrs.gid = Some(reader.u32("gid")?);
        }
        if flags & AttrFlags::PERMISSIONS != 0 {
            attrs.permissions = Some(Permissions(reader.u32("permissions")?));
        }
        if flags & AttrFlags::ACMODTIME != 0 {
            attrs.atime = Some(reader.u32("atime")?);
            attrs.mtime = Some(reader.u32("mtime")?);
        }
        if flags & AttrFlags::EXTENDED != 0 {
            let count = reader.u32("extended count")?;
            for _ in 0..count {
                reader.string("extended type")?;
                reader.string("extended data")?;
            }
        }

        Ok((attrs, reader.position()))
    }
}

/// Big-endian field reader over an SFTP payload.
pub(crate) struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.offset
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], KeelError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| KeelError::Protocol(format!("Missing {} field", field)))?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    pub(crate) fn u32(&mut self, field: &str) -> Result<u32, KeelError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self, field: &str) -> Result<u64, KeelError> {
        let b = self.take(8, field)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub(crate) fn string(&mut self, field: &str) -> Result<&'a [u8], KeelError> {
        let len = self.u32(field)? as usize;
        self.take(len, field)
    }
}
