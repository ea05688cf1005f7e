//! Translation of open intent into SSH_FXP_OPEN flags.

use super::error::{StreamError, StreamResult};
use super::types::OpenFlags;

/// How the remote file is located or created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new file; the remote side fails if it already exists
    CreateNew,
    /// Create a new file or truncate an existing one
    Create,
    /// Open an existing file
    Open,
    /// Open the file if it exists, otherwise create it
    OpenOrCreate,
    /// Open an existing file and truncate it to zero length
    Truncate,
    /// Open or create the file and start at its end
    Append,
}

impl OpenMode {
    /// All open modes.
    pub const ALL: [OpenMode; 6] = [
        OpenMode::CreateNew,
        OpenMode::Create,
        OpenMode::Open,
        OpenMode::OpenOrCreate,
        OpenMode::Truncate,
        OpenMode::Append,
    ];

    fn requires_write(self) -> bool {
        matches!(
            self,
            OpenMode::CreateNew | OpenMode::Create | OpenMode::Truncate | OpenMode::Append
        )
    }
}

/// Requested access to the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    /// Read only
    Read,
    /// Write only
    Write,
    /// Read and write
    ReadWrite,
}

impl FileAccess {
    /// All access modes.
    pub const ALL: [FileAccess; 3] = [FileAccess::Read, FileAccess::Write, FileAccess::ReadWrite];

    /// True for `Read` and `ReadWrite`.
    pub fn can_read(self) -> bool {
        matches!(self, FileAccess::Read | FileAccess::ReadWrite)
    }

    /// True for `Write` and `ReadWrite`.
    pub fn can_write(self) -> bool {
        matches!(self, FileAccess::Write | FileAccess::ReadWrite)
    }
}

/// Maps an (open mode, access) pair onto protocol open flags.
///
/// Combinations that cannot be honoured (a creating, truncating or
/// appending mode without write access, or `Append` together with read
/// access) are rejected with [`StreamError::InvalidArgument`] before any
/// request is sent.
pub fn translate_flags(mode: OpenMode, access: FileAccess) -> StreamResult<OpenFlags> {
    if !access.can_write() && mode.requires_write() {
        return Err(StreamError::InvalidArgument(format!(
            "combining {:?} with {:?} access is invalid",
            mode, access
        )));
    }
    if mode == OpenMode::Append && access.can_read() {
        return Err(StreamError::InvalidArgument(format!(
            "{:?} can only be used with {:?} access",
            mode,
            FileAccess::Write
        )));
    }

    let mut flags = OpenFlags::empty();
    if access.can_read() {
        flags |= OpenFlags::READ;
    }
    if access.can_write() {
        flags |= OpenFlags::WRITE;
    }

    flags |= match mode {
        OpenMode::CreateNew => OpenFlags::CREATE_NEW,
        OpenMode::Create => OpenFlags::CREATE_NEW_OR_OPEN | OpenFlags::TRUNCATE,
        OpenMode::Open => OpenFlags::empty(),
        OpenMode::OpenOrCreate => OpenFlags::CREATE_NEW_OR_OPEN,
        OpenMode::Truncate => OpenFlags::TRUNCATE,
        OpenMode::Append => OpenFlags::APPEND | OpenFlags::CREATE_NEW_OR_OPEN,
    };

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATION_BITS: u32 = 0x00000004 | 0x00000008 | 0x00000010 | 0x00000020;

    fn expected_creation_bits(mode: OpenMode) -> OpenFlags {
        match mode {
            OpenMode::CreateNew => OpenFlags::CREATE_NEW,
            OpenMode::Create => OpenFlags::CREATE_NEW_OR_OPEN | OpenFlags::TRUNCATE,
            OpenMode::Open => OpenFlags::empty(),
            OpenMode::OpenOrCreate => OpenFlags::CREATE_NEW_OR_OPEN,
            OpenMode::Truncate => OpenFlags::TRUNCATE,
            OpenMode::Append => OpenFlags::APPEND | OpenFlags::CREATE_NEW_OR_OPEN,
        }
    }

    fn is_valid(mode: OpenMode, access: FileAccess) -> bool {
        match access {
            FileAccess::Read => matches!(mode, OpenMode::Open | OpenMode::OpenOrCreate),
            FileAccess::Write => true,
            FileAccess::ReadWrite => mode != OpenMode::Append,
        }
    }

    #[test]
    fn test_all_combinations() {
        let mut valid = 0;
        for mode in OpenMode::ALL {
            for access in FileAccess::ALL {
                match translate_flags(mode, access) {
                    Ok(flags) => {
                        assert!(is_valid(mode, access), "{:?}/{:?} accepted", mode, access);
                        valid += 1;

                        assert_eq!(flags.contains(OpenFlags::READ), access.can_read());
                        assert_eq!(flags.contains(OpenFlags::WRITE), access.can_write());
                        assert_eq!(
                            flags.bits() & CREATION_BITS,
                            expected_creation_bits(mode).bits()
                        );
                    }
                    Err(err) => {
                        assert!(!is_valid(mode, access), "{:?}/{:?} rejected", mode, access);
                        assert!(matches!(err, StreamError::InvalidArgument(_)));
                    }
                }
            }
        }
        assert_eq!(valid, 13);
    }

    #[test]
    fn test_create_write() {
        let flags = translate_flags(OpenMode::Create, FileAccess::Write).unwrap();
        assert_eq!(
            flags,
            OpenFlags::WRITE | OpenFlags::CREATE_NEW_OR_OPEN | OpenFlags::TRUNCATE
        );
    }

    #[test]
    fn test_open_read() {
        let flags = translate_flags(OpenMode::Open, FileAccess::Read).unwrap();
        assert_eq!(flags, OpenFlags::READ);
    }

    #[test]
    fn test_append_implies_write() {
        let flags = translate_flags(OpenMode::Append, FileAccess::Write).unwrap();
        assert!(flags.contains(OpenFlags::APPEND));
        assert!(flags.contains(OpenFlags::WRITE));
        assert!(!flags.contains(OpenFlags::READ));
    }

    #[test]
    fn test_invalid_combinations() {
        assert!(translate_flags(OpenMode::Append, FileAccess::Read).is_err());
        assert!(translate_flags(OpenMode::Append, FileAccess::ReadWrite).is_err());
        assert!(translate_flags(OpenMode::Truncate, FileAccess::Read).is_err());
        assert!(translate_flags(OpenMode::Create, FileAccess::Read).is_err());
        assert!(translate_flags(OpenMode::CreateNew, FileAccess::Read).is_err());
    }
}
