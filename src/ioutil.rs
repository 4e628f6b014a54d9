//! Small binary-reading helpers shared by every format reader. All integers
//! on the wire are little-endian.

use std::io::Read;

use crate::error::FormatError;

pub fn read_exact(source: &mut dyn Read, buf: &mut [u8], what: &'static str) -> Result<(), FormatError> {
    let mut read = 0;
    while read < buf.len() {
        match source.read(&mut buf[read..]) {
            Ok(0) => {
                return if read == 0 {
                    Err(FormatError::EndOfFile { what, size: buf.len() })
                } else {
                    Err(FormatError::ShortRead { what, got: read, want: buf.len() })
                }
            }
            Ok(n) => read += n,
            Err(e) => return Err(FormatError::Io(e)),
        }
    }
    Ok(())
}

pub fn read_u8(source: &mut dyn Read, what: &'static str) -> Result<u8, FormatError> {
    let mut buf = [0u8; 1];
    read_exact(source, &mut buf, what)?;
    Ok(buf[0])
}

pub fn read_u16_le(source: &mut dyn Read, what: &'static str) -> Result<u16, FormatError> {
    let mut buf = [0u8; 2];
    read_exact(source, &mut buf, what)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32_le(source: &mut dyn Read, what: &'static str) -> Result<u32, FormatError> {
    let mut buf = [0u8; 4];
    read_exact(source, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

/// Like `read_exact`, but treats a clean EOF at the very first byte as "no
/// more records" rather than an error — used to detect the end of a frame
/// list without a dedicated terminator.
pub fn try_read_exact(source: &mut dyn Read, buf: &mut [u8], what: &'static str) -> Result<bool, FormatError> {
    match source.read(&mut buf[..1]) {
        Ok(0) => return Ok(false),
        Ok(_) => {}
        Err(e) => return Err(FormatError::Io(e)),
    }
    if buf.len() > 1 {
        read_exact(source, &mut buf[1..], what)?;
    }
    Ok(true)
}
