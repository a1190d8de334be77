use std::io::{self, Read, Write};

use gshare_config::MAX_FRAME_LEN;

/// Send one frame: a 4-byte big-endian length prefix followed by the
/// payload. All-or-nothing on the frame; short writes fail the send.
pub fn send_frame<W: Write>(stream: &mut W, payload: &[u8]) -> io::Result<()> {
    let n = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    stream.write_all(&n.to_be_bytes())?;
    if !payload.is_empty() {
        stream.write_all(payload)?;
    }
    Ok(())
}

pub fn send_text<W: Write>(stream: &mut W, text: &str) -> io::Result<()> {
    send_frame(stream, text.as_bytes())
}

/// Receive one frame. A zero-length frame is a valid empty message;
/// declared lengths above MAX_FRAME_LEN fail the receive.
pub fn recv_frame<R: Read>(stream: &mut R) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len)?;
    let n = u32::from_be_bytes(len) as usize;
    if n == 0 {
        return Ok(Vec::new());
    }
    if n > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "declared frame length exceeds cap",
        ));
    }
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

/// Receive one frame and decode it as UTF-8 text.
pub fn recv_text<R: Read>(stream: &mut R) -> io::Result<String> {
    String::from_utf8(recv_frame(stream)?)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame is not valid UTF-8"))
}

#[cfg(test)]
mod unit_tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_roundtrip_text() {
        let mut buf: Vec<u8> = Vec::new();
        send_text(&mut buf, "REGISTER alice pw").unwrap();

        let mut cur = Cursor::new(buf);
        assert_eq!(recv_text(&mut cur).unwrap(), "REGISTER alice pw");
    }

    #[test]
    fn test_empty_frame_is_valid() {
        let mut buf: Vec<u8> = Vec::new();
        send_frame(&mut buf, b"").unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let mut cur = Cursor::new(buf);
        assert_eq!(recv_frame(&mut cur).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_oversize_declared_length_rejected() {
        let declared = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let mut cur = Cursor::new(declared.to_vec());
        assert!(recv_frame(&mut cur).is_err());
    }

    #[test]
    fn test_max_len_frame_accepted() {
        let payload = vec![7u8; MAX_FRAME_LEN];
        let mut buf: Vec<u8> = Vec::new();
        send_frame(&mut buf, &payload).unwrap();

        let mut cur = Cursor::new(buf);
        assert_eq!(recv_frame(&mut cur).unwrap(), payload);
    }

    #[test]
    fn test_truncated_payload_fails() {
        let mut buf: Vec<u8> = Vec::new();
        send_frame(&mut buf, b"hello").unwrap();
        buf.truncate(buf.len() - 2);

        let mut cur = Cursor::new(buf);
        assert!(recv_frame(&mut cur).is_err());
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut buf: Vec<u8> = Vec::new();
        send_text(&mut buf, "OK").unwrap();
        send_text(&mut buf, "ERR no_file").unwrap();

        let mut cur = Cursor::new(buf);
        assert_eq!(recv_text(&mut cur).unwrap(), "OK");
        assert_eq!(recv_text(&mut cur).unwrap(), "ERR no_file");
    }
}
