use crate::prelude::*;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    ContentLength(usize),
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data { remaining: usize },
    DataCrlf,
    Trailers,
    Done,
}

/// Request body store. Bytes accumulate in memory until the spill threshold,
/// then move to a temp file under `/tmp` that is unlinked when the body is
/// dropped at the end of the request.
#[derive(Debug)]
pub struct Body {
    kind: BodyKind,
    limit: Option<usize>,
    received: usize,
    data: Vec<u8>,
    spill: Option<NamedTempFile>,
    phase: ChunkPhase,
    trailer_bytes: usize,
}

impl Default for Body {
    fn default() -> Self {
        Self::new()
    }
}

impl Body {
    pub fn new() -> Self {
        Body {
            kind: BodyKind::None,
            limit: None,
            received: 0,
            data: Vec::new(),
            spill: None,
            phase: ChunkPhase::Size,
            trailer_bytes: 0,
        }
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: BodyKind) {
        self.kind = kind;
    }

    pub fn limit_is_set(&self) -> bool {
        self.limit.is_some()
    }

    /// Applies the resolved `client_max_body_size`. Fails up front when a
    /// declared Content-Length already exceeds it.
    pub fn set_limit(&mut self, limit: usize) -> std::result::Result<(), u16> {
        if let BodyKind::ContentLength(expected) = self.kind {
            if expected > limit {
                return Err(HTTP_PAYLOAD_TOO_LARGE);
            }
        }
        self.limit = Some(limit);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.received
    }

    pub fn is_empty(&self) -> bool {
        self.received == 0
    }

    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    /// In-memory bytes; empty once the body has spilled to disk.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes bytes from the holding buffer. Each call makes as much
    /// progress as the buffered data allows and never blocks.
    pub fn feed(&mut self, buf: &mut Vec<u8>) -> ParseStatus {
        match self.kind {
            BodyKind::None => ParseStatus::Complete,
            BodyKind::ContentLength(expected) => self.feed_sized(buf, expected),
            BodyKind::Chunked => self.feed_chunked(buf),
        }
    }

    fn feed_sized(&mut self, buf: &mut Vec<u8>, expected: usize) -> ParseStatus {
        let wanted = expected.saturating_sub(self.received);
        let take = wanted.min(buf.len());

        if take > 0 {
            let chunk: Vec<u8> = buf.drain(..take).collect();
            if let Err(code) = self.append(&chunk) {
                return ParseStatus::Failed(code);
            }
        }

        if self.received == expected {
            ParseStatus::Complete
        } else {
            ParseStatus::Incomplete
        }
    }

    fn feed_chunked(&mut self, buf: &mut Vec<u8>) -> ParseStatus {
        loop {
            match self.phase {
                ChunkPhase::Size => {
                    let window = buf.len().min(MAX_CHUNK_SIZE_LINE);
                    match find_crlf(&buf[..window], 0) {
                        Some(end) => {
                            let line = String::from_utf8_lossy(&buf[..end]).into_owned();
                            buf.drain(..end + 2);

                            let size_token = line.split(';').next().unwrap_or("").trim();
                            let size = match usize::from_str_radix(size_token, 16) {
                                Ok(n) => n,
                                Err(_) => return ParseStatus::Failed(HTTP_BAD_REQUEST),
                            };

                            if size == 0 {
                                self.phase = ChunkPhase::Trailers;
                            } else {
                                self.phase = ChunkPhase::Data { remaining: size };
                            }
                        }
                        None => {
                            if buf.len() >= MAX_CHUNK_SIZE_LINE {
                                return ParseStatus::Failed(HTTP_BAD_REQUEST);
                            }
                            return ParseStatus::Incomplete;
                        }
                    }
                }
                ChunkPhase::Data { remaining } => {
                    if buf.is_empty() {
                        return ParseStatus::Incomplete;
                    }
                    let take = remaining.min(buf.len());
                    let chunk: Vec<u8> = buf.drain(..take).collect();
                    if let Err(code) = self.append(&chunk) {
                        return ParseStatus::Failed(code);
                    }

                    if take == remaining {
                        self.phase = ChunkPhase::DataCrlf;
                    } else {
                        self.phase = ChunkPhase::Data {
                            remaining: remaining - take,
                        };
                        return ParseStatus::Incomplete;
                    }
                }
                ChunkPhase::DataCrlf => {
                    if buf.len() < 2 {
                        return ParseStatus::Incomplete;
                    }
                    if &buf[..2] != b"\r\n" {
                        return ParseStatus::Failed(HTTP_BAD_REQUEST);
                    }
                    buf.drain(..2);
                    self.phase = ChunkPhase::Size;
                }
                ChunkPhase::Trailers => match find_crlf(buf, 0) {
                    Some(0) => {
                        buf.drain(..2);
                        self.phase = ChunkPhase::Done;
                        return ParseStatus::Complete;
                    }
                    Some(end) => {
                        // Trailer fields are accepted and discarded.
                        self.trailer_bytes += end + 2;
                        if self.trailer_bytes > MAX_HEADER_BLOCK {
                            return ParseStatus::Failed(HTTP_PAYLOAD_TOO_LARGE);
                        }
                        buf.drain(..end + 2);
                    }
                    None => {
                        if buf.len() > MAX_HEADER_LINE {
                            return ParseStatus::Failed(HTTP_PAYLOAD_TOO_LARGE);
                        }
                        return ParseStatus::Incomplete;
                    }
                },
                ChunkPhase::Done => return ParseStatus::Complete,
            }
        }
    }

    fn append(&mut self, bytes: &[u8]) -> std::result::Result<(), u16> {
        if let Some(limit) = self.limit {
            if self.received + bytes.len() > limit {
                return Err(HTTP_PAYLOAD_TOO_LARGE);
            }
        }
        self.received += bytes.len();

        if self.spill.is_none() && self.data.len() + bytes.len() > BODY_SPILL_THRESHOLD {
            let mut file = tempfile::Builder::new()
                .prefix(TEMP_FILE_PREFIX)
                .tempfile_in("/tmp")
                .map_err(|_| HTTP_INTERNAL_SERVER_ERROR)?;
            // Flush the in-memory prefix before switching over.
            file.as_file_mut()
                .write_all(&self.data)
                .map_err(|_| HTTP_INTERNAL_SERVER_ERROR)?;
            self.data.clear();
            self.spill = Some(file);
        }

        match &mut self.spill {
            Some(file) => file
                .as_file_mut()
                .write_all(bytes)
                .map_err(|_| HTTP_INTERNAL_SERVER_ERROR),
            None => {
                self.data.extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    /// Independent reader over the full body, wherever it lives.
    pub fn open_reader(&self) -> io::Result<BodyReader> {
        match &self.spill {
            Some(file) => Ok(BodyReader::Spill(file.reopen()?)),
            None => Ok(BodyReader::Memory(io::Cursor::new(self.data.clone()))),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<u64> {
        let mut reader = self.open_reader()?;
        io::copy(&mut reader, writer)
    }
}

#[derive(Debug)]
pub enum BodyReader {
    Memory(io::Cursor<Vec<u8>>),
    Spill(File),
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BodyReader::Memory(cursor) => cursor.read(buf),
            BodyReader::Spill(file) => file.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized_body(expected: usize) -> Body {
        let mut body = Body::new();
        body.set_kind(BodyKind::ContentLength(expected));
        body.set_limit(usize::MAX).unwrap();
        body
    }

    fn chunked_body() -> Body {
        let mut body = Body::new();
        body.set_kind(BodyKind::Chunked);
        body.set_limit(usize::MAX).unwrap();
        body
    }

    #[test]
    fn test_content_length_in_pieces() {
        let mut body = sized_body(10);
        let mut buf = b"12345".to_vec();
        assert_eq!(body.feed(&mut buf), ParseStatus::Incomplete);

        buf.extend_from_slice(b"67890TRAILING");
        assert_eq!(body.feed(&mut buf), ParseStatus::Complete);
        assert_eq!(body.bytes(), b"1234567890");
        // Pipelined bytes stay in the holding buffer.
        assert_eq!(buf, b"TRAILING");
    }

    #[test]
    fn test_content_length_over_limit() {
        let mut body = Body::new();
        body.set_kind(BodyKind::ContentLength(100));
        assert_eq!(body.set_limit(50), Err(HTTP_PAYLOAD_TOO_LARGE));
    }

    #[test]
    fn test_chunked_reassembly() {
        let mut body = chunked_body();
        let mut buf = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".to_vec();
        assert_eq!(body.feed(&mut buf), ParseStatus::Complete);
        assert_eq!(body.bytes(), b"hello world");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_chunked_split_across_reads() {
        let mut body = chunked_body();
        let mut buf = Vec::new();

        buf.extend_from_slice(b"B\r\n");
        assert_eq!(body.feed(&mut buf), ParseStatus::Incomplete);

        buf.extend_from_slice(b"Rust S");
        assert_eq!(body.feed(&mut buf), ParseStatus::Incomplete);

        buf.extend_from_slice(b"tream\r\n0\r\n");
        assert_eq!(body.feed(&mut buf), ParseStatus::Incomplete);

        buf.extend_from_slice(b"\r\n");
        assert_eq!(body.feed(&mut buf), ParseStatus::Complete);
        assert_eq!(body.bytes(), b"Rust Stream");
    }

    #[test]
    fn test_chunked_bad_hex() {
        let mut body = chunked_body();
        let mut buf = b"zz\r\ndata\r\n".to_vec();
        assert_eq!(body.feed(&mut buf), ParseStatus::Failed(HTTP_BAD_REQUEST));
    }

    #[test]
    fn test_chunked_size_line_too_long() {
        let mut body = chunked_body();
        let mut buf = b"11111111111111111111\r\n".to_vec();
        assert_eq!(body.feed(&mut buf), ParseStatus::Failed(HTTP_BAD_REQUEST));
    }

    #[test]
    fn test_chunked_missing_data_crlf() {
        let mut body = chunked_body();
        let mut buf = b"5\r\nhelloXX".to_vec();
        assert_eq!(body.feed(&mut buf), ParseStatus::Failed(HTTP_BAD_REQUEST));
    }

    #[test]
    fn test_chunked_trailers_discarded() {
        let mut body = chunked_body();
        let mut buf = b"3\r\nabc\r\n0\r\nX-Checksum: 99\r\n\r\nNEXT".to_vec();
        assert_eq!(body.feed(&mut buf), ParseStatus::Complete);
        assert_eq!(body.bytes(), b"abc");
        assert_eq!(buf, b"NEXT");
    }

    #[test]
    fn test_chunked_over_limit() {
        let mut body = Body::new();
        body.set_kind(BodyKind::Chunked);
        body.set_limit(4).unwrap();
        let mut buf = b"5\r\nhello\r\n0\r\n\r\n".to_vec();
        assert_eq!(
            body.feed(&mut buf),
            ParseStatus::Failed(HTTP_PAYLOAD_TOO_LARGE)
        );
    }

    #[test]
    fn test_spill_to_disk() {
        let mut body = sized_body(BODY_SPILL_THRESHOLD + 10);
        let mut buf = vec![b'a'; BODY_SPILL_THRESHOLD + 10];
        assert_eq!(body.feed(&mut buf), ParseStatus::Complete);
        assert!(body.is_spilled());
        assert!(body.bytes().is_empty());
        assert_eq!(body.len(), BODY_SPILL_THRESHOLD + 10);

        let mut out = Vec::new();
        body.write_to(&mut out).unwrap();
        assert_eq!(out.len(), BODY_SPILL_THRESHOLD + 10);
        assert!(out.iter().all(|&b| b == b'a'));
    }

    #[test]
    fn test_spill_file_removed_on_drop() {
        let path;
        {
            let mut body = sized_body(BODY_SPILL_THRESHOLD + 1);
            let mut buf = vec![b'x'; BODY_SPILL_THRESHOLD + 1];
            body.feed(&mut buf);
            path = body.spill.as_ref().unwrap().path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
