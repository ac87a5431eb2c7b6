//! Line reassembly over a chunked byte stream
//!
//! The serial reader hands over whatever bytes arrived since the last read;
//! record boundaries fall wherever they fall. [`LineAssembler`] carries the
//! trailing fragment between calls so that no record is processed before its
//! terminator arrives and no data is lost at chunk boundaries.

/// Reassembles complete, trimmed lines from arbitrarily-split text chunks.
///
/// The yielded sequence of lines is identical for every possible split of
/// the same underlying stream.
#[derive(Debug, Default)]
pub struct LineAssembler {
    carry: String,
}

impl LineAssembler {
    /// Create an assembler with an empty carry-over buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line completed by it.
    ///
    /// Lines are trimmed (which also removes a trailing `\r`); lines that are
    /// empty after trimming are discarded. The final unterminated fragment is
    /// retained for the next call.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.carry.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Feed raw bytes, decoding them lossily as UTF-8.
    ///
    /// Telemetry payloads are ASCII; anything else is mangled here and then
    /// stripped by the decoder's printable-character pre-pass.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.feed(&String::from_utf8_lossy(bytes))
    }

    /// Discard the pending fragment.
    ///
    /// Called when the channel closes: an unterminated trailing record is an
    /// incomplete record, not an error.
    pub fn reset(&mut self) {
        if !self.carry.is_empty() {
            tracing::debug!("discarding {}-byte partial line at stream end", self.carry.len());
            self.carry.clear();
        }
    }

    /// The current unterminated fragment
    pub fn pending(&self) -> &str {
        &self.carry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_points_do_not_matter() {
        let mut assembler = LineAssembler::new();
        let mut lines = Vec::new();
        lines.extend(assembler.feed("ab"));
        lines.extend(assembler.feed("c\nde"));
        lines.extend(assembler.feed("f\n"));
        assert_eq!(lines, vec!["abc", "def"]);
        assert_eq!(assembler.pending(), "");
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.feed("first\r\n\r\n  \nsecond\n");
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn test_fragment_survives_between_calls() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.feed("+RCV=42,3,10").is_empty());
        assert_eq!(assembler.pending(), "+RCV=42,3,10");
        let lines = assembler.feed("00.5,20.1,1013.2,-10,0\n");
        assert_eq!(lines, vec!["+RCV=42,3,1000.5,20.1,1013.2,-10,0"]);
    }

    #[test]
    fn test_reset_discards_trailing_fragment() {
        let mut assembler = LineAssembler::new();
        assembler.feed("incomplete record");
        assembler.reset();
        assert_eq!(assembler.pending(), "");
        // Bytes after a reset start a fresh record
        assert_eq!(assembler.feed("fresh\n"), vec!["fresh"]);
    }

    #[test]
    fn test_many_lines_in_one_chunk() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.feed("1,2\n3,4\n5,6\n7");
        assert_eq!(lines, vec!["1,2", "3,4", "5,6"]);
        assert_eq!(assembler.pending(), "7");
    }
}
