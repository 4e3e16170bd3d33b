//! Reassembly of arbitrarily chunked text into complete lines
//!
//! Chunks read from a child process carry no line-boundary guarantee. A
//! [`LineAccumulator`] holds back the unterminated tail of everything it has
//! seen and hands out each line as soon as its terminator arrives.

/// Returns true for every character treated as a line terminator.
///
/// CR, LF, NEL, LS, PS and FF all end a line; a CR immediately followed by
/// LF is a single terminator.
fn is_line_terminator(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{000C}' | '\u{0085}' | '\u{2028}' | '\u{2029}'
    )
}

/// Stateful buffer converting a stream of text chunks into lines
#[derive(Debug, Default, Clone)]
pub struct LineAccumulator {
    buffer: String,
    /// The previous chunk ended in a bare CR, so a leading LF completes a CRLF
    after_cr: bool,
}

impl LineAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, in order.
    ///
    /// Terminators are stripped. Text after the last terminator stays
    /// buffered until a later chunk terminates it; it is never emitted
    /// implicitly.
    pub fn append(&mut self, chunk: &str) -> Vec<String> {
        let mut lines = Vec::new();
        if chunk.is_empty() {
            return lines;
        }

        let mut rest = chunk;
        if std::mem::take(&mut self.after_cr) {
            rest = rest.strip_prefix('\n').unwrap_or(rest);
        }

        while let Some((idx, terminator)) = rest
            .char_indices()
            .find(|(_, c)| is_line_terminator(*c))
        {
            self.buffer.push_str(&rest[..idx]);
            lines.push(std::mem::take(&mut self.buffer));

            let mut consumed = idx + terminator.len_utf8();
            if terminator == '\r' {
                if rest[consumed..].starts_with('\n') {
                    consumed += 1;
                } else if consumed == rest.len() {
                    self.after_cr = true;
                }
            }
            rest = &rest[consumed..];
        }

        self.buffer.push_str(rest);
        lines
    }

    /// The buffered partial line
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Take the buffered partial line, if any.
    ///
    /// Only called on request; dropping the accumulator discards the tail.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
