use miette::SourceOffset;

#[derive(Debug, Clone)]
pub struct Cursor<'buf> {
    iter: std::str::Chars<'buf>,
    pos: SourceOffset,
    eof: bool,
}

impl<'buf> Cursor<'buf> {
    pub fn new(buf: &'buf str) -> Self {
        Self {
            iter: buf.chars(),
            pos: 0.into(),
            eof: false,
        }
    }

    /// Returns the position of the immediately following character.
    pub fn pos(&self) -> SourceOffset {
        self.pos
    }

    pub fn peek(&self) -> Option<char> {
        self.iter.clone().next()
    }

    pub fn peek_nth(&self, n: usize) -> Option<char> {
        self.iter.clone().nth(n)
    }

    pub fn remaining(&self) -> &'buf str {
        self.iter.as_str()
    }

    pub fn starts_with(&self, value: &str) -> bool {
        self.remaining().starts_with(value)
    }

    pub fn consume_expecting(&mut self, expected: &str) -> Option<&'buf str> {
        self.starts_with(expected)
            .then(|| self.consume_n(expected.chars().count()))
    }

    pub fn consume_n(&mut self, n: usize) -> &'buf str {
        let remaining = self.remaining();
        let start = self.pos.offset();

        for _ in 0..n {
            self.next();
        }

        let end = self.pos.offset();

        &remaining[0..(end - start)]
    }

    pub fn consume_while(&mut self, mut predicate: impl FnMut(char) -> bool) -> &'buf str {
        self.consume_n(self.iter.clone().take_while(|&c| predicate(c)).count())
    }

    /// Consumes the rest of the current line, including the line terminator.
    /// The returned slice excludes the terminator.
    pub fn consume_line(&mut self) -> &'buf str {
        let line = self.consume_while(|c| c != '\n');
        self.consume_expecting("\n");

        line.strip_suffix('\r').unwrap_or(line)
    }
}

impl<'buf> Iterator for Cursor<'buf> {
    type Item = char;

    fn next(&mut self) -> Option<Self::Item> {
        if self.eof {
            return None;
        }

        let c = match self.iter.next() {
            Some(c) => c,
            None => {
                self.eof = true;

                return None;
            }
        };

        self.pos = (self.pos.offset() + c.len_utf8()).into();

        Some(c)
    }
}

#[cfg(test)]
mod tests {
    use super::Cursor;

    #[test]
    fn test_consume_line() {
        let mut cursor = Cursor::new("; test:\r\n; fail: true\nrest");

        assert_eq!(cursor.consume_line(), "; test:");
        assert_eq!(cursor.consume_line(), "; fail: true");
        assert_eq!(cursor.remaining(), "rest");
        assert_eq!(cursor.pos().offset(), 22);
    }
}
