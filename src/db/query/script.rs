use super::QueryExecutor;

/// Lexical context of the scanner at the current position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum ScanState {
    #[default]
    Normal,
    SingleQuote,
    DoubleQuote,
    LineComment,
    /// Nesting depth, never zero while in this state.
    BlockComment(usize),
    /// The opening tag, both `$` delimiters included.
    DollarQuote(String),
}

struct StatementBuilder {
    state: ScanState,
    current: String,
    /// True once `current` holds something other than whitespace and comments.
    has_code: bool,
    statements: Vec<String>,
}

impl StatementBuilder {
    fn new() -> Self {
        Self {
            state: ScanState::default(),
            current: String::new(),
            has_code: false,
            statements: Vec::new(),
        }
    }

    fn push_code(&mut self, c: char) {
        if !c.is_whitespace() {
            self.has_code = true;
        }
        self.current.push(c);
    }

    fn push_code_slice(&mut self, chars: &[char]) {
        for &c in chars {
            self.push_code(c);
        }
    }

    fn process_text(&mut self, text: &str) {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut i = 0usize;

        while i < len {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            match self.state {
                ScanState::LineComment => {
                    self.current.push(c);
                    if c == '\n' {
                        self.state = ScanState::Normal;
                    }
                    i += 1;
                }
                ScanState::BlockComment(depth) => {
                    if c == '*' && next == Some('/') {
                        self.current.push_str("*/");
                        self.state = if depth > 1 {
                            ScanState::BlockComment(depth - 1)
                        } else {
                            ScanState::Normal
                        };
                        i += 2;
                    } else if c == '/' && next == Some('*') {
                        self.current.push_str("/*");
                        self.state = ScanState::BlockComment(depth + 1);
                        i += 2;
                    } else {
                        self.current.push(c);
                        i += 1;
                    }
                }
                ScanState::DollarQuote(ref tag) => {
                    let closing_len = if starts_with_at(&chars, i, tag) {
                        Some(tag.chars().count())
                    } else {
                        None
                    };
                    match closing_len {
                        Some(tag_len) => {
                            self.push_code_slice(&chars[i..i + tag_len]);
                            self.state = ScanState::Normal;
                            i += tag_len;
                        }
                        None => {
                            self.push_code(c);
                            i += 1;
                        }
                    }
                }
                ScanState::SingleQuote => {
                    // '' inside a literal closes and reopens, which leaves the state unchanged
                    self.push_code(c);
                    if c == '\'' {
                        self.state = ScanState::Normal;
                    }
                    i += 1;
                }
                ScanState::DoubleQuote => {
                    self.push_code(c);
                    if c == '"' {
                        self.state = ScanState::Normal;
                    }
                    i += 1;
                }
                ScanState::Normal => {
                    i += self.process_normal(&chars, i);
                }
            }
        }
    }

    /// Handles one token outside any quote, comment or dollar body and
    /// returns how many characters it consumed.
    fn process_normal(&mut self, chars: &[char], i: usize) -> usize {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '-' && next == Some('-') {
            self.current.push_str("--");
            self.state = ScanState::LineComment;
            return 2;
        }

        if c == '/' && next == Some('*') {
            self.current.push_str("/*");
            self.state = ScanState::BlockComment(1);
            return 2;
        }

        if c == '\'' {
            self.push_code(c);
            self.state = ScanState::SingleQuote;
            return 1;
        }

        if c == '"' {
            self.push_code(c);
            self.state = ScanState::DoubleQuote;
            return 1;
        }

        if c == '$' {
            if let Some(tag_len) = dollar_tag_len(chars, i) {
                let tag: String = chars[i..i + tag_len].iter().collect();
                self.push_code_slice(&chars[i..i + tag_len]);
                self.state = ScanState::DollarQuote(tag);
                return tag_len;
            }
        }

        if c == ';' {
            self.end_statement();
            return 1;
        }

        self.push_code(c);
        1
    }

    fn end_statement(&mut self) {
        if self.has_code {
            let trimmed = self.current.trim();
            if !trimmed.is_empty() {
                self.statements.push(trimmed.to_string());
            }
        }
        self.current.clear();
        self.has_code = false;
    }

    /// Flushes whatever is buffered, even when a quote, comment or dollar
    /// body was left open.
    fn finalize(&mut self) {
        self.end_statement();
        self.state = ScanState::Normal;
    }

    fn take_statements(&mut self) -> Vec<String> {
        std::mem::take(&mut self.statements)
    }
}

/// Length of a `$tag$` opener at `start`, where tag is `[A-Za-z0-9_]*`.
fn dollar_tag_len(chars: &[char], start: usize) -> Option<usize> {
    if chars.get(start) != Some(&'$') {
        return None;
    }
    let mut end = start + 1;
    while let Some(&c) = chars.get(end) {
        if c == '$' {
            return Some(end + 1 - start);
        }
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        end += 1;
    }
    None
}

fn starts_with_at(chars: &[char], start: usize, needle: &str) -> bool {
    let mut pos = start;
    for expected in needle.chars() {
        if chars.get(pos) != Some(&expected) {
            return false;
        }
        pos += 1;
    }
    true
}

impl QueryExecutor {
    /// Splits a SQL script into trimmed statements in source order.
    ///
    /// A `;` ends a statement only outside string literals, quoted
    /// identifiers, comments and dollar-quoted bodies. Comments stay in the
    /// text of the statement they belong to, but a segment made only of
    /// comments and whitespace is not returned. The last statement does not
    /// need a terminating `;`, and an unterminated quote or body at end of
    /// input is returned as-is rather than reported.
    pub fn split_statements(sql: &str) -> Vec<String> {
        let mut builder = StatementBuilder::new();
        builder.process_text(sql);
        builder.finalize();
        builder.take_statements()
    }
}
