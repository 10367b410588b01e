use servo::KEYWORDS;

/// Multi-line input accumulated by the REPL until its braces balance.
pub struct ReplState {
    buffer: String,
    brace_depth: usize,
    // Delimiter of a string still open at the end of the last line.
    open_string: Option<char>,
}

impl ReplState {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            brace_depth: 0,
            open_string: None,
        }
    }

    pub fn prompt(&self) -> String {
        if self.brace_depth == 0 {
            "> ".to_string()
        } else {
            format!("..{} ", self.brace_depth)
        }
    }

    /// Returns true if ready to execute (braces balanced, no open string).
    /// Braces inside strings and line comments don't count.
    pub fn process_line(&mut self, line: &str) -> bool {
        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            if let Some(delimiter) = self.open_string {
                if ch == delimiter {
                    self.open_string = None;
                }
                continue;
            }
            match ch {
                '"' | '\'' | '`' => self.open_string = Some(ch),
                '/' if chars.peek() == Some(&'/') => break,
                '{' => self.brace_depth += 1,
                '}' => self.brace_depth = self.brace_depth.saturating_sub(1),
                _ => {}
            }
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');

        self.brace_depth == 0 && self.open_string.is_none()
    }

    pub fn take_buffer(&mut self) -> String {
        self.brace_depth = 0;
        self.open_string = None;
        std::mem::take(&mut self.buffer)
    }

    pub fn cancel(&mut self) {
        self.buffer.clear();
        self.brace_depth = 0;
        self.open_string = None;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if input should be auto-printed (expression without semicolon)
    pub fn should_auto_print(input: &str) -> bool {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return false;
        }
        // Line comments are not auto-printed
        if trimmed.starts_with("//") {
            return false;
        }
        // Block comments are not auto-printed
        if trimmed.starts_with("/*") && trimmed.ends_with("*/") {
            return false;
        }

        // Strip trailing line comment for further checks
        let code = if let Some(idx) = trimmed.find("//") {
            trimmed[..idx].trim()
        } else {
            trimmed
        };

        // Strip trailing block comment
        let code = if let Some(start) = code.rfind("/*") {
            if code.ends_with("*/") {
                code[..start].trim()
            } else {
                code
            }
        } else {
            code
        };

        if code.is_empty() {
            return false;
        }

        // Blocks are not auto-printed
        if code.ends_with('}') {
            return false;
        }
        // If it ends with semicolon, it's a statement
        if code.ends_with(';') {
            return false;
        }

        // Don't auto-print if it starts with a keyword (incomplete statement)
        // Let the parser give proper error message
        for keyword in KEYWORDS.keys() {
            if let Some(after_keyword) = code.strip_prefix(keyword) {
                // Make sure it's followed by a space or end of string (not just a prefix match)
                if after_keyword.is_empty() || after_keyword.starts_with(' ') {
                    return false;
                }
            }
        }

        true
    }

    /// Wrap input in a print statement for auto-printing
    pub fn wrap_for_print(input: &str) -> String {
        format!("print {};", input.trim())
    }
}
