use rustyline::Context;
use rustyline::Helper;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use servo::{KEYWORDS, NATIVE_FUNCTIONS, Scanner, TokenType};
use std::cell::RefCell;

/// Rustyline helper that provides completion and highlighting for the servo REPL
pub struct ServoHelper {
    variables: RefCell<Vec<String>>,
}

impl ServoHelper {
    pub fn new() -> Self {
        Self {
            variables: RefCell::new(Vec::new()),
        }
    }

    pub fn set_variables(&self, vars: Vec<String>) {
        *self.variables.borrow_mut() = vars;
    }

    /// Find the start position of the current word being typed
    fn find_word_start(line: &str, pos: usize) -> usize {
        let before_cursor = &line[..pos];
        for (i, c) in before_cursor.char_indices().rev() {
            if !servo::is_identifier_char(c) {
                return i + c.len_utf8();
            }
        }
        0
    }

    /// Keywords, built-ins and known globals starting with `prefix`, sorted
    /// and without duplicates.
    fn get_completions(prefix: &str, variables: &[String]) -> Vec<String> {
        if prefix.is_empty() {
            return Vec::new();
        }

        let keywords = KEYWORDS.keys().copied();
        let natives = NATIVE_FUNCTIONS.iter().copied();
        let mut completions: Vec<String> = keywords
            .chain(natives)
            .chain(variables.iter().map(String::as_str))
            .filter(|candidate| candidate.starts_with(prefix))
            .map(str::to_string)
            .collect();

        completions.sort();
        completions.dedup();
        completions
    }

    /// Highlight a line of servo code with ANSI colors using the scanner
    pub fn highlight_line(line: &str, variables: &[String]) -> String {
        if line.is_empty() {
            return String::new();
        }

        const KEYWORD: &str = "\x1b[35m"; // Magenta
        const STRING: &str = "\x1b[32m"; // Green
        const NUMBER: &str = "\x1b[33m"; // Yellow
        const COMMENT: &str = "\x1b[90m"; // Gray
        const VARIABLE: &str = "\x1b[36m"; // Cyan
        const RESET: &str = "\x1b[0m";

        let mut result = String::new();
        let mut pos = 0usize; // byte position in line

        // Scan errors are skipped; their text is copied through as-is below.
        for token in Scanner::with_comments(line).flatten() {
            if token.token_type == TokenType::Eof {
                break;
            }

            if token.span.start > pos {
                result.push_str(&line[pos..token.span.start]);
            }

            let color = match token.token_type {
                TokenType::Comment => Some(COMMENT),
                TokenType::String => Some(STRING),
                TokenType::Integer | TokenType::Float => Some(NUMBER),
                TokenType::Identifier if variables.contains(&token.lexeme) => Some(VARIABLE),
                TokenType::Identifier => None,
                _ if KEYWORDS.contains_key(token.lexeme.as_str()) => Some(KEYWORD),
                _ => None,
            };

            match color {
                Some(c) => {
                    result.push_str(c);
                    result.push_str(&line[token.span.clone()]);
                    result.push_str(RESET);
                }
                None => result.push_str(&line[token.span.clone()]),
            }
            pos = token.span.end;
        }

        // Trailing whitespace, or characters after a scan error
        if pos < line.len() {
            result.push_str(&line[pos..]);
        }

        result
    }
}

impl Helper for ServoHelper {}

impl Highlighter for ServoHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> std::borrow::Cow<'l, str> {
        let variables = self.variables.borrow();
        std::borrow::Cow::Owned(Self::highlight_line(line, &variables))
    }

    fn highlight_char(
        &self,
        _line: &str,
        _pos: usize,
        _kind: rustyline::highlight::CmdKind,
    ) -> bool {
        true // Always re-highlight
    }
}

impl Hinter for ServoHelper {
    type Hint = String;
}
impl Validator for ServoHelper {}

impl Completer for ServoHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = Self::find_word_start(line, pos);
        let prefix = &line[start..pos];
        let variables = self.variables.borrow();
        let completions = Self::get_completions(prefix, &variables);

        let pairs: Vec<Pair> = completions
            .into_iter()
            .map(|s| Pair {
                display: s.clone(),
                replacement: s,
            })
            .collect();

        Ok((start, pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustyline::history::DefaultHistory;

    fn complete(helper: &ServoHelper, line: &str) -> (usize, Vec<String>) {
        let history = DefaultHistory::new();
        let (start, pairs) = helper
            .complete(line, line.len(), &Context::new(&history))
            .unwrap();
        (start, pairs.into_iter().map(|p| p.replacement).collect())
    }

    #[test]
    fn helper_completes_keyword_at_start() {
        let helper = ServoHelper::new();
        let (start, completions) = complete(&helper, "pri");
        assert_eq!(start, 0);
        assert_eq!(completions, vec!["print", "printl"]);
    }

    #[test]
    fn helper_completes_after_space() {
        let helper = ServoHelper::new();
        let (start, completions) = complete(&helper, "print x");
        assert_eq!(start, 6);
        assert!(completions.is_empty());
    }

    #[test]
    fn helper_completes_variables() {
        let helper = ServoHelper::new();
        helper.set_variables(vec!["counter".to_string()]);
        let (start, completions) = complete(&helper, "print cou");
        assert_eq!(start, 6);
        assert_eq!(completions, vec!["counter"]);
    }

    #[test]
    fn helper_updates_variables() {
        let helper = ServoHelper::new();
        helper.set_variables(vec!["xray".to_string()]);
        helper.set_variables(vec!["yankee".to_string()]);
        assert_eq!(complete(&helper, "y").1, vec!["yankee"]);
        assert!(complete(&helper, "xr").1.is_empty());
    }

    #[test]
    fn find_word_start_positions() {
        assert_eq!(ServoHelper::find_word_start("pri", 3), 0);
        assert_eq!(ServoHelper::find_word_start("print x", 7), 6);
        assert_eq!(ServoHelper::find_word_start("1 + th", 6), 4);
        assert_eq!(ServoHelper::find_word_start("a.b", 3), 2);
        assert_eq!(ServoHelper::find_word_start("", 0), 0);
    }

    #[test]
    fn get_completions_includes_natives() {
        let completions = ServoHelper::get_completions("cl", &[]);
        assert_eq!(completions, vec!["class", "clock"]);
        assert_eq!(ServoHelper::get_completions("le", &[]), vec!["len", "let"]);
    }

    #[test]
    fn get_completions_merges_duplicates() {
        // Natives also show up in the interpreter's variable list.
        let vars = vec!["clock".to_string(), "len".to_string()];
        assert_eq!(ServoHelper::get_completions("clo", &vars), vec!["clock"]);
    }

    #[test]
    fn get_completions_empty_or_unknown_prefix() {
        assert!(ServoHelper::get_completions("", &["x".to_string()]).is_empty());
        assert!(ServoHelper::get_completions("xyz", &[]).is_empty());
    }

    #[test]
    fn highlight_keywords() {
        let result = ServoHelper::highlight_line("print", &[]);
        assert_eq!(result, "\x1b[35mprint\x1b[0m");
    }

    #[test]
    fn highlight_literals() {
        let result = ServoHelper::highlight_line("print \"hi\" + 4.5", &[]);
        assert!(result.contains("\x1b[32m\"hi\"\x1b[0m"));
        assert!(result.contains("\x1b[33m4.5\x1b[0m"));
    }

    #[test]
    fn highlight_comments() {
        assert_eq!(
            ServoHelper::highlight_line("// note", &[]),
            "\x1b[90m// note\x1b[0m"
        );
        let result = ServoHelper::highlight_line("print /* inline */ 42", &[]);
        assert!(result.contains("\x1b[35m"));
        assert!(result.contains("\x1b[90m/* inline */"));
        assert!(result.contains("\x1b[33m42"));
    }

    #[test]
    fn highlight_empty_returns_empty() {
        assert_eq!(ServoHelper::highlight_line("", &[]), "");
    }

    #[test]
    fn highlight_handles_scanner_errors() {
        let result = ServoHelper::highlight_line("print @", &[]);
        assert_eq!(strip_ansi(&result), "print @");
    }

    #[test]
    fn highlight_preserves_structure() {
        let input = "var  x = 1 + 2;  ";
        let result = ServoHelper::highlight_line(input, &[]);
        assert_eq!(strip_ansi(&result), input);
    }

    #[test]
    fn highlighter_trait_uses_variables() {
        let helper = ServoHelper::new();
        helper.set_variables(vec!["total".to_string()]);

        let result = helper.highlight("print total", 0);
        assert!(result.contains("\x1b[35mprint"));
        assert!(result.contains("\x1b[36mtotal"));
    }

    /// Helper to strip ANSI escape codes for testing
    fn strip_ansi(s: &str) -> String {
        let mut result = String::new();
        let mut in_escape = false;
        for c in s.chars() {
            if c == '\x1b' {
                in_escape = true;
            } else if in_escape {
                if c == 'm' {
                    in_escape = false;
                }
            } else {
                result.push(c);
            }
        }
        result
    }
}
