mod ast;
mod environment;
mod error;
mod interpreter;
mod native;
mod parser;
mod resolver;
mod scanner;
mod stack;
mod token;
mod value;

use std::io::Write;

use tracing::debug;

pub use ast::{Expr, ExprId, FunctionDecl, Stmt};
pub use error::ServoError;
pub use interpreter::{DEFAULT_MAX_CALL_DEPTH, Interpreter};
pub use native::NATIVE_FUNCTIONS;
pub use parser::Parser;
pub use resolver::{Resolutions, Resolver};
pub use scanner::{KEYWORDS, Scanner, is_identifier_char, is_identifier_start};
pub use token::{Literal, Token, TokenType};
pub use value::{Callable, Value};

/// Name of the method that runs when a class is called.
pub const INITIALIZER_NAME: &str = "init";

/// A persistent interpreter session: globals, resolved scopes and expression
/// ids all survive from one `run` to the next.
pub struct Servo {
    interpreter: Interpreter,
    next_id: usize,
}

impl Default for Servo {
    fn default() -> Self {
        Self::new()
    }
}

impl Servo {
    pub fn new() -> Self {
        Self {
            interpreter: Interpreter::new(),
            next_id: 0,
        }
    }

    /// Limit on nested calls before a run fails with "Stack overflow.".
    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.interpreter = self.interpreter.with_max_call_depth(max_call_depth);
        self
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.interpreter.variable_names()
    }

    /// Scans, parses, resolves and executes `source`.
    ///
    /// Each stage reports all of its errors and stops the run before the next
    /// stage starts. A runtime fault stops execution at the faulting statement;
    /// whatever earlier statements defined is kept.
    pub fn run<O: Write>(&mut self, source: &str, mut stdout: O) -> Result<(), Vec<ServoError>> {
        let mut errors = Vec::new();
        let mut tokens = Vec::new();
        for result in Scanner::new(source) {
            match result {
                Ok(token) => tokens.push(token),
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            debug!(count = errors.len(), "scan failed");
            return Err(errors);
        }
        debug!(tokens = tokens.len(), "scanned");

        let mut parser = Parser::new(tokens).starting_at(self.next_id);
        let statements = parser.parse();
        errors.extend(parser.take_errors());
        // Ids are consumed even by a failed parse; never hand them out twice.
        self.next_id = parser.next_id();

        if !errors.is_empty() {
            debug!(count = errors.len(), "parse failed");
            return Err(errors);
        }
        debug!(statements = statements.len(), "parsed");

        let resolutions = Resolver::new().resolve(&statements).inspect_err(|errors| {
            debug!(count = errors.len(), "resolution failed");
        })?;
        debug!(locals = resolutions.len(), "resolved");
        self.interpreter.resolve(resolutions);

        self.interpreter
            .interpret(&statements, &mut stdout)
            .map_err(|e| {
                debug!(error = %e, "runtime fault");
                vec![e]
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(servo: &mut Servo, source: &str) -> (String, Vec<ServoError>) {
        let mut stdout = Vec::new();
        let errors = servo.run(source, &mut stdout).err().unwrap_or_default();
        (String::from_utf8(stdout).unwrap(), errors)
    }

    fn output(source: &str) -> String {
        let (output, errors) = run(&mut Servo::new(), source);
        assert!(errors.is_empty(), "Got errors: {:?}", errors);
        output
    }

    #[test]
    fn run_empty_source_returns_no_errors() {
        let mut servo = Servo::new();
        assert!(servo.run("", Vec::new()).is_ok());
        assert!(servo.run("// just a comment", Vec::new()).is_ok());
    }

    #[test]
    fn run_executes_print_statement() {
        assert_eq!(output("print 1 + 2;"), "3\n");
        assert_eq!(output("printl \"hi\";"), "hi\n");
    }

    #[test]
    fn alternate_keywords_are_accepted() {
        assert_eq!(output("let x = null; print x == nil;"), "true\n");
    }

    #[test]
    fn run_returns_multiple_scanner_errors() {
        let (_, errors) = run(&mut Servo::new(), "@$");
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], ServoError::Scan { message, .. } if message.contains('@')));
        assert!(matches!(&errors[1], ServoError::Scan { message, .. } if message.contains('$')));
    }

    #[test]
    fn run_returns_multiple_parser_errors() {
        let (_, errors) = run(&mut Servo::new(), "var = 1; var y");
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, ServoError::Parse { .. })));
    }

    #[test]
    fn parse_errors_prevent_execution() {
        let (output, errors) = run(&mut Servo::new(), "print 1; print ;");
        assert_eq!(errors.len(), 1);
        assert_eq!(output, "");
    }

    #[test]
    fn resolution_errors_prevent_execution() {
        let (output, errors) = run(&mut Servo::new(), "print 1; return 2;");
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ServoError::Resolution { .. }));
        assert_eq!(output, "");
    }

    #[test]
    fn runtime_fault_stops_the_run_but_keeps_earlier_state() {
        let mut servo = Servo::new();
        let (output, errors) = run(&mut servo, "var x = 1; print x; -\"a\"; print 2;");
        assert_eq!(output, "1\n");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_runtime());
        assert_eq!(
            errors[0].to_string(),
            "[line 1] Error at '-': Operand must be a number."
        );

        let (output, errors) = run(&mut servo, "print x;");
        assert!(errors.is_empty());
        assert_eq!(output, "1\n");
    }

    #[test]
    fn repl_persists_functions_and_their_scopes_across_runs() {
        let mut servo = Servo::new();
        run(
            &mut servo,
            "function adder(a) { function add(b) { return a + b; } return add; }",
        );
        run(&mut servo, "{ var unrelated = 0; print unrelated; }");
        let (output, errors) = run(&mut servo, "print adder(2)(3);");
        assert!(errors.is_empty(), "Got errors: {:?}", errors);
        assert_eq!(output, "5\n");
    }

    #[test]
    fn errors_dont_affect_subsequent_runs() {
        let mut servo = Servo::new();
        let (_, errors) = run(&mut servo, "@");
        assert_eq!(errors.len(), 1);

        let (output, errors) = run(&mut servo, "print 42;");
        assert!(errors.is_empty());
        assert_eq!(output, "42\n");
    }

    #[test]
    fn variable_names_lists_globals_and_natives() {
        let mut servo = Servo::new();
        run(&mut servo, "var answer = 42; { var hidden = 1; }");
        let names = servo.variable_names();
        assert!(names.contains(&"answer".to_string()));
        assert!(!names.contains(&"hidden".to_string()));
        for native in NATIVE_FUNCTIONS {
            assert!(names.contains(&native.to_string()));
        }
    }

    #[test]
    fn call_depth_limit_is_configurable() {
        let mut servo = Servo::new().with_max_call_depth(4);
        let source = "function down(n) { if (n == 0) return 0; return down(n - 1); }";
        run(&mut servo, source);

        let (output, errors) = run(&mut servo, "print down(3);");
        assert!(errors.is_empty());
        assert_eq!(output, "0\n");

        let (_, errors) = run(&mut servo, "print down(4);");
        assert_eq!(errors[0].message(), "Stack overflow.");
    }

    // === scenarios ===

    #[test]
    fn fibonacci() {
        let source = r#"
            function fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); }
            print fib(10);
        "#;
        assert_eq!(output(source), "55\n");
    }

    #[test]
    fn super_method_call() {
        let source = r#"
            class A { greet() { return "A"; } }
            class B < A { greet() { return super.greet() + "B"; } }
            print B().greet();
        "#;
        assert_eq!(output(source), "AB\n");
    }

    #[test]
    fn arity_fault_names_expected_and_actual() {
        let (_, errors) = run(&mut Servo::new(), "function f(a) {}\nf(1, 2);");
        assert_eq!(
            errors[0].to_string(),
            "[line 2] Error at ')': Expected 1 arguments but got 2."
        );
    }

    #[test]
    fn string_coercion_is_one_directional() {
        let (_, errors) = run(&mut Servo::new(), "print 1 + \"x\";");
        assert!(errors[0].is_runtime());
        assert_eq!(output("print \"x\" + 1;"), "x1\n");
    }
}
