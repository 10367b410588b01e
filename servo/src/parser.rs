use std::rc::Rc;

use crate::ast::{Expr, ExprId, FunctionDecl, Stmt};
use crate::error::ServoError;
use crate::stack::ensure_sufficient_stack;
use crate::token::{Literal, Token, TokenType};

const MAX_ARGUMENTS: usize = 255;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<ServoError>,
    next_id: usize,
}

impl Parser {
    /// `tokens` must end with an `Eof` token, as the scanner produces.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
            next_id: 0,
        }
    }

    /// Start numbering expression ids at `first_id`.
    ///
    /// A REPL parses many inputs against one interpreter, so ids must keep
    /// growing across inputs.
    pub fn starting_at(mut self, first_id: usize) -> Self {
        self.next_id = first_id;
        self
    }

    /// The id the next resolvable expression would receive.
    pub fn next_id(&self) -> usize {
        self.next_id
    }

    pub fn parse(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }
        statements
    }

    pub fn take_errors(&mut self) -> Vec<ServoError> {
        std::mem::take(&mut self.errors)
    }

    fn fresh_id(&mut self) -> ExprId {
        let id = ExprId(self.next_id);
        self.next_id += 1;
        id
    }

    fn declaration(&mut self) -> Option<Stmt> {
        ensure_sufficient_stack(|| self.declaration_or_recover())
    }

    fn declaration_or_recover(&mut self) -> Option<Stmt> {
        let result = if self.match_types(&[TokenType::Class]) {
            self.class_declaration()
        } else if self.match_types(&[TokenType::Function]) {
            self.function("function").map(Stmt::Function)
        } else if self.match_types(&[TokenType::Var]) {
            self.var_declaration()
        } else {
            self.statement()
        };

        match result {
            Ok(stmt) => Some(stmt),
            Err(e) => {
                self.errors.push(e);
                self.synchronize();
                None
            }
        }
    }

    fn class_declaration(&mut self) -> Result<Stmt, ServoError> {
        let name = self
            .consume(TokenType::Identifier, "Expect class name.")?
            .clone();

        let superclass = if self.match_types(&[TokenType::Less]) {
            let superclass_name = self
                .consume(TokenType::Identifier, "Expect superclass name.")?
                .clone();
            Some(Expr::Variable {
                id: self.fresh_id(),
                name: superclass_name,
            })
        } else {
            None
        };

        self.consume(TokenType::LeftBrace, "Expect '{' before class body.")?;

        let mut methods = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            methods.push(self.function("method")?);
        }

        self.consume(TokenType::RightBrace, "Expect '}' after class body.")?;

        Ok(Stmt::Class {
            name,
            superclass,
            methods,
        })
    }

    fn function(&mut self, kind: &str) -> Result<Rc<FunctionDecl>, ServoError> {
        let name = self
            .consume(TokenType::Identifier, &format!("Expect {} name.", kind))?
            .clone();
        self.consume(
            TokenType::LeftParen,
            &format!("Expect '(' after {} name.", kind),
        )?;

        let mut params = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if params.len() >= MAX_ARGUMENTS {
                    let error = ServoError::parse(self.peek(), "Can't have more than 255 parameters.");
                    self.errors.push(error);
                }
                params.push(
                    self.consume(TokenType::Identifier, "Expect parameter name.")?
                        .clone(),
                );
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.")?;

        self.consume(
            TokenType::LeftBrace,
            &format!("Expect '{{' before {} body.", kind),
        )?;
        let body = self.block()?;

        Ok(Rc::new(FunctionDecl { name, params, body }))
    }

    fn var_declaration(&mut self) -> Result<Stmt, ServoError> {
        let name = self
            .consume(TokenType::Identifier, "Expect variable name.")?
            .clone();

        let initializer = if self.match_types(&[TokenType::Equal]) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(
            TokenType::Semicolon,
            "Expect ';' after variable declaration.",
        )?;
        Ok(Stmt::Var { name, initializer })
    }

    fn statement(&mut self) -> Result<Stmt, ServoError> {
        if self.match_types(&[TokenType::For]) {
            self.for_statement()
        } else if self.match_types(&[TokenType::If]) {
            self.if_statement()
        } else if self.match_types(&[TokenType::Print]) {
            self.print_statement()
        } else if self.match_types(&[TokenType::Return]) {
            self.return_statement()
        } else if self.match_types(&[TokenType::While]) {
            self.while_statement()
        } else if self.match_types(&[TokenType::LeftBrace]) {
            Ok(Stmt::Block {
                statements: self.block()?,
            })
        } else {
            self.expression_statement()
        }
    }

    fn for_statement(&mut self) -> Result<Stmt, ServoError> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if self.match_types(&[TokenType::Semicolon]) {
            None
        } else if self.match_types(&[TokenType::Var]) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if self.check(TokenType::Semicolon) {
            Expr::Literal {
                value: Literal::Bool(true),
            }
        } else {
            self.expression()?
        };
        self.consume(TokenType::Semicolon, "Expect ';' after loop condition.")?;

        let increment = if self.check(TokenType::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;

        // Desugar: { initializer; while (condition) { body; increment; } }
        if let Some(increment) = increment {
            body = Stmt::Block {
                statements: vec![
                    body,
                    Stmt::Expression {
                        expression: increment,
                    },
                ],
            };
        }

        body = Stmt::While {
            condition,
            body: Box::new(body),
        };

        if let Some(initializer) = initializer {
            body = Stmt::Block {
                statements: vec![initializer, body],
            };
        }

        Ok(body)
    }

    fn if_statement(&mut self) -> Result<Stmt, ServoError> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_types(&[TokenType::Else]) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn print_statement(&mut self) -> Result<Stmt, ServoError> {
        let expression = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after value.")?;
        Ok(Stmt::Print { expression })
    }

    fn return_statement(&mut self) -> Result<Stmt, ServoError> {
        let keyword = self.previous().clone();
        let value = if self.check(TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::Semicolon, "Expect ';' after return value.")?;
        Ok(Stmt::Return { keyword, value })
    }

    fn while_statement(&mut self) -> Result<Stmt, ServoError> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after condition.")?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    /// Parses the statements of a block whose `{` was already consumed.
    fn block(&mut self) -> Result<Vec<Stmt>, ServoError> {
        let mut statements = Vec::new();

        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> Result<Stmt, ServoError> {
        let expression = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt::Expression { expression })
    }

    fn expression(&mut self) -> Result<Expr, ServoError> {
        ensure_sufficient_stack(|| self.assignment())
    }

    fn assignment(&mut self) -> Result<Expr, ServoError> {
        let expr = self.or()?;

        if self.match_types(&[TokenType::Equal]) {
            let equals = self.previous().clone();
            let value = Box::new(self.assignment()?);

            return match expr {
                Expr::Variable { name, .. } => Ok(Expr::Assign {
                    id: self.fresh_id(),
                    name,
                    value,
                }),
                Expr::Get { object, name } => Ok(Expr::Set {
                    object,
                    name,
                    value,
                }),
                other => {
                    // Reported, but the parser is not confused: keep going.
                    self.errors
                        .push(ServoError::parse(&equals, "Invalid assignment target."));
                    Ok(other)
                }
            };
        }

        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, ServoError> {
        let mut expr = self.and()?;

        while self.match_types(&[TokenType::Or]) {
            let operator = self.previous().clone();
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, ServoError> {
        let mut expr = self.equality()?;

        while self.match_types(&[TokenType::And]) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, ServoError> {
        self.left_associative(
            &[TokenType::BangEqual, TokenType::EqualEqual],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, ServoError> {
        self.left_associative(
            &[
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::LessEqual,
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, ServoError> {
        self.left_associative(&[TokenType::Minus, TokenType::Plus], Self::factor)
    }

    fn factor(&mut self) -> Result<Expr, ServoError> {
        self.left_associative(
            &[TokenType::Slash, TokenType::Star, TokenType::Percent],
            Self::power,
        )
    }

    fn left_associative(
        &mut self,
        operators: &[TokenType],
        operand: fn(&mut Self) -> Result<Expr, ServoError>,
    ) -> Result<Expr, ServoError> {
        let mut expr = operand(self)?;

        while self.match_types(operators) {
            let operator = self.previous().clone();
            let right = operand(self)?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    /// `^` binds tighter than `*` and groups to the right: `2 ^ 3 ^ 2` is `2 ^ 9`.
    fn power(&mut self) -> Result<Expr, ServoError> {
        let base = self.unary()?;

        if self.match_types(&[TokenType::Caret]) {
            let operator = self.previous().clone();
            let exponent = self.power()?;
            return Ok(Expr::Binary {
                left: Box::new(base),
                operator,
                right: Box::new(exponent),
            });
        }

        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, ServoError> {
        if self.match_types(&[TokenType::Bang, TokenType::Minus]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            return Ok(Expr::Unary {
                operator,
                right: Box::new(right),
            });
        }
        self.call()
    }

    fn call(&mut self) -> Result<Expr, ServoError> {
        let mut expr = self.primary()?;

        loop {
            if self.match_types(&[TokenType::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.match_types(&[TokenType::Dot]) {
                let name = self
                    .consume(TokenType::Identifier, "Expect property name after '.'.")?
                    .clone();
                expr = Expr::Get {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, ServoError> {
        let mut arguments = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if arguments.len() >= MAX_ARGUMENTS {
                    let error = ServoError::parse(self.peek(), "Can't have more than 255 arguments.");
                    self.errors.push(error);
                }
                arguments.push(self.expression()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let paren = self
            .consume(TokenType::RightParen, "Expect ')' after arguments.")?
            .clone();

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> Result<Expr, ServoError> {
        let token = self.peek().clone();
        let expr = match token.token_type {
            TokenType::False => Expr::Literal {
                value: Literal::Bool(false),
            },
            TokenType::True => Expr::Literal {
                value: Literal::Bool(true),
            },
            TokenType::Nil => Expr::Literal {
                value: Literal::Nil,
            },
            TokenType::Integer | TokenType::Float | TokenType::String => Expr::Literal {
                value: token.literal.clone().unwrap_or(Literal::Nil),
            },
            TokenType::This => Expr::This {
                id: self.fresh_id(),
                keyword: token,
            },
            TokenType::Super => {
                self.advance();
                self.consume(TokenType::Dot, "Expect '.' after 'super'.")?;
                let method = self
                    .consume(TokenType::Identifier, "Expect superclass method name.")?
                    .clone();
                return Ok(Expr::Super {
                    id: self.fresh_id(),
                    keyword: token,
                    method,
                });
            }
            TokenType::Identifier => Expr::Variable {
                id: self.fresh_id(),
                name: token,
            },
            TokenType::LeftParen => {
                self.advance();
                let expression = self.expression()?;
                self.consume(TokenType::RightParen, "Expect ')' after expression.")?;
                return Ok(Expr::Grouping {
                    expression: Box::new(expression),
                });
            }
            _ => return Err(ServoError::parse(&token, "Expect expression.")),
        };

        self.advance();
        Ok(expr)
    }

    // Helper methods

    fn match_types(&mut self, types: &[TokenType]) -> bool {
        for t in types {
            if self.check(*t) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token, ServoError> {
        if self.check(token_type) {
            return Ok(self.advance());
        }
        Err(ServoError::parse(self.peek(), message))
    }

    fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if self.previous().token_type == TokenType::Semicolon {
                return;
            }

            match self.peek().token_type {
                TokenType::Class
                | TokenType::Function
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {}
            }

            self.advance();
        }
    }

    fn check(&self, token_type: TokenType) -> bool {
        if self.is_at_end() {
            return false;
        }
        self.peek().token_type == token_type
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> (Vec<Stmt>, Vec<ServoError>) {
        let tokens: Vec<Token> = Scanner::new(source).map(|t| t.unwrap()).collect();
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        (statements, parser.take_errors())
    }

    fn parse_expr(source: &str) -> Expr {
        let (statements, errors) = parse(&format!("{};", source));
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        match statements.into_iter().next() {
            Some(Stmt::Expression { expression }) => expression,
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn parses_precedence() {
        assert_eq!(parse_expr("1 + 2 * 3").to_string(), "(+ 1 (* 2 3))");
        assert_eq!(parse_expr("(1 + 2) * 3").to_string(), "(* (group (+ 1 2)) 3)");
        assert_eq!(parse_expr("-a < b == !c").to_string(), "(== (< (- a) b) (! c))");
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_factor() {
        assert_eq!(parse_expr("2 ^ 3 ^ 2").to_string(), "(^ 2 (^ 3 2))");
        assert_eq!(parse_expr("2 * 3 ^ 2").to_string(), "(* 2 (^ 3 2))");
        assert_eq!(parse_expr("10 % 4").to_string(), "(% 10 4)");
    }

    #[test]
    fn parses_logical_operators() {
        assert_eq!(
            parse_expr("a or b and c").to_string(),
            "(or a (and b c))"
        );
    }

    #[test]
    fn parses_calls_and_property_chains() {
        assert_eq!(
            parse_expr("a.b(1, 2).c").to_string(),
            "(. (call (. a b) 1 2) c)"
        );
    }

    #[test]
    fn assignment_to_property_becomes_set() {
        assert_eq!(parse_expr("a.b = 3").to_string(), "(.= a b 3)");
        assert!(matches!(parse_expr("x = 1"), Expr::Assign { .. }));
    }

    #[test]
    fn invalid_assignment_target_is_reported_without_panic_mode() {
        let (statements, errors) = parse("1 = 2; print 3;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("Invalid assignment target."));
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn parses_super_and_this() {
        assert_eq!(parse_expr("super.greet()").to_string(), "(call (super greet))");
        assert_eq!(parse_expr("this.name").to_string(), "(. this name)");
    }

    #[test]
    fn super_requires_method_name() {
        let (_, errors) = parse("super;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("Expect '.' after 'super'."));
    }

    #[test]
    fn expression_ids_are_unique_and_start_at_offset() {
        let tokens: Vec<Token> = Scanner::new("a = b + c;").map(|t| t.unwrap()).collect();
        let mut parser = Parser::new(tokens).starting_at(10);
        let statements = parser.parse();
        assert_eq!(parser.next_id(), 14);

        let Stmt::Expression {
            expression: Expr::Assign { id, value, .. },
        } = &statements[0]
        else {
            panic!("Expected assignment");
        };
        // Operands are numbered before the assignment that wraps them.
        assert_eq!(*id, ExprId(13));
        let Expr::Binary { left, right, .. } = value.as_ref() else {
            panic!("Expected binary");
        };
        assert!(matches!(left.as_ref(), Expr::Variable { id: ExprId(11), .. }));
        assert!(matches!(right.as_ref(), Expr::Variable { id: ExprId(12), .. }));
    }

    #[test]
    fn parses_class_with_superclass_and_methods() {
        let (statements, errors) = parse("class B < A { init(x) { this.x = x; } get() { return this.x; } }");
        assert!(errors.is_empty(), "{:?}", errors);
        let Stmt::Class {
            name,
            superclass,
            methods,
        } = &statements[0]
        else {
            panic!("Expected class");
        };
        assert_eq!(name.lexeme, "B");
        assert!(matches!(superclass, Some(Expr::Variable { name, .. }) if name.lexeme == "A"));
        assert_eq!(methods.len(), 2);
        assert_eq!(methods[0].name.lexeme, "init");
        assert_eq!(methods[0].params.len(), 1);
    }

    #[test]
    fn parses_function_declaration() {
        let (statements, errors) = parse("function add(a, b) { return a + b; }");
        assert!(errors.is_empty());
        let Stmt::Function(decl) = &statements[0] else {
            panic!("Expected function");
        };
        assert_eq!(decl.name.lexeme, "add");
        let params: Vec<&str> = decl.params.iter().map(|p| p.lexeme.as_str()).collect();
        assert_eq!(params, vec!["a", "b"]);
        assert!(matches!(decl.body[0], Stmt::Return { .. }));
    }

    #[test]
    fn for_loop_desugars_to_while_in_block() {
        let (statements, errors) = parse("for (var i = 0; i < 3; i = i + 1) print i;");
        assert!(errors.is_empty());
        let Stmt::Block { statements: outer } = &statements[0] else {
            panic!("Expected block");
        };
        assert!(matches!(outer[0], Stmt::Var { .. }));
        let Stmt::While { body, .. } = &outer[1] else {
            panic!("Expected while");
        };
        let Stmt::Block { statements: inner } = body.as_ref() else {
            panic!("Expected body block");
        };
        assert!(matches!(inner[0], Stmt::Print { .. }));
        assert!(matches!(inner[1], Stmt::Expression { .. }));
    }

    #[test]
    fn for_loop_without_clauses_loops_on_true() {
        let (statements, errors) = parse("for (;;) print 1;");
        assert!(errors.is_empty());
        assert!(matches!(
            &statements[0],
            Stmt::While {
                condition: Expr::Literal {
                    value: Literal::Bool(true)
                },
                ..
            }
        ));
    }

    #[test]
    fn parses_if_else_and_var_without_initializer() {
        let (statements, errors) = parse("var x; if (x) print 1; else print 2;");
        assert!(errors.is_empty());
        assert!(matches!(&statements[0], Stmt::Var { initializer: None, .. }));
        assert!(matches!(
            &statements[1],
            Stmt::If {
                else_branch: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn return_without_value() {
        let (statements, errors) = parse("return;");
        assert!(errors.is_empty());
        assert!(matches!(&statements[0], Stmt::Return { value: None, .. }));
    }

    #[test]
    fn missing_semicolon_reports_at_end() {
        let (_, errors) = parse("print 1");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "[line 1] Error at end: Expect ';' after value."
        );
    }

    #[test]
    fn recovers_and_reports_multiple_errors() {
        let (statements, errors) = parse("var = 1;\nprint 2;\n+;\nprint 3;");
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, ServoError::Parse { .. })));
        // Both print statements survive recovery.
        let prints = statements
            .iter()
            .filter(|s| matches!(s, Stmt::Print { .. }))
            .count();
        assert_eq!(prints, 2);
    }

    #[test]
    fn too_many_arguments_is_reported() {
        let args: Vec<String> = (0..256).map(|i| i.to_string()).collect();
        let (_, errors) = parse(&format!("f({});", args.join(", ")));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("more than 255 arguments"));
    }
}
