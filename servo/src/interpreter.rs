use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::INITIALIZER_NAME;
use crate::ast::{Expr, ExprId, FunctionDecl, Stmt};
use crate::environment::Environment;
use crate::error::ServoError;
use crate::native::NATIVES;
use crate::resolver::Resolutions;
use crate::stack::ensure_sufficient_stack;
use crate::token::{Token, TokenType};
use crate::value::{Class, Function, NativeFn, NativeFunction, Value};

/// Nested calls allowed before a call fails with "Stack overflow.".
pub const DEFAULT_MAX_CALL_DEPTH: usize = 255;

/// How a statement finished. `Return` unwinds to the nearest function call.
#[derive(Debug, PartialEq)]
pub enum Flow {
    Normal,
    Return(Value),
}

/// Both operands of an arithmetic or comparison operator, coerced to the
/// left operand's numeric tag.
enum Operands {
    Ints(i32, i32),
    Floats(f64, f64),
}

pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    locals: HashMap<ExprId, usize>,
    call_depth: usize,
    max_call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));
        let mut interpreter = Self {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            call_depth: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        };
        for (name, arity, func) in NATIVES {
            interpreter.define_native(name, *arity, *func);
        }
        interpreter
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    /// Registers a built-in in the global scope.
    pub fn define_native(&mut self, name: &str, arity: usize, func: NativeFn) {
        let native = NativeFunction {
            name: name.to_string(),
            arity,
            func,
        };
        self.globals
            .borrow_mut()
            .define(name, Value::Native(Rc::new(native)));
    }

    /// Adds scope distances for a newly resolved program. Earlier entries are
    /// kept so functions from previous runs still resolve.
    pub fn resolve(&mut self, resolutions: Resolutions) {
        self.locals.extend(resolutions);
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.globals.borrow().variable_names()
    }

    /// Runs top-level statements, stopping at the first runtime fault.
    pub fn interpret(
        &mut self,
        statements: &[Stmt],
        output: &mut dyn Write,
    ) -> Result<(), ServoError> {
        for stmt in statements {
            self.execute(stmt, output)?;
        }
        Ok(())
    }

    pub fn execute(&mut self, stmt: &Stmt, output: &mut dyn Write) -> Result<Flow, ServoError> {
        ensure_sufficient_stack(|| self.execute_stmt(stmt, output))
    }

    fn execute_stmt(&mut self, stmt: &Stmt, output: &mut dyn Write) -> Result<Flow, ServoError> {
        match stmt {
            Stmt::Block { statements } => {
                let env = Environment::with_enclosing(Rc::clone(&self.environment));
                self.execute_block(statements, Rc::new(RefCell::new(env)), output)
            }
            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                self.execute_class(name, superclass.as_ref(), methods, output)?;
                Ok(Flow::Normal)
            }
            Stmt::Expression { expression } => {
                self.evaluate(expression, output)?;
                Ok(Flow::Normal)
            }
            Stmt::Function(decl) => {
                let function = Function::new(Rc::clone(decl), Rc::clone(&self.environment), false);
                self.environment
                    .borrow_mut()
                    .define(decl.name.lexeme.clone(), Value::Function(Rc::new(function)));
                Ok(Flow::Normal)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition, output)?.is_truthy() {
                    self.execute(then_branch, output)
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt, output)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Print { expression } => {
                let value = self.evaluate(expression, output)?;
                writeln!(output, "{}", value)?;
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr, output)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr, output)?,
                    None => Value::Nil,
                };
                self.environment
                    .borrow_mut()
                    .define(name.lexeme.clone(), value);
                Ok(Flow::Normal)
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition, output)?.is_truthy() {
                    if let Flow::Return(value) = self.execute(body, output)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Normal)
            }
        }
    }

    /// Runs `statements` in `env`, restoring the current scope afterwards no
    /// matter how the block exits.
    pub fn execute_block(
        &mut self,
        statements: &[Stmt],
        env: Rc<RefCell<Environment>>,
        output: &mut dyn Write,
    ) -> Result<Flow, ServoError> {
        let previous = std::mem::replace(&mut self.environment, env);
        let result = self.execute_statements(statements, output);
        self.environment = previous;
        result
    }

    fn execute_statements(
        &mut self,
        statements: &[Stmt],
        output: &mut dyn Write,
    ) -> Result<Flow, ServoError> {
        for stmt in statements {
            if let Flow::Return(value) = self.execute(stmt, output)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
        output: &mut dyn Write,
    ) -> Result<(), ServoError> {
        let superclass = match superclass {
            Some(expr) => match self.evaluate(expr, output)? {
                Value::Class(class) => Some(class),
                _ => {
                    let token = match expr {
                        Expr::Variable {
                            name: superclass_name,
                            ..
                        } => superclass_name,
                        _ => name,
                    };
                    return Err(ServoError::runtime(token, "Superclass must be a class."));
                }
            },
            None => None,
        };

        // Pre-declared so methods can refer to their own class.
        self.environment
            .borrow_mut()
            .define(name.lexeme.clone(), Value::Nil);

        let enclosing = match &superclass {
            Some(superclass) => {
                let mut env = Environment::with_enclosing(Rc::clone(&self.environment));
                env.define("super", Value::Class(Rc::clone(superclass)));
                Some(std::mem::replace(
                    &mut self.environment,
                    Rc::new(RefCell::new(env)),
                ))
            }
            None => None,
        };

        let methods = methods
            .iter()
            .map(|decl| {
                let is_initializer = decl.name.lexeme == INITIALIZER_NAME;
                let method = Function::new(
                    Rc::clone(decl),
                    Rc::clone(&self.environment),
                    is_initializer,
                );
                (decl.name.lexeme.clone(), Rc::new(method))
            })
            .collect();

        let class = Class {
            name: name.lexeme.clone(),
            superclass,
            methods,
        };

        if let Some(previous) = enclosing {
            self.environment = previous;
        }

        trace!(class = %class.name, methods = class.methods.len(), "class defined");

        self.environment
            .borrow_mut()
            .assign(name, Value::Class(Rc::new(class)))
    }

    pub fn evaluate(&mut self, expr: &Expr, output: &mut dyn Write) -> Result<Value, ServoError> {
        ensure_sufficient_stack(|| self.evaluate_expr(expr, output))
    }

    fn evaluate_expr(&mut self, expr: &Expr, output: &mut dyn Write) -> Result<Value, ServoError> {
        match expr {
            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value, output)?;
                match self.locals.get(id) {
                    Some(&distance) => {
                        let assigned = self.environment.borrow_mut().assign_at(
                            distance,
                            &name.lexeme,
                            value.clone(),
                        );
                        if !assigned {
                            return Err(undefined_variable(name));
                        }
                    }
                    None => self.globals.borrow_mut().assign(name, value.clone())?,
                }
                Ok(value)
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, output)?;
                let right = self.evaluate(right, output)?;
                binary(operator, left, right)
            }
            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee, output)?;
                let arguments = arguments
                    .iter()
                    .map(|argument| self.evaluate(argument, output))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_value(&callee, paren, arguments, output)
            }
            Expr::Get { object, name } => match self.evaluate(object, output)? {
                Value::Instance(instance) => instance.get(name),
                _ => Err(ServoError::runtime(name, "Only instances have properties.")),
            },
            Expr::Grouping { expression } => self.evaluate(expression, output),
            Expr::Literal { value } => Ok(Value::from(value.clone())),
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, output)?;
                let decided = if operator.token_type == TokenType::Or {
                    left.is_truthy()
                } else {
                    !left.is_truthy()
                };
                if decided {
                    Ok(left)
                } else {
                    self.evaluate(right, output)
                }
            }
            Expr::Set {
                object,
                name,
                value,
            } => {
                let Value::Instance(instance) = self.evaluate(object, output)? else {
                    return Err(ServoError::runtime(name, "Only instances have fields."));
                };
                let value = self.evaluate(value, output)?;
                instance.set(name, value.clone());
                Ok(value)
            }
            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),
            Expr::This { id, keyword } => self.look_up_variable(keyword, *id),
            Expr::Unary { operator, right } => {
                let right = self.evaluate(right, output)?;
                match operator.token_type {
                    TokenType::Minus => match right {
                        Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
                        Value::Float(n) => Ok(Value::Float(-n)),
                        _ => Err(ServoError::runtime(operator, "Operand must be a number.")),
                    },
                    _ => Ok(Value::Bool(!right.is_truthy())),
                }
            }
            Expr::Variable { id, name } => self.look_up_variable(name, *id),
        }
    }

    #[tracing::instrument(level = "trace", skip_all, fields(callee = %callee, depth = self.call_depth))]
    fn call_value(
        &mut self,
        callee: &Value,
        paren: &Token,
        arguments: Vec<Value>,
        output: &mut dyn Write,
    ) -> Result<Value, ServoError> {
        let Some(callable) = callee.as_callable() else {
            return Err(ServoError::runtime(
                paren,
                "Can only call functions and classes.",
            ));
        };

        if arguments.len() != callable.arity() {
            return Err(ServoError::runtime(
                paren,
                format!(
                    "Expected {} arguments but got {}.",
                    callable.arity(),
                    arguments.len()
                ),
            ));
        }

        if self.call_depth >= self.max_call_depth {
            return Err(ServoError::runtime(paren, "Stack overflow."));
        }

        self.call_depth += 1;
        let result = callable.call(self, output, paren, arguments);
        self.call_depth -= 1;
        result
    }

    /// `super` sits one scope outside the `this` binding of the method.
    fn evaluate_super(
        &self,
        id: ExprId,
        keyword: &Token,
        method: &Token,
    ) -> Result<Value, ServoError> {
        let distance = self
            .locals
            .get(&id)
            .copied()
            .ok_or_else(|| undefined_variable(keyword))?;

        let env = self.environment.borrow();
        let superclass = env.get_at(distance, "super");
        let this = distance
            .checked_sub(1)
            .and_then(|this_distance| env.get_at(this_distance, "this"));

        let (Some(Value::Class(superclass)), Some(Value::Instance(instance))) = (superclass, this)
        else {
            return Err(undefined_variable(keyword));
        };

        match superclass.find_method(&method.lexeme) {
            Some(found) => Ok(Value::Function(Rc::new(found.bind(instance)))),
            None => Err(ServoError::runtime(
                method,
                format!("Undefined property '{}'.", method.lexeme),
            )),
        }
    }

    /// Resolved names are read from their exact scope; anything else is a
    /// global.
    fn look_up_variable(&self, name: &Token, id: ExprId) -> Result<Value, ServoError> {
        match self.locals.get(&id) {
            Some(&distance) => self
                .environment
                .borrow()
                .get_at(distance, &name.lexeme)
                .ok_or_else(|| undefined_variable(name)),
            None => self.globals.borrow().get(name),
        }
    }
}

fn undefined_variable(name: &Token) -> ServoError {
    ServoError::runtime(name, format!("Undefined variable '{}'.", name.lexeme))
}

fn binary(operator: &Token, left: Value, right: Value) -> Result<Value, ServoError> {
    match operator.token_type {
        TokenType::EqualEqual => Ok(Value::Bool(left == right)),
        TokenType::BangEqual => Ok(Value::Bool(left != right)),
        TokenType::Plus => match (&left, &right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(Rc::from(format!("{}{}", a, b)))),
            (Value::Str(a), Value::Int(_) | Value::Float(_)) => {
                Ok(Value::Str(Rc::from(format!("{}{}", a, right))))
            }
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                arithmetic(operator, &left, &right)
            }
            _ => Err(ServoError::runtime(
                operator,
                "Operands must be two numbers or two strings.",
            )),
        },
        TokenType::Minus
        | TokenType::Star
        | TokenType::Slash
        | TokenType::Percent
        | TokenType::Caret => arithmetic(operator, &left, &right),
        TokenType::Greater
        | TokenType::GreaterEqual
        | TokenType::Less
        | TokenType::LessEqual => {
            let result = match numeric_operands(operator, &left, &right)? {
                Operands::Ints(a, b) => compare(operator.token_type, a, b),
                Operands::Floats(a, b) => compare(operator.token_type, a, b),
            };
            Ok(Value::Bool(result))
        }
        _ => Err(ServoError::runtime(operator, "Unknown binary operator.")),
    }
}

/// Int OP Float truncates the float; Float OP Int widens the int.
fn numeric_operands(operator: &Token, left: &Value, right: &Value) -> Result<Operands, ServoError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Operands::Ints(*a, *b)),
        (Value::Int(a), Value::Float(b)) => Ok(Operands::Ints(*a, *b as i32)),
        (Value::Float(a), Value::Float(b)) => Ok(Operands::Floats(*a, *b)),
        (Value::Float(a), Value::Int(b)) => Ok(Operands::Floats(*a, f64::from(*b))),
        _ => Err(ServoError::runtime(operator, "Operands must be numbers.")),
    }
}

fn compare<T: PartialOrd>(operator: TokenType, a: T, b: T) -> bool {
    match operator {
        TokenType::Greater => a > b,
        TokenType::GreaterEqual => a >= b,
        TokenType::Less => a < b,
        _ => a <= b,
    }
}

fn arithmetic(operator: &Token, left: &Value, right: &Value) -> Result<Value, ServoError> {
    match numeric_operands(operator, left, right)? {
        Operands::Ints(a, b) => int_arithmetic(operator, a, b).map(Value::Int),
        Operands::Floats(a, b) => float_arithmetic(operator, a, b).map(Value::Float),
    }
}

fn division_by_zero(operator: &Token, dividend_is_zero: bool) -> ServoError {
    if dividend_is_zero {
        warn!(line = operator.line, "0 / 0 has no numeric value");
    }
    ServoError::runtime(operator, "Division by zero.")
}

fn int_arithmetic(operator: &Token, a: i32, b: i32) -> Result<i32, ServoError> {
    match operator.token_type {
        TokenType::Plus => Ok(a.wrapping_add(b)),
        TokenType::Minus => Ok(a.wrapping_sub(b)),
        TokenType::Star => Ok(a.wrapping_mul(b)),
        TokenType::Slash if b == 0 => Err(division_by_zero(operator, a == 0)),
        TokenType::Slash => Ok(a.wrapping_div(b)),
        TokenType::Percent if b == 0 => Err(division_by_zero(operator, a == 0)),
        TokenType::Percent => Ok(a.wrapping_rem(b)),
        // Computed in floating point, then saturated back into an int.
        _ => Ok(f64::from(a).powf(f64::from(b)) as i32),
    }
}

fn float_arithmetic(operator: &Token, a: f64, b: f64) -> Result<f64, ServoError> {
    match operator.token_type {
        TokenType::Plus => Ok(a + b),
        TokenType::Minus => Ok(a - b),
        TokenType::Star => Ok(a * b),
        TokenType::Slash | TokenType::Percent if b == 0.0 => {
            Err(division_by_zero(operator, a == 0.0))
        }
        TokenType::Slash => Ok(a / b),
        TokenType::Percent => Ok(a % b),
        _ => Ok(a.powf(b)),
    }
}
