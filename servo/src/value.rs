use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use crate::INITIALIZER_NAME;
use crate::ast::FunctionDecl;
use crate::environment::Environment;
use crate::error::ServoError;
use crate::interpreter::{Flow, Interpreter};
use crate::token::{Literal, Token};

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i32),
    Float(f64),
    Str(Rc<str>),
    Native(Rc<NativeFunction>),
    Function(Rc<Function>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
}

impl Value {
    /// nil and false are falsy; everything else, including 0 and "", is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_callable(&self) -> Option<&dyn Callable> {
        let callable: &dyn Callable = match self {
            Value::Native(native) => &**native,
            Value::Function(function) => &**function,
            Value::Class(class) => class,
            _ => return None,
        };
        Some(callable)
    }
}

/// Something a call expression can invoke.
pub trait Callable {
    fn arity(&self) -> usize;

    /// `paren` is the call's closing parenthesis, used to locate faults.
    /// Arity has already been checked by the caller.
    fn call(
        &self,
        interpreter: &mut Interpreter,
        output: &mut dyn Write,
        paren: &Token,
        arguments: Vec<Value>,
    ) -> Result<Value, ServoError>;
}

pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

pub struct NativeFunction {
    pub name: String,
    pub arity: usize,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Callable for NativeFunction {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(
        &self,
        _interpreter: &mut Interpreter,
        _output: &mut dyn Write,
        paren: &Token,
        arguments: Vec<Value>,
    ) -> Result<Value, ServoError> {
        (self.func)(&arguments).map_err(|message| ServoError::runtime(paren, message))
    }
}

/// A declared function or method together with the scope it closes over.
#[derive(Debug)]
pub struct Function {
    pub declaration: Rc<FunctionDecl>,
    pub closure: Rc<RefCell<Environment>>,
    pub is_initializer: bool,
}

impl Function {
    pub fn new(
        declaration: Rc<FunctionDecl>,
        closure: Rc<RefCell<Environment>>,
        is_initializer: bool,
    ) -> Self {
        Self {
            declaration,
            closure,
            is_initializer,
        }
    }

    /// A copy of this function whose closure is a fresh scope binding `this`
    /// to `instance`; `self` is left untouched.
    pub fn bind(&self, instance: Rc<Instance>) -> Function {
        let mut env = Environment::with_enclosing(Rc::clone(&self.closure));
        env.define("this", Value::Instance(instance));
        Function {
            declaration: Rc::clone(&self.declaration),
            closure: Rc::new(RefCell::new(env)),
            is_initializer: self.is_initializer,
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name.lexeme
    }

    fn bound_this(&self, paren: &Token) -> Result<Value, ServoError> {
        self.closure
            .borrow()
            .get_at(0, "this")
            .ok_or_else(|| ServoError::runtime(paren, "Undefined variable 'this'."))
    }
}

impl Callable for Function {
    fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    fn call(
        &self,
        interpreter: &mut Interpreter,
        output: &mut dyn Write,
        paren: &Token,
        arguments: Vec<Value>,
    ) -> Result<Value, ServoError> {
        let mut env = Environment::with_enclosing(Rc::clone(&self.closure));
        for (param, argument) in self.declaration.params.iter().zip(arguments) {
            env.define(param.lexeme.clone(), argument);
        }

        let flow = interpreter.execute_block(
            &self.declaration.body,
            Rc::new(RefCell::new(env)),
            output,
        )?;

        // An initializer always yields its instance, even on a bare `return;`.
        if self.is_initializer {
            return self.bound_this(paren);
        }

        match flow {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
        }
    }
}

#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub superclass: Option<Rc<Class>>,
    pub methods: HashMap<String, Rc<Function>>,
}

impl Class {
    /// Find a method in this class or its superclass chain
    pub fn find_method(&self, name: &str) -> Option<Rc<Function>> {
        if let Some(method) = self.methods.get(name) {
            return Some(Rc::clone(method));
        }

        if let Some(ref superclass) = self.superclass {
            return superclass.find_method(name);
        }

        None
    }
}

/// Implemented on the `Rc` so a new instance can point back at its class.
impl Callable for Rc<Class> {
    fn arity(&self) -> usize {
        self.find_method(INITIALIZER_NAME)
            .map(|init| init.arity())
            .unwrap_or(0)
    }

    fn call(
        &self,
        interpreter: &mut Interpreter,
        output: &mut dyn Write,
        paren: &Token,
        arguments: Vec<Value>,
    ) -> Result<Value, ServoError> {
        let instance = Rc::new(Instance::new(Rc::clone(self)));
        if let Some(initializer) = self.find_method(INITIALIZER_NAME) {
            initializer
                .bind(Rc::clone(&instance))
                .call(interpreter, output, paren, arguments)?;
        }
        Ok(Value::Instance(instance))
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Rc<Class>,
    pub fields: RefCell<HashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: RefCell::new(HashMap::new()),
        }
    }

    /// Fields shadow methods. A method comes back bound to this instance.
    pub fn get(self: &Rc<Self>, name: &Token) -> Result<Value, ServoError> {
        if let Some(value) = self.fields.borrow().get(&name.lexeme) {
            return Ok(value.clone());
        }

        if let Some(method) = self.class.find_method(&name.lexeme) {
            return Ok(Value::Function(Rc::new(method.bind(Rc::clone(self)))));
        }

        Err(ServoError::runtime(
            name,
            format!("Undefined property '{}'.", name.lexeme),
        ))
    }

    pub fn set(&self, name: &Token, value: Value) {
        self.fields.borrow_mut().insert(name.lexeme.clone(), value);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            // Rust already drops a zero fraction: 2.0 renders as "2".
            Value::Float(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Native(_) => write!(f, "<native fn>"),
            Value::Function(func) => write!(f, "<fn {}>", func.name()),
            Value::Class(class) => write!(f, "{}", class.name),
            Value::Instance(instance) => write!(f, "{} instance", instance.class.name),
        }
    }
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        match lit {
            Literal::Nil => Value::Nil,
            Literal::Bool(b) => Value::Bool(b),
            Literal::Int(n) => Value::Int(n),
            Literal::Float(n) => Value::Float(n),
            Literal::String(s) => Value::Str(Rc::from(s)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                f64::from(*a) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;

    fn ident(name: &str) -> Token {
        Token::synthetic(TokenType::Identifier, name, 1)
    }

    fn function(name: &str, params: &[&str]) -> Function {
        let declaration = FunctionDecl {
            name: ident(name),
            params: params.iter().map(|p| ident(p)).collect(),
            body: vec![],
        };
        Function::new(
            Rc::new(declaration),
            Rc::new(RefCell::new(Environment::new())),
            false,
        )
    }

    fn class(name: &str, superclass: Option<Rc<Class>>, methods: Vec<Function>) -> Rc<Class> {
        Rc::new(Class {
            name: name.to_string(),
            superclass,
            methods: methods
                .into_iter()
                .map(|m| (m.name().to_string(), Rc::new(m)))
                .collect(),
        })
    }

    #[test]
    fn values_display_correctly() {
        assert_eq!(Value::Nil.to_string(), "null");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Int(-7).to_string(), "-7");
        assert_eq!(Value::Float(2.0).to_string(), "2");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Str(Rc::from("hi")).to_string(), "hi");
    }

    #[test]
    fn callables_display_correctly() {
        let func = Value::Function(Rc::new(function("greet", &[])));
        assert_eq!(func.to_string(), "<fn greet>");

        let native = Value::Native(Rc::new(NativeFunction {
            name: "clock".to_string(),
            arity: 0,
            func: |_| Ok(Value::Nil),
        }));
        assert_eq!(native.to_string(), "<native fn>");

        let point = class("Point", None, vec![]);
        assert_eq!(Value::Class(Rc::clone(&point)).to_string(), "Point");
        let instance = Value::Instance(Rc::new(Instance::new(point)));
        assert_eq!(instance.to_string(), "Point instance");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Str(Rc::from("")).is_truthy());
    }

    #[test]
    fn numbers_compare_across_tags() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Float(3.0), Value::Int(3));
        assert_ne!(Value::Int(1), Value::Float(1.5));
    }

    #[test]
    fn nil_only_equals_nil() {
        assert_eq!(Value::Nil, Value::Nil);
        assert_ne!(Value::Nil, Value::Bool(false));
        assert_ne!(Value::Nil, Value::Int(0));
    }

    #[test]
    fn strings_compare_by_content() {
        assert_eq!(Value::Str(Rc::from("a")), Value::Str(Rc::from(String::from("a"))));
        assert_ne!(Value::Str(Rc::from("a")), Value::Int(1));
    }

    #[test]
    fn functions_compare_by_identity() {
        let shared = Rc::new(function("f", &[]));
        assert_eq!(
            Value::Function(Rc::clone(&shared)),
            Value::Function(Rc::clone(&shared))
        );
        assert_ne!(
            Value::Function(Rc::new(function("f", &[]))),
            Value::Function(Rc::new(function("f", &[])))
        );
    }

    #[test]
    fn literal_converts_to_value() {
        assert_eq!(Value::from(Literal::Int(4)), Value::Int(4));
        assert_eq!(Value::from(Literal::Nil), Value::Nil);
        assert_eq!(
            Value::from(Literal::String("s".to_string())),
            Value::Str(Rc::from("s"))
        );
    }

    #[test]
    fn as_callable_covers_callable_variants_only() {
        assert!(Value::Int(1).as_callable().is_none());
        assert!(Value::Str(Rc::from("f")).as_callable().is_none());

        let func = Value::Function(Rc::new(function("f", &["a", "b"])));
        assert_eq!(func.as_callable().map(|c| c.arity()), Some(2));

        let empty = Value::Class(class("Empty", None, vec![]));
        assert_eq!(empty.as_callable().map(|c| c.arity()), Some(0));
    }

    #[test]
    fn class_arity_comes_from_inherited_initializer() {
        let mut init = function("init", &["x", "y"]);
        init.is_initializer = true;
        let base = class("Base", None, vec![init]);
        let derived = class("Derived", Some(base), vec![]);
        assert_eq!(Value::Class(derived).as_callable().map(|c| c.arity()), Some(2));
    }

    #[test]
    fn find_method_prefers_own_table_then_superclass() {
        let base = class("Base", None, vec![function("speak", &[]), function("walk", &[])]);
        let derived = class("Derived", Some(Rc::clone(&base)), vec![function("speak", &["loud"])]);

        let speak = derived.find_method("speak").unwrap();
        assert_eq!(speak.arity(), 1);
        let walk = derived.find_method("walk").unwrap();
        assert!(Rc::ptr_eq(&walk, &base.methods["walk"]));
        assert!(derived.find_method("fly").is_none());
    }

    #[test]
    fn bind_defines_this_without_touching_the_unbound_function() {
        let point = class("Point", None, vec![]);
        let instance = Rc::new(Instance::new(point));
        let func = function("show", &[]);

        let bound = func.bind(Rc::clone(&instance));

        let this = bound.closure.borrow().get_at(0, "this").unwrap();
        assert_eq!(this, Value::Instance(instance));
        assert!(func.closure.borrow().get_at(0, "this").is_none());
    }

    #[test]
    fn instance_fields_shadow_methods() {
        let point = class("Point", None, vec![function("x", &[])]);
        let instance = Rc::new(Instance::new(point));

        assert!(matches!(instance.get(&ident("x")).unwrap(), Value::Function(_)));
        instance.set(&ident("x"), Value::Int(3));
        assert_eq!(instance.get(&ident("x")).unwrap(), Value::Int(3));
    }

    #[test]
    fn bound_methods_are_distinct_per_instance() {
        let point = class("Point", None, vec![function("show", &[])]);
        let a = Rc::new(Instance::new(Rc::clone(&point)));
        let b = Rc::new(Instance::new(point));

        let Value::Function(from_a) = a.get(&ident("show")).unwrap() else {
            panic!("Expected bound method");
        };
        let Value::Function(from_b) = b.get(&ident("show")).unwrap() else {
            panic!("Expected bound method");
        };
        assert!(!Rc::ptr_eq(&from_a, &from_b));
        assert_eq!(
            from_a.closure.borrow().get_at(0, "this"),
            Some(Value::Instance(Rc::clone(&a)))
        );
        assert_eq!(
            from_b.closure.borrow().get_at(0, "this"),
            Some(Value::Instance(Rc::clone(&b)))
        );
    }

    #[test]
    fn missing_property_is_a_runtime_error() {
        let instance = Rc::new(Instance::new(class("Point", None, vec![])));
        let err = instance.get(&ident("z")).unwrap_err();
        assert!(err.is_runtime());
        assert_eq!(err.message(), "Undefined property 'z'.");
    }

    #[test]
    fn native_function_debug_shows_name_and_arity() {
        let func = NativeFunction {
            name: "clock".to_string(),
            arity: 0,
            func: |_| Ok(Value::Nil),
        };
        let debug_str = format!("{:?}", func);
        assert!(debug_str.contains("clock"));
        assert!(debug_str.contains("arity"));
    }
}
