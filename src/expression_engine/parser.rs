//! Recursive-descent parser and tree-walking evaluator of the expression
//! language.

use crate::datamodel::{Data, EvalError};
use crate::expression_engine::lexer::{ExpressionLexer, Operator, Token};

/// The evaluation context: resolves variable paths and the 'In' predicate.
pub trait Environment {
    fn get_path(&self, path: &[String]) -> Result<Data, EvalError>;
    fn set_path(&mut self, path: &[String], value: Data) -> Result<(), EvalError>;
    fn in_state(&self, state_name: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(Data),
    Variable(Vec<String>),
    Not(Box<Expression>),
    Negate(Box<Expression>),
    Binary(Operator, Box<Expression>, Box<Expression>),
    Call(String, Vec<Expression>),
    Assign(Vec<String>, Box<Expression>),
}

/// Static tool struct to process expressions.
pub struct ExpressionParser {
    lexer: ExpressionLexer,
    current: Token,
}

impl ExpressionParser {
    /// Parses a single expression. Trailing input is an error.
    pub fn parse(source: &str) -> Result<Expression, EvalError> {
        let mut parser = ExpressionParser::new(source)?;
        let expression = parser.parse_statement()?;
        if parser.current != Token::EOF {
            return Err(EvalError::syntax_error(&format!(
                "unexpected trailing input in '{}'",
                source
            )));
        }
        Ok(expression)
    }

    /// Parses a script: statements separated by ';'.
    pub fn parse_script(source: &str) -> Result<Vec<Expression>, EvalError> {
        let mut parser = ExpressionParser::new(source)?;
        let mut statements = Vec::new();
        loop {
            while parser.current == Token::Semicolon {
                parser.advance()?;
            }
            if parser.current == Token::EOF {
                break;
            }
            statements.push(parser.parse_statement()?);
            match parser.current {
                Token::Semicolon | Token::EOF => {}
                _ => {
                    return Err(EvalError::syntax_error(&format!(
                        "expected ';' in '{}'",
                        source
                    )))
                }
            }
        }
        Ok(statements)
    }

    fn new(source: &str) -> Result<ExpressionParser, EvalError> {
        let mut lexer = ExpressionLexer::new(source);
        let current = lexer.next_token()?;
        Ok(ExpressionParser { lexer, current })
    }

    fn advance(&mut self) -> Result<(), EvalError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, token: Token) -> Result<(), EvalError> {
        if self.current == token {
            self.advance()
        } else {
            Err(EvalError::syntax_error(&format!(
                "expected {:?}, found {:?}",
                token, self.current
            )))
        }
    }

    /// statement := path '=' expression | expression
    fn parse_statement(&mut self) -> Result<Expression, EvalError> {
        let expression = self.parse_or()?;
        if self.current == Token::Operator(Operator::Assign) {
            let path = match expression {
                Expression::Variable(path) => path,
                _ => {
                    return Err(EvalError::syntax_error(
                        "left side of assignment is not a location",
                    ))
                }
            };
            self.advance()?;
            let value = self.parse_or()?;
            return Ok(Expression::Assign(path, Box::new(value)));
        }
        Ok(expression)
    }

    fn parse_or(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_and()?;
        while self.current == Token::Operator(Operator::Or) {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expression::Binary(Operator::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_equality()?;
        while self.current == Token::Operator(Operator::And) {
            self.advance()?;
            let right = self.parse_equality()?;
            left = Expression::Binary(Operator::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.current {
                Token::Operator(op @ (Operator::Equal | Operator::NotEqual)) => op,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_comparison()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current {
                Token::Operator(
                    op @ (Operator::Less
                    | Operator::LessEqual
                    | Operator::Greater
                    | Operator::GreaterEqual),
                ) => op,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_additive()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current {
                Token::Operator(op @ (Operator::Plus | Operator::Minus)) => op,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current {
                Token::Operator(
                    op @ (Operator::Multiply | Operator::Divide | Operator::Modulus),
                ) => op,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, EvalError> {
        match self.current {
            Token::Operator(Operator::Not) => {
                self.advance()?;
                Ok(Expression::Not(Box::new(self.parse_unary()?)))
            }
            Token::Operator(Operator::Minus) => {
                self.advance()?;
                Ok(Expression::Negate(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, EvalError> {
        match self.current.clone() {
            Token::Integer(i) => {
                self.advance()?;
                Ok(Expression::Constant(Data::Integer(i)))
            }
            Token::Double(d) => {
                self.advance()?;
                Ok(Expression::Constant(Data::Double(d)))
            }
            Token::TString(s) => {
                self.advance()?;
                Ok(Expression::Constant(Data::String(s)))
            }
            Token::ParenOpen => {
                self.advance()?;
                let inner = self.parse_or()?;
                self.expect(Token::ParenClose)?;
                Ok(inner)
            }
            Token::Identifier(name) => {
                self.advance()?;
                match name.as_str() {
                    "true" => return Ok(Expression::Constant(Data::Boolean(true))),
                    "false" => return Ok(Expression::Constant(Data::Boolean(false))),
                    "null" => return Ok(Expression::Constant(Data::Null)),
                    _ => {}
                }
                if self.current == Token::ParenOpen {
                    self.advance()?;
                    let mut arguments = Vec::new();
                    if self.current != Token::ParenClose {
                        loop {
                            arguments.push(self.parse_or()?);
                            if self.current == Token::Comma {
                                self.advance()?;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::ParenClose)?;
                    return Ok(Expression::Call(name, arguments));
                }
                let mut path = vec![name];
                while self.current == Token::Dot {
                    self.advance()?;
                    match self.current.clone() {
                        Token::Identifier(member) => {
                            self.advance()?;
                            path.push(member);
                        }
                        _ => {
                            return Err(EvalError::syntax_error(
                                "expected member name after '.'",
                            ))
                        }
                    }
                }
                Ok(Expression::Variable(path))
            }
            token => Err(EvalError::syntax_error(&format!(
                "unexpected token {:?}",
                token
            ))),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## Evaluation

/// Truthiness of a value, Lisp-like: empty and zero values are false.
pub fn to_bool(data: &Data) -> bool {
    match data {
        Data::Boolean(b) => *b,
        Data::Integer(i) => *i != 0,
        Data::Double(d) => *d != 0.0,
        Data::String(s) | Data::Source(s) => !s.is_empty(),
        Data::Array(a) => !a.is_empty(),
        Data::Map(m) => !m.is_empty(),
        Data::Null | Data::None => false,
    }
}

enum Number {
    Integer(i64),
    Double(f64),
}

fn as_number(data: &Data) -> Result<Number, EvalError> {
    match data {
        Data::Integer(i) => Ok(Number::Integer(*i)),
        Data::Double(d) => Ok(Number::Double(*d)),
        Data::Boolean(b) => Ok(Number::Integer(*b as i64)),
        other => Err(EvalError::type_error(&format!(
            "'{}' is not a number",
            other
        ))),
    }
}

fn numeric_op(
    op: Operator,
    left: &Data,
    right: &Data,
) -> Result<Data, EvalError> {
    let (l, r) = (as_number(left)?, as_number(right)?);
    match (l, r) {
        (Number::Integer(a), Number::Integer(b)) => match op {
            Operator::Plus => Ok(Data::Integer(a + b)),
            Operator::Minus => Ok(Data::Integer(a - b)),
            Operator::Multiply => Ok(Data::Integer(a * b)),
            Operator::Divide => {
                if b == 0 {
                    Err(EvalError::type_error("division by zero"))
                } else if a % b == 0 {
                    Ok(Data::Integer(a / b))
                } else {
                    Ok(Data::Double(a as f64 / b as f64))
                }
            }
            Operator::Modulus => {
                if b == 0 {
                    Err(EvalError::type_error("division by zero"))
                } else {
                    Ok(Data::Integer(a % b))
                }
            }
            _ => Err(EvalError::type_error("not an arithmetic operator")),
        },
        (l, r) => {
            let a = match l {
                Number::Integer(i) => i as f64,
                Number::Double(d) => d,
            };
            let b = match r {
                Number::Integer(i) => i as f64,
                Number::Double(d) => d,
            };
            match op {
                Operator::Plus => Ok(Data::Double(a + b)),
                Operator::Minus => Ok(Data::Double(a - b)),
                Operator::Multiply => Ok(Data::Double(a * b)),
                Operator::Divide => {
                    if b == 0.0 {
                        Err(EvalError::type_error("division by zero"))
                    } else {
                        Ok(Data::Double(a / b))
                    }
                }
                Operator::Modulus => Ok(Data::Double(a % b)),
                _ => Err(EvalError::type_error("not an arithmetic operator")),
            }
        }
    }
}

fn compare(left: &Data, right: &Data) -> Result<std::cmp::Ordering, EvalError> {
    match (left, right) {
        (Data::String(a), Data::String(b)) => Ok(a.cmp(b)),
        _ => {
            let a = match as_number(left)? {
                Number::Integer(i) => i as f64,
                Number::Double(d) => d,
            };
            let b = match as_number(right)? {
                Number::Integer(i) => i as f64,
                Number::Double(d) => d,
            };
            a.partial_cmp(&b)
                .ok_or_else(|| EvalError::type_error("values are not comparable"))
        }
    }
}

fn equals(left: &Data, right: &Data) -> bool {
    match (left, right) {
        (Data::Integer(a), Data::Double(b)) | (Data::Double(b), Data::Integer(a)) => {
            *a as f64 == *b
        }
        _ => left == right,
    }
}

/// Evaluates an expression tree against the environment.
pub fn evaluate(
    expression: &Expression,
    environment: &mut dyn Environment,
) -> Result<Data, EvalError> {
    match expression {
        Expression::Constant(data) => Ok(data.clone()),
        Expression::Variable(path) => environment.get_path(path),
        Expression::Not(inner) => Ok(Data::Boolean(!to_bool(&evaluate(inner, environment)?))),
        Expression::Negate(inner) => match as_number(&evaluate(inner, environment)?)? {
            Number::Integer(i) => Ok(Data::Integer(-i)),
            Number::Double(d) => Ok(Data::Double(-d)),
        },
        Expression::Binary(op, left, right) => match op {
            Operator::And => {
                let l = evaluate(left, environment)?;
                if !to_bool(&l) {
                    return Ok(Data::Boolean(false));
                }
                Ok(Data::Boolean(to_bool(&evaluate(right, environment)?)))
            }
            Operator::Or => {
                let l = evaluate(left, environment)?;
                if to_bool(&l) {
                    return Ok(Data::Boolean(true));
                }
                Ok(Data::Boolean(to_bool(&evaluate(right, environment)?)))
            }
            Operator::Equal => {
                let (l, r) = (evaluate(left, environment)?, evaluate(right, environment)?);
                Ok(Data::Boolean(equals(&l, &r)))
            }
            Operator::NotEqual => {
                let (l, r) = (evaluate(left, environment)?, evaluate(right, environment)?);
                Ok(Data::Boolean(!equals(&l, &r)))
            }
            Operator::Less | Operator::LessEqual | Operator::Greater | Operator::GreaterEqual => {
                let (l, r) = (evaluate(left, environment)?, evaluate(right, environment)?);
                let ordering = compare(&l, &r)?;
                let result = match op {
                    Operator::Less => ordering == std::cmp::Ordering::Less,
                    Operator::LessEqual => ordering != std::cmp::Ordering::Greater,
                    Operator::Greater => ordering == std::cmp::Ordering::Greater,
                    Operator::GreaterEqual => ordering != std::cmp::Ordering::Less,
                    _ => unreachable!(),
                };
                Ok(Data::Boolean(result))
            }
            Operator::Plus => {
                let (l, r) = (evaluate(left, environment)?, evaluate(right, environment)?);
                match (&l, &r) {
                    (Data::String(_), _) | (_, Data::String(_)) => {
                        Ok(Data::String(format!("{}{}", l, r)))
                    }
                    _ => numeric_op(Operator::Plus, &l, &r),
                }
            }
            Operator::Minus | Operator::Multiply | Operator::Divide | Operator::Modulus => {
                let (l, r) = (evaluate(left, environment)?, evaluate(right, environment)?);
                numeric_op(*op, &l, &r)
            }
            Operator::Not | Operator::Assign => {
                Err(EvalError::syntax_error("misplaced operator"))
            }
        },
        Expression::Call(name, arguments) => match name.as_str() {
            "In" => {
                if arguments.len() != 1 {
                    return Err(EvalError::type_error("In() takes one argument"));
                }
                let state_name = evaluate(&arguments[0], environment)?.to_string();
                Ok(Data::Boolean(environment.in_state(&state_name)))
            }
            _ => Err(EvalError::name_error(&format!(
                "unknown function '{}'",
                name
            ))),
        },
        Expression::Assign(path, value) => {
            let value = evaluate(value, environment)?;
            environment.set_path(path, value.clone())?;
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestEnvironment {
        values: HashMap<String, Data>,
    }

    impl Environment for TestEnvironment {
        fn get_path(&self, path: &[String]) -> Result<Data, EvalError> {
            self.values
                .get(&path.join("."))
                .cloned()
                .ok_or_else(|| EvalError::name_error(&path.join(".")))
        }

        fn set_path(&mut self, path: &[String], value: Data) -> Result<(), EvalError> {
            self.values.insert(path.join("."), value);
            Ok(())
        }

        fn in_state(&self, state_name: &str) -> bool {
            state_name == "active"
        }
    }

    fn eval(source: &str) -> Result<Data, EvalError> {
        let mut env = TestEnvironment {
            values: HashMap::from([
                ("x".to_string(), Data::Integer(7)),
                ("name".to_string(), Data::String("joe".to_string())),
            ]),
        };
        evaluate(&ExpressionParser::parse(source)?, &mut env)
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Data::Integer(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), Data::Integer(9));
        assert_eq!(eval("7 / 2").unwrap(), Data::Double(3.5));
        assert_eq!(eval("-x + 10").unwrap(), Data::Integer(3));
    }

    #[test]
    fn comparison_and_boolean() {
        assert_eq!(eval("x >= 7 && x < 8").unwrap(), Data::Boolean(true));
        assert_eq!(eval("x == 7 || false").unwrap(), Data::Boolean(true));
        assert_eq!(eval("!(x == 7)").unwrap(), Data::Boolean(false));
        assert_eq!(eval("name == 'joe'").unwrap(), Data::Boolean(true));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            eval("'#' + name").unwrap(),
            Data::String("#joe".to_string())
        );
    }

    #[test]
    fn in_predicate() {
        assert_eq!(eval("In('active')").unwrap(), Data::Boolean(true));
        assert_eq!(eval("In('other')").unwrap(), Data::Boolean(false));
    }

    #[test]
    fn undefined_variable_is_a_name_error() {
        let err = eval("nope + 1").unwrap_err();
        assert_eq!(err.kind, crate::datamodel::ERROR_KIND_NAME);
    }

    #[test]
    fn script_statements() {
        let statements = ExpressionParser::parse_script("a = 1; b = a + 1;").unwrap();
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(ExpressionParser::parse("1 +").is_err());
        assert!(ExpressionParser::parse("(1").is_err());
        assert!(ExpressionParser::parse("1 2").is_err());
    }
}
