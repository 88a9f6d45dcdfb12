//! Built-in tools.
//!
//! - `calculate`: evaluates an arithmetic expression with a small
//!   recursive-descent parser (no code execution).
//! - `current_time`: reports the current UTC time.
//!
//! ```rust
//! use chatmux::tools::builtin::all_tools;
//!
//! assert_eq!(all_tools().len(), 2);
//! ```

use std::sync::Arc;

use crate::error::MuxError;
use crate::tools::tool::{FnTool, Tool, ToolExecutionContext};
use crate::tools::types::ToolParameters;

const CALCULATE: &str = "calculate";
const MAX_EXPRESSION_LEN: usize = 1024;
const MAX_DEPTH: usize = 64;

/// Every built-in tool.
pub fn all_tools() -> Vec<Arc<dyn Tool>> {
    vec![calculator_tool(), current_time_tool()]
}

/// Create the `calculate` tool.
///
/// Supports `+ - * / %`, `^` and `**` (right associative), unary minus,
/// parentheses, the constants `pi` and `e`, and the functions `abs round
/// min max sum pow sqrt sin cos tan asin acos atan ln log log10 exp int float`.
pub fn calculator_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        CALCULATE,
        "Evaluate a mathematical expression, e.g. \"2 + 2 * 3\" or \"sqrt(16) ^ 2\"",
        ToolParameters::object()
            .string("expression", "The expression to evaluate", true)
            .build(),
        |args, _ctx: ToolExecutionContext| async move {
            let expression = args.get_str("expression")?;
            tracing::debug!(%expression, "evaluating expression");
            let value = evaluate(expression).map_err(|e| MuxError::tool(CALCULATE, e))?;
            Ok(serde_json::json!({
                "expression": expression,
                "result": value,
                "formatted_result": format_number(value),
            }))
        },
    ))
}

/// Create the `current_time` tool.
pub fn current_time_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        "current_time",
        "Return the current UTC date and time",
        ToolParameters::empty(),
        |_args, _ctx: ToolExecutionContext| async move {
            let now = chrono::Utc::now();
            Ok(serde_json::json!({
                "iso8601": now.to_rfc3339(),
                "unix": now.timestamp(),
            }))
        },
    ))
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(format!("expression longer than {MAX_EXPRESSION_LEN} characters"));
    }
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let value = parser.expr()?;
    if let Some(tok) = parser.peek() {
        return Err(format!("unexpected {tok:?} at token {}", parser.pos));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}

/// Integers print without a fractional part; other values keep at most ten
/// decimals with trailing zeros removed.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let fixed = format!("{value:.10}");
        fixed.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    Pow,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: Token) -> Result<(), String> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(format!("expected {want:?}, found {tok:?}")),
            None => Err(format!("expected {want:?}, found end of input")),
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        self.depth -= 1;
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                '/' => value / rhs,
                _ => value.rem_euclid(rhs),
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Pow) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    apply_function(&name, &args)
                } else {
                    match name.as_str() {
                        "pi" => Ok(std::f64::consts::PI),
                        "e" => Ok(std::f64::consts::E),
                        _ => Err(format!("unknown name '{name}'")),
                    }
                }
            }
            Some(tok) => Err(format!("unexpected {tok:?}")),
            None => Err("unexpected end of input".to_string()),
        }
    }

    fn arguments(&mut self) -> Result<Vec<f64>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(tok) => return Err(format!("expected ',' or ')', found {tok:?}")),
                None => return Err("unclosed function call".to_string()),
            }
        }
    }
}

fn apply_function(name: &str, args: &[f64]) -> Result<f64, String> {
    let one = |f: fn(f64) -> f64| match args {
        [x] => Ok(f(*x)),
        _ => Err(format!("{name}() takes exactly one argument")),
    };
    match name {
        "abs" => one(f64::abs),
        "sqrt" => match args {
            [x] if *x < 0.0 => Err("sqrt() of a negative number".to_string()),
            _ => one(f64::sqrt),
        },
        "sin" => one(f64::sin),
        "cos" => one(f64::cos),
        "tan" => one(f64::tan),
        "asin" => one(f64::asin),
        "acos" => one(f64::acos),
        "atan" => one(f64::atan),
        "exp" => one(f64::exp),
        "log10" => one(f64::log10),
        "int" => one(f64::trunc),
        "float" => one(|x| x),
        "ln" => match args {
            [x] if *x > 0.0 => Ok(x.ln()),
            [_] => Err("ln() domain error".to_string()),
            _ => Err("ln() takes exactly one argument".to_string()),
        },
        "log" => match args {
            [x] if *x > 0.0 => Ok(x.ln()),
            [x, base] if *x > 0.0 && *base > 0.0 && *base != 1.0 => Ok(x.log(*base)),
            [_] | [_, _] => Err("log() domain error".to_string()),
            _ => Err("log() takes one or two arguments".to_string()),
        },
        "round" => match args {
            [x] => Ok(x.round()),
            [x, digits] => {
                let factor = 10f64.powi(*digits as i32);
                Ok((x * factor).round() / factor)
            }
            _ => Err("round() takes one or two arguments".to_string()),
        },
        "pow" => match args {
            [x, y] => Ok(x.powf(*y)),
            _ => Err("pow() takes exactly two arguments".to_string()),
        },
        "min" | "max" if args.is_empty() => Err(format!("{name}() needs at least one argument")),
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        "sum" => Ok(args.iter().sum()),
        _ => Err(format!("unknown function '{name}'")),
    }
}
