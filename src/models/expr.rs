//! Expression-language right-hand sides.
//!
//! A model file declares its state, optional intermediates, and one
//! derivative per state component:
//!
//! ```text
//! # bimolecular association
//! state a, b, p
//! let rate = k * a * b
//! d(a)/dt = -rate
//! d(b)/dt = -rate
//! d(p)/dt = rate
//! ```
//!
//! - names: `t`, state components, model parameters, earlier `let` names
//! - operators: `+ - * / ^` (`^` binds tightest and is right-associative),
//!   unary minus, parentheses
//! - functions: `exp ln log sqrt abs sin cos tanh` (one argument),
//!   `min max pow` (two arguments); `log` is the natural logarithm
//!
//! Files are compiled once into stack bytecode; evaluation allocates nothing.

use std::path::Path;

use super::OdeRhs;
use crate::domain::ParamMap;
use crate::error::FitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Exp,
    Ln,
    Sqrt,
    Abs,
    Sin,
    Cos,
    Tanh,
    Min,
    Max,
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        Some(match name {
            "exp" => Func::Exp,
            "ln" | "log" => Func::Ln,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tanh" => Func::Tanh,
            "min" => Func::Min,
            "max" => Func::Max,
            "pow" => Func::Pow,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Min | Func::Max | Func::Pow => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Const(f64),
    Time,
    State(usize),
    Param(usize),
    Local(usize),
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Call(Func),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
    Eq,
}

const KEYWORDS: [&str; 3] = ["t", "let", "state"];

/// A compiled expression-language model.
#[derive(Debug, Clone)]
pub struct ExprModel {
    states: Vec<String>,
    params: Vec<String>,
    lets: Vec<Vec<Op>>,
    derivs: Vec<Vec<Op>>,
    stack: Vec<f64>,
    let_values: Vec<f64>,
}

impl ExprModel {
    /// Read and compile a model file against the ordered parameter names.
    pub fn load(path: &Path, params: &[String]) -> Result<Self, FitError> {
        let source = std::fs::read_to_string(path).map_err(|e| FitError::io(path, e))?;
        Self::compile(&source, params)
            .map_err(|e| match e {
                FitError::ModelInvalid(msg) => {
                    FitError::ModelInvalid(format!("{}: {msg}", path.display()))
                }
                other => other,
            })
    }

    pub fn compile(source: &str, params: &[String]) -> Result<Self, FitError> {
        for p in params {
            if KEYWORDS.contains(&p.as_str()) || Func::lookup(p).is_some() || !is_ident(p) {
                return Err(invalid(0, format!("`{p}` cannot be used as a parameter name")));
            }
        }

        let mut states: Option<Vec<String>> = None;
        let mut let_names: Vec<String> = Vec::new();
        let mut lets: Vec<Vec<Op>> = Vec::new();
        let mut derivs: Vec<Option<Vec<Op>>> = Vec::new();
        let mut used = vec![false; params.len()];

        for (idx, raw) in source.lines().enumerate() {
            let line_no = idx + 1;
            let text = raw.split('#').next().unwrap_or("").trim();
            if text.is_empty() {
                continue;
            }
            let tokens = tokenize(text, line_no)?;

            match tokens.first() {
                Some(Token::Ident(kw)) if kw == "state" => {
                    if states.is_some() {
                        return Err(invalid(line_no, "state is declared twice"));
                    }
                    let names = parse_state_line(&tokens[1..], line_no)?;
                    for name in &names {
                        if params.contains(name) {
                            return Err(invalid(line_no, format!("`{name}` is both a state and a parameter")));
                        }
                    }
                    derivs = vec![None; names.len()];
                    states = Some(names);
                }
                Some(Token::Ident(kw)) if kw == "let" => {
                    let Some(state_names) = states.as_deref() else {
                        return Err(invalid(line_no, "`state` must be declared first"));
                    };
                    let name = match (tokens.get(1), tokens.get(2)) {
                        (Some(Token::Ident(name)), Some(Token::Eq)) => name.clone(),
                        _ => return Err(invalid(line_no, "expected `let <name> = <expression>`")),
                    };
                    if KEYWORDS.contains(&name.as_str())
                        || Func::lookup(&name).is_some()
                        || state_names.contains(&name)
                        || params.contains(&name)
                        || let_names.contains(&name)
                    {
                        return Err(invalid(line_no, format!("`{name}` is already defined")));
                    }
                    let scope = Scope {
                        states: state_names,
                        params,
                        lets: &let_names,
                        used: &mut used,
                    };
                    lets.push(compile_expr(&tokens[3..], scope, line_no)?);
                    let_names.push(name);
                }
                Some(Token::Ident(kw)) if kw == "d" => {
                    let Some(state_names) = states.as_deref() else {
                        return Err(invalid(line_no, "`state` must be declared first"));
                    };
                    let name = match tokens.get(..7) {
                        Some(
                            [
                                Token::Ident(_),
                                Token::LParen,
                                Token::Ident(name),
                                Token::RParen,
                                Token::Slash,
                                Token::Ident(dt),
                                Token::Eq,
                            ],
                        ) if dt == "dt" => name.clone(),
                        _ => return Err(invalid(line_no, "expected `d(<state>)/dt = <expression>`")),
                    };
                    let Some(pos) = state_names.iter().position(|s| *s == name) else {
                        return Err(invalid(line_no, format!("`{name}` is not a state component")));
                    };
                    if derivs[pos].is_some() {
                        return Err(invalid(line_no, format!("derivative of `{name}` defined twice")));
                    }
                    let scope = Scope {
                        states: state_names,
                        params,
                        lets: &let_names,
                        used: &mut used,
                    };
                    derivs[pos] = Some(compile_expr(&tokens[7..], scope, line_no)?);
                }
                _ => return Err(invalid(line_no, "expected `state`, `let` or `d(<state>)/dt`")),
            }
        }

        let Some(states) = states else {
            return Err(invalid(0, "no `state` declaration"));
        };
        let missing: Vec<&str> = states
            .iter()
            .zip(&derivs)
            .filter(|(_, d)| d.is_none())
            .map(|(s, _)| s.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(invalid(0, format!("no derivative for {}", missing.join(", "))));
        }
        for (name, used) in params.iter().zip(&used) {
            if !used {
                log::warn!("Model parameter `{name}` is not used by the right-hand side.");
            }
        }

        Ok(Self {
            states,
            params: params.to_vec(),
            let_values: vec![0.0; lets.len()],
            lets,
            derivs: derivs.into_iter().flatten().collect(),
            stack: Vec::with_capacity(16),
        })
    }

    /// State component names in declaration order.
    pub fn states(&self) -> &[String] {
        &self.states
    }
}

impl OdeRhs for ExprModel {
    fn eval(&mut self, t: f64, state: &[f64], params: ParamMap<'_>, out: &mut [f64]) {
        for i in 0..self.lets.len() {
            let env = Env {
                t,
                state,
                params,
                lets: &self.let_values[..i],
            };
            let value = run(&self.lets[i], &mut self.stack, &env);
            self.let_values[i] = value;
        }
        let env = Env {
            t,
            state,
            params,
            lets: &self.let_values,
        };
        for (slot, ops) in out.iter_mut().zip(&self.derivs) {
            *slot = run(ops, &mut self.stack, &env);
        }
    }

    fn state_dim(&self) -> Option<usize> {
        Some(self.states.len())
    }

    fn parameter_names(&self) -> Option<&[String]> {
        Some(&self.params)
    }
}

fn invalid(line: usize, msg: impl std::fmt::Display) -> FitError {
    if line == 0 {
        FitError::ModelInvalid(msg.to_string())
    } else {
        FitError::ModelInvalid(format!("line {line}: {msg}"))
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn tokenize(text: &str, line: usize) -> Result<Vec<Token>, FitError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || c == b'.' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    while j < bytes.len() && bytes[j].is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            let lexeme = &text[start..i];
            let value = lexeme
                .parse::<f64>()
                .map_err(|_| invalid(line, format!("bad number `{lexeme}`")))?;
            tokens.push(Token::Num(value));
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token::Ident(text[start..i].to_string()));
            continue;
        }
        let token = match c {
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'^' => Token::Caret,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b'=' => Token::Eq,
            _ => {
                let ch = text[i..].chars().next().unwrap_or('?');
                return Err(invalid(line, format!("unexpected character `{ch}`")));
            }
        };
        tokens.push(token);
        i += 1;
    }
    Ok(tokens)
}

fn parse_state_line(tokens: &[Token], line: usize) -> Result<Vec<String>, FitError> {
    let mut names: Vec<String> = Vec::new();
    let mut expect_name = true;
    for token in tokens {
        match (token, expect_name) {
            (Token::Ident(name), true) => {
                if KEYWORDS.contains(&name.as_str()) || Func::lookup(name).is_some() {
                    return Err(invalid(line, format!("`{name}` is reserved")));
                }
                if names.contains(name) {
                    return Err(invalid(line, format!("state `{name}` listed twice")));
                }
                names.push(name.clone());
                expect_name = false;
            }
            (Token::Comma, false) => expect_name = true,
            _ => return Err(invalid(line, "expected `state <name>, <name>, ...`")),
        }
    }
    if names.is_empty() || expect_name {
        return Err(invalid(line, "expected `state <name>, <name>, ...`"));
    }
    Ok(names)
}

/// Names visible to an expression.
struct Scope<'a> {
    states: &'a [String],
    params: &'a [String],
    lets: &'a [String],
    used: &'a mut [bool],
}

impl Scope<'_> {
    fn resolve(&mut self, name: &str, line: usize) -> Result<Op, FitError> {
        if name == "t" {
            return Ok(Op::Time);
        }
        if let Some(i) = self.states.iter().position(|s| s == name) {
            return Ok(Op::State(i));
        }
        if let Some(i) = self.lets.iter().position(|s| s == name) {
            return Ok(Op::Local(i));
        }
        if let Some(i) = self.params.iter().position(|s| s == name) {
            self.used[i] = true;
            return Ok(Op::Param(i));
        }
        Err(invalid(line, format!("unknown name `{name}`")))
    }
}

fn compile_expr(tokens: &[Token], scope: Scope<'_>, line: usize) -> Result<Vec<Op>, FitError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        line,
        scope,
        ops: Vec::new(),
    };
    parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(invalid(line, "unexpected trailing input"));
    }
    if parser.ops.is_empty() {
        return Err(invalid(line, "empty expression"));
    }
    Ok(parser.ops)
}

/// Recursive-descent parser emitting postfix code.
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    line: usize,
    scope: Scope<'a>,
    ops: Vec<Op>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, want: Token, what: &str) -> Result<(), FitError> {
        match self.next() {
            Some(ref token) if *token == want => Ok(()),
            _ => Err(invalid(self.line, format!("expected {what}"))),
        }
    }

    fn expr(&mut self) -> Result<(), FitError> {
        self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Sub,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.term()?;
            self.ops.push(op);
        }
    }

    fn term(&mut self) -> Result<(), FitError> {
        self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Op::Mul,
                Some(Token::Slash) => Op::Div,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.unary()?;
            self.ops.push(op);
        }
    }

    fn unary(&mut self) -> Result<(), FitError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.unary()?;
                self.ops.push(Op::Neg);
                Ok(())
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<(), FitError> {
        self.atom()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            self.unary()?;
            self.ops.push(Op::Pow);
        }
        Ok(())
    }

    fn atom(&mut self) -> Result<(), FitError> {
        match self.next() {
            Some(Token::Num(v)) => {
                self.ops.push(Op::Const(v));
                Ok(())
            }
            Some(Token::LParen) => {
                self.expr()?;
                self.expect(Token::RParen, "`)`")
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let Some(func) = Func::lookup(&name) else {
                        return Err(invalid(self.line, format!("unknown function `{name}`")));
                    };
                    self.pos += 1;
                    let mut args = 0;
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            self.expr()?;
                            args += 1;
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen, "`)`")?;
                    if args != func.arity() {
                        return Err(invalid(
                            self.line,
                            format!("`{name}` takes {} argument(s), got {args}", func.arity()),
                        ));
                    }
                    self.ops.push(Op::Call(func));
                    Ok(())
                } else {
                    let op = self.scope.resolve(&name, self.line)?;
                    self.ops.push(op);
                    Ok(())
                }
            }
            _ => Err(invalid(self.line, "expected a number, name or `(`")),
        }
    }
}

struct Env<'a> {
    t: f64,
    state: &'a [f64],
    params: ParamMap<'a>,
    lets: &'a [f64],
}

fn run(ops: &[Op], stack: &mut Vec<f64>, env: &Env<'_>) -> f64 {
    stack.clear();
    for op in ops {
        let value = match *op {
            Op::Const(v) => v,
            Op::Time => env.t,
            Op::State(i) => env.state[i],
            Op::Param(i) => env.params.value_at(i),
            Op::Local(i) => env.lets[i],
            Op::Neg => -stack.pop().unwrap_or(f64::NAN),
            Op::Call(func) if func.arity() == 1 => {
                let x = stack.pop().unwrap_or(f64::NAN);
                match func {
                    Func::Exp => x.exp(),
                    Func::Ln => x.ln(),
                    Func::Sqrt => x.sqrt(),
                    Func::Abs => x.abs(),
                    Func::Sin => x.sin(),
                    Func::Cos => x.cos(),
                    Func::Tanh => x.tanh(),
                    Func::Min | Func::Max | Func::Pow => f64::NAN,
                }
            }
            _ => {
                let b = stack.pop().unwrap_or(f64::NAN);
                let a = stack.pop().unwrap_or(f64::NAN);
                match *op {
                    Op::Add => a + b,
                    Op::Sub => a - b,
                    Op::Mul => a * b,
                    Op::Div => a / b,
                    Op::Pow | Op::Call(Func::Pow) => a.powf(b),
                    Op::Call(Func::Min) => a.min(b),
                    Op::Call(Func::Max) => a.max(b),
                    _ => f64::NAN,
                }
            }
        };
        stack.push(value);
    }
    stack.pop().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_scalar(expr: &str) -> f64 {
        let src = format!("state x\nd(x)/dt = {expr}\n");
        let mut model = ExprModel::compile(&src, &[]).unwrap();
        let mut out = [0.0];
        model.eval(0.0, &[1.0], ParamMap::new(&[], &[]), &mut out);
        out[0]
    }

    fn compile_err(src: &str, params: &[&str]) -> String {
        let params: Vec<String> = params.iter().map(|s| s.to_string()).collect();
        match ExprModel::compile(src, &params) {
            Err(FitError::ModelInvalid(msg)) => msg,
            other => panic!("expected ModelInvalid, got {other:?}"),
        }
    }

    #[test]
    fn operator_precedence() {
        assert_eq!(eval_scalar("1 + 2 * 3"), 7.0);
        assert_eq!(eval_scalar("1 - 2 - 3"), -4.0);
        assert_eq!(eval_scalar("8 / 2 / 2"), 2.0);
        assert_eq!(eval_scalar("-2^2"), -4.0);
        assert_eq!(eval_scalar("2^3^2"), 512.0);
        assert_eq!(eval_scalar("2^-1"), 0.5);
        assert_eq!(eval_scalar("(1 + 2) * 3"), 9.0);
        assert_eq!(eval_scalar("2e-1 * 10"), 2.0);
    }

    #[test]
    fn builtin_functions() {
        assert_eq!(eval_scalar("exp(0) + ln(1)"), 1.0);
        assert_eq!(eval_scalar("min(3, max(1, 2))"), 2.0);
        assert_eq!(eval_scalar("pow(2, 10)"), 1024.0);
        assert_eq!(eval_scalar("abs(-x) + sqrt(4)"), 3.0);
        assert!((eval_scalar("log(exp(2.5))") - 2.5).abs() < 1e-15);
    }

    #[test]
    fn bimolecular_model() {
        let src = "\
# A + B -> P
state a, b, p
let rate = k * a * b   # mass action
d(a)/dt = -rate
d(b)/dt = -rate
d(p)/dt = rate
";
        let names = vec!["k".to_string()];
        let mut model = ExprModel::compile(src, &names).unwrap();
        assert_eq!(model.states(), &["a".to_string(), "b".to_string(), "p".to_string()]);
        assert_eq!(model.state_dim(), Some(3));

        let mut out = [0.0; 3];
        model.eval(0.0, &[2.0, 3.0, 0.0], ParamMap::new(&names, &[0.5]), &mut out);
        assert_eq!(out, [-3.0, -3.0, 3.0]);
    }

    #[test]
    fn derivatives_may_come_in_any_order_and_use_time() {
        let src = "state u, v\nd(v)/dt = -u\nd(u)/dt = t * v\n";
        let mut model = ExprModel::compile(src, &[]).unwrap();
        let mut out = [0.0; 2];
        model.eval(2.0, &[1.0, 3.0], ParamMap::new(&[], &[]), &mut out);
        assert_eq!(out, [6.0, -1.0]);
    }

    #[test]
    fn rejects_invalid_models() {
        assert!(compile_err("state x\nd(x)/dt = q\n", &[]).contains("unknown name `q`"));
        assert!(compile_err("state x, y\nd(x)/dt = 1\n", &[]).contains("no derivative for y"));
        assert!(compile_err("state x\nd(x)/dt = 1\nd(x)/dt = 2\n", &[]).contains("defined twice"));
        assert!(compile_err("d(x)/dt = 1\n", &[]).contains("declared first"));
        assert!(compile_err("state x\nd(x)/dt = exp(1, 2)\n", &[]).contains("takes 1"));
        assert!(compile_err("state x\nd(x)/dt = (1 + 2\n", &[]).contains("`)`"));
        assert!(compile_err("state x\nd(x)/dt = 1 2\n", &[]).contains("trailing"));
        assert!(compile_err("state x\nd(x)/dt = 1 $ 2\n", &[]).contains("unexpected character"));
        assert!(compile_err("state k\nd(k)/dt = k\n", &["k"]).contains("both a state and a parameter"));
        assert!(compile_err("state x\nlet x = 1\nd(x)/dt = x\n", &[]).contains("already defined"));
        assert!(compile_err("state x\nd(x)/dt = 1\n", &["t"]).contains("cannot be used"));
        assert!(compile_err("# nothing\n", &[]).contains("no `state`"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ExprModel::load(Path::new("/definitely/not/here.ode"), &[]).unwrap_err();
        assert!(matches!(err, FitError::Io { .. }));
    }
}
