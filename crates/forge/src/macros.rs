//! Constant environment: object-like and function-like macros plus named
//! values (enum constants), with token-level expansion.

use std::collections::HashMap;

use crate::expr::ExprParser;
use crate::int::{CInt, DataModel};
use crate::lexer::{tokenize, Token};
use crate::ConstantEvalError;

/// Nested expansions beyond this are treated as runaway recursion.
pub const MAX_EXPANSION_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
struct MacroDef {
    /// `None` for object-like macros.
    params: Option<Vec<String>>,
    variadic: bool,
    body: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConstEnv {
    macros: HashMap<String, MacroDef>,
    values: HashMap<String, CInt>,
    model: DataModel,
}

impl ConstEnv {
    pub fn new(model: DataModel) -> Self {
        Self {
            model,
            ..Default::default()
        }
    }

    /// `#define NAME body`
    pub fn define(&mut self, name: &str, body: &str) {
        self.values.remove(name);
        self.macros.insert(
            name.to_string(),
            MacroDef {
                params: None,
                variadic: false,
                body: body.to_string(),
            },
        );
    }

    /// `#define NAME(a, b, ...) body`
    pub fn define_function(&mut self, name: &str, params: &[String], body: &str) {
        let variadic = params.last().is_some_and(|p| p == "...");
        let named = params
            .iter()
            .filter(|p| p.as_str() != "...")
            .cloned()
            .collect();
        self.macros.insert(
            name.to_string(),
            MacroDef {
                params: Some(named),
                variadic,
                body: body.to_string(),
            },
        );
    }

    /// Binds a named value such as an enumerator.
    pub fn set_value(&mut self, name: &str, value: CInt) {
        self.values.insert(name.to_string(), value);
    }

    pub fn value(&self, name: &str) -> Option<CInt> {
        self.values.get(name).copied()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name) || self.values.contains_key(name)
    }

    /// Evaluates a C constant expression after macro expansion.
    ///
    /// # Example
    /// ```
    /// use forge::{ConstEnv, DataModel};
    ///
    /// let mut env = ConstEnv::new(DataModel::Lp64);
    /// env.define("LARGE_UINT", "(1ull<<63)");
    /// assert_eq!(env.eval("LARGE_UINT").unwrap().bits(), 1 << 63);
    /// ```
    pub fn eval(&self, text: &str) -> Result<CInt, ConstantEvalError> {
        let tokens = self.expand(text)?;
        if tokens.is_empty() {
            return Err(ConstantEvalError::UnexpectedEnd);
        }
        let expr = ExprParser::new(&tokens, self.model).parse()?;
        expr.eval(&|name: &str| self.values.get(name).copied())
    }

    /// Expands every macro in `text`.
    pub fn expand(&self, text: &str) -> Result<Vec<Token>, ConstantEvalError> {
        let tokens = tokenize(text)?;
        let mut active = Vec::new();
        self.expand_tokens(&tokens, &mut active, 0)
    }

    fn expand_tokens(
        &self,
        tokens: &[Token],
        active: &mut Vec<String>,
        depth: usize,
    ) -> Result<Vec<Token>, ConstantEvalError> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(ConstantEvalError::ExpansionTooDeep(MAX_EXPANSION_DEPTH));
        }
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let name = match &tokens[i] {
                Token::Ident(name) => name,
                tok => {
                    out.push(tok.clone());
                    i += 1;
                    continue;
                }
            };

            if name == "defined" {
                let (operand, consumed) = defined_operand(&tokens[i + 1..])?;
                let hit = self.is_defined(operand);
                out.push(Token::Number(if hit { "1" } else { "0" }.to_string()));
                i += 1 + consumed;
                continue;
            }

            let def = match self.macros.get(name) {
                Some(def) if !active.iter().any(|a| a == name) => def,
                _ => {
                    out.push(tokens[i].clone());
                    i += 1;
                    continue;
                }
            };

            match &def.params {
                None => {
                    let body = tokenize(&def.body)?;
                    active.push(name.clone());
                    let expanded = self.expand_tokens(&body, active, depth + 1);
                    active.pop();
                    out.extend(expanded?);
                    i += 1;
                }
                Some(params) => {
                    if tokens.get(i + 1) != Some(&Token::LParen) {
                        // A function-like macro name without arguments is left alone.
                        out.push(tokens[i].clone());
                        i += 1;
                        continue;
                    }
                    let (args, consumed) = split_arguments(&tokens[i + 2..])?;
                    let args = normalize_arity(name, params.len(), def.variadic, args)?;

                    let mut expanded_args = Vec::with_capacity(args.len());
                    for arg in &args {
                        expanded_args.push(self.expand_tokens(arg, active, depth + 1)?);
                    }
                    let body = tokenize(&def.body)?;
                    let substituted = substitute(&body, params, def.variadic, &expanded_args)?;

                    active.push(name.clone());
                    let expanded = self.expand_tokens(&substituted, active, depth + 1);
                    active.pop();
                    out.extend(expanded?);
                    i += 2 + consumed;
                }
            }
        }
        Ok(out)
    }
}

/// Parses the operand of `defined X` / `defined(X)`; returns the name and
/// the number of tokens consumed.
fn defined_operand(rest: &[Token]) -> Result<(&str, usize), ConstantEvalError> {
    match rest {
        [Token::Ident(name), ..] => Ok((name, 1)),
        [Token::LParen, Token::Ident(name), Token::RParen, ..] => Ok((name, 3)),
        [tok, ..] => Err(ConstantEvalError::UnexpectedToken(tok.to_string())),
        [] => Err(ConstantEvalError::UnexpectedEnd),
    }
}

/// Splits macro arguments at depth-0 commas. `rest` starts right after the
/// opening parenthesis; the count includes the closing one.
fn split_arguments(rest: &[Token]) -> Result<(Vec<Vec<Token>>, usize), ConstantEvalError> {
    let mut args = vec![Vec::new()];
    let mut depth = 0usize;
    for (idx, tok) in rest.iter().enumerate() {
        match tok {
            Token::LParen => depth += 1,
            Token::RParen if depth == 0 => return Ok((args, idx + 1)),
            Token::RParen => depth -= 1,
            Token::Comma if depth == 0 => {
                args.push(Vec::new());
                continue;
            }
            _ => {}
        }
        if let Some(current) = args.last_mut() {
            current.push(tok.clone());
        }
    }
    Err(ConstantEvalError::UnexpectedEnd)
}

fn normalize_arity(
    name: &str,
    expected: usize,
    variadic: bool,
    mut args: Vec<Vec<Token>>,
) -> Result<Vec<Vec<Token>>, ConstantEvalError> {
    // `F()` passes one empty argument, which matches a zero-parameter macro.
    if expected == 0 && args.len() == 1 && args[0].is_empty() {
        args.clear();
    }
    let ok = if variadic {
        args.len() >= expected
    } else {
        args.len() == expected
    };
    if !ok {
        return Err(ConstantEvalError::MacroArity {
            name: name.to_string(),
            expected,
            found: args.len(),
        });
    }
    Ok(args)
}

fn substitute(
    body: &[Token],
    params: &[String],
    variadic: bool,
    args: &[Vec<Token>],
) -> Result<Vec<Token>, ConstantEvalError> {
    let mut out = Vec::with_capacity(body.len());
    for tok in body {
        match tok {
            Token::Hash | Token::HashHash => {
                return Err(ConstantEvalError::Unsupported(
                    "stringizing or token pasting".to_string(),
                ));
            }
            Token::Ident(id) if variadic && id == "__VA_ARGS__" => {
                for (n, arg) in args[params.len()..].iter().enumerate() {
                    if n > 0 {
                        out.push(Token::Comma);
                    }
                    out.extend(arg.iter().cloned());
                }
            }
            Token::Ident(id) => match params.iter().position(|p| p == id) {
                Some(idx) => out.extend(args[idx].iter().cloned()),
                None => out.push(tok.clone()),
            },
            _ => out.push(tok.clone()),
        }
    }
    Ok(out)
}
