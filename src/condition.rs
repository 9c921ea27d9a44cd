//! Restricted evaluator for task `when` expressions.
//!
//! Conditions are evaluated over a fixed, read-only context; the grammar
//! is a closed subset and the evaluator is a hand-written lexer plus
//! recursive-descent parser, never an `eval` of user input:
//!
//! ```text
//! expr       := and ('||' and)*
//! and        := unary ('&&' unary)*
//! unary      := '!' unary | primary
//! primary    := '(' expr ')' | comparison
//! comparison := operand ('==' | '!=' | 'matches') operand
//! operand    := identifier | 'string literal'
//! ```
//!
//! Identifiers resolve against the context (`branch`, `tag`, `event`,
//! `pr_number`, `ci`). An unknown identifier or a malformed expression is
//! a *soft* failure: the task is skipped, because running a
//! side-effecting task on an ill-formed gate is worse than skipping it.

use std::collections::BTreeMap;

use globset::Glob;

use crate::services::merge_queue::{self, MergeQueue};

/// The fixed evaluation context.
///
/// All values are strings; absent values are empty strings, which compare
/// and match like any other value.
#[derive(Debug, Clone, Default)]
pub struct ConditionContext {
    values: BTreeMap<String, String>,
}

impl ConditionContext {
    /// Creates a context with the given field values.
    pub fn new(branch: &str, tag: &str, event: &str, pr_number: &str, ci: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert("branch".to_string(), branch.to_string());
        values.insert("tag".to_string(), tag.to_string());
        values.insert("event".to_string(), event.to_string());
        values.insert("pr_number".to_string(), pr_number.to_string());
        values.insert("ci".to_string(), ci.to_string());
        Self { values }
    }

    /// Builds the context from the process environment.
    ///
    /// `SYKLI_*` variables win; common CI variables are the fallback.
    /// When a merge queue is detected the `event` value becomes
    /// `merge_group` so conditions can gate on it.
    pub fn from_env() -> Self {
        let get = |names: &[&str]| -> String {
            names
                .iter()
                .find_map(|n| std::env::var(n).ok().filter(|v| !v.is_empty()))
                .unwrap_or_default()
        };

        let mut event = get(&["SYKLI_EVENT", "GITHUB_EVENT_NAME"]);
        if merge_queue::detect() != MergeQueue::None {
            event = "merge_group".to_string();
        }

        Self::new(
            &get(&["SYKLI_BRANCH", "GITHUB_REF_NAME", "CI_COMMIT_BRANCH"]),
            &get(&["SYKLI_TAG", "CI_COMMIT_TAG"]),
            &event,
            &get(&["SYKLI_PR_NUMBER", "CI_MERGE_REQUEST_IID"]),
            &get(&["CI"]),
        )
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Outcome of evaluating a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The condition held; run the task.
    Run,
    /// The condition did not hold; skip the task.
    Skip,
    /// The condition could not be evaluated; skip the task and surface
    /// the reason as a warning.
    Invalid(String),
}

/// Evaluates `expression` against `ctx`.
pub fn evaluate(expression: &str, ctx: &ConditionContext) -> Verdict {
    let tokens = match lex(expression) {
        Ok(tokens) => tokens,
        Err(e) => return Verdict::Invalid(e),
    };
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        ctx,
    };
    match parser.expr() {
        Ok(value) => {
            if parser.pos != tokens.len() {
                return Verdict::Invalid(format!(
                    "unexpected trailing input in condition {:?}",
                    expression
                ));
            }
            if value { Verdict::Run } else { Verdict::Skip }
        }
        Err(e) => Verdict::Invalid(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Eq,
    Ne,
    Matches,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => s.push(ch),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '=' => {
                chars.next();
                if chars.next() == Some('=') {
                    tokens.push(Token::Eq);
                } else {
                    return Err("expected '=='".to_string());
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '&' => {
                chars.next();
                if chars.next() == Some('&') {
                    tokens.push(Token::And);
                } else {
                    return Err("expected '&&'".to_string());
                }
            }
            '|' => {
                chars.next();
                if chars.next() == Some('|') {
                    tokens.push(Token::Or);
                } else {
                    return Err("expected '||'".to_string());
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if ident == "matches" {
                    tokens.push(Token::Matches);
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            other => return Err(format!("unexpected character {:?} in condition", other)),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ctx: &'a ConditionContext,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<bool, String> {
        let mut value = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, String> {
        let mut value = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<bool, String> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            return Ok(!self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, String> {
        if self.peek() == Some(&Token::LParen) {
            self.next();
            let value = self.expr()?;
            match self.next() {
                Some(Token::RParen) => return Ok(value),
                _ => return Err("expected ')'".to_string()),
            }
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<bool, String> {
        let left = self.operand()?;
        let op = match self.next() {
            Some(Token::Eq) => Op::Eq,
            Some(Token::Ne) => Op::Ne,
            Some(Token::Matches) => Op::Matches,
            other => {
                return Err(format!(
                    "expected '==', '!=' or 'matches', found {:?}",
                    other
                ));
            }
        };
        let right = self.operand()?;

        match op {
            Op::Eq => Ok(left == right),
            Op::Ne => Ok(left != right),
            Op::Matches => {
                let glob = Glob::new(&right)
                    .map_err(|e| format!("invalid glob {:?}: {}", right, e))?
                    .compile_matcher();
                Ok(glob.is_match(&left))
            }
        }
    }

    fn operand(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Ident(name)) => match self.ctx.lookup(name) {
                Some(value) => Ok(value.to_string()),
                None => Err(format!("unknown identifier {:?}", name)),
            },
            Some(Token::Str(s)) => Ok(s.clone()),
            other => Err(format!("expected identifier or string, found {:?}", other)),
        }
    }
}

enum Op {
    Eq,
    Ne,
    Matches,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConditionContext {
        ConditionContext::new("main", "v1.2.0", "push", "42", "true")
    }

    #[test]
    fn test_equality() {
        assert_eq!(evaluate("branch == 'main'", &ctx()), Verdict::Run);
        assert_eq!(evaluate("branch == 'dev'", &ctx()), Verdict::Skip);
    }

    #[test]
    fn test_inequality() {
        assert_eq!(evaluate("branch != 'dev'", &ctx()), Verdict::Run);
        assert_eq!(evaluate("branch != 'main'", &ctx()), Verdict::Skip);
    }

    #[test]
    fn test_matches_glob() {
        assert_eq!(evaluate("tag matches 'v*'", &ctx()), Verdict::Run);
        assert_eq!(evaluate("tag matches 'release-*'", &ctx()), Verdict::Skip);
        assert_eq!(evaluate("branch matches 'ma?n'", &ctx()), Verdict::Run);
    }

    #[test]
    fn test_and_or() {
        assert_eq!(
            evaluate("branch == 'main' && ci == 'true'", &ctx()),
            Verdict::Run
        );
        assert_eq!(
            evaluate("branch == 'dev' || tag matches 'v*'", &ctx()),
            Verdict::Run
        );
        assert_eq!(
            evaluate("branch == 'dev' && ci == 'true'", &ctx()),
            Verdict::Skip
        );
    }

    #[test]
    fn test_not_and_parens() {
        assert_eq!(evaluate("!(branch == 'dev')", &ctx()), Verdict::Run);
        assert_eq!(
            evaluate("!(branch == 'main' || event == 'push')", &ctx()),
            Verdict::Skip
        );
    }

    #[test]
    fn test_literal_on_left() {
        assert_eq!(evaluate("'main' == branch", &ctx()), Verdict::Run);
    }

    #[test]
    fn test_unknown_identifier_is_soft_skip() {
        match evaluate("environment == 'prod'", &ctx()) {
            Verdict::Invalid(reason) => assert!(reason.contains("environment")),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_expression_is_soft_skip() {
        assert!(matches!(
            evaluate("branch ==", &ctx()),
            Verdict::Invalid(_)
        ));
        assert!(matches!(
            evaluate("branch = 'main'", &ctx()),
            Verdict::Invalid(_)
        ));
        assert!(matches!(
            evaluate("branch == 'main' extra", &ctx()),
            Verdict::Invalid(_)
        ));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            evaluate("branch == 'main", &ctx()),
            Verdict::Invalid(_)
        ));
    }

    #[test]
    fn test_empty_context_values_compare() {
        let empty = ConditionContext::default();
        // Unknown in an empty context: no keys registered at all.
        assert!(matches!(
            evaluate("branch == ''", &empty),
            Verdict::Invalid(_)
        ));

        let ctx = ConditionContext::new("", "", "", "", "");
        assert_eq!(evaluate("tag == ''", &ctx), Verdict::Run);
    }
}
