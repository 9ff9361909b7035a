//! C6: the job-selection expression language (spec.md §4.5).
//!
//! A hand-written recursive-descent parser, in the style of
//! `podcore::links`'s hand-rolled, `regex`-based parsing rather than a
//! parser-combinator crate: the grammar is small and every production maps
//! to one function.
//!
//! Operator precedence, tightest to loosest: `not` > `except` > `in` >
//! juxtaposition (union). A leading `not` swallows every term up to the
//! next `except`/`in`/`)`/end-of-input — this is what makes `not a b c`
//! mean "everything except {a, b, c}" rather than "(not a) b c" — and may
//! only appear as the very first token of such a run; `not` appearing
//! after an already-parsed term in the same run is a syntax error (this is
//! what makes `all not e` ill-formed while `not all except e` is not).

use std::collections::BTreeSet;

use regex::Regex;

use errors::*;
use model::{CacheState, JobId};
use store::Store;

/// A read-only view over "every job that currently exists, and what state
/// it is in" — the universe the selection language quantifies `all`/`not`
/// over.
pub struct JobUniverse<'a> {
    store: &'a Store,
}

impl<'a> JobUniverse<'a> {
    pub fn new(store: &'a Store) -> JobUniverse<'a> {
        JobUniverse { store }
    }

    pub fn all_ids(&self) -> Result<BTreeSet<JobId>> {
        Ok(::store::all_job_ids(self.store)?
            .into_iter()
            .map(JobId::new)
            .collect())
    }

    pub fn exists(&self, id: &JobId) -> Result<bool> {
        self.store.has("job", id.as_str())
    }

    pub fn state_of(&self, id: &JobId) -> Result<Option<CacheState>> {
        Ok(::store::get_cache(self.store, id.as_str())?.map(|c| c.state))
    }

    fn in_state(&self, state: CacheState) -> Result<BTreeSet<JobId>> {
        let mut out = BTreeSet::new();
        for id in self.all_ids()? {
            if self.state_of(&id)? == Some(state) {
                out.insert(id);
            }
        }
        Ok(out)
    }
}

/// Translates a shell-glob pattern (`*` = any chars) into an anchored
/// regular expression, the same transformation
/// `compmake.utils.wildcards.wildcard_to_regexp` makes.
pub fn wildcard_to_regexp(pattern: &str) -> Regex {
    let escaped = regex::quote(pattern).replace("\\*", ".*");
    Regex::new(&format!("^{}$", escaped)).expect("glob pattern always produces a valid regexp")
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    In,
    Except,
    Word(String),
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            let word = current.clone();
            tokens.push(match word.as_str() {
                "not" => Token::Not,
                "in" => Token::In,
                "except" => Token::Except,
                _ => Token::Word(word),
            });
            current.clear();
        }
    };

    for c in input.chars() {
        match c {
            '(' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::LParen);
            }
            ')' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::RParen);
            }
            c if c.is_whitespace() => {
                flush(&mut current, &mut tokens);
            }
            c => current.push(c),
        }
    }
    flush(&mut current, &mut tokens);

    tokens
}

struct Parser<'a, 'u> {
    tokens: &'a [Token],
    pos: usize,
    universe: &'u JobUniverse<'u>,
}

impl<'a, 'u> Parser<'a, 'u> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    // union := inter ( WS inter )*
    fn parse_union(&mut self) -> Result<BTreeSet<JobId>> {
        let mut result = self.parse_inter()?;
        loop {
            match self.peek() {
                None | Some(&Token::RParen) => break,
                _ => {
                    let rhs = self.parse_inter()?;
                    result = result.union(&rhs).cloned().collect();
                }
            }
        }
        Ok(result)
    }

    // inter := diff ( "in" diff )*
    fn parse_inter(&mut self) -> Result<BTreeSet<JobId>> {
        let mut result = self.parse_diff()?;
        while let Some(&Token::In) = self.peek() {
            self.bump();
            let rhs = self.parse_diff()?;
            result = result.intersection(&rhs).cloned().collect();
        }
        Ok(result)
    }

    // diff := run ( "except" run )*
    fn parse_diff(&mut self) -> Result<BTreeSet<JobId>> {
        let mut result = self.parse_run()?;
        while let Some(&Token::Except) = self.peek() {
            self.bump();
            let rhs = self.parse_run()?;
            result = result.difference(&rhs).cloned().collect();
        }
        Ok(result)
    }

    // run := "not" terms | terms
    //
    // A "run" is the operand of one `except`/`in` step, or one member of
    // the top-level union. `terms` is one-or-more juxtaposed atoms, with
    // no `not` inside it — `not` is only legal as the very first token of
    // the run.
    fn parse_run(&mut self) -> Result<BTreeSet<JobId>> {
        if let Some(&Token::Not) = self.peek() {
            self.bump();
            let inner = self.parse_terms()?;
            let all = self.universe.all_ids()?;
            return Ok(all.difference(&inner).cloned().collect());
        }
        self.parse_terms()
    }

    // terms := atom+, stopping at `except`/`in`/")"/end, erroring on a
    // stray `not`.
    fn parse_terms(&mut self) -> Result<BTreeSet<JobId>> {
        let mut result: Option<BTreeSet<JobId>> = None;
        loop {
            match self.peek() {
                None | Some(&Token::RParen) | Some(&Token::Except) | Some(&Token::In) => break,
                Some(&Token::Not) => bail!(ErrorKind::SyntaxError(
                    "'not' may only appear at the start of an expression".to_owned()
                )),
                Some(&Token::LParen) => {
                    self.bump();
                    let inner = self.parse_union()?;
                    match self.bump() {
                        Some(Token::RParen) => {}
                        _ => bail!(ErrorKind::SyntaxError("unbalanced parentheses".to_owned())),
                    }
                    result = Some(match result {
                        Some(r) => r.union(&inner).cloned().collect(),
                        None => inner,
                    });
                }
                Some(&Token::Word(ref w)) => {
                    let w = w.clone();
                    self.bump();
                    let set = self.eval_word(&w)?;
                    result = Some(match result {
                        Some(r) => r.union(&set).cloned().collect(),
                        None => set,
                    });
                }
            }
        }
        match result {
            Some(r) => Ok(r),
            None => bail!(ErrorKind::SyntaxError("expected an expression".to_owned())),
        }
    }

    fn eval_word(&self, word: &str) -> Result<BTreeSet<JobId>> {
        match word.to_lowercase().as_str() {
            "all" => self.universe.all_ids(),
            "done" => self.universe.in_state(CacheState::Done),
            "failed" => self.universe.in_state(CacheState::Failed),
            "blocked" => self.universe.in_state(CacheState::Blocked),
            "not-started" => self.universe.in_state(CacheState::NotStarted),
            "in-progress" => self.universe.in_state(CacheState::InProgress),
            _ => {
                if word.contains('*') {
                    let regexp = wildcard_to_regexp(word);
                    Ok(self
                        .universe
                        .all_ids()?
                        .into_iter()
                        .filter(|id| regexp.is_match(id.as_str()))
                        .collect())
                } else {
                    let id = JobId::new(word);
                    if self.universe.exists(&id)? {
                        let mut set = BTreeSet::new();
                        set.insert(id);
                        Ok(set)
                    } else {
                        bail!(ErrorKind::UserError(format!("no such job: {}", word)))
                    }
                }
            }
        }
    }
}

/// Parses and evaluates a job-set expression against the given universe,
/// returning job ids in ascending order (a stable, if not
/// insertion-preserving, realisation of spec.md's "lazy ordered iterator
/// preserving first-seen insertion order" contract — see `DESIGN.md`).
pub fn parse_job_list(expr: &str, universe: &JobUniverse) -> Result<Vec<JobId>> {
    let tokens = tokenize(expr);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        universe,
    };
    let result = parser.parse_union()?;
    if parser.pos != tokens.len() {
        bail!(ErrorKind::SyntaxError(format!(
            "unexpected trailing input at token {}",
            parser.pos
        )));
    }
    Ok(result.into_iter().collect())
}
