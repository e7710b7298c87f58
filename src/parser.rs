//! Trace-file grammar (spec section 6; `original_source/src/Parser.h`):
//! whitespace-separated tokens, `#` to end-of-line is a comment, one
//! instruction per line.
//!
//! ```text
//! instruction: <tid> ':' <body> [ '@' [beginTime] ':' [endTime] ]
//! body: M[addr] == val | M[addr] := val | sync | { M[addr] == r ; M[addr] := w }
//! addr: M[n] | vn
//! separators: check | final M[addr] == val
//! ```

use crate::error::{AxeError, Result};
use crate::instr::{Instr, Op, MAX_ADDRS, MAX_DATA, MAX_THREADS};

/// A single `check`-delimited batch of instructions and final-value
/// constraints; uids are sequential within the batch but not yet
/// canonicalized ([`crate::trace::Trace::new`] does that).
pub type Batch = Vec<Instr>;

/// Recursive-descent, single-token lookahead, line-tracked.
#[derive(Debug)]
pub struct Parser {
    tokens: Vec<(String, u32)>,
    pos: usize,
    next_uid: usize,
}

impl Parser {
    pub fn new(source: &str) -> Parser {
        Parser {
            tokens: tokenize(source),
            pos: 0,
            next_uid: 0,
        }
    }

    fn peek(&self) -> Option<(&str, u32)> {
        self.tokens.get(self.pos).map(|(w, line)| (w.as_str(), *line))
    }

    fn bump(&mut self) -> Option<(String, u32)> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn line(&self) -> u32 {
        self.peek()
            .map(|(_, l)| l)
            .or_else(|| self.tokens.last().map(|(_, l)| *l))
            .unwrap_or(1)
    }

    fn demand(&mut self, expect: &str) -> Result<()> {
        match self.bump() {
            Some((w, _)) if w == expect => Ok(()),
            Some((w, line)) => Err(AxeError::parse(line, format!("expected '{expect}', found '{w}'"))),
            None => Err(AxeError::parse(self.line(), format!("expected '{expect}', found end of file"))),
        }
    }

    fn eat(&mut self, tok: &str) -> bool {
        if self.peek().map(|(w, _)| w) == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_nat(&mut self, limit: usize, what: &str) -> Result<u32> {
        match self.bump() {
            Some((w, line)) => {
                let n: i64 = w
                    .parse()
                    .map_err(|_| AxeError::parse(line, format!("expected a non-negative integer, found '{w}'")))?;
                if n < 0 || n as usize >= limit {
                    return Err(AxeError::parse(line, format!("{what} {n} out of range (limit {limit})")));
                }
                Ok(n as u32)
            }
            None => Err(AxeError::parse(self.line(), format!("expected a {what}, found end of file"))),
        }
    }

    /// `M[n]` or `vn`.
    fn parse_addr(&mut self) -> Result<u32> {
        match self.bump() {
            Some((w, line)) => parse_addr_token(&w, line),
            None => Err(AxeError::parse(self.line(), "expected an address, found end of file")),
        }
    }

    /// `@ [beginTime] ':' [endTime]`, returning `(None, None)` if no `@`
    /// token is present.
    fn parse_timestamp(&mut self) -> Result<(Option<i64>, Option<i64>)> {
        if !self.eat("@") {
            return Ok((None, None));
        }
        let begin = self.parse_opt_time()?;
        self.demand(":")?;
        let end = self.parse_opt_time()?;
        Ok((begin, end))
    }

    fn parse_opt_time(&mut self) -> Result<Option<i64>> {
        match self.peek() {
            None => Ok(None),
            Some((":", _)) => Ok(None),
            Some((w, line)) => {
                let n: i64 = w
                    .parse()
                    .map_err(|_| AxeError::parse(line, format!("expected a timestamp, found '{w}'")))?;
                self.pos += 1;
                Ok(Some(n))
            }
        }
    }

    fn fresh_uid(&mut self) -> usize {
        let u = self.next_uid;
        self.next_uid += 1;
        u
    }

    /// Parses one top-level item: an instruction, `final M[addr] == val`, a
    /// `check` separator (consumed transparently), or an `end` separator
    /// between interactively batched traces. `None` at end of input.
    fn parse_item(&mut self) -> Result<Option<Instr>> {
        let Some((head, line)) = self.peek().map(|(w, l)| (w.to_string(), l)) else {
            return Ok(None);
        };

        if head == "check" {
            self.pos += 1;
            return self.parse_item();
        }
        if head == "end" {
            self.pos += 1;
            let uid = self.fresh_uid();
            return Ok(Some(Instr {
                uid,
                tid: 0,
                op: Op::End,
                addr: 0,
                read_val: 0,
                write_val: 0,
                begin_time: None,
                end_time: None,
                line,
            }));
        }
        if head == "final" {
            self.pos += 1;
            let addr = self.parse_addr()?;
            self.demand("==")?;
            let val = self.parse_nat(MAX_DATA, "value")?;
            let uid = self.fresh_uid();
            return Ok(Some(Instr {
                uid,
                tid: 0,
                op: Op::Final,
                addr,
                read_val: val,
                write_val: 0,
                begin_time: None,
                end_time: None,
                line,
            }));
        }

        self.parse_instr().map(Some)
    }

    /// `<tid> ':' <body> [timestamp]`.
    fn parse_instr(&mut self) -> Result<Instr> {
        let line = self.line();
        let tid = self.parse_nat(MAX_THREADS, "thread id")?;
        self.demand(":")?;

        let (op, addr, read_val, write_val) = if self.eat("sync") {
            (Op::Sync, 0, 0, 0)
        } else if self.eat("{") {
            let a1 = self.parse_addr()?;
            self.demand("==")?;
            let r = self.parse_nat(MAX_DATA, "value")?;
            self.demand(";")?;
            let a2 = self.parse_addr()?;
            self.demand(":=")?;
            let w = self.parse_nat(MAX_DATA, "value")?;
            self.demand("}")?;
            if a1 != a2 {
                return Err(AxeError::parse(line, "RMW read and write addresses must match"));
            }
            (Op::Rmw, a1, r, w)
        } else {
            let addr = self.parse_addr()?;
            if self.eat("==") {
                let r = self.parse_nat(MAX_DATA, "value")?;
                (Op::Ld, addr, r, 0)
            } else if self.eat(":=") {
                let w = self.parse_nat(MAX_DATA, "value")?;
                (Op::St, addr, 0, w)
            } else {
                return Err(AxeError::parse(self.line(), "expected '==' or ':=' after an address"));
            }
        };

        let (begin_time, end_time) = self.parse_timestamp()?;
        let uid = self.fresh_uid();
        Ok(Instr {
            uid,
            tid,
            op,
            addr,
            read_val,
            write_val,
            begin_time,
            end_time,
            line,
        })
    }

    /// Reads one `check`/`end`-delimited batch, consuming the separator.
    /// `None` once the input is exhausted.
    pub fn parse_batch(&mut self) -> Result<Option<Batch>> {
        if self.peek().is_none() {
            return Ok(None);
        }
        let mut out = Vec::new();
        while let Some(ins) = self.parse_item()? {
            if ins.op == Op::End {
                return Ok(Some(out));
            }
            out.push(ins);
        }
        Ok(Some(out))
    }

    /// Reads every remaining batch in the file.
    pub fn parse_all(&mut self) -> Result<Vec<Batch>> {
        let mut out = Vec::new();
        while let Some(batch) = self.parse_batch()? {
            out.push(batch);
        }
        Ok(out)
    }
}

fn parse_addr_token(w: &str, line: u32) -> Result<u32> {
    let digits = if let Some(rest) = w.strip_prefix("M[") {
        rest.strip_suffix(']')
            .ok_or_else(|| AxeError::parse(line, format!("malformed address '{w}'")))?
    } else if let Some(rest) = w.strip_prefix('v') {
        rest
    } else {
        return Err(AxeError::parse(line, format!("expected an address (M[n] or vn), found '{w}'")));
    };
    let n: i64 = digits
        .parse()
        .map_err(|_| AxeError::parse(line, format!("malformed address '{w}'")))?;
    if n < 0 || n as usize >= MAX_ADDRS {
        return Err(AxeError::parse(line, format!("address {n} out of range (limit {MAX_ADDRS})")));
    }
    Ok(n as u32)
}

/// Splits `source` into whitespace-separated tokens, tracking 1-based line
/// numbers and dropping `#`-to-end-of-line comments. Punctuation (`:`, `@`,
/// `{`, `}`, `;`, `==`, `:=`) is split into its own token by padding it with
/// spaces before the final whitespace split.
fn tokenize(source: &str) -> Vec<(String, u32)> {
    let mut out = Vec::new();
    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        let line = match raw_line.find('#') {
            Some(p) => &raw_line[..p],
            None => raw_line,
        };

        let mut spaced = String::with_capacity(line.len() * 2);
        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                ':' if chars.peek() == Some(&'=') => {
                    chars.next();
                    spaced.push_str(" := ");
                }
                '=' if chars.peek() == Some(&'=') => {
                    chars.next();
                    spaced.push_str(" == ");
                }
                ':' | '@' | '{' | '}' | ';' => {
                    spaced.push(' ');
                    spaced.push(ch);
                    spaced.push(' ');
                }
                _ => spaced.push(ch),
            }
        }
        for word in spaced.split_whitespace() {
            out.push((word.to_string(), line_no));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_and_load() {
        let mut p = Parser::new("0: M[0] := 1\n1: M[0] == 1\n");
        let batch = p.parse_batch().unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].op, Op::St);
        assert_eq!(batch[0].write_val, 1);
        assert_eq!(batch[1].op, Op::Ld);
        assert_eq!(batch[1].read_val, 1);
    }

    #[test]
    fn parses_v_sugar_address() {
        let mut p = Parser::new("0: v3 := 1\n");
        let batch = p.parse_batch().unwrap().unwrap();
        assert_eq!(batch[0].addr, 3);
    }

    #[test]
    fn parses_rmw() {
        let mut p = Parser::new("0: { M[0] == 0 ; M[0] := 1 }\n");
        let batch = p.parse_batch().unwrap().unwrap();
        assert_eq!(batch[0].op, Op::Rmw);
        assert_eq!(batch[0].read_val, 0);
        assert_eq!(batch[0].write_val, 1);
    }

    #[test]
    fn rejects_mismatched_rmw_addresses() {
        let mut p = Parser::new("0: { M[0] == 0 ; M[1] := 1 }\n");
        assert!(p.parse_batch().is_err());
    }

    #[test]
    fn parses_sync_and_timestamp() {
        let mut p = Parser::new("0: sync @10:20\n");
        let batch = p.parse_batch().unwrap().unwrap();
        assert_eq!(batch[0].op, Op::Sync);
        assert_eq!(batch[0].begin_time, Some(10));
        assert_eq!(batch[0].end_time, Some(20));
    }

    #[test]
    fn parses_final_constraint() {
        let mut p = Parser::new("final M[0] == 1\n");
        let batch = p.parse_batch().unwrap().unwrap();
        assert_eq!(batch[0].op, Op::Final);
        assert_eq!(batch[0].read_val, 1);
    }

    #[test]
    fn check_is_a_pass_through_separator() {
        let mut p = Parser::new("0: M[0] := 1\ncheck\n0: M[0] := 2\n");
        let batch = p.parse_batch().unwrap().unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn end_splits_batches() {
        let mut p = Parser::new("0: M[0] := 1\nend\n0: M[0] := 2\n");
        let batches = p.parse_all().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn comments_are_stripped() {
        let mut p = Parser::new("0: M[0] := 1 # comment\n");
        let batch = p.parse_batch().unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn reports_line_numbers_on_error() {
        let mut p = Parser::new("0: M[0] := 1\n0: bogus\n");
        match p.parse_batch() {
            Err(AxeError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }
}
