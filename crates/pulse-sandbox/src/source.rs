//! Source preparation applied before a script is evaluated.

use std::sync::LazyLock;

use regex::Regex;

/// Statement inserted at the start of every loop body.
const INTERRUPT_CHECK: &str = "checkInterrupted();";

/// Qualified calls into the bridging facility, e.g. `Packages.get(` or
/// `Pulse.http.get(`. Captures the bare function name.
static QUALIFIED_BRIDGE_CALL: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r"\b(?:Packages|Pulse)\.(?:[A-Za-z_$][\w$]*\.)*(get|head|post|toBase64|checkInterrupted|throwTransientError|throwFatalError|throwTimeoutError)\s*\(",
  )
  .expect("bridge call pattern is valid")
});

/// Prepare a script for evaluation.
pub fn prepare_source(script: &str) -> String {
  inject_interrupt_checks(&resolve_bridge_calls(script))
}

/// Rewrite qualified bridge calls to the global function names the sandbox installs.
pub fn resolve_bridge_calls(script: &str) -> String {
  QUALIFIED_BRIDGE_CALL
    .replace_all(script, "$1(")
    .into_owned()
}

/// Words after which a `/` starts a regex literal.
const EXPRESSION_KEYWORDS: &[&str] = &[
  "await", "case", "delete", "do", "else", "in", "instanceof", "new", "of", "return", "throw",
  "typeof", "void", "yield",
];

/// Last significant token seen by the scanner.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
  /// `for` or `while` starting a loop head.
  LoopKeyword,
  LoopHeadEnd,
  Do,
  Other,
}

/// A loop body without braces, wrapped in a block the scanner must close.
#[derive(Debug)]
struct OpenBody {
  depth: usize,
  do_body: bool,
}

/// Insert an interrupt check at the start of every `for`, `while` and `do`
/// body.
///
/// Bodies without braces are wrapped in a block holding the check, so
/// `while (x) step();` becomes `while (x) {checkInterrupted();step();}`.
/// String, template and regex literals and comments are copied untouched.
pub fn inject_interrupt_checks(script: &str) -> String {
  let chars: Vec<char> = script.chars().collect();
  Scanner::new(&chars).run()
}

struct Scanner<'a> {
  chars: &'a [char],
  out: String,
  i: usize,
  last: Token,
  /// Bracket nesting depth, wrapped bodies excluded.
  depth: usize,
  /// Whether each open parenthesis started a loop head.
  parens: Vec<bool>,
  /// Whether each open brace started a `do` body.
  braces: Vec<bool>,
  bodies: Vec<OpenBody>,
  /// A `do` body just ended, so the next `while` closes it.
  after_do_body: bool,
  /// A `/` here starts a regex literal rather than a division.
  regex_allowed: bool,
}

impl<'a> Scanner<'a> {
  fn new(chars: &'a [char]) -> Self {
    Self {
      chars,
      out: String::with_capacity(chars.len() + 64),
      i: 0,
      last: Token::Other,
      depth: 0,
      parens: Vec::new(),
      braces: Vec::new(),
      bodies: Vec::new(),
      after_do_body: false,
      regex_allowed: true,
    }
  }

  fn run(mut self) -> String {
    while let Some(c) = self.current() {
      let next = self.chars.get(self.i + 1).copied();

      if c.is_whitespace() {
        self.push_char();
        continue;
      }
      if c == '/' && next == Some('/') {
        self.copy_line_comment();
        continue;
      }
      if c == '/' && next == Some('*') {
        self.copy_block_comment();
        continue;
      }
      if matches!(self.last, Token::LoopHeadEnd | Token::Do) && c != '{' {
        self.open_body();
      }

      match c {
        '"' | '\'' | '`' => {
          self.copy_quoted();
          self.significant(Token::Other, false);
        }
        '/' if self.regex_allowed => {
          self.copy_regex();
          self.significant(Token::Other, false);
        }
        c if is_identifier_start(c) => self.word(),
        '(' => {
          self.parens.push(self.last == Token::LoopKeyword);
          self.depth += 1;
          self.push_char();
          self.significant(Token::Other, true);
        }
        ')' => {
          let loop_head = self.parens.pop().unwrap_or(false);
          self.depth = self.depth.saturating_sub(1);
          self.push_char();
          if loop_head {
            self.significant(Token::LoopHeadEnd, true);
          } else {
            self.significant(Token::Other, false);
          }
        }
        '[' => {
          self.depth += 1;
          self.push_char();
          self.significant(Token::Other, true);
        }
        ']' => {
          self.depth = self.depth.saturating_sub(1);
          self.push_char();
          self.significant(Token::Other, false);
        }
        '{' => self.open_brace(),
        '}' => self.close_brace(),
        ';' => {
          self.push_char();
          self.significant(Token::Other, true);
          if self.body_open_at_depth() && !self.next_word_is("else") {
            self.close_statement_bodies();
          }
        }
        c => {
          self.push_char();
          let ends_operand = c.is_alphanumeric() || c == '.';
          self.significant(Token::Other, !ends_operand);
        }
      }
    }

    for _ in self.bodies.drain(..) {
      self.out.push('}');
    }
    self.out
  }

  fn current(&self) -> Option<char> {
    self.chars.get(self.i).copied()
  }

  fn push_char(&mut self) {
    if let Some(c) = self.current() {
      self.out.push(c);
      self.i += 1;
    }
  }

  fn significant(&mut self, token: Token, regex_allowed: bool) {
    self.last = token;
    self.regex_allowed = regex_allowed;
    self.after_do_body = false;
  }

  fn word(&mut self) {
    let start = self.i;
    while self.current().is_some_and(is_identifier_part) {
      self.push_char();
    }
    let word: String = self.chars[start..self.i].iter().collect();
    let token = match word.as_str() {
      "while" if self.after_do_body => Token::Other,
      "for" | "while" => Token::LoopKeyword,
      "await" if self.last == Token::LoopKeyword => Token::LoopKeyword,
      "do" => Token::Do,
      _ => Token::Other,
    };
    self.significant(token, EXPRESSION_KEYWORDS.contains(&word.as_str()));
  }

  /// Start a block around a loop body written without braces.
  fn open_body(&mut self) {
    self.out.push('{');
    self.out.push_str(INTERRUPT_CHECK);
    self.bodies.push(OpenBody {
      depth: self.depth,
      do_body: self.last == Token::Do,
    });
    self.last = Token::Other;
  }

  fn open_brace(&mut self) {
    let loop_body = matches!(self.last, Token::LoopHeadEnd | Token::Do);
    self.braces.push(self.last == Token::Do);
    self.depth += 1;
    self.push_char();
    if loop_body {
      self.out.push_str(INTERRUPT_CHECK);
    }
    self.significant(Token::Other, true);
  }

  fn close_brace(&mut self) {
    // Bodies left open inside this block end with it.
    while self
      .bodies
      .last()
      .is_some_and(|body| body.depth >= self.depth)
    {
      self.bodies.pop();
      self.out.push('}');
    }

    let do_body = self.braces.pop().unwrap_or(false);
    self.depth = self.depth.saturating_sub(1);
    self.push_char();
    self.significant(Token::Other, true);
    self.after_do_body = do_body;

    if self.body_open_at_depth() && !self.statement_continues(do_body) {
      self.close_statement_bodies();
    }
  }

  fn body_open_at_depth(&self) -> bool {
    self
      .bodies
      .last()
      .is_some_and(|body| body.depth == self.depth)
  }

  /// Close the wrapped bodies ending with the current statement.
  ///
  /// Stops after a `do` body, since its `while` tail still follows.
  fn close_statement_bodies(&mut self) {
    while self.body_open_at_depth() {
      let Some(body) = self.bodies.pop() else {
        break;
      };
      self.out.push('}');
      if body.do_body {
        self.after_do_body = true;
        break;
      }
    }
  }

  /// Whether the statement goes on after a closing brace.
  fn statement_continues(&self, do_body: bool) -> bool {
    let Some(index) = self.next_significant() else {
      return false;
    };
    let c = self.chars[index];
    if is_identifier_start(c) {
      let word = self.word_at(index);
      return matches!(word.as_str(), "else" | "catch" | "finally") || (do_body && word == "while");
    }
    !matches!(c, '{' | '}')
  }

  fn next_word_is(&self, expected: &str) -> bool {
    self
      .next_significant()
      .is_some_and(|index| self.word_at(index) == expected)
  }

  fn word_at(&self, start: usize) -> String {
    self.chars[start..]
      .iter()
      .take_while(|c| is_identifier_part(**c))
      .collect()
  }

  /// Index of the next character outside whitespace and comments.
  fn next_significant(&self) -> Option<usize> {
    let mut i = self.i;
    while i < self.chars.len() {
      let c = self.chars[i];
      let next = self.chars.get(i + 1).copied();
      if c.is_whitespace() {
        i += 1;
      } else if c == '/' && next == Some('/') {
        while i < self.chars.len() && self.chars[i] != '\n' {
          i += 1;
        }
      } else if c == '/' && next == Some('*') {
        i += 2;
        while i < self.chars.len() && !(self.chars[i] == '*' && self.chars.get(i + 1) == Some(&'/')) {
          i += 1;
        }
        i += 2;
      } else {
        return Some(i);
      }
    }
    None
  }

  fn copy_line_comment(&mut self) {
    while self.current().is_some_and(|c| c != '\n') {
      self.push_char();
    }
  }

  fn copy_block_comment(&mut self) {
    self.push_char();
    self.push_char();
    while let Some(c) = self.current() {
      if c == '*' && self.chars.get(self.i + 1) == Some(&'/') {
        self.push_char();
        self.push_char();
        break;
      }
      self.push_char();
    }
  }

  /// Copy a string or template literal.
  fn copy_quoted(&mut self) {
    let Some(quote) = self.current() else {
      return;
    };
    self.push_char();
    while let Some(c) = self.current() {
      self.push_char();
      if c == '\\' {
        self.push_char();
      } else if c == quote {
        break;
      }
    }
  }

  /// Copy a regex literal up to its closing slash; flags follow as a word.
  fn copy_regex(&mut self) {
    let mut in_class = false;
    self.push_char();
    while let Some(c) = self.current() {
      if c == '\n' {
        break;
      }
      self.push_char();
      match c {
        '\\' => {
          if self.current().is_some_and(|c| c != '\n') {
            self.push_char();
          }
        }
        '[' => in_class = true,
        ']' => in_class = false,
        '/' if !in_class => break,
        _ => {}
      }
    }
  }
}

fn is_identifier_start(c: char) -> bool {
  c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
  c.is_alphanumeric() || c == '_' || c == '$'
}
