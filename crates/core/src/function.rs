//! Remote functions shipped as source text.
//!
//! A realm rebuilds a [`JsFunction`] purely from its printed source, so the
//! function must not capture anything from an outer scope: a captured name
//! would silently resolve to whatever the remote global scope happens to
//! hold under that name. [`JsFunction::new`] rejects such functions up
//! front with a lexical free-variable check.
//!
//! The check is lexical, not scope-aware. Every identifier bound anywhere in
//! the source (parameters, `var`/`let`/`const`, function and class names,
//! `catch` bindings) counts as declared for the whole function, so shadowing
//! mistakes slip through. A reference to a name bound nowhere that is not a
//! well-known global is reported.

use std::collections::BTreeSet;
use std::fmt;

use bridge_runtime::{Error, Result};

/// Source text of a pure JavaScript function expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsFunction {
	source: String,
	name: Option<String>,
}

impl JsFunction {
	/// Validates `source` as a function expression with no free variables.
	///
	/// # Errors
	///
	/// Returns [`Error::InvalidFunction`] when the text is not a function
	/// expression or references names it neither declares nor can expect
	/// every realm to provide.
	pub fn new(source: impl Into<String>) -> Result<Self> {
		Self::with_globals(source, &[])
	}

	/// Like [`new`](Self::new), additionally accepting references to `globals`.
	pub fn with_globals(source: impl Into<String>, globals: &[&str]) -> Result<Self> {
		let source = source.into();
		let tokens = tokenize(&source)?;
		let name = function_name(&tokens)?;

		let free = free_variables(&tokens, globals);
		if !free.is_empty() {
			return Err(Error::InvalidFunction(format!(
				"{} references free variables: {}; pass them as arguments instead",
				name.as_deref().unwrap_or("anonymous"),
				free.into_iter().collect::<Vec<_>>().join(", ")
			)));
		}

		Ok(Self { source, name })
	}

	/// Wraps `source` without any validation.
	pub fn unchecked(source: impl Into<String>) -> Self {
		let source = source.into();
		let name = tokenize(&source).ok().and_then(|tokens| function_name(&tokens).ok().flatten());
		Self { source, name }
	}

	pub fn source(&self) -> &str {
		&self.source
	}

	/// Declared name of the function, or `anonymous`.
	pub fn name(&self) -> &str {
		self.name.as_deref().unwrap_or("anonymous")
	}
}

impl fmt::Display for JsFunction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.source)
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Ident(String),
	Punct(&'static str),
	/// Strings, numbers, regular expressions and template text
	Literal,
}

impl Token {
	fn is_punct(&self, p: &str) -> bool {
		matches!(self, Token::Punct(q) if *q == p)
	}

	fn ident(&self) -> Option<&str> {
		match self {
			Token::Ident(name) => Some(name),
			_ => None,
		}
	}
}

const PUNCTUATORS: &[&str] = &[
	">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==", "!=", "<=", ">=", "&&",
	"||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "**", "<<", ">>", "{", "}", "(",
	")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".", "@",
];

/// Keywords after which a `/` starts a regular expression literal.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
	"return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do", "else", "yield",
	"await",
];

struct Lexer<'a> {
	chars: Vec<char>,
	pos: usize,
	tokens: Vec<Token>,
	brace_depth: usize,
	/// Brace depth at each open `${` of an enclosing template literal
	templates: Vec<usize>,
	source: &'a str,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
	let mut lexer = Lexer {
		chars: source.chars().collect(),
		pos: 0,
		tokens: Vec::new(),
		brace_depth: 0,
		templates: Vec::new(),
		source,
	};
	lexer.run()?;
	Ok(lexer.tokens)
}

impl Lexer<'_> {
	fn peek(&self, offset: usize) -> Option<char> {
		self.chars.get(self.pos + offset).copied()
	}

	fn unterminated(&self, what: &str) -> Error {
		let preview: String = self.source.chars().take(40).collect();
		Error::InvalidFunction(format!("unterminated {what} in `{preview}`"))
	}

	fn run(&mut self) -> Result<()> {
		while let Some(c) = self.peek(0) {
			match c {
				c if c.is_whitespace() => self.pos += 1,
				'/' if self.peek(1) == Some('/') => {
					while self.peek(0).is_some_and(|c| c != '\n') {
						self.pos += 1;
					}
				}
				'/' if self.peek(1) == Some('*') => {
					self.pos += 2;
					loop {
						match self.peek(0) {
							None => return Err(self.unterminated("comment")),
							Some('*') if self.peek(1) == Some('/') => {
								self.pos += 2;
								break;
							}
							Some(_) => self.pos += 1,
						}
					}
				}
				'/' if self.regex_allowed() => self.regex()?,
				'\'' | '"' => self.string(c)?,
				'`' => {
					self.pos += 1;
					self.template_body()?;
				}
				'}' if self.templates.last() == Some(&self.brace_depth) => {
					self.templates.pop();
					self.pos += 1;
					self.template_body()?;
				}
				'#' => {
					self.pos += 1;
					self.identifier();
					self.tokens.push(Token::Literal);
				}
				c if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit())) => {
					self.number()
				}
				c if is_ident_start(c) => {
					let name = self.identifier();
					self.tokens.push(Token::Ident(name));
				}
				_ => self.punctuator()?,
			}
		}
		if !self.templates.is_empty() {
			return Err(self.unterminated("template literal"));
		}
		Ok(())
	}

	fn regex_allowed(&self) -> bool {
		match self.tokens.last() {
			None | Some(Token::Punct(_)) => !matches!(self.tokens.last(), Some(Token::Punct(")" | "]" | "}"))),
			Some(Token::Ident(word)) => REGEX_PREFIX_KEYWORDS.contains(&word.as_str()),
			Some(Token::Literal) => false,
		}
	}

	fn regex(&mut self) -> Result<()> {
		self.pos += 1;
		let mut in_class = false;
		loop {
			match self.peek(0) {
				None | Some('\n') => return Err(self.unterminated("regular expression")),
				Some('\\') => self.pos += 2,
				Some('[') => {
					in_class = true;
					self.pos += 1;
				}
				Some(']') => {
					in_class = false;
					self.pos += 1;
				}
				Some('/') if !in_class => {
					self.pos += 1;
					break;
				}
				Some(_) => self.pos += 1,
			}
		}
		while self.peek(0).is_some_and(is_ident_part) {
			self.pos += 1;
		}
		self.tokens.push(Token::Literal);
		Ok(())
	}

	fn string(&mut self, quote: char) -> Result<()> {
		self.pos += 1;
		loop {
			match self.peek(0) {
				None => return Err(self.unterminated("string literal")),
				Some('\\') => self.pos += 2,
				Some(c) if c == quote => {
					self.pos += 1;
					break;
				}
				Some(_) => self.pos += 1,
			}
		}
		self.tokens.push(Token::Literal);
		Ok(())
	}

	/// Scans template text up to the closing backtick or the next `${`.
	fn template_body(&mut self) -> Result<()> {
		loop {
			match self.peek(0) {
				None => return Err(self.unterminated("template literal")),
				Some('\\') => self.pos += 2,
				Some('`') => {
					self.pos += 1;
					self.tokens.push(Token::Literal);
					return Ok(());
				}
				Some('$') if self.peek(1) == Some('{') => {
					self.pos += 2;
					self.tokens.push(Token::Literal);
					self.templates.push(self.brace_depth);
					return Ok(());
				}
				Some(_) => self.pos += 1,
			}
		}
	}

	fn number(&mut self) {
		while let Some(c) = self.peek(0) {
			let exponent_sign = (c == '+' || c == '-') && matches!(self.chars.get(self.pos.wrapping_sub(1)), Some('e' | 'E'));
			if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
				self.pos += 1;
			} else {
				break;
			}
		}
		self.tokens.push(Token::Literal);
	}

	fn identifier(&mut self) -> String {
		let start = self.pos;
		while self.peek(0).is_some_and(is_ident_part) {
			self.pos += 1;
		}
		self.chars[start..self.pos].iter().collect()
	}

	fn punctuator(&mut self) -> Result<()> {
		for p in PUNCTUATORS {
			let len = p.chars().count();
			let matches = p.chars().enumerate().all(|(i, c)| self.peek(i) == Some(c));
			// `a?.5:b` is a conditional, not optional chaining
			if matches && !(*p == "?." && self.peek(2).is_some_and(|c| c.is_ascii_digit())) {
				self.pos += len;
				match *p {
					"{" => self.brace_depth += 1,
					"}" => self.brace_depth = self.brace_depth.saturating_sub(1),
					_ => {}
				}
				self.tokens.push(Token::Punct(*p));
				return Ok(());
			}
		}
		let found = self.peek(0).unwrap_or_default();
		Err(Error::InvalidFunction(format!("unexpected character `{found}`")))
	}
}

fn is_ident_start(c: char) -> bool {
	c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
	c == '_' || c == '$' || c.is_alphanumeric()
}

/// Index of the bracket closing the one opened at `open`.
fn matching(tokens: &[Token], open: usize) -> Option<usize> {
	let (left, right) = match tokens.get(open)? {
		Token::Punct("(") => ("(", ")"),
		Token::Punct("{") => ("{", "}"),
		Token::Punct("[") => ("[", "]"),
		_ => return None,
	};
	let mut depth = 0usize;
	for (i, token) in tokens.iter().enumerate().skip(open) {
		if token.is_punct(left) {
			depth += 1;
		} else if token.is_punct(right) {
			depth -= 1;
			if depth == 0 {
				return Some(i);
			}
		}
	}
	None
}

/// Index of the bracket opening the one closed at `close`.
fn matching_open(tokens: &[Token], close: usize) -> Option<usize> {
	let (left, right) = match tokens.get(close)? {
		Token::Punct(")") => ("(", ")"),
		Token::Punct("}") => ("{", "}"),
		Token::Punct("]") => ("[", "]"),
		_ => return None,
	};
	let mut depth = 0usize;
	for i in (0..=close).rev() {
		if tokens[i].is_punct(right) {
			depth += 1;
		} else if tokens[i].is_punct(left) {
			depth -= 1;
			if depth == 0 {
				return Some(i);
			}
		}
	}
	None
}

/// Checks that the tokens form one function expression and returns its name.
fn function_name(tokens: &[Token]) -> Result<Option<String>> {
	let not_a_function = || Error::InvalidFunction("expected a function expression such as `(a, b) => a + b`".to_string());

	// `(function f() {})`
	if tokens.first().is_some_and(|t| t.is_punct("(")) && matching(tokens, 0) == Some(tokens.len() - 1) {
		if let Ok(name) = function_name(&tokens[1..tokens.len() - 1]) {
			return Ok(name);
		}
	}

	let mut i = 0;
	if tokens.first().and_then(Token::ident) == Some("async") && !tokens.get(1).is_some_and(|t| t.is_punct("=>")) {
		i = 1;
	}

	match tokens.get(i) {
		Some(Token::Ident(word)) if word == "function" => {
			i += 1;
			if tokens.get(i).is_some_and(|t| t.is_punct("*")) {
				i += 1;
			}
			let name = match tokens.get(i) {
				Some(Token::Ident(name)) => {
					i += 1;
					Some(name.clone())
				}
				_ => None,
			};
			let params_end = matching(tokens, i).ok_or_else(not_a_function)?;
			let body_end = matching(tokens, params_end + 1).ok_or_else(not_a_function)?;
			if !tokens[params_end + 1].is_punct("{") || body_end != tokens.len() - 1 {
				return Err(not_a_function());
			}
			Ok(name)
		}
		Some(Token::Ident(word)) if !is_reserved(word) && tokens.get(i + 1).is_some_and(|t| t.is_punct("=>")) => {
			arrow_body_ends(tokens, i + 2)?;
			Ok(None)
		}
		Some(Token::Punct("(")) => {
			let params_end = matching(tokens, i).ok_or_else(not_a_function)?;
			if !tokens.get(params_end + 1).is_some_and(|t| t.is_punct("=>")) {
				return Err(not_a_function());
			}
			arrow_body_ends(tokens, params_end + 2)?;
			Ok(None)
		}
		_ => Err(not_a_function()),
	}
}

fn arrow_body_ends(tokens: &[Token], body: usize) -> Result<()> {
	match tokens.get(body) {
		None => Err(Error::InvalidFunction("arrow function has no body".to_string())),
		Some(Token::Punct("{")) if matching(tokens, body) != Some(tokens.len() - 1) => Err(Error::InvalidFunction(
			"unexpected text after the function body".to_string(),
		)),
		Some(_) => Ok(()),
	}
}

fn free_variables(tokens: &[Token], extra_globals: &[&str]) -> BTreeSet<String> {
	let declared = declared_names(tokens);
	let mut free = BTreeSet::new();

	for (i, token) in tokens.iter().enumerate() {
		let Some(name) = token.ident() else { continue };
		if is_reserved(name) || declared.contains(name) || is_known_global(name) || extra_globals.contains(&name) {
			continue;
		}
		let prev = i.checked_sub(1).map(|p| &tokens[p]);
		let next = tokens.get(i + 1);
		// `a.name`, `a?.name`
		if prev.is_some_and(|t| t.is_punct(".") || t.is_punct("?.")) {
			continue;
		}
		// `{ name: value }`, `label:` and the middle of `a ? name : b`
		if next.is_some_and(|t| t.is_punct(":")) {
			continue;
		}
		// `{ get name() {} }`
		if prev.and_then(Token::ident).is_some_and(|w| matches!(w, "get" | "set" | "static"))
			&& next.is_some_and(|t| t.is_punct("("))
		{
			continue;
		}
		free.insert(name.to_string());
	}

	free
}

fn declared_names(tokens: &[Token]) -> BTreeSet<String> {
	let mut declared = BTreeSet::new();

	for (i, token) in tokens.iter().enumerate() {
		match token {
			Token::Ident(word) if matches!(word.as_str(), "var" | "let" | "const") => {
				declare_declarators(tokens, i + 1, &mut declared);
			}
			Token::Ident(word) if matches!(word.as_str(), "function" | "class") => {
				let mut j = i + 1;
				if tokens.get(j).is_some_and(|t| t.is_punct("*")) {
					j += 1;
				}
				if let Some(name) = tokens.get(j).and_then(Token::ident) {
					if !is_reserved(name) {
						declared.insert(name.to_string());
					}
					j += 1;
				}
				if word == "function" {
					if let Some(end) = matching(tokens, j) {
						declare_pattern(&tokens[j + 1..end], &mut declared);
					}
				}
			}
			Token::Ident(word) if word == "catch" => {
				if let Some(end) = matching(tokens, i + 1) {
					declare_pattern(&tokens[i + 2..end], &mut declared);
				}
			}
			Token::Punct("=>") => match i.checked_sub(1).map(|p| &tokens[p]) {
				Some(Token::Ident(param)) => {
					declared.insert(param.clone());
				}
				Some(Token::Punct(")")) => {
					if let Some(open) = matching_open(tokens, i - 1) {
						declare_pattern(&tokens[open + 1..i - 1], &mut declared);
					}
				}
				_ => {}
			},
			// Method shorthand `name(params) { ... }`
			Token::Punct("(") => {
				let method = i
					.checked_sub(1)
					.and_then(|p| tokens[p].ident())
					.is_some_and(|w| !is_reserved(w) || matches!(w, "get" | "set"));
				if let Some(end) = matching(tokens, i) {
					if method && tokens.get(end + 1).is_some_and(|t| t.is_punct("{")) {
						if let Some(name) = tokens[i - 1].ident() {
							declared.insert(name.to_string());
						}
						declare_pattern(&tokens[i + 1..end], &mut declared);
					}
				}
			}
			_ => {}
		}
	}

	declared
}

/// Declares every binding of a `var`/`let`/`const` statement starting at `start`.
fn declare_declarators(tokens: &[Token], start: usize, declared: &mut BTreeSet<String>) {
	let mut i = start;
	loop {
		// One binding pattern
		match tokens.get(i) {
			Some(Token::Ident(name)) => {
				declared.insert(name.clone());
				i += 1;
			}
			Some(Token::Punct("{" | "[")) => {
				let Some(end) = matching(tokens, i) else { return };
				declare_pattern(&tokens[i + 1..end], declared);
				i = end + 1;
			}
			_ => return,
		}

		// Skip the initializer up to `,` at this nesting level
		let mut depth = 0i32;
		loop {
			match tokens.get(i) {
				None => return,
				Some(Token::Punct("(" | "{" | "[")) => depth += 1,
				Some(Token::Punct(")" | "}" | "]")) => {
					depth -= 1;
					if depth < 0 {
						return;
					}
				}
				Some(Token::Punct(";")) if depth == 0 => return,
				Some(Token::Punct(",")) if depth == 0 => {
					i += 1;
					break;
				}
				Some(Token::Ident(word)) if depth == 0 && i > start && is_statement_keyword(word) => return,
				_ => {}
			}
			i += 1;
		}
	}
}

/// Declares the identifiers of a parameter list or destructuring pattern.
///
/// Object keys (`{ key: binding }`) are skipped; default-value expressions
/// are over-approximated as bindings.
fn declare_pattern(tokens: &[Token], declared: &mut BTreeSet<String>) {
	for (i, token) in tokens.iter().enumerate() {
		let Some(name) = token.ident() else { continue };
		if is_reserved(name) || tokens.get(i + 1).is_some_and(|t| t.is_punct(":")) {
			continue;
		}
		if i > 0 && (tokens[i - 1].is_punct(".") || tokens[i - 1].is_punct("?.")) {
			continue;
		}
		declared.insert(name.to_string());
	}
}

fn is_statement_keyword(word: &str) -> bool {
	matches!(
		word,
		"var" | "let" | "const" | "return" | "if" | "for" | "while" | "do" | "switch" | "try" | "throw" | "function" | "class"
	)
}

fn is_reserved(word: &str) -> bool {
	matches!(
		word,
		"async"
			| "await" | "break"
			| "case" | "catch"
			| "class" | "const"
			| "continue"
			| "debugger"
			| "default"
			| "delete"
			| "do" | "else"
			| "export"
			| "extends"
			| "false"
			| "finally"
			| "for" | "function"
			| "get" | "if"
			| "import"
			| "in" | "instanceof"
			| "let" | "new"
			| "null" | "of"
			| "return"
			| "set" | "static"
			| "super"
			| "switch"
			| "this" | "throw"
			| "true" | "try"
			| "typeof"
			| "var" | "void"
			| "while"
			| "with" | "yield"
			| "arguments"
	)
}

const KNOWN_GLOBALS: &[&str] = &[
	// Language
	"AggregateError", "Array", "ArrayBuffer", "Atomics", "BigInt", "BigInt64Array", "BigUint64Array", "Boolean",
	"DataView", "Date", "Error", "EvalError", "FinalizationRegistry", "Float32Array", "Float64Array", "Function",
	"Infinity", "Int16Array", "Int32Array", "Int8Array", "Intl", "JSON", "Map", "Math", "NaN", "Number", "Object",
	"Promise", "Proxy", "RangeError", "ReferenceError", "Reflect", "RegExp", "Set", "SharedArrayBuffer", "String",
	"Symbol", "SyntaxError", "TypeError", "URIError", "Uint16Array", "Uint32Array", "Uint8Array",
	"Uint8ClampedArray", "WeakMap", "WeakRef", "WeakSet", "decodeURI", "decodeURIComponent", "encodeURI",
	"encodeURIComponent", "escape", "eval", "globalThis", "isFinite", "isNaN", "parseFloat", "parseInt",
	"undefined", "unescape",
	// Web platform
	"AbortController", "AbortSignal", "Blob", "BroadcastChannel", "CSS", "CustomEvent", "DOMException",
	"DOMParser", "Document", "Element", "Event", "EventTarget", "File", "FileReader", "FormData", "Headers",
	"HTMLElement", "Image", "IntersectionObserver", "MessageChannel", "MutationObserver", "Node", "NodeFilter",
	"Notification", "Request", "ResizeObserver", "Response", "ShadowRoot", "TextDecoder", "TextEncoder", "URL",
	"URLSearchParams", "WebSocket", "Worker", "XMLHttpRequest", "XPathResult", "atob", "btoa",
	"cancelAnimationFrame", "caches", "clearInterval", "clearTimeout", "console", "crypto", "customElements",
	"document", "fetch", "frames", "history", "indexedDB", "localStorage", "location", "navigator", "origin",
	"parent", "performance", "postMessage", "queueMicrotask", "requestAnimationFrame", "requestIdleCallback",
	"screen", "self", "sessionStorage", "setInterval", "setTimeout", "structuredClone", "top", "window",
	"getComputedStyle", "importScripts", "alert", "confirm", "prompt",
];

fn is_known_global(name: &str) -> bool {
	KNOWN_GLOBALS.contains(&name)
}
