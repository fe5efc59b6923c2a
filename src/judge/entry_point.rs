//! Locating entry points in untrusted JavaScript source.
//!
//! A small tokenizer skips comments, string/template literals and regex
//! literals and yields identifiers and punctuation, which is enough to find
//! `function <name>` declarations without being fooled by commented-out code.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Punct(char),
}

/// Keywords after which a `/` opens a regex literal rather than a division
const REGEX_PRECEDING_KEYWORDS: [&str; 14] = [
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

struct Tokens<'a> {
    src: &'a str,
    pos: usize,
    /// Whether a `/` at the current position would start a regex literal
    regex_allowed: bool,
}

impl<'a> Tokens<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            regex_allowed: true,
        }
    }

    fn skip_line_comment(&mut self) {
        self.pos = match self.src[self.pos..].find('\n') {
            Some(offset) => self.pos + offset + 1,
            None => self.src.len(),
        };
    }

    fn skip_block_comment(&mut self) {
        self.pos = match self.src[self.pos + 2..].find("*/") {
            Some(offset) => self.pos + 2 + offset + 2,
            None => self.src.len(),
        };
    }

    fn skip_string(&mut self, quote: u8) {
        let bytes = self.src.as_bytes();
        self.pos += 1;
        while let Some(&b) = bytes.get(self.pos) {
            match b {
                b'\\' => self.pos += 2,
                b'\n' if quote != b'`' => return,
                _ if b == quote => {
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
        self.pos = self.pos.min(self.src.len());
    }

    /// Skips a regex literal starting at the current `/`, flags included
    ///
    /// Returns false, leaving the position untouched, when the line ends before
    /// an unescaped closing `/` outside a character class.
    fn skip_regex(&mut self) -> bool {
        let bytes = self.src.as_bytes();
        let mut pos = self.pos + 1;
        let mut in_class = false;
        while let Some(&b) = bytes.get(pos) {
            match b {
                b'\\' => pos += 2,
                b'\n' | b'\r' => return false,
                b'[' => {
                    in_class = true;
                    pos += 1;
                }
                b']' => {
                    in_class = false;
                    pos += 1;
                }
                b'/' if !in_class => {
                    pos += 1;
                    while bytes.get(pos).is_some_and(|&c| is_ident_continue(c)) {
                        pos += 1;
                    }
                    self.pos = pos;
                    return true;
                }
                _ => pos += 1,
            }
        }
        false
    }

    fn punct(&mut self, b: u8) -> Token<'a> {
        self.pos += 1;
        self.regex_allowed = !matches!(b, b')' | b']');
        Token::Punct(b as char)
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let bytes = self.src.as_bytes();
        loop {
            let b = *bytes.get(self.pos)?;
            match b {
                b'/' if bytes.get(self.pos + 1) == Some(&b'/') => self.skip_line_comment(),
                b'/' if bytes.get(self.pos + 1) == Some(&b'*') => self.skip_block_comment(),
                b'/' if self.regex_allowed => {
                    if self.skip_regex() {
                        self.regex_allowed = false;
                        continue;
                    }
                    return Some(self.punct(b));
                }
                b'\'' | b'"' | b'`' => {
                    self.skip_string(b);
                    self.regex_allowed = false;
                }
                _ if is_ident_start(b) => {
                    let start = self.pos;
                    while bytes.get(self.pos).is_some_and(|&c| is_ident_continue(c)) {
                        self.pos += 1;
                    }
                    let ident = &self.src[start..self.pos];
                    self.regex_allowed = REGEX_PRECEDING_KEYWORDS.contains(&ident);
                    return Some(Token::Ident(ident));
                }
                _ if b.is_ascii_digit() => {
                    while bytes
                        .get(self.pos)
                        .is_some_and(|&c| is_ident_continue(c) || c == b'.')
                    {
                        self.pos += 1;
                    }
                    self.regex_allowed = false;
                }
                _ if b.is_ascii_punctuation() => return Some(self.punct(b)),
                // whitespace and non-ASCII bytes
                _ => self.pos += 1,
            }
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// Whether `name` can be spliced into generated code as a plain identifier
pub fn is_identifier(name: &str) -> bool {
    let mut bytes = name.bytes();
    bytes.next().is_some_and(is_ident_start) && bytes.all(is_ident_continue)
}

/// Returns the name of the first `function <name>` declaration in `source`
///
/// Generator (`function* name`) and `async function name` declarations count;
/// anonymous function expressions are skipped.
pub fn find_function_name(source: &str) -> Option<String> {
    let mut tokens = Tokens::new(source).peekable();
    while let Some(token) = tokens.next() {
        if token != Token::Ident("function") {
            continue;
        }
        if tokens.peek() == Some(&Token::Punct('*')) {
            tokens.next();
        }
        if let Some(Token::Ident(name)) = tokens.peek() {
            return Some(name.to_string());
        }
    }
    None
}

/// Returns the first configured entry point the source refers to
pub fn find_http_entry_point<'e>(source: &str, entry_points: &'e [String]) -> Option<&'e str> {
    let mentioned: Vec<&str> = Tokens::new(source)
        .filter_map(|token| match token {
            Token::Ident(name) => Some(name),
            Token::Punct(_) => None,
        })
        .collect();

    entry_points
        .iter()
        .filter(|name| is_identifier(name))
        .find(|name| mentioned.contains(&name.as_str()))
        .map(String::as_str)
}
