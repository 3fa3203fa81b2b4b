//! The character scanner.
//!
//! Splits a query string into a finite token stream. A small state
//! machine governs how runs of characters collapse: whitespace and
//! newlines coalesce, directory parts and quoted strings absorb
//! characters that would otherwise separate, and a lookahead putback
//! keeps token boundaries exact.

pub const KV_SEP: char = '=';
pub const DIR_SEP: char = '/';
pub const TUP_START: char = '{';
pub const TUP_END: char = '}';
pub const TUP_SEP: char = ',';
pub const VAR_START: char = '<';
pub const VAR_END: char = '>';
pub const VAR_SEP: char = '|';
pub const STR_MARK: char = '"';
pub const ESCAPE: char = '\\';

pub const MAYBE_MORE: &str = "~";
pub const NIL: &str = "nil";
pub const TRUE: &str = "true";
pub const FALSE: &str = "false";
pub const CLEAR: &str = "clear";
pub const HEX_START: &str = "0x";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Escape,
    KvSep,
    DirSep,
    TupStart,
    TupEnd,
    TupSep,
    VarStart,
    VarEnd,
    VarSep,
    StrMark,
    Whitespace,
    Newline,
    Other,
    End,
}

impl TokenKind {
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Escape => "escape",
            TokenKind::KvSep => "key-value separator",
            TokenKind::DirSep => "directory separator",
            TokenKind::TupStart => "tuple start",
            TokenKind::TupEnd => "tuple end",
            TokenKind::TupSep => "tuple separator",
            TokenKind::VarStart => "variable start",
            TokenKind::VarEnd => "variable end",
            TokenKind::VarSep => "variable separator",
            TokenKind::StrMark => "string mark",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Newline => "newline",
            TokenKind::Other => "other",
            TokenKind::End => "end of query",
        }
    }
}

fn separator_kind(c: char) -> Option<TokenKind> {
    Some(match c {
        KV_SEP => TokenKind::KvSep,
        DIR_SEP => TokenKind::DirSep,
        TUP_START => TokenKind::TupStart,
        TUP_END => TokenKind::TupEnd,
        TUP_SEP => TokenKind::TupSep,
        VAR_START => TokenKind::VarStart,
        VAR_END => TokenKind::VarEnd,
        VAR_SEP => TokenKind::VarSep,
        STR_MARK => TokenKind::StrMark,
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Whitespace,
    Newline,
    DirPart,
    Str,
    Other,
}

impl State {
    /// The kind of a character-run token accumulated in this state.
    fn primary_kind(self) -> TokenKind {
        match self {
            State::Whitespace => TokenKind::Whitespace,
            State::Newline => TokenKind::Newline,
            State::DirPart | State::Str | State::Other => TokenKind::Other,
        }
    }
}

pub struct Scanner<'a> {
    chars: std::str::Chars<'a>,
    putback: Option<char>,
    token: String,
    state: State,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Scanner<'a> {
        Scanner {
            chars: input.chars(),
            putback: None,
            token: String::new(),
            state: State::Whitespace,
        }
    }

    /// The literal of the most recently scanned token.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn scan(&mut self) -> TokenKind {
        self.token.clear();

        loop {
            let Some(c) = self.read() else {
                if self.token.is_empty() {
                    return TokenKind::End;
                }
                return self.state.primary_kind();
            };

            if c == ESCAPE && self.state != State::Str {
                if !self.token.is_empty() {
                    self.putback = Some(c);
                    return self.state.primary_kind();
                }
                self.token.push(c);
                if let Some(escaped) = self.read() {
                    self.token.push(escaped);
                }
                return TokenKind::Escape;
            }

            if let Some(kind) = separator_kind(c) {
                if !self.token.is_empty() {
                    self.putback = Some(c);
                    return self.state.primary_kind();
                }

                match c {
                    DIR_SEP => {
                        if self.state != State::Str {
                            self.state = State::DirPart;
                        }
                    }
                    STR_MARK => {
                        self.state = if self.state == State::Str {
                            State::Whitespace
                        } else {
                            State::Str
                        };
                    }
                    _ => {
                        if self.state != State::Str {
                            self.state = State::Whitespace;
                        }
                    }
                }

                self.token.push(c);
                return kind;
            }

            if c == '\t' || c == ' ' {
                match self.state {
                    State::Other => {
                        self.putback = Some(c);
                        let kind = self.state.primary_kind();
                        self.state = State::Whitespace;
                        return kind;
                    }
                    _ => {
                        self.token.push(c);
                        continue;
                    }
                }
            }

            if c == '\n' || c == '\r' {
                match self.state {
                    State::Whitespace => {
                        self.state = State::Newline;
                        self.token.push(c);
                        continue;
                    }
                    State::Other => {
                        self.putback = Some(c);
                        let kind = self.state.primary_kind();
                        self.state = State::Newline;
                        return kind;
                    }
                    _ => {
                        self.token.push(c);
                        continue;
                    }
                }
            }

            match self.state {
                State::Whitespace | State::Newline => {
                    if self.token.is_empty() {
                        self.state = State::Other;
                        self.token.push(c);
                        continue;
                    }
                    let kind = self.state.primary_kind();
                    self.putback = Some(c);
                    self.state = State::Other;
                    return kind;
                }
                _ => {
                    self.token.push(c);
                    continue;
                }
            }
        }
    }

    fn read(&mut self) -> Option<char> {
        self.putback.take().or_else(|| self.chars.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(input: &str) -> Vec<(TokenKind, String)> {
        let mut scanner = Scanner::new(input);
        let mut out = Vec::new();
        loop {
            let kind = scanner.scan();
            out.push((kind, scanner.token().to_string()));
            if kind == TokenKind::End {
                return out;
            }
        }
    }

    #[test]
    fn empty_input_yields_single_end() {
        assert_eq!(scan_all(""), vec![(TokenKind::End, String::new())]);
    }

    #[test]
    fn separators_scan_one_by_one() {
        let got = scan_all("/{},<>|=\"");
        let kinds: Vec<TokenKind> = got.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::DirSep,
                TokenKind::TupStart,
                TokenKind::TupEnd,
                TokenKind::TupSep,
                TokenKind::VarStart,
                TokenKind::VarEnd,
                TokenKind::VarSep,
                TokenKind::KvSep,
                TokenKind::StrMark,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn whitespace_runs_collapse() {
        let got = scan_all("{ \t 1 }");
        assert_eq!(
            got,
            vec![
                (TokenKind::TupStart, "{".into()),
                (TokenKind::Whitespace, " \t ".into()),
                (TokenKind::Other, "1".into()),
                (TokenKind::Whitespace, " ".into()),
                (TokenKind::TupEnd, "}".into()),
                (TokenKind::End, "".into()),
            ]
        );
    }

    #[test]
    fn newline_runs_absorb_surrounding_whitespace() {
        let got = scan_all("{ \n\r 2}");
        assert_eq!(
            got,
            vec![
                (TokenKind::TupStart, "{".into()),
                (TokenKind::Newline, " \n\r ".into()),
                (TokenKind::Other, "2".into()),
                (TokenKind::TupEnd, "}".into()),
                (TokenKind::End, "".into()),
            ]
        );
    }

    #[test]
    fn strings_absorb_whitespace() {
        let got = scan_all("\"hello  world\"");
        assert_eq!(
            got,
            vec![
                (TokenKind::StrMark, "\"".into()),
                (TokenKind::Other, "hello  world".into()),
                (TokenKind::StrMark, "\"".into()),
                (TokenKind::End, "".into()),
            ]
        );
    }

    #[test]
    fn dir_separator_still_tokenizes_inside_strings() {
        // The parser reassembles these verbatim while in its string
        // state.
        let got = scan_all("\"a/b\"");
        assert_eq!(
            got,
            vec![
                (TokenKind::StrMark, "\"".into()),
                (TokenKind::Other, "a".into()),
                (TokenKind::DirSep, "/".into()),
                (TokenKind::Other, "b".into()),
                (TokenKind::StrMark, "\"".into()),
                (TokenKind::End, "".into()),
            ]
        );
    }

    #[test]
    fn escape_is_a_two_character_token() {
        let got = scan_all("/a\\/b");
        assert_eq!(
            got,
            vec![
                (TokenKind::DirSep, "/".into()),
                (TokenKind::Other, "a".into()),
                (TokenKind::Escape, "\\/".into()),
                (TokenKind::Other, "b".into()),
                (TokenKind::End, "".into()),
            ]
        );
    }

    #[test]
    fn directory_parts_absorb_spaces() {
        let got = scan_all("/hi there");
        assert_eq!(
            got,
            vec![
                (TokenKind::DirSep, "/".into()),
                (TokenKind::Other, "hi there".into()),
                (TokenKind::End, "".into()),
            ]
        );
    }

    #[test]
    fn full_query_tokenizes() {
        let kinds: Vec<TokenKind> = scan_all("/hi/there{54,nil}={33.8}")
            .iter()
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::DirSep,
                TokenKind::Other,
                TokenKind::DirSep,
                TokenKind::Other,
                TokenKind::TupStart,
                TokenKind::Other,
                TokenKind::TupSep,
                TokenKind::Other,
                TokenKind::TupEnd,
                TokenKind::KvSep,
                TokenKind::TupStart,
                TokenKind::Other,
                TokenKind::TupEnd,
                TokenKind::End,
            ]
        );
    }
}
