//! The query formatter: the inverse of the parser.
//!
//! For any query the parser produces, formatting then reparsing yields an
//! equal query. The one deliberate exception is `print_bytes = false`,
//! which renders byte strings as their length for display purposes.

use crate::keyval::{DirElement, Directory, Key, KeyValue, Query, TupElement, Tuple, Value, Variable};
use crate::parser::scanner::{
    CLEAR, DIR_SEP, ESCAPE, FALSE, HEX_START, KV_SEP, MAYBE_MORE, NIL, STR_MARK, TRUE, TUP_END,
    TUP_SEP, TUP_START, VAR_END, VAR_SEP, VAR_START,
};

#[derive(Debug, Clone, Copy)]
pub struct Cfg {
    /// When false, byte strings are formatted as their length instead of
    /// the actual string. Display-only; breaks round-trips.
    pub print_bytes: bool,
}

impl Default for Cfg {
    fn default() -> Self {
        Cfg { print_bytes: true }
    }
}

/// Appends formatted queries to an internal buffer, retrievable and
/// clearable via [`Format::string`] and [`Format::reset`].
#[derive(Debug, Default)]
pub struct Format {
    str: String,
    cfg: Cfg,
}

impl Format {
    pub fn new(cfg: Cfg) -> Format {
        Format {
            str: String::new(),
            cfg,
        }
    }

    pub fn string(&self) -> &str {
        &self.str
    }

    pub fn reset(&mut self) {
        self.str.clear();
    }

    pub fn query(&mut self, in_: &Query) {
        match in_ {
            Query::Directory(d) => self.directory(d),
            Query::Key(k) => self.key(k),
            Query::KeyValue(kv) => self.key_value(kv),
        }
    }

    pub fn key_value(&mut self, in_: &KeyValue) {
        self.key(&in_.key);
        self.str.push(KV_SEP);
        self.value(&in_.value);
    }

    pub fn key(&mut self, in_: &Key) {
        self.directory(&in_.directory);
        self.tuple(&in_.tuple);
    }

    pub fn directory(&mut self, in_: &Directory) {
        for element in &in_.0 {
            self.str.push(DIR_SEP);
            match element {
                DirElement::String(s) => self.dir_part(s),
                DirElement::Variable(v) => self.variable(v),
            }
        }
    }

    pub fn tuple(&mut self, in_: &Tuple) {
        self.str.push(TUP_START);
        for (i, element) in in_.0.iter().enumerate() {
            if i != 0 {
                self.str.push(TUP_SEP);
            }
            self.tup_element(element);
        }
        self.str.push(TUP_END);
    }

    pub fn value(&mut self, in_: &Value) {
        match in_ {
            Value::Tuple(t) => self.tuple(t),
            Value::Nil => self.str.push_str(NIL),
            Value::Int(i) => self.str.push_str(&i.to_string()),
            Value::Uint(u) => self.str.push_str(&u.to_string()),
            Value::Bool(b) => self.str.push_str(if *b { TRUE } else { FALSE }),
            Value::Float(f) => self.str.push_str(&format_float(*f)),
            Value::BigInt(b) => self.str.push_str(&b.to_string()),
            Value::String(s) => self.quoted(s),
            Value::Uuid(u) => self.uuid(u.as_bytes()),
            Value::Bytes(b) => self.bytes(b),
            Value::Variable(v) => self.variable(v),
            Value::Clear => self.str.push_str(CLEAR),
        }
    }

    pub fn variable(&mut self, in_: &Variable) {
        self.str.push(VAR_START);
        for (i, t) in in_.0.iter().enumerate() {
            if i != 0 {
                self.str.push(VAR_SEP);
            }
            self.str.push_str(t.name());
        }
        self.str.push(VAR_END);
    }

    fn tup_element(&mut self, in_: &TupElement) {
        match in_ {
            TupElement::Tuple(t) => self.tuple(t),
            TupElement::Nil => self.str.push_str(NIL),
            TupElement::Int(i) => self.str.push_str(&i.to_string()),
            TupElement::Uint(u) => self.str.push_str(&u.to_string()),
            TupElement::Bool(b) => self.str.push_str(if *b { TRUE } else { FALSE }),
            TupElement::Float(f) => self.str.push_str(&format_float(*f)),
            TupElement::BigInt(b) => self.str.push_str(&b.to_string()),
            TupElement::String(s) => self.quoted(s),
            TupElement::Uuid(u) => self.uuid(u.as_bytes()),
            TupElement::Bytes(b) => self.bytes(b),
            TupElement::Variable(v) => self.variable(v),
            TupElement::MaybeMore => self.str.push_str(MAYBE_MORE),
        }
    }

    fn dir_part(&mut self, in_: &str) {
        for c in in_.chars() {
            if c == DIR_SEP || c == ESCAPE {
                self.str.push(ESCAPE);
            }
            self.str.push(c);
        }
    }

    fn quoted(&mut self, in_: &str) {
        self.str.push(STR_MARK);
        self.str.push_str(in_);
        self.str.push(STR_MARK);
    }

    fn bytes(&mut self, in_: &[u8]) {
        if self.cfg.print_bytes {
            self.str.push_str(HEX_START);
            self.str.push_str(&hex::encode(in_));
        } else {
            self.str.push_str(&in_.len().to_string());
            self.str.push_str(" bytes");
        }
    }

    fn uuid(&mut self, in_: &[u8; 16]) {
        self.str.push_str(&hex::encode(&in_[..4]));
        self.str.push('-');
        self.str.push_str(&hex::encode(&in_[4..6]));
        self.str.push('-');
        self.str.push_str(&hex::encode(&in_[6..8]));
        self.str.push('-');
        self.str.push_str(&hex::encode(&in_[8..10]));
        self.str.push('-');
        self.str.push_str(&hex::encode(&in_[10..]));
    }
}

/// Renders a float the way Go's `%g` with precision 10 does: at most ten
/// significant digits, scientific notation when the exponent falls below
/// -4 or reaches the precision, and a two-digit signed exponent.
fn format_float(f: f64) -> String {
    if f == 0.0 {
        return if f.is_sign_negative() { "-0".into() } else { "0".into() };
    }
    if f.is_nan() {
        return "NaN".into();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf".into() } else { "+inf".into() };
    }

    let sci = format!("{:.*e}", 9, f);
    let (mantissa, exp) = sci.split_once('e').unwrap();
    let exp: i32 = exp.parse().unwrap();

    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = digits.trim_end_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };

    let mut out = String::new();
    if negative {
        out.push('-');
    }

    if exp < -4 || exp >= 10 {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if exp < 0 { '-' } else { '+' });
        let abs = exp.unsigned_abs();
        if abs < 10 {
            out.push('0');
        }
        out.push_str(&abs.to_string());
    } else if exp >= 0 {
        let int_len = exp as usize + 1;
        if digits.len() <= int_len {
            out.push_str(digits);
            for _ in digits.len()..int_len {
                out.push('0');
            }
        } else {
            out.push_str(&digits[..int_len]);
            out.push('.');
            out.push_str(&digits[int_len..]);
        }
    } else {
        out.push_str("0.");
        for _ in 0..(-exp - 1) {
            out.push('0');
        }
        out.push_str(digits);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;

    fn round_trip(input: &str) {
        let query = parse_query(input).unwrap();
        let mut fmt = Format::new(Cfg::default());
        fmt.query(&query);
        assert_eq!(fmt.string(), input, "format is not the parse inverse");
        assert_eq!(parse_query(fmt.string()).unwrap(), query);
    }

    #[test]
    fn round_trips() {
        round_trip("/hello");
        round_trip("/hello/world");
        round_trip("/hello/<>/thing");
        round_trip("/my/dir{\"str\",-13,{1.2e+13}}");
        round_trip("/hi/there{54,nil}={33.8}");
        round_trip("/a{}=clear");
        round_trip("/a{}={}");
        round_trip("/p{1,<int|uuid>,~}=<bytes>");
        round_trip("/a{0xdeadbeef}=0x");
        round_trip("/a{bcefd2ec-4df5-43b6-8c79-81b70b886af9}=<>");
        round_trip("/a{true,false}=-50.6");
        round_trip("/a\\/b{\"with / and , inside\"}=<any|string>");
        round_trip("/u{9223372036854775808}=18446744073709551615");
    }

    #[test]
    fn float_formatting_matches_go_g10() {
        assert_eq!(format_float(33.8), "33.8");
        assert_eq!(format_float(1.2e13), "1.2e+13");
        assert_eq!(format_float(-50.6), "-50.6");
        assert_eq!(format_float(13.45), "13.45");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(1e-5), "1e-05");
        assert_eq!(format_float(0.0), "0");
        assert_eq!(format_float(1234567890.0), "1234567890");
        assert_eq!(format_float(12345678900.0), "1.23456789e+10");
        assert_eq!(format_float(-0.00025), "-0.00025");
    }

    #[test]
    fn print_bytes_off_renders_length_only() {
        let query = parse_query("/a{1}=0xdeadbeef").unwrap();
        let mut fmt = Format::new(Cfg { print_bytes: false });
        fmt.query(&query);
        assert_eq!(fmt.string(), "/a{1}=4 bytes");
    }

    #[test]
    fn reset_clears_the_buffer() {
        let mut fmt = Format::new(Cfg::default());
        fmt.query(&parse_query("/a").unwrap());
        assert_eq!(fmt.string(), "/a");
        fmt.reset();
        assert_eq!(fmt.string(), "");
        fmt.query(&parse_query("/b").unwrap());
        assert_eq!(fmt.string(), "/b");
    }
}
