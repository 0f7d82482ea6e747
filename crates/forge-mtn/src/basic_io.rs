//! Parser for monotone's basic_io stanza format.
//!
//! basic_io is the structured plain-text serialization monotone's
//! automate commands emit: stanzas separated by blank lines, each
//! stanza an ordered run of lines, each line a bareword key followed
//! by either one bracketed 40-character hash or one or more quoted,
//! backslash-escaped string values. Keys are conventionally padded
//! with spaces for alignment, so spaces before and inside the key run
//! are skipped rather than treated as separators.
//!
//! The grammar is context sensitive (hash vs. quoted-value branching
//! after the key), so this is a small hand-rolled scanner over a byte
//! cursor rather than a grammar-library parser.

use crate::{MtnError, Result};

/// An ordered run of lines between two blank lines.
pub type Stanza = Vec<StanzaLine>;

/// The payload of a stanza line: exactly one of a hash or values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineValue {
    /// A 40-character bracketed hex hash.
    Hash(String),
    /// One or more quoted string values.
    Values(Vec<String>),
}

/// One `key payload` line of a stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaLine {
    /// The bareword key.
    pub key: String,
    /// The hash or value payload.
    pub value: LineValue,
}

impl StanzaLine {
    /// Returns the hash payload, if this is a hash line.
    pub fn hash(&self) -> Option<&str> {
        match &self.value {
            LineValue::Hash(h) => Some(h),
            LineValue::Values(_) => None,
        }
    }

    /// Returns the value payload; empty for hash lines.
    pub fn values(&self) -> &[String] {
        match &self.value {
            LineValue::Hash(_) => &[],
            LineValue::Values(v) => v,
        }
    }

    /// Returns the first value, if this is a value line.
    pub fn first_value(&self) -> Option<&str> {
        self.values().first().map(String::as_str)
    }
}

/// Parses basic_io text into stanzas.
///
/// A missing trailing newline is supplied before parsing; without it
/// the final stanza would never close.
///
/// # Errors
///
/// Returns [`MtnError::Parse`] on malformed input (unterminated quote,
/// truncated hash). There is no partial-parse recovery mode.
pub fn parse(input: &str) -> Result<Vec<Stanza>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let owned;
    let text = if input.ends_with('\n') {
        input.as_bytes()
    } else {
        owned = format!("{input}\n");
        owned.as_bytes()
    };
    Scanner { text, pos: 0 }.run()
}

/// Serializes stanzas back to basic_io text.
///
/// Output uses single-space key/payload separation without monotone's
/// alignment padding; the two forms parse identically.
pub fn serialize(stanzas: &[Stanza]) -> String {
    let mut out = String::new();
    for (i, stanza) in stanzas.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for line in stanza {
            out.push_str(&line.key);
            match &line.value {
                LineValue::Hash(h) => {
                    out.push_str(" [");
                    out.push_str(h);
                    out.push(']');
                }
                LineValue::Values(values) => {
                    for value in values {
                        out.push_str(" \"");
                        out.push_str(&escape(value));
                        out.push('"');
                    }
                }
            }
            out.push('\n');
        }
    }
    out
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

struct Scanner<'a> {
    text: &'a [u8],
    pos: usize,
}

impl Scanner<'_> {
    fn run(mut self) -> Result<Vec<Stanza>> {
        let mut stanzas = Vec::new();
        while self.pos < self.text.len() {
            let mut stanza = Stanza::new();
            while self.pos < self.text.len() && self.text[self.pos] != b'\n' {
                stanza.push(self.line()?);
            }
            // the blank separator line, or end of input
            self.pos += 1;
            if !stanza.is_empty() {
                stanzas.push(stanza);
            }
        }
        Ok(stanzas)
    }

    fn line(&mut self) -> Result<StanzaLine> {
        let key = self.key()?;
        let value = match self.text.get(self.pos) {
            Some(b'[') => LineValue::Hash(self.hash()?),
            _ => LineValue::Values(self.values()?),
        };
        match self.text.get(self.pos) {
            Some(b'\n') => {
                self.pos += 1;
                Ok(StanzaLine { key, value })
            }
            _ => Err(self.error("expected end of line after payload")),
        }
    }

    fn key(&mut self) -> Result<String> {
        let mut key = Vec::new();
        while let Some(&ch) = self.text.get(self.pos) {
            match ch {
                b'"' | b'[' => {
                    return String::from_utf8(key)
                        .map_err(|_| self.error("invalid utf-8 in key"));
                }
                b'\n' => return Err(self.error("stanza line without a payload")),
                b' ' => self.pos += 1,
                _ => {
                    key.push(ch);
                    self.pos += 1;
                }
            }
        }
        Err(self.error("unexpected end of input in key"))
    }

    fn hash(&mut self) -> Result<String> {
        self.pos += 1; // opening bracket
        if self.pos + 40 > self.text.len() {
            return Err(self.error("truncated hash"));
        }
        let raw = &self.text[self.pos..self.pos + 40];
        if raw.contains(&b'\n') {
            return Err(self.error("truncated hash"));
        }
        let hash = std::str::from_utf8(raw)
            .map_err(|_| self.error("invalid utf-8 in hash"))?
            .to_string();
        self.pos += 40;
        match self.text.get(self.pos) {
            Some(b']') => {
                self.pos += 1;
                Ok(hash)
            }
            _ => Err(self.error("missing closing bracket after hash")),
        }
    }

    fn values(&mut self) -> Result<Vec<String>> {
        let mut values = Vec::new();
        loop {
            self.pos += 1; // opening quote
            let mut value = Vec::new();
            loop {
                match self.text.get(self.pos) {
                    None => return Err(self.error("unterminated quoted string")),
                    Some(b'"') => {
                        self.pos += 1;
                        break;
                    }
                    Some(b'\\') => match self.text.get(self.pos + 1) {
                        Some(b'\\') => {
                            value.push(b'\\');
                            self.pos += 2;
                        }
                        Some(b'"') => {
                            value.push(b'"');
                            self.pos += 2;
                        }
                        Some(&other) => {
                            value.push(b'\\');
                            value.push(other);
                            self.pos += 2;
                        }
                        None => return Err(self.error("unterminated quoted string")),
                    },
                    Some(&ch) => {
                        value.push(ch);
                        self.pos += 1;
                    }
                }
            }
            values.push(
                String::from_utf8(value).map_err(|_| self.error("invalid utf-8 in value"))?,
            );
            // values on one line are separated by a single space
            if self.text.get(self.pos) == Some(&b' ') && self.text.get(self.pos + 1) == Some(&b'"')
            {
                self.pos += 1;
                continue;
            }
            return Ok(values);
        }
    }

    fn error(&self, message: &str) -> MtnError {
        MtnError::Parse {
            pos: self.pos,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn value_line(key: &str, values: &[&str]) -> StanzaLine {
        StanzaLine {
            key: key.to_string(),
            value: LineValue::Values(values.iter().map(|v| v.to_string()).collect()),
        }
    }

    fn hash_line(key: &str, hash: &str) -> StanzaLine {
        StanzaLine {
            key: key.to_string(),
            value: LineValue::Hash(hash.to_string()),
        }
    }

    const HASH: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn parses_empty_input() {
        assert_eq!(parse("").unwrap(), Vec::<Stanza>::new());
    }

    #[test]
    fn parses_single_value_stanza() {
        let stanzas = parse("format_version \"1\"\n").unwrap();
        assert_eq!(stanzas, vec![vec![value_line("format_version", &["1"])]]);
    }

    #[test]
    fn parses_aligned_cert_stanza() {
        let text = format!(
            "      key [{HASH}]\nsignature \"ok\"\n     name \"author\"\n    value \"joe@example.com\"\n    trust \"trusted\"\n"
        );
        let stanzas = parse(&text).unwrap();
        assert_eq!(
            stanzas,
            vec![vec![
                hash_line("key", HASH),
                value_line("signature", &["ok"]),
                value_line("name", &["author"]),
                value_line("value", &["joe@example.com"]),
                value_line("trust", &["trusted"]),
            ]]
        );
    }

    #[test]
    fn parses_multiple_stanzas() {
        let text = format!("dir \"\"\n\ndir \"src\"\n\nfile \"src/main.c\"\ncontent [{HASH}]\n");
        let stanzas = parse(&text).unwrap();
        assert_eq!(stanzas.len(), 3);
        assert_eq!(stanzas[0], vec![value_line("dir", &[""])]);
        assert_eq!(stanzas[1], vec![value_line("dir", &["src"])]);
        assert_eq!(
            stanzas[2],
            vec![
                value_line("file", &["src/main.c"]),
                hash_line("content", HASH),
            ]
        );
    }

    #[test]
    fn parses_multiple_values_on_one_line() {
        let stanzas = parse("tag \"one\" \"two\" \"three\"\n").unwrap();
        assert_eq!(stanzas, vec![vec![value_line("tag", &["one", "two", "three"])]]);
    }

    #[test]
    fn closes_final_stanza_without_trailing_newline() {
        let stanzas = parse("branch \"com.example\"").unwrap();
        assert_eq!(stanzas, vec![vec![value_line("branch", &["com.example"])]]);
    }

    #[test]
    fn unescapes_quotes_and_backslashes() {
        let stanzas = parse(r#"value "a\"b" "c\\d""#).unwrap();
        assert_eq!(stanzas, vec![vec![value_line("value", &["a\"b", "c\\d"])]]);
    }

    #[test]
    fn value_ending_in_escaped_backslash_terminates() {
        let stanzas = parse("value \"tail\\\\\"\n").unwrap();
        assert_eq!(stanzas, vec![vec![value_line("value", &["tail\\"])]]);
    }

    #[test]
    fn values_may_span_lines() {
        let stanzas = parse("changelog \"first line\nsecond line\"\n").unwrap();
        assert_eq!(
            stanzas,
            vec![vec![value_line("changelog", &["first line\nsecond line"])]]
        );
    }

    #[test]
    fn hash_and_values_are_mutually_exclusive() {
        let stanzas = parse(&format!("content [{HASH}]\n")).unwrap();
        let line = &stanzas[0][0];
        assert_eq!(line.hash(), Some(HASH));
        assert!(line.values().is_empty());
        assert_eq!(line.first_value(), None);
    }

    #[test]
    fn rejects_unterminated_quote() {
        let err = parse("value \"never closed\n").unwrap_err();
        assert!(matches!(err, MtnError::Parse { .. }));
    }

    #[test]
    fn rejects_truncated_hash() {
        let err = parse("content [abcdef]\n").unwrap_err();
        assert!(matches!(err, MtnError::Parse { .. }));
    }

    #[test]
    fn rejects_hash_without_closing_bracket() {
        let err = parse(&format!("content [{HASH}x\n")).unwrap_err();
        assert!(matches!(err, MtnError::Parse { .. }));
    }

    #[test]
    fn serialize_reparse_is_idempotent() {
        let text = format!(
            "format_version \"1\"\n\nfile \"a b.c\"\ncontent [{HASH}]\n\nvalue \"x\\\"y\" \"z\"\n"
        );
        let first = parse(&text).unwrap();
        let second = parse(&serialize(&first)).unwrap();
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn escaped_values_round_trip(values in prop::collection::vec(any::<String>(), 1..4)) {
            let stanza: Stanza = vec![StanzaLine {
                key: "value".to_string(),
                value: LineValue::Values(values),
            }];
            let stanzas = vec![stanza];
            let reparsed = parse(&serialize(&stanzas)).unwrap();
            prop_assert_eq!(reparsed, stanzas);
        }
    }
}
