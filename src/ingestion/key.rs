use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const RESERVED_NAME_LABEL: &str = "__name__";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseKeyError {
    #[error("app name is empty")]
    EmptyName,
    #[error("unexpected character {0:?} at position {1}")]
    UnexpectedChar(char, usize),
    #[error("label set is not terminated")]
    Unterminated,
    #[error("invalid label name {0:?}")]
    InvalidLabelName(String),
    #[error("duplicate label {0}")]
    DuplicateLabel(String),
}

/// Identity of a timeline: the application name plus a set of labels.
///
/// The textual form is `app.cpu{env=prod,host=a}`. The name is kept in the
/// label set under [`RESERVED_NAME_LABEL`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    labels: BTreeMap<String, String>,
}

impl Key {
    pub fn new(app_name: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(RESERVED_NAME_LABEL.to_string(), app_name.into());
        Self { labels }
    }

    pub fn parse(s: &str) -> Result<Self, ParseKeyError> {
        let s = s.trim();
        let (name, rest) = match s.find('{') {
            Some(i) => (&s[..i], Some((i, &s[i + 1..]))),
            None => (s, None),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(ParseKeyError::EmptyName);
        }
        if let Some((i, c)) = name.char_indices().find(|(_, c)| !is_name_char(*c)) {
            return Err(ParseKeyError::UnexpectedChar(c, i));
        }

        let mut key = Self::new(name);
        let (offset, rest) = match rest {
            Some(r) => r,
            None => return Ok(key),
        };
        let body = rest.strip_suffix('}').ok_or(ParseKeyError::Unterminated)?;
        if body.contains('}') || body.contains('{') {
            let pos = body.find(|c: char| c == '{' || c == '}').unwrap_or_default();
            let c = body[pos..].chars().next().unwrap_or('}');
            return Err(ParseKeyError::UnexpectedChar(c, offset + 1 + pos));
        }

        for pair in body.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| ParseKeyError::InvalidLabelName(pair.to_string()))?;
            let (k, v) = (k.trim(), v.trim());
            if !is_valid_label_name(k) {
                return Err(ParseKeyError::InvalidLabelName(k.to_string()));
            }
            if key.labels.insert(k.to_string(), v.to_string()).is_some() {
                return Err(ParseKeyError::DuplicateLabel(k.to_string()));
            }
        }
        Ok(key)
    }

    pub fn app_name(&self) -> &str {
        self.labels
            .get(RESERVED_NAME_LABEL)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn with_app_name(&self, app_name: impl Into<String>) -> Self {
        let mut key = self.clone();
        key.labels
            .insert(RESERVED_NAME_LABEL.to_string(), app_name.into());
        key
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(name.into(), value.into());
    }

    /// Labels other than the app name, sorted by name.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels
            .iter()
            .filter(|(k, _)| k.as_str() != RESERVED_NAME_LABEL)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical form: app name followed by labels in name order.
    pub fn normalized(&self) -> String {
        let mut s = self.app_name().to_string();
        s.push('{');
        let mut first = true;
        for (k, v) in self.labels() {
            if !first {
                s.push(',');
            }
            first = false;
            s.push_str(k);
            s.push('=');
            s.push_str(v);
        }
        s.push('}');
        s
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized())
    }
}

impl FromStr for Key {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/' | ':')
}

fn is_valid_label_name(name: &str) -> bool {
    !name.is_empty()
        && name != RESERVED_NAME_LABEL
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_only() {
        let k = Key::parse("app.cpu").unwrap();
        assert_eq!("app.cpu", k.app_name());
        assert_eq!("app.cpu{}", k.normalized());
        assert_eq!(0, k.labels().count());
    }

    #[test]
    fn test_parse_normalizes_label_order() {
        let k: Key = "app.cpu{host=b, env=prod}".parse().unwrap();
        assert_eq!("app.cpu{env=prod,host=b}", k.normalized());
        assert_eq!(k, Key::parse("app.cpu{env=prod,host=b}").unwrap());
    }

    #[test]
    fn test_with_app_name() {
        let k = Key::parse("app{env=prod}").unwrap();
        let k2 = k.with_app_name("app.alloc_space");
        assert_eq!("app.alloc_space{env=prod}", k2.to_string());
        assert_eq!("app", k.app_name());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Err(ParseKeyError::EmptyName), Key::parse("{a=b}"));
        assert_eq!(Err(ParseKeyError::Unterminated), Key::parse("app{a=b"));
        assert_eq!(
            Err(ParseKeyError::DuplicateLabel("a".to_string())),
            Key::parse("app{a=b,a=c}")
        );
        assert_eq!(
            Err(ParseKeyError::InvalidLabelName("__name__".to_string())),
            Key::parse("app{__name__=x}")
        );
        assert!(matches!(
            Key::parse("my app"),
            Err(ParseKeyError::UnexpectedChar(' ', 2))
        ));
        assert!(Key::parse("app{a=b}}").is_err());
    }
}
