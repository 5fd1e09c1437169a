//! Text payloads carried inside frame values.
//!
//! Every structured payload is a list of fields joined by [`FIELD_SEPARATOR`].
//! None of the carried values (names, base64 keys, FEN strings, SAN moves,
//! UUIDs) can contain the separator, which is checked when a payload is built.

use thiserror::Error;

pub const FIELD_SEPARATOR: char = ';';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Field {field} may not contain ';'")]
    SeparatorInField { field: &'static str },

    #[error("List declares {declared} entries but carries {found}")]
    CountMismatch { declared: usize, found: usize },
}

fn as_text(payload: &[u8]) -> Result<&str, PayloadError> {
    std::str::from_utf8(payload).map_err(|_| PayloadError::InvalidUtf8)
}

fn split_exact<const N: usize>(payload: &[u8]) -> Result<[&str; N], PayloadError> {
    let fields: Vec<&str> = as_text(payload)?.split(FIELD_SEPARATOR).collect();
    fields
        .try_into()
        .map_err(|fields: Vec<&str>| PayloadError::FieldCount {
            expected: N,
            found: fields.len(),
        })
}

fn check_field(field: &'static str, value: &str) -> Result<(), PayloadError> {
    if value.contains(FIELD_SEPARATOR) {
        return Err(PayloadError::SeparatorInField { field });
    }
    Ok(())
}

/// Profile sent unsigned with a login request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginProfile {
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
    pub rating: i64,
    pub public_key: String,
}

impl LoginProfile {
    pub fn to_payload(&self) -> Result<Vec<u8>, PayloadError> {
        check_field("first_name", &self.first_name)?;
        check_field("last_name", &self.last_name)?;
        check_field("public_key", &self.public_key)?;
        Ok(format!(
            "{};{};{};{};{}",
            self.first_name,
            self.last_name,
            u8::from(self.active),
            self.rating,
            self.public_key
        )
        .into_bytes())
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let [first, last, active, rating, key] = split_exact::<5>(payload)?;

        let active = match active {
            "1" | "true" => true,
            "0" | "false" => false,
            other => {
                return Err(PayloadError::InvalidField {
                    field: "active",
                    value: other.to_string(),
                })
            }
        };
        let rating = rating.parse().map_err(|_| PayloadError::InvalidField {
            field: "rating",
            value: rating.to_string(),
        })?;
        if key.is_empty() {
            return Err(PayloadError::InvalidField {
                field: "public_key",
                value: String::new(),
            });
        }

        Ok(Self {
            first_name: first.to_string(),
            last_name: last.to_string(),
            active,
            rating,
            public_key: key.to_string(),
        })
    }
}

/// A move played by the other side, pushed or returned as `san;fen`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveNotice {
    pub san: String,
    pub fen: String,
}

impl MoveNotice {
    pub fn to_payload(&self) -> Result<Vec<u8>, PayloadError> {
        check_field("san", &self.san)?;
        check_field("fen", &self.fen)?;
        Ok(format!("{};{}", self.san, self.fen).into_bytes())
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let [san, fen] = split_exact::<2>(payload)?;
        Ok(Self {
            san: san.to_string(),
            fen: fen.to_string(),
        })
    }
}

/// Final position and result text, carried as `fen;result`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameOverNotice {
    pub fen: String,
    pub result: String,
}

impl GameOverNotice {
    pub fn to_payload(&self) -> Result<Vec<u8>, PayloadError> {
        check_field("fen", &self.fen)?;
        check_field("result", &self.result)?;
        Ok(format!("{};{}", self.fen, self.result).into_bytes())
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let [fen, result] = split_exact::<2>(payload)?;
        Ok(Self {
            fen: fen.to_string(),
            result: result.to_string(),
        })
    }
}

/// `a;b;c`, empty payload for an empty list
pub fn join_list<S: AsRef<str>>(items: &[S]) -> Vec<u8> {
    items
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(";")
        .into_bytes()
}

pub fn split_list(payload: &[u8]) -> Result<Vec<String>, PayloadError> {
    let text = as_text(payload)?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(text.split(FIELD_SEPARATOR).map(str::to_string).collect())
}

/// `N;a;b;...` where N is the number of entries that follow
pub fn join_counted_list<S: AsRef<str>>(items: &[S]) -> Vec<u8> {
    let mut payload = items.len().to_string().into_bytes();
    for item in items {
        payload.push(b';');
        payload.extend_from_slice(item.as_ref().as_bytes());
    }
    payload
}

pub fn split_counted_list(payload: &[u8]) -> Result<Vec<String>, PayloadError> {
    let text = as_text(payload)?;
    let mut parts = text.split(FIELD_SEPARATOR);
    let count_field = parts.next().unwrap_or_default();
    let declared: usize = count_field.parse().map_err(|_| PayloadError::InvalidField {
        field: "count",
        value: count_field.to_string(),
    })?;

    let items: Vec<String> = parts.map(str::to_string).collect();
    if items.len() != declared {
        return Err(PayloadError::CountMismatch {
            declared,
            found: items.len(),
        });
    }
    Ok(items)
}
