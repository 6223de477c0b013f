use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use thiserror::Error;

/// Largest UDP payload that fits in a single IPv4 datagram.
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

/// Recommended cap on the base64 form of an image, leaving room for the
/// tag, target and filename prefixes inside [`MAX_DATAGRAM_PAYLOAD`].
pub const MAX_IMAGE_PAYLOAD: usize = 63_000;

const CONNECT_TAG: &str = "CONNECT:";
const PRIVATE_TAG: &str = "PRIVATE:";
const IMAGE_TAG: &str = "IMAGE:";
const LIST_TAG: &str = "LIST:";
const FRAME_TAGS: [&str; 4] = [CONNECT_TAG, PRIVATE_TAG, IMAGE_TAG, LIST_TAG];

const FIELD_SEPARATOR: char = ':';
const NAME_SEPARATOR: char = ',';

/// Tag words a display name must not collide with, otherwise an attributed
/// line such as `LIST: hi` would decode as a control frame on the client.
pub const RESERVED_NAMES: &[&str] = &["CONNECT", "PRIVATE", "IMAGE", "LIST"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Payload of a broadcast or private message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Image(Image),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientToServer {
    Connect { name: String },
    Broadcast { body: Body },
    Private { target: String, body: Body },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerToClient {
    Presence { names: Vec<String> },
    Relay { body: Body },
    /// Only produced by older relays; current relays unicast the raw body.
    Private { target: String, body: Body },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("private message is missing the `PRIVATE:<name>:<body>` framing")]
    MalformedPrivate,
    #[error("image message is missing the `IMAGE:<filename>:<base64>` framing")]
    MalformedImage,
    #[error("image payload is not valid base64: {0}")]
    InvalidBase64(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("message too large: {size} bytes exceeds the {limit} byte datagram limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("{field} must not contain '{character}'")]
    ReservedCharacter {
        field: &'static str,
        character: char,
    },
    /// Text starting with a frame tag would decode as that frame.
    #[error("text must not start with `{tag}`")]
    ReservedPrefix { tag: &'static str },
    #[error("{field} must not start or end with whitespace")]
    UntrimmedField { field: &'static str },
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
}

/// A message with a text wire form that fits in one datagram.
pub trait WireMessage: Sized {
    fn encode(&self) -> Result<Vec<u8>, EncodeError>;
    fn decode(datagram: &[u8]) -> Result<Self, DecodeError>;
}

impl ServerToClient {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Relay {
            body: Body::Text(text.into()),
        }
    }
}

impl WireMessage for ClientToServer {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = String::new();
        match self {
            Self::Connect { name } => {
                // The relay trims names on decode.
                if name.trim() != name.as_str() {
                    return Err(EncodeError::UntrimmedField {
                        field: "connect name",
                    });
                }
                out.push_str(CONNECT_TAG);
                out.push_str(name);
            }
            Self::Broadcast { body } => body.write_to(&mut out)?,
            Self::Private { target, body } => write_private(&mut out, target, body)?,
        }
        finish(out)
    }

    fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        let text = String::from_utf8_lossy(datagram);

        if let Some(name) = text.strip_prefix(CONNECT_TAG) {
            return Ok(Self::Connect {
                name: name.trim().to_string(),
            });
        }
        if let Some(rest) = text.strip_prefix(PRIVATE_TAG) {
            let (target, body) = parse_private(rest)?;
            return Ok(Self::Private { target, body });
        }
        Ok(Self::Broadcast {
            body: Body::parse(&text)?,
        })
    }
}

impl WireMessage for ServerToClient {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = String::new();
        match self {
            Self::Presence { names } => {
                out.push_str(LIST_TAG);
                for (index, name) in names.iter().enumerate() {
                    if name.is_empty() {
                        return Err(EncodeError::EmptyField {
                            field: "presence name",
                        });
                    }
                    reject_character("presence name", name, NAME_SEPARATOR)?;
                    if index > 0 {
                        out.push(NAME_SEPARATOR);
                    }
                    out.push_str(name);
                }
            }
            Self::Relay { body } => body.write_to(&mut out)?,
            Self::Private { target, body } => write_private(&mut out, target, body)?,
        }
        finish(out)
    }

    fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        let text = String::from_utf8_lossy(datagram);

        if let Some(rest) = text.strip_prefix(LIST_TAG) {
            let names = if rest.is_empty() {
                Vec::new()
            } else {
                rest.split(NAME_SEPARATOR).map(str::to_string).collect()
            };
            return Ok(Self::Presence { names });
        }
        if let Some(rest) = text.strip_prefix(PRIVATE_TAG) {
            let (target, body) = parse_private(rest)?;
            return Ok(Self::Private { target, body });
        }
        Ok(Self::Relay {
            body: Body::parse(&text)?,
        })
    }
}

impl Body {
    /// Parses the body half of a frame: `IMAGE:<filename>:<base64>` or plain text.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let Some(rest) = text.strip_prefix(IMAGE_TAG) else {
            return Ok(Self::Text(text.to_string()));
        };
        let (filename, encoded) = rest
            .split_once(FIELD_SEPARATOR)
            .ok_or(DecodeError::MalformedImage)?;
        let data = STANDARD
            .decode(encoded.trim_end_matches(|c: char| c.is_ascii_whitespace()))
            .map_err(|err| DecodeError::InvalidBase64(err.to_string()))?;
        Ok(Self::Image(Image {
            filename: filename.to_string(),
            data,
        }))
    }

    fn write_to(&self, out: &mut String) -> Result<(), EncodeError> {
        match self {
            Self::Text(text) => {
                if let Some(tag) = FRAME_TAGS.iter().find(|tag| text.starts_with(**tag)) {
                    return Err(EncodeError::ReservedPrefix { tag: *tag });
                }
                out.push_str(text);
            }
            Self::Image(image) => {
                reject_character("image filename", &image.filename, FIELD_SEPARATOR)?;
                out.push_str(IMAGE_TAG);
                out.push_str(&image.filename);
                out.push(FIELD_SEPARATOR);
                STANDARD.encode_string(&image.data, out);
            }
        }
        Ok(())
    }
}

impl Image {
    /// Length of the base64 form of `data` on the wire.
    pub fn encoded_len(&self) -> usize {
        self.data.len().div_ceil(3) * 4
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Image(image) => write!(f, "{image}"),
        }
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image {} ({} bytes)", self.filename, self.data.len())
    }
}

fn parse_private(rest: &str) -> Result<(String, Body), DecodeError> {
    let (target, body) = rest
        .split_once(FIELD_SEPARATOR)
        .ok_or(DecodeError::MalformedPrivate)?;
    Ok((target.to_string(), Body::parse(body)?))
}

fn write_private(out: &mut String, target: &str, body: &Body) -> Result<(), EncodeError> {
    reject_character("private target", target, FIELD_SEPARATOR)?;
    out.push_str(PRIVATE_TAG);
    out.push_str(target);
    out.push(FIELD_SEPARATOR);
    body.write_to(out)
}

fn reject_character(field: &'static str, value: &str, character: char) -> Result<(), EncodeError> {
    if value.contains(character) {
        return Err(EncodeError::ReservedCharacter { field, character });
    }
    Ok(())
}

fn finish(out: String) -> Result<Vec<u8>, EncodeError> {
    // Oversized frames are refused outright; UDP would otherwise fail or truncate.
    if out.len() > MAX_DATAGRAM_PAYLOAD {
        return Err(EncodeError::PayloadTooLarge {
            size: out.len(),
            limit: MAX_DATAGRAM_PAYLOAD,
        });
    }
    Ok(out.into_bytes())
}
