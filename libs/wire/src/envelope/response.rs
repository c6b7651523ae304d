use std::fmt;

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::de::DeserializeOwned;

use crate::error::WireError;
use crate::status::StatusCode;

/// Structured error payload the server may attach to a non-zero status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerError {
    pub message: String,
    pub context: Option<String>,
    pub error_info: Option<String>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(context) = &self.context {
            write!(f, " [{context}]")?;
        }
        Ok(())
    }
}

/// A parsed response envelope: status first, then the raw body fragment.
///
/// The body keeps whatever the server sent inside its body element, verbatim;
/// [`Response::decode`] turns it into a typed value when the caller knows the
/// shape.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub error: Option<ServerError>,
    pub body: Option<String>,
}

impl Response {
    pub fn parse(raw: &str) -> Result<Self, WireError> {
        let mut reader = Reader::from_str(raw);
        let mut status: Option<(StatusCode, Option<ServerError>)> = None;
        let mut body: Option<String> = None;

        loop {
            match next_event(&mut reader)? {
                Event::Start(element) => match element.local_name().as_ref() {
                    b"status" if status.is_none() => {
                        status = Some(parse_status(&mut reader)?);
                    }
                    b"info" if body.is_none() => {
                        let span = reader
                            .read_to_end(element.name())
                            .map_err(|err| WireError::Malformed(format!("invalid xml: {err}")))?;
                        let (start, end) = (span.start as usize, span.end as usize);
                        body = Some(raw[start..end].to_string());
                    }
                    _ => {}
                },
                Event::Empty(element) if element.local_name().as_ref() == b"info" => {
                    if body.is_none() {
                        body = Some(String::new());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let (status, error) =
            status.ok_or_else(|| WireError::Malformed("missing status".to_string()))?;
        Ok(Self {
            status,
            error,
            body,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|error| error.message.as_str())
    }

    /// Deserializes the body fragment into `T`.
    ///
    /// Fails with [`WireError::Malformed`] when the body is absent or does not
    /// match the expected shape; callers treat that as a permanent failure.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| WireError::Malformed("response has no body".to_string()))?;
        let wrapped = format!("<info>{body}</info>");
        quick_xml::de::from_str(&wrapped)
            .map_err(|err| WireError::Malformed(format!("body decode: {err}")))
    }
}

fn parse_status(
    reader: &mut Reader<&[u8]>,
) -> Result<(StatusCode, Option<ServerError>), WireError> {
    let mut code: Option<u32> = None;
    let mut error: Option<ServerError> = None;
    loop {
        match next_event(reader)? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"code" => {
                    let text = read_element_text(reader, b"code")?;
                    code = Some(text.trim().parse::<u32>().map_err(|_| {
                        WireError::Malformed(format!("bad status code '{}'", text.trim()))
                    })?);
                }
                b"error" => error = Some(parse_error(reader)?),
                _ => {
                    reader
                        .read_to_end(element.name())
                        .map_err(|err| WireError::Malformed(format!("invalid xml: {err}")))?;
                }
            },
            Event::End(element) if element.local_name().as_ref() == b"status" => break,
            Event::Eof => return Err(WireError::Malformed("truncated response".to_string())),
            _ => {}
        }
    }
    let code = code.ok_or_else(|| WireError::Malformed("status without code".to_string()))?;
    Ok((StatusCode::from_code(code), error))
}

fn parse_error(reader: &mut Reader<&[u8]>) -> Result<ServerError, WireError> {
    let mut error = ServerError::default();
    loop {
        match next_event(reader)? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"message" => error.message = read_element_text(reader, b"message")?,
                b"context" => error.context = Some(read_element_text(reader, b"context")?),
                b"error-info" => error.error_info = Some(read_element_text(reader, b"error-info")?),
                _ => {
                    reader
                        .read_to_end(element.name())
                        .map_err(|err| WireError::Malformed(format!("invalid xml: {err}")))?;
                }
            },
            Event::End(element) if element.local_name().as_ref() == b"error" => break,
            Event::Eof => return Err(WireError::Malformed("truncated response".to_string())),
            _ => {}
        }
    }
    Ok(error)
}

/// Collects the text content up to the matching end tag, entities decoded.
fn read_element_text(reader: &mut Reader<&[u8]>, end: &[u8]) -> Result<String, WireError> {
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        match next_event(reader)? {
            Event::Start(_) => depth += 1,
            Event::End(element) => {
                if depth == 0 {
                    if element.local_name().as_ref() == end {
                        break;
                    }
                    return Err(WireError::Malformed(format!(
                        "unexpected </{}>",
                        String::from_utf8_lossy(element.name().as_ref())
                    )));
                }
                depth -= 1;
            }
            Event::Text(piece) => {
                let decoded = piece
                    .unescape()
                    .map_err(|err| WireError::Malformed(format!("bad text: {err}")))?;
                text.push_str(&decoded);
            }
            Event::CData(piece) => text.push_str(&String::from_utf8_lossy(&piece)),
            Event::Eof => return Err(WireError::Malformed("truncated response".to_string())),
            _ => {}
        }
    }
    Ok(text)
}

fn next_event<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Event<'a>, WireError> {
    reader
        .read_event()
        .map_err(|err| WireError::Malformed(format!("invalid xml: {err}")))
}
