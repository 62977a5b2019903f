//! MogileFS Protocol Encoding and Decoding
//!
//! This module handles the tracker's line protocol: request lines are a
//! command token followed by form-encoded arguments, responses are a single
//! `OK` or `ERR` line. It also resolves storage destinations out of a
//! `create_open` response.

use bytes::Bytes;
use std::str::FromStr;
use url::form_urlencoded;

use crate::errors::{MogileFSError, Result};
use crate::types::*;

/// Builds an argument map from `(key, value)` pairs
pub fn build_args<'a, I>(pairs: I) -> Args
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Form-encodes arguments as `k1=v1&k2=v2`, spaces as `+`
pub fn encode_args(args: &Args) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(args.iter())
        .finish()
}

/// Decodes a form-encoded argument blob.
///
/// When a key repeats, the first value wins. Blank values are kept.
pub fn decode_args(blob: &str) -> Args {
    let mut args = Args::new();
    for (k, v) in form_urlencoded::parse(blob.as_bytes()) {
        args.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    args
}

/// Encodes a tracker request line
///
/// The format is `<command> <urlencoded-args>\r\n`. With no arguments the
/// line still carries the separating space.
pub fn encode_request(command: &str, args: &Args) -> Result<Bytes> {
    if command.is_empty() || command.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(MogileFSError::InvalidArgument(format!(
            "command must be a single token: {:?}",
            command
        )));
    }

    let line = format!("{} {}{}", command, encode_args(args), LINE_TERMINATOR);
    Ok(Bytes::from(line))
}

/// Decodes a tracker response line
///
/// `OK [id] [args]` yields the decoded argument map. `ERR <code> [message]`
/// yields [`MogileFSError::Tracker`]. Anything else is
/// [`MogileFSError::InvalidResponse`].
pub fn decode_response(line: &str) -> Result<Args> {
    let trimmed = line.trim_end_matches(['\r', '\n']);

    if let Some(rest) = after_keyword(trimmed, "OK") {
        let rest = rest
            .trim_start()
            .trim_start_matches(|c: char| c.is_ascii_digit())
            .trim_start();
        let blob = rest.split_whitespace().next().unwrap_or("");
        return Ok(decode_args(blob));
    }

    if let Some(rest) = after_keyword(trimmed, "ERR") {
        let rest = rest.trim_start();
        let code_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if code_len > 0 {
            let (code, message) = rest.split_at(code_len);
            let message = message.trim_start().split_whitespace().next().unwrap_or("");
            return Err(MogileFSError::Tracker {
                code: unquote_plus(code),
                message: unquote_plus(message),
            });
        }
    }

    Err(MogileFSError::InvalidResponse(trimmed.to_string()))
}

/// Returns the remainder after `keyword` if it is followed by whitespace or
/// ends the line
fn after_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

/// Percent-decodes a single value, treating `+` as a space
fn unquote_plus(value: &str) -> String {
    let spaced = value.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Looks up a required response field
pub fn field<'a>(res: &'a Args, name: &str) -> Result<&'a str> {
    res.get(name)
        .map(String::as_str)
        .ok_or_else(|| MogileFSError::InvalidResponse(format!("missing field '{}'", name)))
}

/// Looks up and parses a required response field
pub fn parse_field<T: FromStr>(res: &Args, name: &str) -> Result<T> {
    let raw = field(res, name)?;
    raw.parse().map_err(|_| {
        MogileFSError::InvalidResponse(format!("field '{}' has invalid value {:?}", name, raw))
    })
}

/// Extracts the fid assigned by `create_open`
pub fn decode_fid(res: &Args) -> Result<u64> {
    parse_field(res, "fid")
}

/// Extracts candidate storage destinations from a `create_open` response
///
/// Older trackers return a single `devid`/`path` pair; with `multi_dest`
/// the response carries `dev_count` and numbered `devid_N`/`path_N` fields.
pub fn decode_destinations(res: &Args) -> Result<Vec<Destination>> {
    let dests = match res.get("dev_count") {
        None => vec![Destination::new(
            parse_field(res, "devid")?,
            field(res, "path")?,
        )],
        Some(_) => {
            let count: usize = parse_field(res, "dev_count")?;
            (1..=count)
                .map(|i| {
                    Ok(Destination::new(
                        parse_field(res, &format!("devid_{}", i))?,
                        field(res, &format!("path_{}", i))?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?
        }
    };

    if dests.is_empty() {
        return Err(MogileFSError::InvalidResponse(
            "create_open returned no destinations".to_string(),
        ));
    }
    Ok(dests)
}
