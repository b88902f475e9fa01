//! Line codec for the driver protocol.
//!
//! One message per line: a command token followed by whitespace-separated
//! arguments, each percent-escaped so that a token can never contain a
//! space or newline. Bytes outside `[A-Za-z0-9_.~-]` are encoded as `%HH`;
//! decoding is the exact inverse and rejects malformed escapes.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;

/// Bytes kept bare on the wire. Everything else is `%HH`-escaped.
const KEEP_BARE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Errors produced while decoding protocol lines. All are fatal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// A bare newline arrived with no command token.
    #[error("empty command line")]
    EmptyLine,

    /// An argument contained a `%` not followed by two hex digits, or the
    /// decoded bytes were not valid UTF-8.
    #[error("invalid escape in argument {arg:?}")]
    BadEscape {
        /// The raw argument as received.
        arg: String,
    },
}

/// Escapes one argument for the wire.
pub fn escape(arg: &str) -> String {
    utf8_percent_encode(arg, KEEP_BARE).to_string()
}

/// Decodes one argument from the wire.
pub fn unescape(arg: &str) -> Result<String, ProtocolError> {
    // The decoder passes malformed sequences through untouched, so
    // well-formedness has to be checked up front.
    let bytes = arg.as_bytes();
    for (i, byte) in bytes.iter().enumerate() {
        if *byte == b'%'
            && !(i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit())
        {
            return Err(ProtocolError::BadEscape {
                arg: arg.to_string(),
            });
        }
    }
    percent_decode_str(arg)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ProtocolError::BadEscape {
            arg: arg.to_string(),
        })
}

/// Splits a line into its command and unescaped arguments.
pub fn parse_line(line: &str) -> Result<(String, Vec<String>), ProtocolError> {
    if line.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }
    let mut tokens = line.split(' ');
    let cmd = match tokens.next() {
        Some(token) => unescape(token)?,
        None => return Err(ProtocolError::EmptyLine),
    };
    let args = tokens.map(unescape).collect::<Result<Vec<_>, _>>()?;
    Ok((cmd, args))
}

/// Formats a command and its arguments as one wire line, without the
/// trailing newline.
pub fn format_line(cmd: &str, args: &[&str]) -> String {
    let mut line = String::from(cmd);
    for arg in args {
        line.push(' ');
        line.push_str(&escape(arg));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_reserved_bytes() {
        assert_eq!(escape("a b"), "a%20b");
        assert_eq!(escape("/repo"), "%2Frepo");
        assert_eq!(escape("safe-._~09AZ"), "safe-._~09AZ");
        assert_eq!(escape(""), "");
    }

    #[test]
    fn test_unescape_is_inverse_of_escape() {
        for arg in ["", "plain", "a b/c", "100%", "naïve.txt", "tab\there"] {
            assert_eq!(unescape(&escape(arg)).unwrap(), arg);
        }
    }

    #[test]
    fn test_unescape_rejects_malformed_escapes() {
        for arg in ["%", "%2", "%zz", "a%2"] {
            assert!(
                matches!(unescape(arg), Err(ProtocolError::BadEscape { .. })),
                "arg: {arg:?}"
            );
        }
    }

    #[test]
    fn test_parse_line_unescapes_tokens() {
        let (cmd, args) = parse_line("START h1 %2Frepo %2Frepo").unwrap();
        assert_eq!(cmd, "START");
        assert_eq!(args, vec!["h1", "/repo", "/repo"]);
    }

    #[test]
    fn test_parse_line_keeps_empty_arguments() {
        let (cmd, args) = parse_line("START h1 %2Frepo ").unwrap();
        assert_eq!(cmd, "START");
        assert_eq!(args, vec!["h1", "/repo", ""]);
    }

    #[test]
    fn test_parse_empty_line_is_error() {
        assert_eq!(parse_line(""), Err(ProtocolError::EmptyLine));
    }

    #[test]
    fn test_format_line_escapes_arguments() {
        assert_eq!(format_line("CHANGES", &["h1"]), "CHANGES h1");
        assert_eq!(format_line("RECURSIVE", &["a b/c"]), "RECURSIVE a%20b%2Fc");
        assert_eq!(format_line("RECURSIVE", &[""]), "RECURSIVE ");
        assert_eq!(format_line("DONE", &[]), "DONE");
    }
}
