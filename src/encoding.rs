//! Text decoding for source files.
//!
//! Files are decoded strictly: malformed input is never replaced with
//! U+FFFD. A file is first decoded with its byte-order mark, the
//! configured hint or UTF-8, in that order of precedence. If that fails,
//! a single retry uses the encoding guessed by `chardetng`, unless the
//! caller asked for strict decoding. A file that fails every attempt is
//! an error.

use std::path::Path;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

use crate::error::{Error, Result};

/// Decode `bytes` read from `path` into a string.
///
/// # Examples
///
/// ```
/// use std::path::Path;
///
/// use codesift::encoding::decode_file;
///
/// let text = decode_file(Path::new("a.py"), b"print('hi')\n", None).unwrap();
/// assert_eq!(text, "print('hi')\n");
/// ```
pub fn decode_file(
    path: &Path,
    bytes: &[u8],
    hint: Option<&'static Encoding>,
) -> Result<String> {
    decode_with_retry(path, bytes, hint, |body| Some(detect(body)))
}

/// Like [`decode_file`], without the detection retry.
pub fn decode_file_strict(
    path: &Path,
    bytes: &[u8],
    hint: Option<&'static Encoding>,
) -> Result<String> {
    decode_with_retry(path, bytes, hint, |_| None)
}

fn detect(body: &[u8]) -> &'static Encoding {
    let mut detector = EncodingDetector::new();
    detector.feed(body, true);
    detector.guess(None, true)
}

fn decode_with_retry<F>(
    path: &Path,
    bytes: &[u8],
    hint: Option<&'static Encoding>,
    retry_with: F,
) -> Result<String>
where
    F: FnOnce(&[u8]) -> Option<&'static Encoding>,
{
    let (first, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None => (hint.unwrap_or(UTF_8), bytes),
    };

    if let Some(text) = decode_strict(first, body) {
        return Ok(text);
    }

    let Some(guessed) = retry_with(body) else {
        return Err(Error::Decode {
            path: path.to_path_buf(),
            encoding: first.name().to_string(),
        });
    };

    tracing::debug!(
        path = %path.display(),
        first = first.name(),
        guessed = guessed.name(),
        "retrying decode with detected encoding"
    );

    if guessed != first
        && let Some(text) = decode_strict(guessed, body)
    {
        return Ok(text);
    }

    Err(Error::Decode {
        path: path.to_path_buf(),
        encoding: format!("{}, then {}", first.name(), guessed.name()),
    })
}

fn decode_strict(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}
