// SPDX-License-Identifier: MIT OR Apache-2.0

//! EBCDIC record streams to line-separated UTF-8 text.
//!
//! Fixed-format (RECFM F/FB) datasets have no line terminators: every
//! record is exactly LRECL characters, padded with EBCDIC spaces.
//! Variable-format (V/VB) records arrive already length-delimited, one
//! buffer per logical record. Sequence numbers in columns LRECL-7..LRECL
//! are stripped when `unnum` is set and the columns hold only digits.

use crate::codepage::Codepage;

/// Render a fixed-format EBCDIC buffer as text.
///
/// A record length below 1 disables splitting: the whole buffer is
/// decoded and a final newline appended.
pub fn fixed_text(cp: Codepage, data: &[u8], recl: usize, unnum: bool) -> String {
    let decoded = cp.decode(data);
    if recl < 1 {
        return decoded + "\n";
    }

    let chars: Vec<char> = decoded.chars().collect();
    let mut lines: Vec<String> = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + recl).min(chars.len());
        lines.push(render_line(&chars[start..end], recl, unnum));
        start += recl;
    }
    lines.join("\n") + "\n"
}

/// Render length-delimited records (variable format) as text, one line
/// per record.
pub fn variable_text(cp: Codepage, records: &[Vec<u8>], unnum: bool) -> String {
    let mut text = String::new();
    for record in records {
        let chars: Vec<char> = cp.decode(record).chars().collect();
        text.push_str(&render_line(&chars, chars.len(), unnum));
        text.push('\n');
    }
    text
}

/// One record to one line: drop the sequence-number columns when
/// requested, then strip trailing blanks.
fn render_line(chunk: &[char], recl: usize, unnum: bool) -> String {
    let numbered = unnum
        && recl >= 8
        && chunk.len() == recl
        && chunk[recl - 8..].iter().all(|c| c.is_ascii_digit());
    let kept = if numbered { &chunk[..recl - 8] } else { chunk };
    let line: String = kept.iter().collect();
    line.trim_end().to_string()
}
