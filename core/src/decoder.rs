/*
 * decoder.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Cassetta, an extensible IMAP server.
 *
 * Cassetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Cassetta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Cassetta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Line decoder: turns the inbound byte stream into CRLF-terminated lines
//! and lines into `{tag, verb, args}` command records. Quoted strings and
//! parenthesized lists each come out as a single argument.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One decoded command line. The verb is uppercased; the tag is absent when
/// the client sent a bare line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub tag: Option<String>,
    pub verb: String,
    pub args: Vec<String>,
}

/// CRLF line reader over any inbound stream. The decoder never reads past
/// the line it returns, so the caller decides when the next line is pulled;
/// while a connection is paused it simply does not call `next_line` and
/// bytes queue up in the transport.
pub struct LineDecoder<R> {
    reader: R,
    buf: BytesMut,
    max_line_len: usize,
}

impl<R> LineDecoder<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max_line_len: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(4096),
            max_line_len,
        }
    }

    /// Next CRLF-terminated line without the terminator, `Ok(None)` on end
    /// of stream. A trailing partial line at end of stream is discarded.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(pos) = find_crlf(&self.buf) {
                let line = self.buf.split_to(pos + 2);
                let text = String::from_utf8_lossy(&line[..pos]).into_owned();
                return Ok(Some(text));
            }
            if self.buf.len() > self.max_line_len {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "command line too long"));
            }
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse a raw line into a command record: first token is the tag, second
/// the verb (uppercased), the rest the arguments.
pub fn parse_command(line: &str) -> CommandLine {
    let mut tokens = tokenize(line).into_iter();
    let tag = tokens.next();
    let verb = tokens.next().map(|v| v.to_ascii_uppercase()).unwrap_or_default();
    let args: Vec<String> = tokens.collect();
    CommandLine { tag, verb, args }
}

/// Split a command line into tokens: atoms on whitespace, double-quoted
/// strings with `\"` and `\\` escapes (quotes stripped), and parenthesized
/// lists kept whole with the parentheses preserved.
fn tokenize(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == ' ' {
            i += 1;
            continue;
        }
        if chars[i] == '"' {
            let mut token = String::new();
            i += 1;
            while i < chars.len() {
                match chars[i] {
                    '\\' if i + 1 < chars.len() => {
                        token.push(chars[i + 1]);
                        i += 2;
                    }
                    '"' => {
                        i += 1;
                        break;
                    }
                    c => {
                        token.push(c);
                        i += 1;
                    }
                }
            }
            tokens.push(token);
            continue;
        }
        if chars[i] == '(' {
            let mut token = String::new();
            let mut depth = 0;
            while i < chars.len() {
                match chars[i] {
                    '(' => depth += 1,
                    ')' => depth -= 1,
                    _ => {}
                }
                token.push(chars[i]);
                i += 1;
                if depth == 0 {
                    break;
                }
            }
            tokens.push(token);
            continue;
        }
        let mut token = String::new();
        while i < chars.len() && chars[i] != ' ' {
            token.push(chars[i]);
            i += 1;
        }
        tokens.push(token);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tag_verb_and_args() {
        let cmd = parse_command("a1 select INBOX");
        assert_eq!(cmd.tag.as_deref(), Some("a1"));
        assert_eq!(cmd.verb, "SELECT");
        assert_eq!(cmd.args, vec!["INBOX"]);
    }

    #[test]
    fn bare_tag_has_empty_verb() {
        let cmd = parse_command("a1");
        assert_eq!(cmd.tag.as_deref(), Some("a1"));
        assert_eq!(cmd.verb, "");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn empty_line_has_no_tag() {
        let cmd = parse_command("");
        assert_eq!(cmd.tag, None);
        assert_eq!(cmd.verb, "");
    }

    #[test]
    fn quoted_arguments_keep_spaces_and_escapes() {
        let cmd = parse_command(r#"a1 LOGIN "al ice" "p\"w\\d""#);
        assert_eq!(cmd.args, vec!["al ice", r#"p"w\d"#]);
    }

    #[test]
    fn parenthesized_list_is_one_argument() {
        let cmd = parse_command("a1 FETCH 1:2 (FLAGS BODY[HEADER])");
        assert_eq!(cmd.args, vec!["1:2", "(FLAGS BODY[HEADER])"]);
    }

    #[test]
    fn nested_lists_stay_whole() {
        let cmd = parse_command("a1 FETCH 1 (BODY (HEADER TEXT))");
        assert_eq!(cmd.args, vec!["1", "(BODY (HEADER TEXT))"]);
    }

    #[tokio::test]
    async fn reads_crlf_lines_and_signals_end() {
        let input: &[u8] = b"a1 NOOP\r\na2 LOGOUT\r\n";
        let mut decoder = LineDecoder::new(input, 1024);
        assert_eq!(decoder.next_line().await.unwrap().as_deref(), Some("a1 NOOP"));
        assert_eq!(decoder.next_line().await.unwrap().as_deref(), Some("a2 LOGOUT"));
        assert_eq!(decoder.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn partial_trailing_line_is_discarded() {
        let input: &[u8] = b"a1 NOOP\r\na2 LOGO";
        let mut decoder = LineDecoder::new(input, 1024);
        assert_eq!(decoder.next_line().await.unwrap().as_deref(), Some("a1 NOOP"));
        assert_eq!(decoder.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn overlong_line_is_a_transport_fault() {
        let big = vec![b'x'; 64];
        let mut decoder = LineDecoder::new(big.as_slice(), 16);
        let err = decoder.next_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn lf_without_cr_is_not_a_terminator() {
        let input: &[u8] = b"a1 NOOP\na2 NOOP\r\n";
        let mut decoder = LineDecoder::new(input, 1024);
        assert_eq!(
            decoder.next_line().await.unwrap().as_deref(),
            Some("a1 NOOP\na2 NOOP")
        );
    }
}
