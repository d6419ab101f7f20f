/*
 * util.rs
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

//! Small protocol helpers shared by the engine and plugins: the LOGIN to
//! AUTHENTICATE PLAIN rewrite and the LIST wildcard matcher.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Rewrite a LOGIN user/password pair into the equivalent AUTHENTICATE
/// arguments: mechanism "PLAIN" plus a base64 initial response encoding
/// `\0<user>\0<password>`.
pub fn login_to_auth_plain(user: &str, pass: &str) -> (String, String) {
    let saslir = format!("\0{}\0{}", user, pass);
    ("PLAIN".to_string(), STANDARD.encode(saslir.as_bytes()))
}

/// Match a mailbox name against a LIST pattern. `*` matches any sequence
/// including the hierarchy delimiter, `%` matches any sequence that does not
/// cross the delimiter; everything else matches literally.
pub fn list_matches(pattern: &str, delimiter: char, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    match_at(&p, &n, delimiter)
}

fn match_at(p: &[char], n: &[char], delimiter: char) -> bool {
    match p.first() {
        None => n.is_empty(),
        Some('*') => (0..=n.len()).any(|i| match_at(&p[1..], &n[i..], delimiter)),
        Some('%') => {
            for i in 0..=n.len() {
                if match_at(&p[1..], &n[i..], delimiter) {
                    return true;
                }
                // % stops at the delimiter
                if i < n.len() && n[i] == delimiter {
                    return false;
                }
            }
            false
        }
        Some(c) => n.first() == Some(c) && match_at(&p[1..], &n[1..], delimiter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_rewrite_encodes_nul_separated_credentials() {
        let (mechanism, initial) = login_to_auth_plain("alice", "secret");
        assert_eq!(mechanism, "PLAIN");
        assert_eq!(initial, "AGFsaWNlAHNlY3JldA==");
    }

    #[test]
    fn login_rewrite_roundtrips() {
        let (_, initial) = login_to_auth_plain("u", "p");
        let decoded = STANDARD.decode(initial).unwrap();
        assert_eq!(decoded, b"\0u\0p");
    }

    #[test]
    fn star_crosses_delimiter() {
        assert!(list_matches("*", '.', "INBOX"));
        assert!(list_matches("*", '.', "INBOX.Sent.2025"));
        assert!(list_matches("INBOX.*", '.', "INBOX.Sent.2025"));
        assert!(!list_matches("INBOX.*", '.', "Archive"));
    }

    #[test]
    fn percent_stops_at_delimiter() {
        assert!(list_matches("%", '.', "INBOX"));
        assert!(!list_matches("%", '.', "INBOX.Sent"));
        assert!(list_matches("INBOX.%", '.', "INBOX.Sent"));
        assert!(!list_matches("INBOX.%", '.', "INBOX.Sent.2025"));
    }

    #[test]
    fn literal_characters_match_exactly() {
        assert!(list_matches("INBOX", '.', "INBOX"));
        assert!(!list_matches("INBOX", '.', "inbox"));
        assert!(!list_matches("INBOX", '.', "INBOX.Sent"));
    }

    #[test]
    fn mixed_wildcards() {
        assert!(list_matches("%.Sent", '.', "INBOX.Sent"));
        assert!(!list_matches("%.Sent", '.', "a.b.Sent"));
        assert!(list_matches("*.Sent", '.', "a.b.Sent"));
    }
}
