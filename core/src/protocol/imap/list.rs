/*
 * list.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Portolano, a multi-protocol mail server.
 *
 * Portolano is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Portolano is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Portolano.  If not, see <http://www.gnu.org/licenses/>.
 */

//! LIST/LSUB pattern matching: `*` matches any run of characters, `%` matches
//! any run not containing the hierarchy delimiter `/`.

pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    match_rec(name.as_bytes(), pattern.as_bytes())
}

fn match_rec(name: &[u8], pat: &[u8]) -> bool {
    if pat.is_empty() {
        return name.is_empty();
    }
    match pat[0] {
        b'*' => (0..=name.len()).any(|i| match_rec(&name[i..], &pat[1..])),
        b'%' => (0..=name.len())
            .take_while(|&i| !name[..i].contains(&b'/'))
            .any(|i| match_rec(&name[i..], &pat[1..])),
        c => !name.is_empty() && name[0] == c && match_rec(&name[1..], &pat[1..]),
    }
}

/// True if `folders` (the full folder-name set) contains any direct or
/// indirect child of `name`.
pub fn has_children(folders: &[String], name: &str) -> bool {
    let prefix = format!("{}/", name);
    folders.iter().any(|f| f.starts_with(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run_including_delimiter() {
        assert!(matches_pattern("Work/Projects", "*"));
        assert!(matches_pattern("Work/Projects", "Work/*"));
        assert!(!matches_pattern("Archive", "Work/*"));
    }

    #[test]
    fn percent_does_not_cross_delimiter() {
        assert!(matches_pattern("Work", "%"));
        assert!(!matches_pattern("Work/Projects", "%"));
        assert!(matches_pattern("Work/Projects", "Work/%"));
    }

    #[test]
    fn literal_pattern_matches_exactly() {
        assert!(matches_pattern("INBOX", "INBOX"));
        assert!(!matches_pattern("INBOX", "inbox"));
    }

    #[test]
    fn has_children_detects_nested_folder() {
        let folders = vec!["INBOX".to_string(), "Work".to_string(), "Work/Projects".to_string()];
        assert!(has_children(&folders, "Work"));
        assert!(!has_children(&folders, "INBOX"));
    }
}
