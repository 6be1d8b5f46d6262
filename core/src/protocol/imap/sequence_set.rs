/*
 * sequence_set.rs
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

//! UID set grammar: `a`, `a,b,c`, `a:b`, `a:*`. `*` stands for the maximum UID
//! currently present.

use std::collections::BTreeSet;

/// Parse a UID set against `present` (the folder's current UIDs, any order),
/// returning the members of `present` the set actually selects.
pub fn parse_uid_set(input: &str, present: &[u64]) -> BTreeSet<u64> {
    let max = present.iter().copied().max().unwrap_or(0);
    let known: BTreeSet<u64> = present.iter().copied().collect();
    let mut out = BTreeSet::new();
    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once(':') {
            Some((a, b)) => {
                let lo = resolve_endpoint(a, max);
                let hi = resolve_endpoint(b, max);
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                for uid in lo..=hi {
                    if known.contains(&uid) {
                        out.insert(uid);
                    }
                }
            }
            None => {
                let uid = resolve_endpoint(part, max);
                if known.contains(&uid) {
                    out.insert(uid);
                }
            }
        }
    }
    out
}

fn resolve_endpoint(token: &str, max: u64) -> u64 {
    if token == "*" {
        max
    } else {
        token.parse().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_uid_selects_itself() {
        let present = [1, 2, 5];
        assert_eq!(parse_uid_set("2", &present), BTreeSet::from([2]));
    }

    #[test]
    fn comma_list_selects_each_member() {
        let present = [1, 2, 5];
        assert_eq!(parse_uid_set("1,5", &present), BTreeSet::from([1, 5]));
    }

    #[test]
    fn range_selects_every_present_uid_inside_bounds() {
        let present = [1, 2, 5];
        assert_eq!(parse_uid_set("1:5", &present), BTreeSet::from([1, 2, 5]));
    }

    #[test]
    fn star_resolves_to_max_present_uid() {
        let present = [1, 2, 5];
        assert_eq!(parse_uid_set("1:*", &present), BTreeSet::from([1, 2, 5]));
        assert_eq!(parse_uid_set("*", &present), BTreeSet::from([5]));
    }

    #[test]
    fn absent_uids_are_never_included() {
        let present = [1, 5];
        assert_eq!(parse_uid_set("1:5", &present), BTreeSet::from([1, 5]));
    }
}
