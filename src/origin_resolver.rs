/*
 * Copyright (C) 2025 Jakub Žitník
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 */

//! Decides which upstream origin(s) to try for an incoming request, and
//! mutates the client's remembered-origin list once dispatch completes.

use crate::model::{Candidate, Origin, OriginList};

pub struct Resolution {
    pub candidates: Vec<Candidate>,
    pub upstream_path: String,
}

/// Resolve candidates for `path_and_query` given the decoded `proxyTargets`
/// list and the configured fallback origin.
pub fn resolve(path_and_query: &str, list: &OriginList, fallback: &Origin) -> Resolution {
    if let Some((origin, rest)) = parse_absolute_in_path(path_and_query) {
        return Resolution {
            candidates: vec![Candidate {
                origin,
                list_index: None,
            }],
            upstream_path: rest,
        };
    }

    if !list.is_empty() {
        let mut seen = std::collections::HashSet::new();
        let candidates: Vec<Candidate> = list
            .iter()
            .filter(|(_, origin)| seen.insert((*origin).clone()))
            .map(|(idx, origin)| Candidate {
                origin: origin.clone(),
                list_index: Some(idx),
            })
            .collect();
        return Resolution {
            candidates,
            upstream_path: path_and_query.to_string(),
        };
    }

    Resolution {
        candidates: vec![Candidate {
            origin: fallback.clone(),
            list_index: None,
        }],
        upstream_path: "/".to_string(),
    }
}

/// Recognise `/http.<host>[:port]/<rest>` and `/https.<host>[:port]/<rest>`.
fn parse_absolute_in_path(path_and_query: &str) -> Option<(Origin, String)> {
    let trimmed = path_and_query.strip_prefix('/')?;
    let (first_segment, rest) = match trimmed.split_once('/') {
        Some((seg, rest)) => (seg, rest),
        None => (trimmed, ""),
    };

    let (scheme, host_part) = if let Some(host) = first_segment.strip_prefix("http.") {
        ("http", host)
    } else if let Some(host) = first_segment.strip_prefix("https.") {
        ("https", host)
    } else {
        return None;
    };

    if host_part.is_empty() {
        return None;
    }

    let origin = Origin::new(format!("{scheme}://{host_part}"));
    let upstream_path = if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{rest}")
    };
    Some((origin, upstream_path))
}

/// Outcome of a completed dispatch, used to mutate the origin list.
pub struct DispatchOutcome {
    pub chosen: Candidate,
    pub status_is_2xx: bool,
    pub is_get_html: bool,
}

/// Apply the list-mutation rules from the resolver's contract and return
/// the list that should be serialised into the outgoing `Set-Cookie`.
pub fn apply_mutation(mut list: OriginList, outcome: &DispatchOutcome) -> OriginList {
    if let Some(k) = outcome.chosen.list_index {
        if k > 0 && outcome.status_is_2xx {
            list.truncate_to(k);
        }
    }

    if outcome.status_is_2xx
        && outcome.is_get_html
        && outcome.chosen.list_index.is_none()
        && list.head() != Some(&outcome.chosen.origin)
    {
        list.prepend(outcome.chosen.origin.clone());
    }

    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(origins: &[&str]) -> OriginList {
        let json = serde_json::to_string(origins).unwrap();
        OriginList::decode(Some(&json))
    }

    #[test]
    fn absolute_in_path_takes_priority() {
        let list = list_of(&["https://cookie.example"]);
        let fallback = Origin::new("https://fallback.example");
        let res = resolve("/https.www.example.com/x?y=1", &list, &fallback);
        assert_eq!(res.candidates.len(), 1);
        assert_eq!(res.candidates[0].origin.as_str(), "https://www.example.com");
        assert_eq!(res.candidates[0].list_index, None);
        assert_eq!(res.upstream_path, "/x?y=1");
    }

    #[test]
    fn absolute_in_path_root_only() {
        let list = OriginList::empty();
        let fallback = Origin::new("https://fallback.example");
        let res = resolve("/http.example.com", &list, &fallback);
        assert_eq!(res.upstream_path, "/");
    }

    #[test]
    fn cookie_list_used_when_no_absolute_path() {
        let list = list_of(&["https://a.example", "https://b.example"]);
        let fallback = Origin::new("https://fallback.example");
        let res = resolve("/", &list, &fallback);
        assert_eq!(res.candidates.len(), 2);
        assert_eq!(res.candidates[0].list_index, Some(0));
        assert_eq!(res.candidates[1].list_index, Some(1));
        assert_eq!(res.upstream_path, "/");
    }

    #[test]
    fn cookie_list_skips_duplicates() {
        let list = list_of(&["https://a.example", "https://a.example", "https://b.example"]);
        let fallback = Origin::new("https://fallback.example");
        let res = resolve("/", &list, &fallback);
        assert_eq!(res.candidates.len(), 2);
    }

    #[test]
    fn falls_back_when_list_empty() {
        let list = OriginList::empty();
        let fallback = Origin::new("https://fallback.example");
        let res = resolve("/", &list, &fallback);
        assert_eq!(res.candidates.len(), 1);
        assert_eq!(res.candidates[0].origin, fallback);
        assert_eq!(res.candidates[0].list_index, None);
        assert_eq!(res.upstream_path, "/");
    }

    #[test]
    fn mutation_truncates_on_promoted_success() {
        let list = list_of(&["https://a.example", "https://b.example", "https://c.example"]);
        let outcome = DispatchOutcome {
            chosen: Candidate {
                origin: Origin::new("https://b.example"),
                list_index: Some(1),
            },
            status_is_2xx: true,
            is_get_html: false,
        };
        let mutated = apply_mutation(list, &outcome);
        assert_eq!(
            mutated.encode(),
            r#"["https://b.example","https://c.example"]"#
        );
    }

    #[test]
    fn mutation_prepends_new_origin_on_html_success() {
        let list = list_of(&["https://a.example"]);
        let outcome = DispatchOutcome {
            chosen: Candidate {
                origin: Origin::new("https://new.example"),
                list_index: None,
            },
            status_is_2xx: true,
            is_get_html: true,
        };
        let mutated = apply_mutation(list, &outcome);
        assert_eq!(
            mutated.encode(),
            r#"["https://new.example","https://a.example"]"#
        );
    }

    #[test]
    fn mutation_leaves_list_alone_on_failure() {
        let list = list_of(&["https://a.example", "https://b.example"]);
        let outcome = DispatchOutcome {
            chosen: Candidate {
                origin: Origin::new("https://b.example"),
                list_index: Some(1),
            },
            status_is_2xx: false,
            is_get_html: false,
        };
        let mutated = apply_mutation(list, &outcome);
        assert_eq!(
            mutated.encode(),
            r#"["https://a.example","https://b.example"]"#
        );
    }
}
