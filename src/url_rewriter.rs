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

//! Hand-written scanner that finds absolute (and protocol-relative) URLs
//! inside a text payload and rewrites them to route back through the proxy.
//!
//! This intentionally is not a regex: the delimiter can appear in three
//! textual forms inside HTML/JS source (`/`, the JSON/JS backslash escape
//! `\/`, and the unicode escape `/`), and the grammar needs lookbehind
//! rejections a plain regex engine makes awkward. A scanner keeps each case
//! explicit.

/// Content-type substrings the rewriter applies to. Anything else passes
/// through byte-for-byte.
const TEXTUAL_CONTENT_TYPES: &[&str] = &[
    "html",
    "css",
    "scss",
    "svg",
    "javascript",
    "json",
    "text",
];

pub fn is_textual_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    TEXTUAL_CONTENT_TYPES.iter().any(|t| lower.contains(t))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelimForm {
    Slash,
    BackslashSlash,
    UnicodeEscape,
}

impl DelimForm {
    fn len(self) -> usize {
        match self {
            DelimForm::Slash => 1,
            DelimForm::BackslashSlash => 2,
            DelimForm::UnicodeEscape => 6,
        }
    }
}

/// Try to match a delimiter literal starting at byte offset `i`, preferring
/// the longest form so `/` and `\/` are recognised before falling back
/// to a bare `/`.
fn match_delimiter(bytes: &[u8], i: usize) -> Option<DelimForm> {
    if i >= bytes.len() {
        return None;
    }
    if bytes[i..].len() >= 6 {
        let slice = &bytes[i..i + 6];
        if slice[0] == b'\\'
            && (slice[1] == b'u' || slice[1] == b'U')
            && slice[2] == b'0'
            && slice[3] == b'0'
            && slice[4] == b'2'
            && (slice[5] == b'f' || slice[5] == b'F')
        {
            return Some(DelimForm::UnicodeEscape);
        }
    }
    if bytes[i..].len() >= 2 && bytes[i] == b'\\' && bytes[i + 1] == b'/' {
        return Some(DelimForm::BackslashSlash);
    }
    if bytes[i] == b'/' {
        // A bare slash immediately preceded by a backslash is really the
        // second half of a `\/` escape one position earlier; don't treat it
        // as a fresh delimiter occurrence (the `\` + `/` rejection rule).
        if i > 0 && bytes[i - 1] == b'\\' {
            return None;
        }
        return Some(DelimForm::Slash);
    }
    None
}

const HOST_STOP: &[u8] = b":/\\?# \t\r\n\"'`<>";
const USERINFO_STOP: &[u8] = b"/\\?# \t\r\n\"'`<>";
const TAIL_STOP: &[u8] = b" \t\r\n\"'`<>";

fn is_host_char(b: u8) -> bool {
    !HOST_STOP.contains(&b)
}

fn is_userinfo_char(b: u8) -> bool {
    !USERINFO_STOP.contains(&b)
}

fn is_tail_char(b: u8) -> bool {
    !TAIL_STOP.contains(&b)
}

struct Match {
    start: usize,
    end: usize,
    had_scheme: bool,
    proto_wire: &'static str,
    delim: DelimForm,
    userinfo: Option<String>,
    host_port: String,
    tail: String,
}

fn looks_like_xmlns(text: &[u8], pos: usize) -> bool {
    let window_start = pos.saturating_sub(12);
    let window = &text[window_start..pos];
    let window = String::from_utf8_lossy(window);
    let lower = window.to_ascii_lowercase();
    lower.ends_with("xmlns=\"") || lower.ends_with("xmlns='") || lower.ends_with("xmlns=")
}

fn scheme_before(text: &[u8], pos: usize) -> Option<(usize, &'static str)> {
    for (needle, wire) in [("https:", "https"), ("http:", "http")] {
        let nlen = needle.len();
        if pos < nlen {
            continue;
        }
        let candidate = &text[pos - nlen..pos];
        if candidate.eq_ignore_ascii_case(needle.as_bytes()) {
            // Reject if the scheme token is itself glued onto a preceding
            // identifier character, e.g. the tail end of `xhttp://`.
            let before = pos.checked_sub(nlen + 1);
            if let Some(bi) = before {
                let c = text[bi];
                if c.is_ascii_alphanumeric() || c == b'_' {
                    continue;
                }
            }
            return Some((pos - nlen, wire));
        }
    }
    None
}

/// Attempt a full URL match with the doubled delimiter starting at `i`.
fn try_match_at(text: &[u8], i: usize) -> Option<Match> {
    let first = match_delimiter(text, i)?;
    let second_start = i + first.len();
    if second_start >= text.len() {
        return None;
    }
    let second = match_delimiter(text, second_start)?;
    if second != first {
        return None;
    }
    let delim = first;
    let delim_pair_start = i;

    if looks_like_xmlns(text, delim_pair_start) {
        return None;
    }

    let (match_start, had_scheme, proto_wire) = match scheme_before(text, delim_pair_start) {
        Some((scheme_start, wire)) => (scheme_start, true, wire),
        None => (delim_pair_start, false, "http"),
    };

    let authority_start = second_start + second.len();
    if authority_start >= text.len() {
        return None;
    }

    // Userinfo is only legal in front of a regname/IPv4 host (a bracketed
    // IPv6/IPvFuture literal can't follow one lexically in this grammar, so
    // we only look for `user:pass@` when the authority doesn't open with
    // `[`). Scan forward for the first unescaped `@` that precedes a host
    // terminator; if none is found before a terminator, there is no
    // userinfo.
    let (userinfo, host_raw_start) = if text.get(authority_start) != Some(&b'[') {
        let mut p = authority_start;
        while p < text.len() && text[p] != b'@' && is_userinfo_char(text[p]) {
            p += 1;
        }
        if p < text.len() && text[p] == b'@' {
            let ui = std::str::from_utf8(&text[authority_start..=p]).ok()?.to_string();
            (Some(ui), p + 1)
        } else {
            (None, authority_start)
        }
    } else {
        (None, authority_start)
    };

    let mut j = host_raw_start;

    // Bracketed IPv6 / IPvFuture host.
    let (host_end, bracketed) = if text.get(j) == Some(&b'[') {
        let close = text[j..].iter().position(|&b| b == b']')?;
        let end = j + close + 1;
        let inner = std::str::from_utf8(&text[j + 1..j + close]).ok()?;
        if !(validate_ipv6(inner) || validate_ipv_future(inner)) {
            return None;
        }
        (end, true)
    } else {
        let start = j;
        while j < text.len() && is_host_char(text[j]) {
            j += 1;
        }
        if j == start {
            return None;
        }
        (j, false)
    };

    let host_text = std::str::from_utf8(&text[host_raw_start..host_end]).ok()?;
    if !bracketed && !validate_regname_or_ipv4(host_text) {
        return None;
    }

    // Optional port.
    let mut k = host_end;
    if text.get(k) == Some(&b':') {
        let digit_start = k + 1;
        let mut d = digit_start;
        while d < text.len() && text[d].is_ascii_digit() {
            d += 1;
        }
        if d > digit_start {
            k = d;
        } else if !bracketed {
            // A colon that isn't followed by digits can't be a port, and a
            // non-bracketed host can't otherwise contain one: the grammar
            // doesn't describe what follows, so the match fails here rather
            // than silently swallowing the colon into the tail.
            return None;
        }
    }

    // path? query? fragment? — free-form tail, copied through unchanged.
    let tail_start = k;
    let mut t = tail_start;
    while t < text.len() && is_tail_char(text[t]) {
        t += 1;
    }
    let tail = std::str::from_utf8(&text[tail_start..t]).ok()?.to_string();

    let host_port = std::str::from_utf8(&text[host_raw_start..k])
        .ok()?
        .to_string();

    Some(Match {
        start: match_start,
        end: t,
        had_scheme,
        proto_wire,
        delim,
        userinfo,
        host_port,
        tail,
    })
}

fn validate_regname_or_ipv4(s: &str) -> bool {
    // Host characters already filtered by `is_host_char`; reject anything
    // that slipped in unescaped control characters via a stray high bit.
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_graphic())
}

fn validate_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| {
        !p.is_empty()
            && p.len() <= 3
            && p.chars().all(|c| c.is_ascii_digit())
            && p.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
    })
}

/// Validate the content of an IPv6 literal (without the surrounding
/// brackets) per RFC 4291, including the mixed IPv4-tail form.
fn validate_ipv6(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if s.matches("::").count() > 1 {
        return false;
    }
    let has_double = s.contains("::");
    let (head, tail) = match s.find("::") {
        Some(idx) => (&s[..idx], &s[idx + 2..]),
        None => (s, ""),
    };

    if !has_double && (s.starts_with(':') || s.ends_with(':')) {
        return false;
    }
    if has_double && (head.ends_with(':') || tail.starts_with(':')) {
        return false;
    }

    let head_parts: Vec<&str> = if head.is_empty() {
        Vec::new()
    } else {
        head.split(':').collect()
    };
    let tail_parts: Vec<&str> = if tail.is_empty() {
        Vec::new()
    } else {
        tail.split(':').collect()
    };

    if head_parts.iter().any(|p| p.is_empty()) || tail_parts.iter().any(|p| p.is_empty()) {
        return false;
    }

    let mut parts: Vec<&str> = head_parts;
    parts.extend(tail_parts);

    if parts.is_empty() && !has_double {
        return false;
    }

    let mut slots = 0usize;
    for (idx, part) in parts.iter().enumerate() {
        let is_last = idx == parts.len() - 1;
        if is_last && part.contains('.') {
            if !validate_ipv4(part) {
                return false;
            }
            slots += 2;
        } else {
            if part.is_empty() || part.len() > 4 {
                return false;
            }
            if !part.chars().all(|c| c.is_ascii_hexdigit()) {
                return false;
            }
            slots += 1;
        }
    }

    if has_double {
        slots < 8
    } else {
        slots == 8
    }
}

fn validate_ipv_future(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == 'v' || c == 'V' => {}
        _ => return false,
    }
    let rest: String = chars.collect();
    let Some(dot) = rest.find('.') else {
        return false;
    };
    let (hex, allowed) = rest.split_at(dot);
    let allowed = &allowed[1..];
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    !allowed.is_empty()
        && allowed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-._~!$&'()*+,;=:".contains(c))
}

/// Validate that `url` is, in its entirety, one URL matching the grammar
/// above — used by the dispatcher to reject a composed upstream URL before
/// it is handed to the HTTP client.
pub fn validate_upstream_url(url: &str) -> bool {
    let bytes = url.as_bytes();
    for i in 0..bytes.len() {
        if let Some(m) = try_match_at(bytes, i) {
            return m.start == 0 && m.end == bytes.len();
        }
    }
    false
}

/// Rewrite every absolute/protocol-relative URL in `text` so its authority
/// routes back through `proxy_host`. URLs whose authority already equals
/// `proxy_host` are left untouched, which is what makes the rewriter
/// idempotent on already-proxied text.
pub fn rewrite(text: &str, proxy_host: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;
    let mut last_copied = 0usize;

    while i < bytes.len() {
        if let Some(m) = try_match_at(bytes, i) {
            if m.host_port.eq_ignore_ascii_case(proxy_host) {
                // Already routed through us; leave byte-identical.
                i = m.end.max(i + 1);
                continue;
            }

            out.push_str(&text[last_copied..m.start]);

            let delim_lit = delimiter_literal(text, &m);
            // The delimiter that separates `proxy_host` from the synthesized
            // `proto-wire` segment mirrors whatever delimiter form opens the
            // URL's own tail (its path/query/fragment), not the doubled
            // delimiter that preceded the authority — a `\/\/host/a.js`
            // input round-trips its `/` tail delimiter into that slot
            // even though the doubled delimiter itself was `\/`. Falls back
            // to the doubled delimiter's own form when the tail is empty or
            // doesn't open with a recognised delimiter (authority-only URLs).
            let synth_delim = leading_delimiter_literal(&m.tail).unwrap_or(delim_lit);

            if m.had_scheme {
                out.push_str("http:");
            }
            out.push_str(delim_lit);
            out.push_str(delim_lit);
            out.push_str(proxy_host);
            out.push_str(synth_delim);
            out.push_str(m.proto_wire);
            out.push('.');
            if let Some(ui) = &m.userinfo {
                out.push_str(ui);
            }
            out.push_str(&m.host_port);
            out.push_str(&m.tail);

            last_copied = m.end;
            i = m.end.max(i + 1);
        } else {
            i += 1;
        }
    }

    out.push_str(&text[last_copied..]);
    out
}

/// Recover the exact literal text of the doubled delimiter as it appeared
/// in the source, so escaping is preserved byte-for-byte.
fn delimiter_literal(text: &str, m: &Match) -> &str {
    let delim_start = if m.had_scheme {
        m.start + m.proto_wire.len() + 1
    } else {
        m.start
    };
    &text[delim_start..delim_start + m.delim.len()]
}

/// The literal text of whatever delimiter form opens `tail`, if any.
fn leading_delimiter_literal(tail: &str) -> Option<&str> {
    let form = match_delimiter(tail.as_bytes(), 0)?;
    Some(&tail[0..form.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: &str = "localhost:3000";

    #[test]
    fn rewrites_absolute_https_url() {
        let input = r#"<a href="https://www.example.com/x">"#;
        let out = rewrite(input, PROXY);
        assert_eq!(
            out,
            r#"<a href="http://localhost:3000/https.www.example.com/x">"#
        );
    }

    #[test]
    fn rewrites_protocol_relative_url() {
        let input = r#"src="//cdn.example.com/a.js""#;
        let out = rewrite(input, PROXY);
        assert_eq!(out, r#"src="//localhost:3000/http.cdn.example.com/a.js""#);
    }

    #[test]
    fn backslash_slash_doubled_delimiter_with_plain_slash_tail_mirrors_slash() {
        // The doubled delimiter (`\/`) round-trips verbatim, but the
        // synthesized delimiter before `http.` mirrors the tail's own plain
        // `/`, not the `\/` form of the doubled delimiter that preceded it.
        let input = r#"src="\/\/cdn.example.com/a.js""#;
        let out = rewrite(input, PROXY);
        assert_eq!(
            out,
            r#"src="\/\/localhost:3000/http.cdn.example.com/a.js""#
        );
    }

    #[test]
    fn unicode_escape_delimiter_in_tail_is_mirrored_into_synthesized_slot() {
        // The doubled delimiter preceding the authority is `\/`, but the
        // path separator uses the six-byte unicode escape `/`. The
        // synthesized delimiter between the proxy host and the `http.`
        // segment must carry that same `/` form through, not the `\/`
        // that doubled in front of the authority.
        let input = "src=\"\\/\\/cdn.example.com\\u002fa.js\"";
        let out = rewrite(input, PROXY);
        assert_eq!(
            out,
            "src=\"\\/\\/localhost:3000\\u002fhttp.cdn.example.com\\u002fa.js\""
        );
    }

    #[test]
    fn unicode_escape_delimiter_doubled_before_authority() {
        // Here `/` is itself the *doubled* delimiter preceding the
        // authority (not just the tail's leading separator), and the tail
        // also opens with `/`.
        let input = "href=\"https:\\u002f\\u002fwww.example.com\\u002fx\"";
        let out = rewrite(input, PROXY);
        assert_eq!(
            out,
            "href=\"http:\\u002f\\u002flocalhost:3000\\u002fhttps.www.example.com\\u002fx\""
        );
    }

    #[test]
    fn leaves_xmlns_attribute_untouched() {
        let input = r#"xmlns="http://www.w3.org/2000/svg""#;
        let out = rewrite(input, PROXY);
        assert_eq!(out, input);
    }

    #[test]
    fn idempotent_on_already_proxied_url() {
        let input = r#"<a href="https://www.example.com/x">"#;
        let once = rewrite(input, PROXY);
        let twice = rewrite(&once, PROXY);
        assert_eq!(once, twice);
    }

    #[test]
    fn matches_ipv6_literal_authority() {
        let input = "https://[2001:db8::1]:8443/path";
        let out = rewrite(input, PROXY);
        assert_eq!(out, "http://localhost:3000/https.[2001:db8::1]:8443/path");
    }

    #[test]
    fn matches_ipv4_mapped_ipv6_tail() {
        let input = "https://[::ffff:192.0.2.1]/x";
        let out = rewrite(input, PROXY);
        assert_eq!(out, "http://localhost:3000/https.[::ffff:192.0.2.1]/x");
    }

    #[test]
    fn rejects_ipv6_with_two_double_colons() {
        assert!(!validate_ipv6("1::2::3"));
    }

    #[test]
    fn rejects_ipv6_group_too_long() {
        assert!(!validate_ipv6("12345::1"));
    }

    #[test]
    fn rejects_ipv6_non_hex() {
        assert!(!validate_ipv6("abcg::1"));
    }

    #[test]
    fn rejects_ipv6_too_many_groups() {
        assert!(!validate_ipv6("1:2:3:4:5:6:7:8:9"));
    }

    #[test]
    fn rejects_ipv6_bad_ipv4_tail() {
        assert!(!validate_ipv6("::ffff:999.0.0.1"));
    }

    #[test]
    fn validates_whole_upstream_url() {
        assert!(validate_upstream_url("https://www.example.com/path"));
        assert!(validate_upstream_url("http://example.com"));
    }

    #[test]
    fn rejects_garbage_as_upstream_url() {
        assert!(!validate_upstream_url("not a url at all"));
        assert!(!validate_upstream_url("https://bad host/"));
    }

    #[test]
    fn content_type_matching() {
        assert!(is_textual_content_type("text/html; charset=utf-8"));
        assert!(is_textual_content_type("application/javascript"));
        assert!(!is_textual_content_type("image/png"));
    }

    #[test]
    fn non_textual_passthrough_is_callers_responsibility() {
        // The rewriter itself has no notion of "don't touch"; the body
        // handler gates the call on `is_textual_content_type`.
        assert!(!is_textual_content_type("application/octet-stream"));
    }
}
