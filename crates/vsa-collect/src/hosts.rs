//! pdsh-style host list expansion, e.g. `cc[1-3,7]-p,v[1,3]-p`.

use crate::CollectError;
use std::collections::BTreeSet;

/// Expands a host expression into individual host names, keeping the order
/// of first appearance and dropping duplicates.
pub fn expand_hosts(expr: &str) -> Result<Vec<String>, CollectError> {
    let mut hosts = Vec::new();
    let mut seen = BTreeSet::new();

    for term in split_top_level(expr)? {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        for host in expand_term(expr, term)? {
            if seen.insert(host.clone()) {
                hosts.push(host);
            }
        }
    }

    Ok(hosts)
}

fn split_top_level(expr: &str) -> Result<Vec<&str>, CollectError> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (index, ch) in expr.char_indices() {
        match ch {
            '[' => {
                if depth > 0 {
                    return Err(invalid(expr, "nested brackets"));
                }
                depth += 1;
            }
            ']' => {
                if depth == 0 {
                    return Err(invalid(expr, "unbalanced ']'"));
                }
                depth -= 1;
            }
            ',' if depth == 0 => {
                terms.push(&expr[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(invalid(expr, "unbalanced '['"));
    }
    terms.push(&expr[start..]);
    Ok(terms)
}

fn expand_term(expr: &str, term: &str) -> Result<Vec<String>, CollectError> {
    let Some(open) = term.find('[') else {
        return Ok(vec![term.to_string()]);
    };
    let close = term[open..]
        .find(']')
        .map(|offset| open + offset)
        .ok_or_else(|| invalid(expr, "unbalanced '['"))?;

    let prefix = &term[..open];
    let body = &term[open + 1..close];
    let suffixes = expand_term(expr, &term[close + 1..])?;

    let mut hosts = Vec::new();
    for value in expand_range_body(expr, body)? {
        for suffix in &suffixes {
            hosts.push(format!("{prefix}{value}{suffix}"));
        }
    }
    Ok(hosts)
}

fn expand_range_body(expr: &str, body: &str) -> Result<Vec<String>, CollectError> {
    let mut values = Vec::new();

    for part in body.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(invalid(expr, "empty range element"));
        }

        let Some((low, high)) = part.split_once('-') else {
            parse_number(expr, part)?;
            values.push(part.to_string());
            continue;
        };

        let start = parse_number(expr, low)?;
        let end = parse_number(expr, high)?;
        if start > end {
            return Err(invalid(expr, &format!("reversed range {part}")));
        }
        let width = if low.len() > 1 && low.starts_with('0') {
            low.len()
        } else {
            0
        };
        for value in start..=end {
            values.push(format!("{value:0width$}"));
        }
    }

    Ok(values)
}

fn parse_number(expr: &str, value: &str) -> Result<u64, CollectError> {
    if value.is_empty() || !value.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(invalid(expr, &format!("non-numeric range value {value:?}")));
    }
    value
        .parse::<u64>()
        .map_err(|err| invalid(expr, &err.to_string()))
}

fn invalid(expr: &str, reason: &str) -> CollectError {
    CollectError::HostExpression {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}
