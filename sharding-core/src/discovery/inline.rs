//! Inline expressions for actual data nodes: `ds_${0..1}.t_order_${0..2}`,
//! `ds_${['a', 'b']}.t_user`, comma separated segments.

use sharding_common::common::{Error, Result};

pub fn expand(expression: &str) -> Result<Vec<String>> {
    let mut result = vec![];
    for segment in split_segments(expression)? {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        result.extend(expand_segment(segment)?);
    }
    Ok(result)
}

/// Splits on commas that are not inside `${...}`.
fn split_segments(expression: &str) -> Result<Vec<&str>> {
    let mut segments = vec![];
    let mut depth = 0i32;
    let mut begin = 0;
    for (i, c) in expression.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => {
                segments.push(&expression[begin..i]);
                begin = i + 1;
            }
            _ => {}
        }
        if depth < 0 {
            return Err(Error::Configuration(format!("unbalanced inline expression: {}", expression)));
        }
    }
    if depth != 0 {
        return Err(Error::Configuration(format!("unbalanced inline expression: {}", expression)));
    }
    segments.push(&expression[begin..]);
    Ok(segments)
}

fn expand_segment(segment: &str) -> Result<Vec<String>> {
    let (prefix, rest) = match find_placeholder(segment) {
        Some((start, body_start)) => (&segment[..start], &segment[body_start..]),
        None => return Ok(vec![segment.to_string()]),
    };
    let close = rest
        .find('}')
        .ok_or_else(|| Error::Configuration(format!("unclosed inline expression: {}", segment)))?;
    let values = expand_placeholder(rest[..close].trim())?;
    let tails = expand_segment(&rest[close + 1..])?;
    let mut result = Vec::with_capacity(values.len() * tails.len());
    for value in &values {
        for tail in &tails {
            result.push(format!("{}{}{}", prefix, value, tail));
        }
    }
    Ok(result)
}

/// Start of `${` or `$->{` and the start of its body.
fn find_placeholder(segment: &str) -> Option<(usize, usize)> {
    let dollar = segment.find("${");
    let arrow = segment.find("$->{");
    match (dollar, arrow) {
        (Some(d), Some(a)) if a < d => Some((a, a + 4)),
        (Some(d), _) => Some((d, d + 2)),
        (None, Some(a)) => Some((a, a + 4)),
        (None, None) => None,
    }
}

fn expand_placeholder(body: &str) -> Result<Vec<String>> {
    if body.starts_with('[') && body.ends_with(']') {
        return Ok(body[1..body.len() - 1]
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .filter(|item| !item.is_empty())
            .collect());
    }
    if let Some(pos) = body.find("..") {
        let lower = body[..pos].trim();
        let upper = body[pos + 2..].trim();
        let width = if lower.len() > 1 && lower.starts_with('0') { lower.len() } else { 0 };
        let (lower, upper) = match (lower.parse::<i64>(), upper.parse::<i64>()) {
            (Ok(l), Ok(u)) if l <= u => (l, u),
            _ => return Err(Error::Configuration(format!("invalid inline range: {}", body))),
        };
        return Ok((lower..=upper).map(|i| format!("{:0width$}", i, width = width)).collect());
    }
    Ok(vec![body.to_string()])
}

#[cfg(test)]
mod tests {
    use crate::discovery::inline::expand;

    #[test]
    fn test_expand_cartesian() {
        let nodes = expand("ds_${0..1}.t_order_${0..1}").unwrap();
        assert_eq!(vec!["ds_0.t_order_0", "ds_0.t_order_1", "ds_1.t_order_0", "ds_1.t_order_1"], nodes);
    }

    #[test]
    fn test_expand_list_and_segments() {
        let nodes = expand("ds_${['a', 'b']}.t_user, ds_c.t_user_$->{0..1}").unwrap();
        assert_eq!(vec!["ds_a.t_user", "ds_b.t_user", "ds_c.t_user_0", "ds_c.t_user_1"], nodes);
        assert_eq!(vec!["t_00", "t_01"], expand("t_${00..01}").unwrap());
        assert_eq!(vec!["ds.t"], expand("ds.t").unwrap());
    }

    #[test]
    fn test_expand_invalid() {
        assert!(expand("ds_${0..1.t").is_err());
        assert!(expand("ds_${3..1}.t").is_err());
    }
}
