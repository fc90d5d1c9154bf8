const RESULT_PREFIX: &str = "RESULT:";

/// Seconds reported by a benchmark script via `RESULT:<id>:<number>`.
///
/// Prefers a line carrying `benchmark_id`; otherwise falls back to the first result line with
/// any id. `None` means the caller should use the measured wall-clock time instead.
pub fn parse_result(output: &str, benchmark_id: &str) -> Option<f64> {
    let mut fallback = None;
    for line in output.lines() {
        let Some((id, seconds)) = parse_result_line(line) else {
            continue;
        };
        if id == benchmark_id {
            return Some(seconds);
        }
        if fallback.is_none() {
            fallback = Some(seconds);
        }
    }
    fallback
}

fn parse_result_line(line: &str) -> Option<(&str, f64)> {
    let start = line.find(RESULT_PREFIX)?;
    let rest = &line[start + RESULT_PREFIX.len()..];
    let (id, tail) = rest.split_once(':')?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
        return None;
    }
    let number = leading_decimal(tail)?;
    let seconds = number.parse::<f64>().ok()?;
    seconds.is_finite().then_some((id, seconds))
}

/// Longest `[0-9]+(\.[0-9]*)?` or `\.[0-9]+` prefix of `text`.
fn leading_decimal(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return None;
    }
    Some(text[..end].trim_end_matches('.'))
}
