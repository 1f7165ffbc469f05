const SNIP: &str = "\n*** <snip> ***\n";

/// Keeps the first and last `max_len / 2` characters of an over-long text.
pub fn snip_middle(s: &str, max_len: usize) -> String {
    let len = s.chars().count();
    if len <= max_len {
        return s.to_owned();
    }
    let half = max_len / 2;
    let head: String = s.chars().take(half).collect();
    let tail: String = s.chars().skip(len - half).collect();
    format!("{}{}{}", head, SNIP, tail)
}

/// Replaces control characters other than newline with visible escapes:
/// `\t`, `\r`, or a three-digit octal escape.
pub fn escape_controls(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push('\n'),
            '\t' => out += "\\t",
            '\r' => out += "\\r",
            c if (c as u32) < 0x20 => out += &format!("\\{:03o}", c as u32),
            c => out.push(c),
        }
    }
    out
}

/// Text as stored in a result table cell: shortened in the middle, trailing
/// whitespace stripped from every line and control characters escaped.
pub fn sanitize(s: &str, max_len: usize) -> String {
    let snipped = snip_middle(s, max_len);
    let lines = snipped
        .trim_end()
        .split('\n')
        .map(|line| escape_controls(line.trim_end_matches(|c: char| c == ' ' || c == '\t' || c == '\r')))
        .collect::<Vec<_>>();
    lines.join("\n").trim_end().to_owned()
}
