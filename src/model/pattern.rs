//! `*` glob matching for names and string filters.

/// Match `text` against `pattern`, where `*` matches any run of characters
/// (including none). All other characters match literally.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Greedy scan with single backtrack point at the last star.
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(wildcard_match("abc", "abc"));
        assert!(!wildcard_match("abc", "abd"));
    }

    #[test]
    fn test_star() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("synth*", "synth.1"));
        assert!(wildcard_match("*.1", "synth.1"));
        assert!(wildcard_match("s*h*1", "synth.1"));
        assert!(!wildcard_match("s*x", "synth.1"));
        assert!(wildcard_match("a**b", "ab"));
    }
}
