use regex::RegexBuilder;

/// Word-edge, case-insensitive search of `haystack` for any of
/// `needles`. Returns the matched *configured* needle, or `None` when the
/// haystack is absent or nothing matches.
///
/// The alternation regex only answers whether anything matched: it prefers
/// the earliest-positioned branch, which can report the wrong needle when
/// several occur in one description. So the specific needle is recovered by
/// a literal needle-by-needle scan of the upper-cased text, first configured
/// needle wins. Deterministic for fixed inputs.
pub fn find_keyword<'a>(haystack: Option<&str>, needles: &'a [String]) -> Option<&'a str> {
    let text = haystack?;
    if needles.is_empty() || !any_keyword_matches(text, needles) {
        return None;
    }
    let upper = text.to_uppercase();
    needles
        .iter()
        .find(|needle| upper.contains(&needle.to_uppercase()))
        .map(String::as_str)
}

/// True when any needle matches at a word edge, case-insensitively.
///
/// Explicit edge classes instead of `\b`: a `\b` anchor can never match next
/// to a needle that starts or ends on punctuation, such as `(FUEL)`.
pub fn any_keyword_matches(text: &str, needles: &[String]) -> bool {
    let pattern = needles
        .iter()
        .map(|n| format!(r"(?:^|\W){}(?:\W|$)", regex::escape(n)))
        .collect::<Vec<_>>()
        .join("|");
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re.is_match(text),
        // Escaped literals always compile; an empty needle set never matches.
        Err(_) => false,
    }
}
