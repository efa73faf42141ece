use rand::Rng;
use rand::distr::Alphanumeric;

/// A reference is a regular expression when it contains anything besides
/// alphanumerics, `_` and `-`.
pub fn is_regex(reference: &str) -> bool {
    reference
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
}

/// Matches `name` against a literal or regex reference.
pub fn ref_matches(reference: &str, name: &str) -> Result<bool, regex::Error> {
    if is_regex(reference) {
        let re = regex::Regex::new(reference)?;
        Ok(re.is_match(name))
    } else {
        Ok(reference == name)
    }
}

/// Lowercase alphanumeric suffix, as used for generated object names.
pub fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}
