//! String sanitizers used when turning DICOM identifiers into filesystem
//! paths or job names.
//!
//! https://github.com/FNNDSC/pypx/blob/7619c15f4d2303d6d5ca7c255d81d06c7ab8682b/pypx/repack.py#L424

use regex::Regex;
use std::sync::LazyLock;

/// Replace disallowed characters with "_", for use in a staging path
/// component (`sanitize(calledAeTitle)`, `sanitize(SopInstanceUid)`).
pub fn sanitize_path<S: AsRef<str>>(s: S) -> String {
    let s_nonull = s.as_ref().replace('\0', "");
    VALID_PATH_CHARS_RE.replace_all(&s_nonull, "_").to_string()
}

static VALID_PATH_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^A-Za-z0-9\.\-]+"#).unwrap());

const MAX_JOB_NAME_LEN: usize = 25;

/// The canonical FixJobName rule: replace any character outside
/// `[a-z0-9-]` with `-`, lowercase, collapse repeats, suffix-truncate to 25
/// characters.
pub fn fix_job_name<S: AsRef<str>>(s: S) -> String {
    let lowered = s.as_ref().to_ascii_lowercase();
    let replaced = DISALLOWED_JOB_NAME_CHARS_RE.replace_all(&lowered, "-");
    let collapsed = REPEATED_DASH_RE.replace_all(&replaced, "-");
    let trimmed = collapsed.trim_matches('-');
    if trimmed.len() > MAX_JOB_NAME_LEN {
        trimmed[trimmed.len() - MAX_JOB_NAME_LEN..].to_string()
    } else {
        trimmed.to_string()
    }
}

static DISALLOWED_JOB_NAME_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^a-z0-9-]+"#).unwrap());

static REPEATED_DASH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"-{2,}"#).unwrap());

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("CLARA1", "CLARA1")]
    #[case("1.2.840/113.619", "1.2.840_113.619")]
    #[case("a\0b", "ab")]
    fn test_sanitize_path(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_path(input), expected);
    }

    #[test]
    fn test_fix_job_name_truncates_from_the_end() {
        let long = "1.2.840.113619.2.55.3.604688119.971.1234567890.123";
        let fixed = fix_job_name(long);
        assert_eq!(fixed.len(), MAX_JOB_NAME_LEN);
        assert!(long.ends_with(fixed.trim_start_matches('-')));
    }

    #[test]
    fn test_fix_job_name_collapses_and_lowercases() {
        assert_eq!(fix_job_name("Foo__Bar"), "foo-bar");
    }
}
