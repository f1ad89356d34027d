//! User-facing reconciliation messages

/// Banner shown when an analysis cannot replay because of its imports
pub const PRE_REPLAY_IMPORT_ERROR_TEXT: &str = "There was an error replaying your analysis \
because some of the imported data has changed or no longer exists. Update the imports below \
to replay the analysis.";

/// Banner shown when corrected imports still fail validation at finalize
pub const INVALID_IMPORTS_TEXT: &str =
    "Some imports are still invalid. Fix the highlighted imports before replaying.";

const STILL_INVALID_SUFFIX: &str = "Still invalid.";

/// Message for an import that failed validation again
///
/// An unchanged error gains a "Still invalid." breadcrumb so the user can
/// tell the retry happened; a different error replaces the old one.
#[must_use]
pub fn still_invalid_message(previous: Option<&str>, new: &str) -> String {
    match previous {
        Some(previous) if previous.starts_with(new) => format!("{previous} {STILL_INVALID_SUFFIX}"),
        _ => new.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_error_accumulates_breadcrumbs() {
        let missing = "File a.csv does not exist.";
        let once = still_invalid_message(Some(missing), missing);
        assert_eq!(once, "File a.csv does not exist. Still invalid.");

        let twice = still_invalid_message(Some(&once), "File a.csv does not exist.");
        assert_eq!(twice, "File a.csv does not exist. Still invalid. Still invalid.");
    }

    #[test]
    fn different_error_replaces_message() {
        assert_eq!(
            still_invalid_message(Some("File a.csv does not exist."), "Could not decode a.csv."),
            "Could not decode a.csv."
        );
        assert_eq!(still_invalid_message(None, "bad"), "bad");
    }
}
