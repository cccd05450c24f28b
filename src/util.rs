//! Small shared helpers: worker result draining and path fixup

use std::path::PathBuf;

use crate::error::{LstagsError, Result};

/// Waits for a whole batch of worker results and returns the first error.
///
/// All results are already collected when this is called (workers run to
/// completion), so a failing worker never leaves siblings dangling.
pub fn until(results: Vec<Result<()>>) -> Result<()> {
    for result in results {
        result?;
    }

    Ok(())
}

/// Drains worker results tolerating individual failures: every failure is
/// reported through the provided callback, and a single aggregate error is
/// returned if anything failed at all.
pub fn with_tolerance<F>(results: Vec<Result<()>>, mut report: F) -> Result<()>
where
    F: FnMut(&LstagsError),
{
    let total = results.len();
    let mut failed = 0;

    for result in &results {
        if let Err(err) = result {
            report(err);
            failed += 1;
        }
    }

    if failed != 0 {
        return Err(LstagsError::Partial { failed, total });
    }

    Ok(())
}

/// Resolves a leading `~` into the user's home directory.
pub fn fix_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_until_ok() {
        assert!(until(vec![Ok(()), Ok(())]).is_ok());
    }

    #[test]
    fn test_until_first_error() {
        let results = vec![Ok(()), Err(LstagsError::Config("boom".to_string()))];
        assert!(until(results).is_err());
    }

    #[test]
    fn test_with_tolerance_aggregates() {
        let results = vec![
            Ok(()),
            Err(LstagsError::Config("one".to_string())),
            Err(LstagsError::Config("two".to_string())),
        ];

        let mut reported = 0;
        let err = with_tolerance(results, |_| reported += 1).unwrap_err();

        assert_eq!(reported, 2);
        match err {
            LstagsError::Partial { failed, total } => {
                assert_eq!(failed, 2);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_with_tolerance_all_ok() {
        assert!(with_tolerance(vec![Ok(()), Ok(())], |_| ()).is_ok());
    }

    #[test]
    fn test_fix_path_passthrough() {
        assert_eq!(fix_path("/etc/lstags.yml"), PathBuf::from("/etc/lstags.yml"));
    }

    #[test]
    fn test_fix_path_expands_home() {
        let fixed = fix_path("~/.docker/config.json");
        assert!(!fixed.to_string_lossy().starts_with('~'));
        assert!(fixed.to_string_lossy().ends_with(".docker/config.json"));
    }
}
