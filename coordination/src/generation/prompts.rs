//! Prompt text handed to the generation tool.

use crate::verifier::Stage;

/// Task prompt: the title alone, or title and body separated by a blank line.
pub fn build_prompt(title: &str, body: &str) -> String {
    if body.is_empty() {
        title.to_string()
    } else {
        format!("{title}\n\n{body}")
    }
}

/// Corrective prompt embedding the failing stage's diagnostic.
pub fn fix_prompt(stage: Stage, diagnostic: &str) -> String {
    let what = match stage {
        Stage::Build => "build error",
        Stage::Lint => "lint error",
        Stage::Test => "test failure",
    };
    format!("Fix the following {what}:\n\n{diagnostic}")
}

/// Prompt for the second pass.
pub fn test_pass_prompt(title: &str) -> String {
    format!("Add unit tests for the changes made for: {title}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt() {
        assert_eq!(build_prompt("Fix bug", ""), "Fix bug");
        assert_eq!(build_prompt("Fix bug", "Details"), "Fix bug\n\nDetails");
    }

    #[test]
    fn test_fix_prompts() {
        assert_eq!(
            fix_prompt(Stage::Build, "go build ./... failed:\nx"),
            "Fix the following build error:\n\ngo build ./... failed:\nx"
        );
        assert!(fix_prompt(Stage::Lint, "d").starts_with("Fix the following lint error:"));
        assert!(fix_prompt(Stage::Test, "d").starts_with("Fix the following test failure:"));
    }

    #[test]
    fn test_test_pass_prompt() {
        assert_eq!(
            test_pass_prompt("Add CSV export"),
            "Add unit tests for the changes made for: Add CSV export"
        );
    }
}
