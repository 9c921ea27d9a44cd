//! Merge-queue environment detection.
//!
//! Classifies the CI environment from well-known variables. The result is
//! informational: nothing in the core gates on it, but the condition
//! context surfaces it as `event = "merge_group"` so pipelines can.

/// The detected merge-queue flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MergeQueue {
    /// GitHub merge queue (`merge_group` event).
    GithubMergeGroup,
    /// GitLab merge train.
    GitlabMergeTrain,
    /// Not in a merge queue.
    None,
}

/// Classifies the current process environment.
pub fn detect() -> MergeQueue {
    detect_from(|name| std::env::var(name).ok())
}

/// Classification over an explicit variable lookup, for testing.
pub fn detect_from(get: impl Fn(&str) -> Option<String>) -> MergeQueue {
    if get("GITHUB_EVENT_NAME").as_deref() == Some("merge_group") {
        return MergeQueue::GithubMergeGroup;
    }
    if get("GITLAB_CI").is_some()
        && get("CI_MERGE_REQUEST_EVENT_TYPE").as_deref() == Some("merge_train")
    {
        return MergeQueue::GitlabMergeTrain;
    }
    MergeQueue::None
}
