//! Normalized build requests and dispatch acknowledgements.

use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::{Error, Result};

/// A push, reduced to what the dispatcher needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub org: String,
    pub name: String,
    pub url: String,
    pub commit_id: String,
    pub branch: String,
}

impl BuildRequest {
    /// Reject requests with empty fields or names that cannot form `org/name`.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("org", &self.org),
            ("name", &self.name),
            ("url", &self.url),
            ("commit_id", &self.commit_id),
            ("branch", &self.branch),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::InvalidInput(format!("{field} must not be empty")));
            }
        }
        if self.org.contains('/') || self.name.contains('/') {
            return Err(Error::InvalidInput(format!(
                "org and name must not contain '/': {}/{}",
                self.org, self.name
            )));
        }
        Ok(())
    }

    /// Normalize a GitHub push webhook payload.
    pub fn from_github_push(payload: &serde_json::Value) -> Result<Self> {
        let str_at = |pointer: &str| non_empty_str(payload, pointer);

        let full_name = str_at("/repository/full_name")
            .ok_or_else(|| Error::InvalidInput("missing repository.full_name".to_string()))?;
        let (org, name) = full_name.split_once('/').ok_or_else(|| {
            Error::InvalidInput(format!("repository.full_name is not org/name: {full_name}"))
        })?;

        let url = str_at("/repository/clone_url")
            .or_else(|| str_at("/repository/url"))
            .ok_or_else(|| Error::InvalidInput("missing repository.url".to_string()))?;

        let commit_id = str_at("/head_commit/id")
            .or_else(|| str_at("/after"))
            .ok_or_else(|| Error::InvalidInput("missing head_commit.id".to_string()))?;

        let r#ref = str_at("/ref").ok_or_else(|| Error::InvalidInput("missing ref".to_string()))?;
        let branch = r#ref
            .strip_prefix("refs/heads/")
            .unwrap_or_else(|| r#ref.rsplit('/').next().unwrap_or(r#ref));

        let request = Self {
            org: org.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            commit_id: commit_id.to_string(),
            branch: branch.to_string(),
        };
        request.validate()?;
        Ok(request)
    }
}

fn non_empty_str<'a>(payload: &'a serde_json::Value, pointer: &str) -> Option<&'a str> {
    payload
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// What the dispatcher did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// A new build was created and queued.
    Scheduled,
    /// The build already existed; nothing was queued.
    Duplicate,
}

/// Returned as soon as a request is accepted, before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub project_id: EntityId,
    pub build_id: EntityId,
    pub status: DispatchStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_payload() -> serde_json::Value {
        json!({
            "ref": "refs/heads/feature/login",
            "after": "0000000000000000000000000000000000000000",
            "repository": {
                "full_name": "acme/widget",
                "url": "https://x/acme/widget"
            },
            "head_commit": { "id": "c1" }
        })
    }

    #[test]
    fn test_from_github_push() {
        let request = BuildRequest::from_github_push(&push_payload()).unwrap();
        assert_eq!(request.org, "acme");
        assert_eq!(request.name, "widget");
        assert_eq!(request.url, "https://x/acme/widget");
        assert_eq!(request.commit_id, "c1");
        assert_eq!(request.branch, "feature/login");
    }

    #[test]
    fn test_non_branch_ref_uses_last_segment() {
        let mut payload = push_payload();
        payload["ref"] = json!("refs/tags/v1");
        let request = BuildRequest::from_github_push(&payload).unwrap();
        assert_eq!(request.branch, "v1");
    }

    #[test]
    fn test_prefers_clone_url() {
        let mut payload = push_payload();
        payload["repository"]["clone_url"] = json!("https://x/acme/widget.git");
        let request = BuildRequest::from_github_push(&payload).unwrap();
        assert_eq!(request.url, "https://x/acme/widget.git");
    }

    #[test]
    fn test_falls_back_to_after_without_head_commit() {
        let mut payload = push_payload();
        payload["head_commit"] = serde_json::Value::Null;
        payload["after"] = json!("c9");
        let request = BuildRequest::from_github_push(&payload).unwrap();
        assert_eq!(request.commit_id, "c9");
    }

    #[test]
    fn test_rejects_malformed_full_name() {
        let mut payload = push_payload();
        payload["repository"]["full_name"] = json!("widget");
        assert!(matches!(
            BuildRequest::from_github_push(&payload),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let request = BuildRequest {
            org: "acme".to_string(),
            name: "widget".to_string(),
            url: "https://x/acme/widget".to_string(),
            commit_id: " ".to_string(),
            branch: "main".to_string(),
        };
        assert!(request.validate().is_err());
    }
}
