// ABOUTME: Resolves user and project path segments into sandbox owners
// ABOUTME: Validates segments and maps them onto workspace directories under the workspace root

use crate::response::ApiError;
use codenest_sandbox::{Owner, OwnerId, ResourceProfile};
use std::path::{Path, PathBuf};

const MAX_SEGMENT_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct OwnerDirectory {
    workspace_root: PathBuf,
    default_profile: ResourceProfile,
}

impl OwnerDirectory {
    pub fn new(workspace_root: impl Into<PathBuf>, default_profile: ResourceProfile) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            default_profile,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Owner id for a user's project, without touching the filesystem
    pub fn owner_id(&self, user: &str, project: &str) -> Result<OwnerId, ApiError> {
        validate_segment("user", user)?;
        validate_segment("project", project)?;
        Ok(OwnerId::project(user, project))
    }

    /// Full owner for a user's project. The workspace directory must exist.
    pub async fn resolve(&self, user: &str, project: &str) -> Result<Owner, ApiError> {
        let id = self.owner_id(user, project)?;
        let workspace = self.workspace_root.join(user).join(project);

        match tokio::fs::metadata(&workspace).await {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(ApiError::NotFound(format!(
                    "Workspace for {} does not exist",
                    id
                )))
            }
        }

        Ok(Owner::new(id, workspace).with_profile(self.default_profile.clone()))
    }
}

fn validate_segment(kind: &str, value: &str) -> Result<(), ApiError> {
    if value.is_empty() || value.len() > MAX_SEGMENT_LEN {
        return Err(ApiError::BadRequest(format!(
            "{} must be 1 to {} characters",
            kind, MAX_SEGMENT_LEN
        )));
    }
    if value == "." || value == ".." {
        return Err(ApiError::BadRequest(format!("Invalid {}: {}", kind, value)));
    }
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !allowed {
        return Err(ApiError::BadRequest(format!(
            "{} may only contain letters, digits, '_', '.' and '-'",
            kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn directory(root: &TempDir) -> OwnerDirectory {
        OwnerDirectory::new(root.path(), ResourceProfile::default())
    }

    #[test]
    fn test_owner_id_format() {
        let root = TempDir::new().unwrap();
        let id = directory(&root).owner_id("alice", "demo").unwrap();
        assert_eq!(id.as_str(), "alice/demo");
    }

    #[test]
    fn test_rejects_bad_segments() {
        let root = TempDir::new().unwrap();
        let owners = directory(&root);
        let long = "x".repeat(65);

        for (user, project) in [
            ("..", "demo"),
            ("alice", "."),
            ("al ice", "demo"),
            ("alice", "de/mo"),
            ("", "demo"),
            ("alice", long.as_str()),
        ] {
            assert!(
                matches!(
                    owners.owner_id(user, project),
                    Err(ApiError::BadRequest(_))
                ),
                "{:?}/{:?} should be rejected",
                user,
                project
            );
        }

        assert!(owners.owner_id("a.b-c_d", "v1.2").is_ok());
    }

    #[tokio::test]
    async fn test_resolve_requires_workspace() {
        let root = TempDir::new().unwrap();
        let owners = directory(&root);

        assert!(matches!(
            owners.resolve("alice", "demo").await,
            Err(ApiError::NotFound(_))
        ));

        std::fs::create_dir_all(root.path().join("alice").join("demo")).unwrap();
        let owner = owners.resolve("alice", "demo").await.unwrap();
        assert_eq!(owner.workspace_path, root.path().join("alice").join("demo"));
        assert_eq!(owner.resource_profile, ResourceProfile::default());
    }
}
