//! Image builders.
//!
//! [`DockerImageBuilder`] shells out to the `docker` CLI with BuildKit
//! enabled. [`RecordingBuilder`] only remembers what it was asked to build.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{DeployError, DeployResult};
use crate::gateway::{BuildRequest, ImageBuilder};
use crate::types::{BuildIdentity, ImageRef};

/// Tags whose layers every build may reuse, besides the branch's own.
const SHARED_CACHE_TAGS: [&str; 2] = ["latest", "master-latest"];

/// Assemble the request for one image at a revision.
///
/// The revision tag comes first and is the reference the build resolves to;
/// the mutable `<branch>-latest` tag follows.
#[must_use]
pub fn image_request(
    registry: &str,
    name: &str,
    context: &Path,
    dockerfile: &Path,
    identity: &BuildIdentity,
    npm_token: &str,
) -> BuildRequest {
    let branch_tag = identity.branch_tag();

    let tags = vec![
        ImageRef::new(registry, name, &identity.revision),
        ImageRef::new(registry, name, &branch_tag),
    ];

    let cache_from = std::iter::once(branch_tag.as_str())
        .chain(SHARED_CACHE_TAGS)
        .map(|tag| ImageRef::new(registry, name, tag))
        .collect();

    let mut build_args = BTreeMap::new();
    build_args.insert("BUILDKIT_INLINE_CACHE".to_owned(), "1".to_owned());
    build_args.insert("NPM_TOKEN".to_owned(), npm_token.to_owned());

    BuildRequest {
        name: name.to_owned(),
        context: context.to_path_buf(),
        dockerfile: dockerfile.to_path_buf(),
        tags,
        cache_from,
        build_args,
    }
}

/// Builds with the local `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerImageBuilder {
    push: bool,
}

impl DockerImageBuilder {
    /// Create a builder; `push` publishes every tag after a successful build.
    #[must_use]
    pub const fn new(push: bool) -> Self {
        Self { push }
    }

    fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_owned(),
            "--file".to_owned(),
            request.dockerfile.display().to_string(),
        ];
        for tag in &request.tags {
            args.push("--tag".to_owned());
            args.push(tag.to_string());
        }
        for cache in &request.cache_from {
            args.push("--cache-from".to_owned());
            args.push(cache.to_string());
        }
        for (key, value) in &request.build_args {
            args.push("--build-arg".to_owned());
            args.push(format!("{key}={value}"));
        }
        args.push(request.context.display().to_string());
        args
    }

    async fn docker(&self, image: &str, args: &[String]) -> DeployResult<()> {
        debug!(args = ?args, "running docker");
        let status = Command::new("docker")
            .args(args)
            .env("DOCKER_BUILDKIT", "1")
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| DeployError::build(image, e.to_string()))?;

        if !status.success() {
            return Err(DeployError::build(
                image,
                format!("docker {} exited with {status}", args[0]),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn build(&self, request: &BuildRequest) -> DeployResult<ImageRef> {
        let primary = request
            .tags
            .first()
            .cloned()
            .ok_or_else(|| DeployError::build(&request.name, "no tags requested"))?;

        info!(image = %primary, "building image");
        self.docker(&request.name, &Self::build_args(request)).await?;

        if self.push {
            for tag in &request.tags {
                info!(image = %tag, "pushing image");
                self.docker(&request.name, &["push".to_owned(), tag.to_string()])
                    .await?;
            }
        }

        Ok(primary)
    }
}

/// Builder that records requests and resolves to the first tag.
#[derive(Debug, Default)]
pub struct RecordingBuilder {
    requests: Mutex<Vec<BuildRequest>>,
}

impl RecordingBuilder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ImageBuilder for RecordingBuilder {
    async fn build(&self, request: &BuildRequest) -> DeployResult<ImageRef> {
        let primary = request
            .tags
            .first()
            .cloned()
            .ok_or_else(|| DeployError::build(&request.name, "no tags requested"))?;
        self.requests.lock().push(request.clone());
        Ok(primary)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn request() -> BuildRequest {
        image_request(
            "registry.example.com",
            "watchtower",
            Path::new(".."),
            Path::new("../Dockerfile"),
            &BuildIdentity::new("abc1234", "Feature/Login"),
            "npm-secret",
        )
    }

    #[test]
    fn request_tags_revision_then_branch() {
        let tags: Vec<_> = request().tags.iter().map(ToString::to_string).collect();
        assert_eq!(
            tags,
            vec![
                "registry.example.com/watchtower:abc1234",
                "registry.example.com/watchtower:feature-login-latest",
            ]
        );
    }

    #[test]
    fn request_reuses_branch_and_shared_caches() {
        let cache: Vec<_> = request().cache_from.iter().map(ToString::to_string).collect();
        assert_eq!(
            cache,
            vec![
                "registry.example.com/watchtower:feature-login-latest",
                "registry.example.com/watchtower:latest",
                "registry.example.com/watchtower:master-latest",
            ]
        );
    }

    #[test]
    fn request_build_args() {
        let request = request();
        assert_eq!(request.build_args["BUILDKIT_INLINE_CACHE"], "1");
        assert_eq!(request.build_args["NPM_TOKEN"], "npm-secret");
        assert_eq!(request.dockerfile, PathBuf::from("../Dockerfile"));
    }

    #[test]
    fn docker_arguments_end_with_context() {
        let args = DockerImageBuilder::build_args(&request());
        assert_eq!(args[0], "build");
        assert_eq!(args.last().map(String::as_str), Some(".."));
        assert!(args.contains(&"--cache-from".to_owned()));
        assert!(args.contains(&"NPM_TOKEN=npm-secret".to_owned()));
    }

    #[tokio::test]
    async fn recording_builder_resolves_revision_tag() {
        let builder = RecordingBuilder::new();
        let image = builder.build(&request()).await.unwrap();
        assert_eq!(image.as_str(), "registry.example.com/watchtower:abc1234");
        assert_eq!(builder.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_tag_list_is_rejected() {
        let mut request = request();
        request.tags.clear();
        let err = RecordingBuilder::new().build(&request).await.unwrap_err();
        assert!(matches!(err, DeployError::Build { .. }));
    }
}
