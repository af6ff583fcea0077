//! Path conventions for the coordination tree
//!
//! Paths are absolute, `/`-separated, with no trailing slash (except the
//! root itself) and no empty, `.` or `..` segments.

use crate::common::{Error, Result};

const CONFIG: &str = "/config";
const STATUS: &str = "/status";

/// Parent of every cluster identity marker
pub fn config_ids() -> String {
    format!("{}/id", CONFIG)
}

/// Marker whose existence asserts the tree belongs to `cluster_id`
pub fn config_id(cluster_id: &str) -> String {
    join(&config_ids(), cluster_id)
}

pub fn config_jobs() -> String {
    format!("{}/jobs", CONFIG)
}

pub fn config_job(job_id: &str) -> String {
    join(&config_jobs(), job_id)
}

pub fn config_hosts() -> String {
    format!("{}/hosts", CONFIG)
}

pub fn config_host(host: &str) -> String {
    join(&config_hosts(), host)
}

pub fn status_hosts() -> String {
    format!("{}/hosts", STATUS)
}

pub fn status_host_up(host: &str) -> String {
    format!("{}/up", join(&status_hosts(), host))
}

pub fn status_masters() -> String {
    format!("{}/masters", STATUS)
}

pub fn status_master_up(master: &str) -> String {
    join(&status_masters(), master)
}

/// Join a child name onto a parent path
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parent of `path`, `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of `path`
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Every proper ancestor of `path` from the top down, excluding the root
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

/// Validate an absolute tree path
pub fn validate(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath(format!("{:?} is not absolute", path)));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(Error::InvalidPath(format!("{:?} has a trailing slash", path)));
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidPath(format!("{:?} has an invalid segment", path)));
        }
        if segment.chars().any(|c| c.is_control()) {
            return Err(Error::InvalidPath(format!("{:?} contains control characters", path)));
        }
    }
    Ok(())
}
