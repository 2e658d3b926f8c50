//! Static route table.
//!
//! Built once at startup from a list of service groups. Every endpoint is
//! addressed by its topic (`ServiceName/EndpointName`), which is the key for
//! both the auth-requirement lookup and the backend address lookup.

use crate::domain::config::ConfigError;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One endpoint as declared in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    /// HTTP method, e.g. "GET"
    pub method: String,
    /// Path template, placeholders written as `{name}`
    pub path: String,
    #[serde(default)]
    pub requires_auth: bool,
    /// Feature class used by the per-feature limiter
    pub rate_class: String,
}

/// A backend service and the endpoints it owns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub endpoints: Vec<EndpointConfig>,
}

/// Backend host:port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable, resolved route
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub service: String,
    pub name: String,
    pub method: Method,
    pub path_template: String,
    pub requires_auth: bool,
    pub rate_class: String,
    pub backend: BackendAddr,
    topic: String,
}

impl RouteEntry {
    /// Canonical routing key, `service/endpoint`
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Template in the router's `:param` syntax
    pub fn router_path(&self) -> String {
        self.path_template
            .split('/')
            .map(|segment| match placeholder(segment) {
                Some(name) => format!(":{}", name),
                None => segment.to_string(),
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Substitute path parameters back into the template.
    ///
    /// Each value is percent-encoded as exactly one path segment. Empty,
    /// `.` and `..` values are refused since URL normalization would drop
    /// or collapse them. Unknown placeholders are left as-is.
    pub fn resolve_path<'a, I>(&self, params: I) -> Result<String, PathParamError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let params: HashMap<&str, &str> = params.into_iter().collect();
        let mut segments = Vec::new();
        for segment in self.path_template.split('/') {
            match placeholder(segment).and_then(|name| params.get(name).map(|v| (name, *v))) {
                Some((name, value)) => {
                    if matches!(value, "" | "." | "..") {
                        return Err(PathParamError {
                            name: name.to_string(),
                            value: value.to_string(),
                        });
                    }
                    segments.push(urlencoding::encode(value).into_owned());
                }
                None => segments.push(segment.to_string()),
            }
        }
        Ok(segments.join("/"))
    }

    /// Absolute upstream URL for an already resolved path (query included)
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.backend, path_and_query)
    }

    /// Match a concrete path against this entry's template.
    fn match_path(&self, path: &str) -> Option<Vec<(String, String)>> {
        let template: Vec<&str> = self.path_template.trim_end_matches('/').split('/').collect();
        let concrete: Vec<&str> = path.trim_end_matches('/').split('/').collect();
        if template.len() != concrete.len() {
            return None;
        }

        let mut params = Vec::new();
        for (pattern, segment) in template.iter().zip(concrete.iter()) {
            match placeholder(pattern) {
                Some(_) if segment.is_empty() => return None,
                Some(name) => params.push((name.to_string(), segment.to_string())),
                None if pattern != segment => return None,
                None => {}
            }
        }
        Some(params)
    }

    fn static_segments(&self) -> usize {
        self.path_template
            .split('/')
            .filter(|segment| placeholder(segment).is_none())
            .count()
    }
}

fn placeholder(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

/// Path parameter value that cannot stand as a single segment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("path parameter {name} has unusable value {value:?}")]
pub struct PathParamError {
    pub name: String,
    pub value: String,
}

/// Result of matching an inbound request against the table
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub entry: Arc<RouteEntry>,
    pub params: Vec<(String, String)>,
}

/// Read-only route table shared by ingress and workers
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    by_topic: HashMap<String, Arc<RouteEntry>>,
    ordered: Vec<Arc<RouteEntry>>,
}

impl RouteTable {
    /// Build the table, validating methods, templates and topic uniqueness.
    pub fn from_groups(groups: &[ServiceGroup]) -> Result<Self, ConfigError> {
        let mut table = RouteTable::default();

        for group in groups {
            for endpoint in &group.endpoints {
                let method = Method::from_bytes(endpoint.method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| {
                        ConfigError::InvalidRoute(format!(
                            "{}/{}: invalid method {:?}",
                            group.name, endpoint.name, endpoint.method
                        ))
                    })?;

                if !endpoint.path.starts_with('/') {
                    return Err(ConfigError::InvalidRoute(format!(
                        "{}/{}: path must start with '/'",
                        group.name, endpoint.name
                    )));
                }

                let topic = format!("{}/{}", group.name, endpoint.name);
                if table.by_topic.contains_key(&topic) {
                    return Err(ConfigError::DuplicateTopic(topic));
                }

                let entry = Arc::new(RouteEntry {
                    service: group.name.clone(),
                    name: endpoint.name.clone(),
                    method,
                    path_template: endpoint.path.clone(),
                    requires_auth: endpoint.requires_auth,
                    rate_class: endpoint.rate_class.clone(),
                    backend: BackendAddr {
                        host: group.host.clone(),
                        port: group.port,
                    },
                    topic: topic.clone(),
                });

                table.by_topic.insert(topic, Arc::clone(&entry));
                table.ordered.push(entry);
            }
        }

        Ok(table)
    }

    /// Look up a route by topic
    pub fn get(&self, topic: &str) -> Option<&Arc<RouteEntry>> {
        self.by_topic.get(topic)
    }

    /// Entries in declaration order
    pub fn entries(&self) -> impl Iterator<Item = &Arc<RouteEntry>> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Resolve an inbound (method, path) pair.
    ///
    /// When several templates match, the one with more literal segments wins
    /// (`/me/posts` beats `/me/{x}`).
    pub fn match_request(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.ordered
            .iter()
            .filter(|entry| entry.method == *method)
            .filter_map(|entry| {
                entry.match_path(path).map(|params| RouteMatch {
                    entry: Arc::clone(entry),
                    params,
                })
            })
            .max_by_key(|m| m.entry.static_segments())
    }
}

fn endpoint(name: &str, method: &str, path: &str, requires_auth: bool, rate_class: &str) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        method: method.to_string(),
        path: path.to_string(),
        requires_auth,
        rate_class: rate_class.to_string(),
    }
}

/// Built-in service groups for the social backends
pub fn default_service_groups() -> Vec<ServiceGroup> {
    vec![
        ServiceGroup {
            name: "AuthService".to_string(),
            host: "localhost".to_string(),
            port: 9090,
            endpoints: vec![
                endpoint("Register", "POST", "/register", false, "auth"),
                endpoint("Login", "POST", "/login", false, "auth"),
                endpoint("Refresh", "POST", "/refresh", false, "auth"),
                endpoint("Logout", "POST", "/logout", true, "auth"),
                endpoint("ChangePassword", "PUT", "/me/password", true, "auth"),
                endpoint("DeleteAccount", "DELETE", "/me", true, "auth"),
            ],
        },
        ServiceGroup {
            name: "UserService".to_string(),
            host: "localhost".to_string(),
            port: 9091,
            endpoints: vec![
                endpoint("GetOwnProfile", "GET", "/me", true, "users"),
                endpoint("UpdateOwnProfile", "PATCH", "/me", true, "users"),
                endpoint("GetUserProfile", "GET", "/users/{user_id}", true, "users"),
                endpoint("SearchUsers", "GET", "/users", true, "search"),
            ],
        },
        ServiceGroup {
            name: "PostsService".to_string(),
            host: "localhost".to_string(),
            port: 9092,
            endpoints: vec![
                endpoint("GetPost", "GET", "/posts/{post_id}", true, "posts"),
                endpoint("GetUserPosts", "GET", "/users/{user_id}/posts", true, "posts"),
                endpoint("GetOwnPosts", "GET", "/me/posts", true, "posts"),
                endpoint("CreatePost", "POST", "/posts", true, "post_writes"),
                endpoint("UpdatePost", "PATCH", "/posts/{post_id}", true, "post_writes"),
                endpoint("DeletePost", "DELETE", "/posts/{post_id}", true, "post_writes"),
            ],
        },
        ServiceGroup {
            name: "FollowService".to_string(),
            host: "localhost".to_string(),
            port: 9093,
            endpoints: vec![
                endpoint("Follow", "POST", "/follows", true, "follow"),
                endpoint("Unfollow", "DELETE", "/follows", true, "follow"),
                endpoint("GetFollowers", "GET", "/follows/{user_id}/followers", true, "follow"),
                endpoint("GetFollowees", "GET", "/follows/{user_id}/followees", true, "follow"),
            ],
        },
    ]
}
