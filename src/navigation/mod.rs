//! Server-side rendition of the admin panel's route table and auth guard.
//!
//! Paths are matched against a tree of routes. Redirect records are followed
//! first; the guard then sends unauthenticated visitors of any route whose
//! own or ancestor record requires auth to `/login`.

use serde::Serialize;
use std::collections::BTreeMap;

const LOGIN_PATH: &str = "/login";
const MAX_REDIRECTS: usize = 8;

#[derive(Debug, Clone)]
pub struct RouteDef {
    pub path: &'static str,
    pub name: Option<&'static str>,
    pub view: Option<&'static str>,
    pub layout: Option<&'static str>,
    pub redirect: Option<&'static str>,
    pub requires_auth: bool,
    pub children: Vec<RouteDef>,
}

impl RouteDef {
    fn view(path: &'static str, name: &'static str) -> Self {
        Self {
            path,
            name: Some(name),
            view: Some(name),
            layout: None,
            redirect: None,
            requires_auth: false,
            children: Vec::new(),
        }
    }

    fn redirect(path: &'static str, to: &'static str) -> Self {
        Self {
            path,
            name: None,
            view: None,
            layout: None,
            redirect: Some(to),
            requires_auth: false,
            children: Vec::new(),
        }
    }
}

/// Outcome of resolving a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Navigation {
    Render(RenderedRoute),
    Redirect { location: String },
    NotFound { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedRoute {
    pub path: String,
    pub name: String,
    pub view: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    pub params: BTreeMap<String, String>,
}

struct Matched<'a> {
    chain: Vec<&'a RouteDef>,
    params: BTreeMap<String, String>,
}

impl<'a> Matched<'a> {
    fn leaf(&self) -> Option<&'a RouteDef> {
        self.chain.last().copied()
    }

    fn requires_auth(&self) -> bool {
        self.chain.iter().any(|r| r.requires_auth)
    }
}

pub struct RouteTable {
    routes: Vec<RouteDef>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteDef>) -> Self {
        Self { routes }
    }

    pub fn admin_panel() -> Self {
        Self::new(vec![
            RouteDef::redirect("/", LOGIN_PATH),
            RouteDef::view("/login", "login"),
            RouteDef::view("/register", "register"),
            RouteDef {
                path: "/admin",
                name: None,
                view: None,
                layout: Some("admin"),
                redirect: None,
                requires_auth: true,
                children: vec![
                    RouteDef::redirect("", "/admin/welcome"),
                    RouteDef::view("welcome", "welcome"),
                    RouteDef::view("custom", "custom"),
                    RouteDef::view("project/:id", "project-detail"),
                    RouteDef::view("bazi", "bazi"),
                ],
            },
        ])
    }

    pub fn resolve(&self, path: &str, authenticated: bool) -> Navigation {
        let requested = normalize(path);
        let mut current = requested.clone();

        for _ in 0..MAX_REDIRECTS {
            let Some(matched) = self.match_path(&current) else {
                return Navigation::NotFound { path: requested };
            };
            let Some(leaf) = matched.leaf() else {
                return Navigation::NotFound { path: requested };
            };

            if let Some(target) = leaf.redirect {
                current = normalize(target);
                continue;
            }

            if matched.requires_auth() && !authenticated {
                return Navigation::Redirect { location: LOGIN_PATH.to_string() };
            }
            if current != requested {
                return Navigation::Redirect { location: current };
            }

            // Records without a view (the admin layout) only render through a child
            let Some(view) = leaf.view else {
                return Navigation::NotFound { path: requested };
            };
            return Navigation::Render(RenderedRoute {
                path: current,
                name: leaf.name.unwrap_or(view).to_string(),
                view: view.to_string(),
                layout: matched.chain.iter().rev().find_map(|r| r.layout).map(str::to_string),
                params: matched.params,
            });
        }

        tracing::warn!("Redirect loop while resolving {}", requested);
        Navigation::NotFound { path: requested }
    }

    fn match_path(&self, path: &str) -> Option<Matched<'_>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.routes.iter().find_map(|route| match_route(route, &segments, Vec::new(), BTreeMap::new()))
    }
}

fn match_route<'a>(
    route: &'a RouteDef,
    segments: &[&str],
    mut chain: Vec<&'a RouteDef>,
    mut params: BTreeMap<String, String>,
) -> Option<Matched<'a>> {
    let pattern: Vec<&str> = route.path.split('/').filter(|s| !s.is_empty()).collect();
    if pattern.len() > segments.len() {
        return None;
    }
    for (expected, actual) in pattern.iter().zip(segments) {
        match expected.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_string(), actual.to_string());
            }
            None if expected == actual => {}
            None => return None,
        }
    }

    chain.push(route);
    let rest = &segments[pattern.len()..];

    for child in &route.children {
        if let Some(found) = match_route(child, rest, chain.clone(), params.clone()) {
            return Some(found);
        }
    }

    // A layout record can end up here with no matching child; resolve() treats it as not found
    rest.is_empty().then_some(Matched { chain, params })
}

/// Strip query/fragment and trailing slashes; always keep a leading slash
fn normalize(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
