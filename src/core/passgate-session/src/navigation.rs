//! Navigation collaborator and redirect URL parsing.

use std::sync::{Mutex, PoisonError};

use tracing::debug;

/// How query parameters of a navigation combine with the current ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryParamsHandling {
    /// Use only the new parameters.
    #[default]
    Replace,
    /// Add the new parameters to the current ones, overwriting equal keys.
    Merge,
    /// Keep the current parameters and ignore the new ones.
    Preserve,
}

/// Options for a single navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationExtras {
    /// Query parameters, in order.
    pub query_params: Vec<(String, String)>,
    /// Combination rule for the query parameters.
    pub query_params_handling: QueryParamsHandling,
    /// Fragment of the target URL.
    pub fragment: Option<String>,
    /// Keep the current fragment when no new one is given.
    pub preserve_fragment: bool,
}

/// Application router.
pub trait Navigator: Send + Sync {
    /// Navigate to an application route.
    fn navigate(&self, path: &str, extras: NavigationExtras);

    /// The current URL, including query and fragment.
    fn current_url(&self) -> String;
}

/// A URL split into route path, query parameters and fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Route path.
    pub path: String,
    /// Percent-decoded query parameters, in order.
    pub query_params: Vec<(String, String)>,
    /// Fragment, without the leading `#`.
    pub fragment: Option<String>,
}

impl RedirectTarget {
    /// Renders the target back into a URL.
    pub fn to_url(&self) -> String {
        let mut url = self.path.clone();
        if !self.query_params.is_empty() {
            let query: Vec<String> = self
                .query_params
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        if let Some(fragment) = &self.fragment {
            url.push('#');
            url.push_str(fragment);
        }
        url
    }
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Splits a URL at the first `#`, then at the first `?`.
///
/// The query is split on `&` into `key=value` pairs; a pair without `=`
/// gets an empty value.
pub fn parse_redirect_target(url: &str) -> RedirectTarget {
    let (rest, fragment) = match url.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment.to_string())),
        None => (url, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };

    let query_params = query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((k, v)) => (decode_component(k), decode_component(v)),
                    None => (decode_component(pair), String::new()),
                })
                .collect()
        })
        .unwrap_or_default();

    RedirectTarget {
        path: path.to_string(),
        query_params,
        fragment,
    }
}

struct RouterState {
    location: RedirectTarget,
    history: Vec<String>,
}

/// In-memory router that applies navigations and records them.
///
/// Stands in for a browser router in tests and the CLI.
pub struct RecordingNavigator {
    state: Mutex<RouterState>,
}

impl RecordingNavigator {
    /// Creates a navigator positioned at `initial_url`.
    pub fn new(initial_url: &str) -> Self {
        Self {
            state: Mutex::new(RouterState {
                location: parse_redirect_target(initial_url),
                history: Vec::new(),
            }),
        }
    }

    /// The current location.
    pub fn location(&self) -> RedirectTarget {
        self.lock().location.clone()
    }

    /// Every URL navigated to, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RecordingNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str, extras: NavigationExtras) {
        let mut state = self.lock();
        let current = &state.location;

        let query_params = match extras.query_params_handling {
            QueryParamsHandling::Replace => extras.query_params,
            QueryParamsHandling::Preserve => current.query_params.clone(),
            QueryParamsHandling::Merge => {
                let mut merged = current.query_params.clone();
                for (key, value) in extras.query_params {
                    match merged.iter_mut().find(|(k, _)| *k == key) {
                        Some(existing) => existing.1 = value,
                        None => merged.push((key, value)),
                    }
                }
                merged
            },
        };

        let fragment = match extras.fragment {
            Some(fragment) => Some(fragment),
            None if extras.preserve_fragment => current.fragment.clone(),
            None => None,
        };

        let location = RedirectTarget {
            path: path.to_string(),
            query_params,
            fragment,
        };
        let url = location.to_url();
        debug!(url = %url, "Navigating");

        state.history.push(url);
        state.location = location;
    }

    fn current_url(&self) -> String {
        self.lock().location.to_url()
    }
}
