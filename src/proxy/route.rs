//! Backend route selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::data::{Application, Destination};

/// Picks the destination serving a path: longest matching `request_route`
/// wins, ties rotate round-robin.
#[derive(Debug, Default)]
pub struct RouteSelector {
    counter: AtomicUsize,
}

impl RouteSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<'a>(&self, app: &'a Application, path: &str) -> Option<&'a Destination> {
        let longest = app
            .destinations
            .iter()
            .filter(|d| path.starts_with(&d.request_route))
            .map(|d| d.request_route.len())
            .max()?;

        let candidates: Vec<&Destination> = app
            .destinations
            .iter()
            .filter(|d| d.request_route.len() == longest && path.starts_with(&d.request_route))
            .collect();

        let index = match candidates.len() {
            1 => 0,
            len => self.counter.fetch_add(1, Ordering::Relaxed) % len,
        };
        candidates.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RouteType;

    fn dest(id: i64, route: &str, addr: &str) -> Destination {
        Destination {
            id,
            route_type: RouteType::ReverseProxy,
            request_route: route.to_string(),
            backend_route: String::new(),
            destination: addr.to_string(),
        }
    }

    fn app(destinations: Vec<Destination>) -> Application {
        let mut app: Application = serde_json::from_value(serde_json::json!({"id": 1, "destinations": []})).unwrap();
        app.destinations = destinations;
        app
    }

    #[test]
    fn test_longest_prefix_wins() {
        let app = app(vec![dest(1, "/", "a:80"), dest(2, "/api/", "b:80")]);
        let selector = RouteSelector::new();
        assert_eq!(selector.select(&app, "/api/users").unwrap().id, 2);
        assert_eq!(selector.select(&app, "/index.html").unwrap().id, 1);
    }

    #[test]
    fn test_ties_rotate() {
        let app = app(vec![
            dest(1, "/", "a:80"),
            dest(2, "/", "b:80"),
            dest(3, "/api/", "c:80"),
        ]);
        let selector = RouteSelector::new();
        let first = selector.select(&app, "/").unwrap().id;
        let second = selector.select(&app, "/").unwrap().id;
        let third = selector.select(&app, "/").unwrap().id;
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_no_match() {
        let app = app(vec![dest(1, "/api/", "a:80")]);
        assert!(RouteSelector::new().select(&app, "/other").is_none());
    }
}
