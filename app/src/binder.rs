//! Credentials and route set shared by every command.

use log::warn;
use sip_core::{Credentials, RouteSet, MAX_ROUTES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// `None` when no password was given; challenges then end the request.
    pub credentials: Option<Credentials>,
    pub route_set: RouteSet,
}

pub fn bind(username: &str, password: Option<&str>, proxies: &[String]) -> Binding {
    Binding {
        credentials: password.map(|password| Credentials::new(username, password)),
        route_set: route_set(proxies),
    }
}

/// First proxy is where requests go; each following one becomes a Route
/// header, in the order given.
pub fn route_set(proxies: &[String]) -> RouteSet {
    let mut set = RouteSet::default();
    let mut proxies = proxies.iter().map(|p| p.trim()).filter(|p| !p.is_empty());

    let Some(outbound) = proxies.next() else {
        return set;
    };
    set.outbound = Some(outbound.to_string());

    for (idx, proxy) in proxies.enumerate() {
        // The outbound proxy counts against the limit too.
        if idx + 1 >= MAX_ROUTES || set.routes.push(route_value(proxy)).is_err() {
            warn!("Only {} proxies are allowed, ignoring {}", MAX_ROUTES, proxy);
        }
    }
    set
}

fn route_value(proxy: &str) -> String {
    if proxy.starts_with('<') {
        proxy.to_string()
    } else {
        format!("<{}>", proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxies(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn no_proxy_means_direct() {
        let binding = bind("alice", None, &[]);
        assert!(binding.credentials.is_none());
        assert!(binding.route_set.is_empty());
    }

    #[test]
    fn credentials_use_wildcard_realm() {
        let binding = bind("alice", Some("secret"), &[]);
        let creds = binding.credentials.unwrap();
        assert_eq!(creds.realm, "*");
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "secret");
        assert_eq!(creds.scheme, "digest");
    }

    #[test]
    fn first_proxy_is_outbound_rest_are_routes() {
        let set = route_set(&proxies(&[
            "sip:sip.com:2585",
            "sip:10.23.24.100:6060;lr",
            "<sip:edge.example.com;lr>",
        ]));
        assert_eq!(set.outbound.as_deref(), Some("sip:sip.com:2585"));
        assert_eq!(
            set.routes.as_slice(),
            &["<sip:10.23.24.100:6060;lr>", "<sip:edge.example.com;lr>"]
        );
    }

    #[test]
    fn proxies_past_the_limit_are_dropped() {
        let list: Vec<String> = (0..MAX_ROUTES + 3).map(|i| format!("sip:p{i}.example.com")).collect();
        let set = route_set(&list);
        assert_eq!(set.routes.len(), MAX_ROUTES - 1);
        assert_eq!(set.routes.last().map(String::as_str), Some("<sip:p11.example.com>"));
    }
}
