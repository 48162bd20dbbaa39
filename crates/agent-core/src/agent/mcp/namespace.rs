//! Unique naming of tools and prompts aggregated across servers.
//!
//! Servers are visited in registration order. The first server to expose a name keeps it,
//! later servers get `<server>--<name>`, with a numeric suffix if that is also taken. A plain
//! name that reads as `<known server>--...` is never handed out, so the qualified form always
//! resolves, even for the server that kept the plain name.

use std::collections::HashSet;

/// Separates the server name from the tool name in qualified names.
pub const SERVER_SEPARATOR: &str = "--";

/// Longest name accepted by model providers for tool definitions.
pub const MAX_NAME_LEN: usize = 64;

/// Replaces characters outside `[a-zA-Z0-9_-]` and truncates to [MAX_NAME_LEN].
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(MAX_NAME_LEN)
        .collect();
    if sanitized.is_empty() { "_".to_string() } else { sanitized }
}

pub fn qualified_name(server_name: &str, name: &str) -> String {
    sanitize_name(&format!("{server_name}{SERVER_SEPARATOR}{name}"))
}

/// Assigns a unique exposed name to each `(server_name, name)` entry, in order. `servers` are
/// all registered server names.
pub fn assign_names<'a, I>(entries: I, servers: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut taken = HashSet::new();
    entries
        .into_iter()
        .map(|(server_name, name)| {
            let plain = sanitize_name(name);
            if split_qualified(&plain, servers).is_none() && taken.insert(plain.clone()) {
                return plain;
            }
            let base = qualified_name(server_name, name);
            let mut candidate = base.clone();
            let mut n = 2;
            while !taken.insert(candidate.clone()) {
                let suffix = format!("_{n}");
                let keep = MAX_NAME_LEN.saturating_sub(suffix.len()).min(base.len());
                candidate = format!("{}{suffix}", &base[..keep]);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// Splits a qualified name into the server it names and the remainder, given the known servers.
///
/// Server names may themselves contain the separator, so every split point is tried.
pub fn split_qualified<'a>(qualified: &'a str, servers: &[&str]) -> Option<(String, &'a str)> {
    qualified.match_indices(SERVER_SEPARATOR).find_map(|(idx, _)| {
        let prefix = &qualified[..idx];
        servers
            .iter()
            .find(|server| sanitize_name(server) == prefix)
            .map(|server| (server.to_string(), &qualified[idx + SERVER_SEPARATOR.len()..]))
    })
}
