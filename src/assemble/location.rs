//! Location assembly and ordering (§4.E).

use std::cmp::Ordering;

use tracing::warn;

use crate::model::Location;

/// Locations within a server are sorted by path length descending, then
/// lexicographically descending, so the longest/most-specific prefix
/// matches first (§3, §8).
pub fn location_order(a: &Location, b: &Location) -> Ordering {
    b.path
        .len()
        .cmp(&a.path.len())
        .then_with(|| b.path.cmp(&a.path))
}

pub fn sort_locations(locations: &mut [Location]) {
    locations.sort_by(location_order);
}

/// Insert or replace a location at `path`. If a location already exists at
/// that path and is the default-backend placeholder, it is replaced;
/// otherwise the first non-default entry is kept and the conflict logged
/// (§4.E).
pub fn upsert_location(locations: &mut Vec<Location>, new_loc: Location, server_host: &str) {
    if let Some(existing) = locations.iter_mut().find(|l| l.path == new_loc.path) {
        if existing.is_default_backend_placeholder {
            *existing = new_loc;
        } else {
            warn!(
                host = server_host,
                path = %new_loc.path,
                "location conflict: keeping first non-default entry"
            );
        }
        return;
    }
    locations.push(new_loc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LocationKnobs, PathType};

    fn loc(path: &str) -> Location {
        Location {
            path: path.to_string(),
            path_type: PathType::Prefix,
            backend: "default-s-80".into(),
            canaries: vec![],
            is_default_backend_placeholder: false,
            knobs: LocationKnobs::default(),
        }
    }

    #[test]
    fn ordering_is_length_desc_then_lexicographic_desc() {
        let mut locs = vec![loc("/a"), loc("/api/v1"), loc("/api")];
        sort_locations(&mut locs);
        let paths: Vec<&str> = locs.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["/api/v1", "/api", "/a"]);
        for w in locs.windows(2) {
            assert!(w[0].path.len() >= w[1].path.len());
        }
    }

    #[test]
    fn upsert_replaces_default_placeholder_only() {
        let mut locs = vec![Location {
            is_default_backend_placeholder: true,
            ..loc("/")
        }];
        upsert_location(&mut locs, loc("/"), "foo.bar");
        assert_eq!(locs.len(), 1);
        assert!(!locs[0].is_default_backend_placeholder);

        // A second non-default write to the same path is kept as a conflict.
        let mut replacement = loc("/");
        replacement.backend = "default-s2-80".into();
        upsert_location(&mut locs, replacement, "foo.bar");
        assert_eq!(locs[0].backend, "default-s-80");
    }
}
