//! Built-in MapReduce applications, looked up by name.

pub mod vertex_degree;
pub mod wc;

use crate::worker::{MapFn, ReduceFn};

/// A map/reduce function pair the worker can run.
#[derive(Clone, Copy)]
pub struct App {
    pub map: MapFn,
    pub reduce: ReduceFn,
}

/// Gets the application named `name`, or `None` if there is no such app.
pub fn named(name: &str) -> Option<App> {
    match name {
        "wc" => Some(App {
            map: wc::map,
            reduce: wc::reduce,
        }),
        "vertex-degree" => Some(App {
            map: vertex_degree::map,
            reduce: vertex_degree::reduce,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_apps_resolve() {
        assert!(named("wc").is_some());
        assert!(named("vertex-degree").is_some());
        assert!(named("sort").is_none());
    }
}
