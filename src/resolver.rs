//! Endpoint Resolution
//!
//! Turns a logical `device/signal` pattern into the live endpoints it names.
//! Without an override for its device part a pattern matches the signal name
//! on every visible device, which keeps sessions portable across differently
//! instanced device names.

use crate::document::EndpointPattern;
use crate::graph::{Graph, LiveDevice, LiveEndpoint};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Logical device name -> live device name.
pub type DeviceOverrides = HashMap<String, String>;

/// Resolves patterns against a graph.
pub struct EndpointResolver<'g> {
    graph: &'g dyn Graph,
}

impl<'g> EndpointResolver<'g> {
    pub fn new(graph: &'g dyn Graph) -> Self {
        Self { graph }
    }

    /// Live endpoints matching `pattern`, in graph order. Hidden devices never
    /// match.
    pub fn resolve(
        &self,
        pattern: &EndpointPattern,
        overrides: Option<&DeviceOverrides>,
    ) -> Vec<LiveEndpoint> {
        let candidates: Vec<LiveEndpoint> = self
            .graph
            .signals(Some(pattern.signal()))
            .into_iter()
            .filter(|e| !e.hidden)
            .collect();

        match overrides.and_then(|o| o.get(pattern.device())) {
            Some(device_name) => {
                let exact: Vec<LiveEndpoint> = candidates
                    .into_iter()
                    .filter(|e| &e.device_name == device_name)
                    .collect();
                if exact.len() > 1 {
                    warn!(
                        pattern = %pattern,
                        device = %device_name,
                        matches = exact.len(),
                        "Overridden device name is ambiguous, skipping"
                    );
                    return Vec::new();
                }
                exact
            }
            None => {
                debug!(pattern = %pattern, matches = candidates.len(), "Wildcard resolution");
                candidates
            }
        }
    }

    /// Visible live devices called `name`, after applying overrides.
    pub fn resolve_device(&self, name: &str, overrides: Option<&DeviceOverrides>) -> Vec<LiveDevice> {
        let wanted = overrides
            .and_then(|o| o.get(name))
            .map(String::as_str)
            .unwrap_or(name);
        self.graph
            .devices()
            .into_iter()
            .filter(|d| !d.hidden && d.name == wanted)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;

    fn sample_graph() -> MemoryGraph {
        let graph = MemoryGraph::new();
        for name in ["synth.1", "synth.2"] {
            let dev = graph.add_device(name);
            graph.add_signal(dev, "volume").unwrap();
        }
        let hidden = graph.add_hidden_device("monitor");
        graph.add_signal(hidden, "volume").unwrap();
        let other = graph.add_device("filter");
        graph.add_signal(other, "cutoff").unwrap();
        graph
    }

    #[test]
    fn test_wildcard_matches_every_visible_device() {
        let graph = sample_graph();
        let resolver = EndpointResolver::new(&graph);
        let found = resolver.resolve(&EndpointPattern::parse("*/volume").unwrap(), None);
        let names: Vec<String> = found.iter().map(|e| e.full_name()).collect();
        assert_eq!(names, vec!["synth.1/volume", "synth.2/volume"]);
    }

    #[test]
    fn test_override_requires_exact_device() {
        let graph = sample_graph();
        let resolver = EndpointResolver::new(&graph);
        let mut overrides = DeviceOverrides::new();
        overrides.insert("synth".to_string(), "synth.2".to_string());
        let found = resolver.resolve(&EndpointPattern::parse("synth/volume").unwrap(), Some(&overrides));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].device_name, "synth.2");

        overrides.insert("synth".to_string(), "monitor".to_string());
        let hidden = resolver.resolve(&EndpointPattern::parse("synth/volume").unwrap(), Some(&overrides));
        assert!(hidden.is_empty(), "hidden devices never resolve");
    }

    #[test]
    fn test_unmatched_signal_resolves_to_nothing() {
        let graph = sample_graph();
        let resolver = EndpointResolver::new(&graph);
        assert!(resolver
            .resolve(&EndpointPattern::parse("synth/pan").unwrap(), None)
            .is_empty());
    }

    #[test]
    fn test_resolve_device_applies_overrides() {
        let graph = sample_graph();
        let resolver = EndpointResolver::new(&graph);
        assert_eq!(resolver.resolve_device("filter", None).len(), 1);
        assert!(resolver.resolve_device("monitor", None).is_empty());
    }
}
