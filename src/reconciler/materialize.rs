//! Materialization: turn one spec into live connections.
//!
//! Every source pattern and the destination pattern are resolved to candidate
//! endpoints; one connection is attempted per destination candidate crossed
//! with each tuple of one candidate per source. A failed combination is
//! recorded and the rest are still attempted.

use crate::document::{add_tag, ConnectionSpec, EndpointPattern};
use crate::error::GraphError;
use crate::expression;
use crate::graph::{DeviceId, Graph, LiveEndpoint, MapId, MapProperty, SignalId};
use crate::resolver::{DeviceOverrides, EndpointResolver};
use tracing::{debug, warn};

/// Result of one materialization attempt.
#[derive(Debug, Default)]
pub struct Materialization {
    /// Live connections created (or already present) for this spec.
    pub maps: Vec<MapId>,
    /// Combinations the graph refused, with their `src, ... -> dst` label.
    pub failures: Vec<(String, GraphError)>,
    /// Patterns that matched no live endpoint.
    pub unresolved: Vec<EndpointPattern>,
}

impl Materialization {
    /// All patterns resolved and at least one connection is live.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty() && !self.maps.is_empty()
    }

    /// All patterns resolved but every combination failed.
    pub fn all_failed(&self) -> bool {
        self.unresolved.is_empty() && self.maps.is_empty()
    }
}

/// Index tuples of the Cartesian product over lists of the given lengths.
fn cartesian_indices(lengths: &[usize]) -> Vec<Vec<usize>> {
    if lengths.iter().any(|l| *l == 0) {
        return Vec::new();
    }
    let mut tuples = Vec::new();
    let mut current = vec![0; lengths.len()];
    loop {
        tuples.push(current.clone());
        let mut position = lengths.len();
        loop {
            if position == 0 {
                return tuples;
            }
            position -= 1;
            current[position] += 1;
            if current[position] < lengths[position] {
                break;
            }
            current[position] = 0;
        }
    }
}

fn combination_label(sources: &[&LiveEndpoint], destination: &LiveEndpoint) -> String {
    let names: Vec<String> = sources.iter().map(|s| s.full_name()).collect();
    format!("{} -> {}", names.join(", "), destination.full_name())
}

/// Drop tuples that use one endpoint for two sources, and keep a single tuple
/// per endpoint set. Among permutations of the same set, the one whose device
/// names match the declared device parts wins; ties keep the first.
fn distinct_combinations(
    spec: &ConnectionSpec,
    candidates: &[Vec<LiveEndpoint>],
    tuples: &[Vec<usize>],
    overrides: Option<&DeviceOverrides>,
) -> Vec<Vec<usize>> {
    let declared = |source: usize, endpoint: &LiveEndpoint| {
        let device = spec.sources[source].device();
        let device = overrides
            .and_then(|o| o.get(device))
            .map_or(device, String::as_str);
        endpoint.device_name == device
    };

    let mut kept: Vec<(Vec<SignalId>, Vec<usize>, usize)> = Vec::new();
    for tuple in tuples {
        let mut ids: Vec<SignalId> = tuple
            .iter()
            .enumerate()
            .map(|(source, candidate)| candidates[source][*candidate].id)
            .collect();
        ids.sort();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            continue;
        }
        let score = tuple
            .iter()
            .enumerate()
            .filter(|(source, candidate)| declared(*source, &candidates[*source][**candidate]))
            .count();
        match kept.iter_mut().find(|(set, _, _)| *set == ids) {
            Some(entry) if score > entry.2 => {
                entry.1 = tuple.clone();
                entry.2 = score;
            }
            Some(_) => {}
            None => kept.push((ids, tuple.clone(), score)),
        }
    }
    kept.into_iter().map(|(_, tuple, _)| tuple).collect()
}

/// Attempt to materialize `spec` against the graph's current state.
pub fn materialize(
    graph: &dyn Graph,
    spec: &ConnectionSpec,
    overrides: Option<&DeviceOverrides>,
) -> Materialization {
    let resolver = EndpointResolver::new(graph);
    let mut outcome = Materialization::default();

    let source_candidates: Vec<Vec<LiveEndpoint>> = spec
        .sources
        .iter()
        .map(|pattern| resolver.resolve(pattern, overrides))
        .collect();
    let destination_candidates = resolver.resolve(&spec.destination, overrides);

    for (pattern, candidates) in spec.sources.iter().zip(&source_candidates) {
        if candidates.is_empty() {
            outcome.unresolved.push(pattern.clone());
        }
    }
    if destination_candidates.is_empty() {
        outcome.unresolved.push(spec.destination.clone());
    }
    if !outcome.unresolved.is_empty() {
        debug!(spec = %spec.label(), unresolved = outcome.unresolved.len(), "Endpoints not available yet");
        return outcome;
    }

    let lengths: Vec<usize> = source_candidates.iter().map(Vec::len).collect();
    let tuples = distinct_combinations(spec, &source_candidates, &cartesian_indices(&lengths), overrides);

    for destination in &destination_candidates {
        for tuple in &tuples {
            let chosen: Vec<&LiveEndpoint> = tuple
                .iter()
                .enumerate()
                .map(|(source, candidate)| &source_candidates[source][*candidate])
                .collect();
            if chosen.iter().any(|e| e.id == destination.id) {
                continue;
            }
            let label = combination_label(&chosen, destination);
            let ids: Vec<_> = chosen.iter().map(|e| e.id).collect();

            let map = match graph.create_map(&ids, destination.id) {
                Ok(map) => map,
                Err(e) => {
                    warn!(connection = %label, error = %e, "Failed to create connection");
                    outcome.failures.push((label, e));
                    continue;
                }
            };
            if outcome.maps.contains(&map) {
                continue;
            }

            if let Err(e) = apply_properties(graph, map, spec, &chosen, destination, overrides) {
                warn!(connection = %label, error = %e, "Failed to apply connection properties");
                outcome.failures.push((label.clone(), e));
            }
            debug!(connection = %label, map = %map, "Connection live");
            outcome.maps.push(map);
        }
    }
    outcome
}

/// Copy the spec's properties onto a live connection.
///
/// The expression goes first, with `x$N` indices rewritten to wherever the
/// graph placed each declared source.
fn apply_properties(
    graph: &dyn Graph,
    map: MapId,
    spec: &ConnectionSpec,
    sources: &[&LiveEndpoint],
    destination: &LiveEndpoint,
    overrides: Option<&DeviceOverrides>,
) -> Result<(), GraphError> {
    let live = graph.map(map).ok_or(GraphError::UnknownMap(map.0))?;

    let positions: Vec<usize> = sources
        .iter()
        .enumerate()
        .map(|(declared, endpoint)| live.source_position(endpoint.id).unwrap_or(declared))
        .collect();
    let moves = expression::index_moves(&positions);
    let expression = if moves.is_empty() {
        spec.expression.clone()
    } else {
        let remapped = expression::remap_sources(&spec.expression, &moves);
        debug!(from = %spec.expression, to = %remapped, "Remapped source indices");
        remapped
    };
    graph.set_map_property(map, MapProperty::Expression(expression))?;

    graph.set_map_property(map, MapProperty::Muted(spec.muted))?;
    graph.set_map_property(map, MapProperty::ProcessLocation(spec.process_location))?;
    graph.set_map_property(map, MapProperty::Protocol(spec.protocol))?;
    graph.set_map_property(map, MapProperty::UseInstances(spec.use_instances))?;
    graph.set_map_property(map, MapProperty::Version(spec.property_version))?;

    if let Some(scope) = &spec.scope {
        let devices = resolve_scope(graph, spec, scope, sources, destination, overrides);
        graph.set_map_property(map, MapProperty::Scope(devices))?;
    }

    for (key, value) in &spec.extra {
        graph.set_map_property(map, MapProperty::Extra(key.clone(), value.clone()))?;
    }

    let mut tags = live.properties.tags.clone();
    let mut changed = false;
    for tag in &spec.session_tags {
        changed |= add_tag(&mut tags, tag);
    }
    if changed {
        graph.set_map_property(map, MapProperty::Tags(tags))?;
    }
    Ok(())
}

/// Resolve scope device names to live devices.
///
/// A name that is the device part of a declared pattern maps to the device
/// actually used for that pattern in this combination; any other name is
/// looked up among visible live devices.
fn resolve_scope(
    graph: &dyn Graph,
    spec: &ConnectionSpec,
    scope: &[String],
    sources: &[&LiveEndpoint],
    destination: &LiveEndpoint,
    overrides: Option<&DeviceOverrides>,
) -> Vec<DeviceId> {
    let resolver = EndpointResolver::new(graph);
    let mut devices: Vec<DeviceId> = Vec::new();
    let push = |id: DeviceId, devices: &mut Vec<DeviceId>| {
        if !devices.contains(&id) {
            devices.push(id);
        }
    };

    for name in scope {
        if let Some(index) = spec.sources.iter().position(|p| p.device() == name) {
            push(sources[index].device, &mut devices);
        } else if spec.destination.device() == name {
            push(destination.device, &mut devices);
        } else if let Some(used) = sources
            .iter()
            .copied()
            .chain(std::iter::once(destination))
            .find(|e| &e.device_name == name)
        {
            push(used.device, &mut devices);
        } else {
            let found = resolver.resolve_device(name, overrides);
            if found.is_empty() {
                warn!(scope = %name, "Scope device not found, skipping");
            }
            for device in found {
                push(device.id, &mut devices);
            }
        }
    }
    devices
}
