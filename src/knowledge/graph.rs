//! Static dependency graph between knowledge sources.
//!
//! Source B depends on source A when B reads a field A writes. Fields the
//! engine derives itself (the gate's `route`) inherit the producers of the
//! fields they are derived from. The graph is resolved into levels with
//! Kahn's algorithm: level 0 has no dependencies, level N depends only on
//! levels below N.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::blackboard::Field;
use crate::error::RegistryError;

use super::SourceDescriptor;

/// Levels of sources, each level internally ordered by priority (desc) then
/// name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    levels: Vec<Vec<String>>,
    level_of: HashMap<String, usize>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build and layer the graph.
    ///
    /// `derived` lists engine-written fields and the fields they are computed
    /// from.
    pub fn build(descriptors: &[&SourceDescriptor], derived: &[(Field, &[Field])]) -> Result<Self, RegistryError> {
        let mut producers: HashMap<Field, Vec<&str>> = HashMap::new();
        for d in descriptors {
            for field in &d.outputs {
                producers.entry(*field).or_default().push(d.name.as_str());
            }
        }

        // Fields a read of `field` ultimately waits on.
        let upstream = |field: Field| -> Vec<Field> {
            match derived.iter().find(|(f, _)| *f == field) {
                Some((_, from)) => from.to_vec(),
                None => vec![field],
            }
        };

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for d in descriptors {
            let deps = dependencies.entry(d.name.clone()).or_default();
            for input in &d.inputs {
                for field in upstream(*input) {
                    for producer in producers.get(&field).into_iter().flatten() {
                        if *producer != d.name {
                            deps.insert(producer.to_string());
                        }
                    }
                }
            }
        }

        let priority: HashMap<&str, i32> = descriptors.iter().map(|d| (d.name.as_str(), d.priority)).collect();
        let levels = Self::resolve(&dependencies, &priority)?;
        let level_of = levels
            .iter()
            .enumerate()
            .flat_map(|(i, level)| level.iter().map(move |name| (name.clone(), i)))
            .collect();

        Ok(Self {
            levels,
            level_of,
            dependencies,
        })
    }

    /// Kahn's algorithm, one level per pass.
    fn resolve(
        dependencies: &BTreeMap<String, BTreeSet<String>>,
        priority: &HashMap<&str, i32>,
    ) -> Result<Vec<Vec<String>>, RegistryError> {
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

        for (name, deps) in dependencies {
            in_degree.insert(name.as_str(), deps.len());
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut levels = Vec::new();
        while !queue.is_empty() {
            let mut level: Vec<&str> = queue.drain(..).collect();
            for name in &level {
                for dependent in dependents.get(name).into_iter().flatten() {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
            level.sort_by(|a, b| {
                let pa = priority.get(a).copied().unwrap_or(0);
                let pb = priority.get(b).copied().unwrap_or(0);
                pb.cmp(&pa).then_with(|| a.cmp(b))
            });
            levels.push(level.into_iter().map(str::to_string).collect());
        }

        let remaining: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        if !remaining.is_empty() {
            return Err(RegistryError::CircularDependency(remaining));
        }

        Ok(levels)
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn level_of(&self, name: &str) -> Option<usize> {
        self.level_of.get(name).copied()
    }

    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, priority: i32, inputs: &[Field], outputs: &[Field]) -> SourceDescriptor {
        SourceDescriptor::new(name)
            .priority(priority)
            .inputs(inputs.iter().copied())
            .outputs(outputs.iter().copied())
    }

    const A: Field = Field::new("a");
    const B: Field = Field::new("b");
    const C: Field = Field::new("c");
    const D: Field = Field::new("d");

    #[test]
    fn test_levels_follow_field_flow() {
        let s1 = source("first", 1, &[A], &[B]);
        let s2 = source("second_low", 1, &[B], &[C]);
        let s3 = source("second_high", 9, &[B], &[D]);
        let s4 = source("third", 1, &[C, D], &[Field::new("e")]);
        let graph = DependencyGraph::build(&[&s4, &s2, &s1, &s3], &[]).unwrap();
        assert_eq!(
            graph.levels(),
            &[
                vec!["first".to_string()],
                vec!["second_high".to_string(), "second_low".to_string()],
                vec!["third".to_string()],
            ]
        );
        assert_eq!(graph.level_of("third"), Some(2));
    }

    #[test]
    fn test_derived_field_inherits_producers() {
        let scorer = source("scorer", 1, &[A], &[B]);
        let reader = source("reader", 1, &[Field::ROUTE], &[C]);
        let derived: [(Field, &[Field]); 1] = [(Field::ROUTE, &[B])];
        let graph = DependencyGraph::build(&[&scorer, &reader], &derived).unwrap();
        assert_eq!(graph.level_of("reader"), Some(1));
        assert!(graph.dependencies("reader").unwrap().contains("scorer"));
    }

    #[test]
    fn test_cycle_detected() {
        let s1 = source("x", 1, &[A], &[B]);
        let s2 = source("y", 1, &[B], &[A]);
        let err = DependencyGraph::build(&[&s1, &s2], &[]).unwrap_err();
        match err {
            RegistryError::CircularDependency(names) => {
                assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
