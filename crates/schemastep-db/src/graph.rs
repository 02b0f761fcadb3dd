use std::collections::{BTreeMap, BTreeSet};

use schemastep_common::{Error, Result};

use crate::migration::{Migration, MigrationKey};
use crate::state::ProjectState;

/// All known migrations and their dependency edges.
///
/// Construction validates that every dependency exists and that the graph is
/// acyclic, so plans built from it are always well-ordered.
#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
    nodes: BTreeMap<MigrationKey, Migration>,
}

impl MigrationGraph {
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        for migration in migrations {
            let key = migration.key.clone();
            if nodes.insert(key.clone(), migration).is_some() {
                return Err(Error::Other(format!("duplicate migration {key}")));
            }
        }

        for migration in nodes.values() {
            for dep in &migration.dependencies {
                if !nodes.contains_key(dep) {
                    return Err(Error::UnknownMigration(format!(
                        "{dep} (dependency of {})",
                        migration.key
                    )));
                }
            }
        }

        let graph = Self { nodes };
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn get(&self, key: &MigrationKey) -> Result<&Migration> {
        self.nodes
            .get(key)
            .ok_or_else(|| Error::UnknownMigration(key.to_string()))
    }

    /// Resolve a migration in `app_label` by exact name or unique prefix
    /// (`0012` finds `0012_alter_question_closed_at_alter_question_resolved_at`).
    pub fn resolve(&self, app_label: &str, name: &str) -> Result<&MigrationKey> {
        let exact = MigrationKey::new(app_label, name);
        if let Some((key, _)) = self.nodes.get_key_value(&exact) {
            return Ok(key);
        }

        let mut matches = self
            .nodes
            .keys()
            .filter(|k| k.app_label == app_label && k.name.starts_with(name));
        match (matches.next(), matches.next()) {
            (Some(key), None) => Ok(key),
            (Some(_), Some(_)) => Err(Error::Other(format!(
                "more than one migration in {app_label} matches '{name}'"
            ))),
            (None, _) => Err(Error::UnknownMigration(exact.to_string())),
        }
    }

    /// Migrations nothing else depends on.
    pub fn leaves(&self) -> Vec<&MigrationKey> {
        let depended: BTreeSet<&MigrationKey> = self
            .nodes
            .values()
            .flat_map(|m| m.dependencies.iter())
            .collect();
        self.nodes
            .keys()
            .filter(|k| !depended.contains(k))
            .collect()
    }

    /// Migrations that list `key` as a direct dependency.
    pub fn dependants(&self, key: &MigrationKey) -> Vec<&MigrationKey> {
        self.nodes
            .values()
            .filter(|m| m.dependencies.contains(key))
            .map(|m| &m.key)
            .collect()
    }

    /// `target` and all its ancestors, dependencies first.
    pub fn forwards_plan(&self, target: &MigrationKey) -> Result<Vec<&Migration>> {
        self.get(target)?;
        let mut seen = BTreeSet::new();
        let mut plan = Vec::new();
        self.visit(target, &mut seen, &mut plan);
        Ok(plan)
    }

    /// Every migration, dependencies first, in a stable order.
    pub fn full_plan(&self) -> Vec<&Migration> {
        let mut seen = BTreeSet::new();
        let mut plan = Vec::new();
        for leaf in self.leaves() {
            self.visit(leaf, &mut seen, &mut plan);
        }
        plan
    }

    /// Schema state with every migration before `target` applied, i.e. the
    /// state `target` expects to start from.
    pub fn pre_state(&self, target: &MigrationKey) -> Result<ProjectState> {
        let mut state = ProjectState::new();
        for migration in self.forwards_plan(target)? {
            if &migration.key == target {
                break;
            }
            migration.mutate_state(&mut state)?;
        }
        Ok(state)
    }

    fn visit<'a>(
        &'a self,
        key: &MigrationKey,
        seen: &mut BTreeSet<&'a MigrationKey>,
        plan: &mut Vec<&'a Migration>,
    ) {
        let Some((key, migration)) = self.nodes.get_key_value(key) else {
            return;
        };
        if !seen.insert(key) {
            return;
        }
        for dep in &migration.dependencies {
            self.visit(dep, seen, plan);
        }
        plan.push(migration);
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn walk<'a>(
            graph: &'a MigrationGraph,
            key: &'a MigrationKey,
            marks: &mut BTreeMap<&'a MigrationKey, Mark>,
        ) -> Result<()> {
            match marks.get(key) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(Error::CircularDependency(key.to_string())),
                None => {}
            }
            marks.insert(key, Mark::Visiting);
            if let Some(migration) = graph.nodes.get(key) {
                for dep in &migration.dependencies {
                    walk(graph, dep, marks)?;
                }
            }
            marks.insert(key, Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        for key in self.nodes.keys() {
            walk(self, key, &mut marks)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &[&Migration]) -> Vec<String> {
        plan.iter().map(|m| m.key.name.clone()).collect()
    }

    #[test]
    fn forwards_plan_orders_dependencies_first() {
        let graph = MigrationGraph::new([
            Migration::new("questions", "0012_b").depends_on("questions", "0011_a"),
            Migration::new("questions", "0001_initial"),
            Migration::new("questions", "0011_a").depends_on("questions", "0001_initial"),
        ])
        .unwrap();

        let target = MigrationKey::new("questions", "0012_b");
        let plan = graph.forwards_plan(&target).unwrap();
        assert_eq!(names(&plan), ["0001_initial", "0011_a", "0012_b"]);
        assert_eq!(graph.leaves(), [&target]);
    }

    #[test]
    fn cycles_are_rejected() {
        let err = MigrationGraph::new([
            Migration::new("questions", "a").depends_on("questions", "b"),
            Migration::new("questions", "b").depends_on("questions", "a"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::CircularDependency(_)));
    }

    #[test]
    fn dangling_dependency_is_rejected() {
        let err = MigrationGraph::new([
            Migration::new("questions", "0012").depends_on("questions", "0011")
        ])
        .unwrap_err();
        assert!(matches!(err, Error::UnknownMigration(_)));
    }

    #[test]
    fn resolve_accepts_unique_prefix() {
        let graph = MigrationGraph::new([
            Migration::new("questions", "0001_initial"),
            Migration::new("questions", "0002_more").depends_on("questions", "0001_initial"),
        ])
        .unwrap();

        assert_eq!(graph.resolve("questions", "0002").unwrap().name, "0002_more");
        assert!(graph.resolve("questions", "000").is_err());
        assert!(matches!(
            graph.resolve("scoring", "0001").unwrap_err(),
            Error::UnknownMigration(_)
        ));
    }

    #[test]
    fn full_plan_covers_independent_branches() {
        let graph = MigrationGraph::new([
            Migration::new("questions", "0001_initial"),
            Migration::new("scoring", "0001_initial").depends_on("questions", "0001_initial"),
            Migration::new("questions", "0002_more").depends_on("questions", "0001_initial"),
        ])
        .unwrap();

        let plan = graph.full_plan();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].key, MigrationKey::new("questions", "0001_initial"));
        assert_eq!(
            graph.dependants(&MigrationKey::new("questions", "0001_initial")).len(),
            2
        );
    }
}
