//! Plugin ordering and dispatch.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::{LifecyclePhase, Next, Plugin, PluginContext, Terminal};
use crate::route::OperationType;
use crate::types::Response;
use crate::{HuginnError, Result};

/// Validated, ordered plugin set.
///
/// Order is computed once at construction: a stable sort by
/// [`Plugin::priority`], then a depth-first topological sort so every
/// plugin follows its dependencies. That order drives lifecycle dispatch,
/// `after_response`, and middleware nesting (earlier wraps later).
#[derive(Clone)]
pub struct PluginExecutor {
    plugins: Arc<[Arc<dyn Plugin>]>,
}

impl PluginExecutor {
    /// Validate and order `plugins`.
    ///
    /// # Errors
    ///
    /// - [`HuginnError::DuplicatePlugin`] when two plugins share a name.
    /// - [`HuginnError::MissingDependency`] when a dependency is not registered.
    /// - [`HuginnError::CircularDependency`] when dependencies form a cycle.
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for plugin in &plugins {
            if !seen.insert(plugin.name().to_owned()) {
                return Err(HuginnError::DuplicatePlugin(plugin.name().to_owned()));
            }
        }
        for plugin in &plugins {
            for dep in plugin.dependencies() {
                if !seen.contains(*dep) {
                    return Err(HuginnError::MissingDependency {
                        plugin: plugin.name().to_owned(),
                        dependency: (*dep).to_owned(),
                    });
                }
            }
        }

        let mut by_priority = plugins;
        by_priority.sort_by_key(|p| p.priority());
        let sorted = topological_sort(&by_priority)?;
        debug!(
            order = ?sorted.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "plugin order resolved"
        );
        Ok(Self {
            plugins: sorted.into(),
        })
    }

    /// An executor with no plugins.
    pub fn empty() -> Self {
        Self {
            plugins: Arc::from(Vec::new()),
        }
    }

    /// Every plugin, in execution order.
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Plugins taking part in `operation`, in execution order.
    pub fn applicable(&self, operation: OperationType) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .filter(|p| p.operations().contains(&operation))
            .cloned()
            .collect()
    }

    /// Run the middleware onion around `terminal`, then every applicable
    /// `after_response` hook.
    #[instrument(skip_all, fields(operation = operation.as_str(), key = %ctx.query_key))]
    pub async fn execute_middleware(
        &self,
        operation: OperationType,
        ctx: &mut PluginContext,
        terminal: &dyn Terminal,
    ) -> Result<Response> {
        ctx.plugins = self.plugins.clone();
        let chain = self.applicable(operation);

        let mut response = Next::new(&chain, terminal).run(ctx).await?;
        for plugin in &chain {
            response = plugin.after_response(ctx, response)?;
        }
        Ok(response)
    }

    /// Dispatch `on_mount` or `on_unmount` to applicable plugins.
    pub fn execute_lifecycle(
        &self,
        phase: LifecyclePhase,
        operation: OperationType,
        ctx: &mut PluginContext,
    ) -> Result<()> {
        ctx.plugins = self.plugins.clone();
        for plugin in self.applicable(operation) {
            match phase {
                LifecyclePhase::Mount => plugin.on_mount(ctx)?,
                LifecyclePhase::Unmount => plugin.on_unmount(ctx)?,
            }
        }
        Ok(())
    }

    /// Dispatch `on_update` to applicable plugins with the previous context.
    pub fn execute_update_lifecycle(
        &self,
        operation: OperationType,
        ctx: &mut PluginContext,
        prev: &PluginContext,
    ) -> Result<()> {
        ctx.plugins = self.plugins.clone();
        for plugin in self.applicable(operation) {
            plugin.on_update(ctx, prev)?;
        }
        Ok(())
    }
}

impl Default for PluginExecutor {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for PluginExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginExecutor")
            .field("plugins", &self.names())
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Depth-first topological sort. Visits plugins in input order and their
/// dependencies in declaration order, so independent plugins keep their
/// relative (priority) order.
fn topological_sort(plugins: &[Arc<dyn Plugin>]) -> Result<Vec<Arc<dyn Plugin>>> {
    let mut marks = vec![Mark::Unvisited; plugins.len()];
    let mut stack = Vec::new();
    let mut sorted = Vec::with_capacity(plugins.len());
    for index in 0..plugins.len() {
        visit(index, plugins, &mut marks, &mut stack, &mut sorted)?;
    }
    Ok(sorted)
}

fn visit(
    index: usize,
    plugins: &[Arc<dyn Plugin>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    sorted: &mut Vec<Arc<dyn Plugin>>,
) -> Result<()> {
    match marks[index] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            let start = stack.iter().position(|&i| i == index).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..]
                .iter()
                .map(|&i| plugins[i].name().to_owned())
                .collect();
            cycle.push(plugins[index].name().to_owned());
            return Err(HuginnError::CircularDependency(cycle));
        }
        Mark::Unvisited => {}
    }

    marks[index] = Mark::Visiting;
    stack.push(index);
    for dep in plugins[index].dependencies() {
        if let Some(dep_index) = plugins.iter().position(|p| p.name() == *dep) {
            visit(dep_index, plugins, marks, stack, sorted)?;
        }
    }
    stack.pop();
    marks[index] = Mark::Done;
    sorted.push(plugins[index].clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named {
        name: &'static str,
        deps: &'static [&'static str],
        priority: i32,
    }

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.name
        }
        fn operations(&self) -> &[OperationType] {
            &[OperationType::Read]
        }
        fn dependencies(&self) -> &[&'static str] {
            self.deps
        }
        fn priority(&self) -> i32 {
            self.priority
        }
    }

    fn plugin(
        name: &'static str,
        deps: &'static [&'static str],
        priority: i32,
    ) -> Arc<dyn Plugin> {
        Arc::new(Named {
            name,
            deps,
            priority,
        })
    }

    #[test]
    fn dependencies_precede_dependents() {
        let executor = PluginExecutor::new(vec![
            plugin("optimistic", &["invalidation"], 0),
            plugin("invalidation", &[], 0),
            plugin("logger", &[], 0),
        ])
        .unwrap();
        assert_eq!(executor.names(), vec!["invalidation", "optimistic", "logger"]);
    }

    #[test]
    fn priority_orders_independent_plugins() {
        let executor = PluginExecutor::new(vec![
            plugin("late", &[], 10),
            plugin("early", &[], -10),
            plugin("middle", &[], 0),
        ])
        .unwrap();
        assert_eq!(executor.names(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn missing_dependency_is_reported() {
        let err = PluginExecutor::new(vec![plugin("optimistic", &["invalidation"], 0)])
            .err()
            .unwrap();
        assert_eq!(
            err,
            HuginnError::MissingDependency {
                plugin: "optimistic".into(),
                dependency: "invalidation".into(),
            }
        );
    }

    #[test]
    fn cycle_is_named() {
        let err = PluginExecutor::new(vec![plugin("a", &["b"], 0), plugin("b", &["a"], 0)])
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "circular plugin dependency: a -> b -> a");
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = PluginExecutor::new(vec![plugin("a", &[], 0), plugin("a", &[], 1)])
            .err()
            .unwrap();
        assert_eq!(err, HuginnError::DuplicatePlugin("a".into()));
    }
}
