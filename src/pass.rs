// This module is the contract between the back end and the machine-independent
// optimisation pipeline. Passes implement OptimizationPass (a stable name and
// a run method reporting whether useful work was done) and are assembled into
// a PassPipeline from a definition array of {pass, alias, dependency} triples.
// The constructor validates the array: a dependency must appear earlier in the
// array, duplicate passes are allowed when an alias distinguishes their log
// output, and the two names reserved for ad-hoc debugger dumps are rejected.
// The pipeline consults the session's should-stop flag between passes only;
// a pass that has started always runs to completion so the graph is never
// observed in a partial state. When a visualizer is attached the pipeline
// dumps the graph before and after every pass.

//! Optimisation pass contract and pipeline.

use std::io::Write;

use crate::core::{CompilationSession, CompileError, CompileResult};
use crate::graph::HGraph;
use crate::visualizer::{HGraphVisualizer, DEBUG_GRAPH_PASS_NAME, DEBUG_PASS_NAME};
use hashbrown::HashSet;
use log::{debug, trace};

/// A machine-independent optimisation over the graph.
pub trait OptimizationPass {
    /// Stable identifier used in logs and visualizer records.
    fn name(&self) -> &'static str;
    /// Runs the pass; returns whether it changed the graph.
    fn run(&mut self, graph: &mut HGraph<'_>) -> bool;
}

/// One entry of the pipeline definition array.
pub struct PassDef {
    pub pass: Box<dyn OptimizationPass>,
    /// Distinguishes duplicate passes in logs, e.g.
    /// `"instruction_simplifier$after_inlining"`.
    pub alias: Option<&'static str>,
    /// Name of a pass whose analysis output this pass reads; must appear
    /// earlier in the array.
    pub dependency: Option<&'static str>,
}

impl PassDef {
    pub fn new(pass: Box<dyn OptimizationPass>) -> Self {
        Self { pass, alias: None, dependency: None }
    }

    pub fn with_alias(pass: Box<dyn OptimizationPass>, alias: &'static str) -> Self {
        Self { pass, alias: Some(alias), dependency: None }
    }

    pub fn with_dependency(pass: Box<dyn OptimizationPass>, dependency: &'static str) -> Self {
        Self { pass, alias: None, dependency: Some(dependency) }
    }

    /// The name this entry appears under in logs and dumps.
    pub fn log_name(&self) -> &'static str {
        self.alias.unwrap_or_else(|| self.pass.name())
    }
}

/// Runs a validated sequence of optimisation passes.
pub struct PassPipeline<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
    defs: Vec<PassDef>,
}

impl<'s, 'arena> PassPipeline<'s, 'arena> {
    pub fn new(session: &'s CompilationSession<'arena>, defs: Vec<PassDef>) -> CompileResult<Self> {
        let mut seen: HashSet<&'static str> = HashSet::new();
        for def in &defs {
            let name = def.log_name();
            if name == DEBUG_PASS_NAME || name == DEBUG_GRAPH_PASS_NAME {
                return Err(CompileError::Pipeline {
                    reason: format!("pass name {:?} is reserved for debugger dumps", name),
                });
            }
            if let Some(dependency) = def.dependency {
                if !seen.contains(dependency) {
                    return Err(CompileError::Pipeline {
                        reason: format!(
                            "pass {:?} depends on {:?} which does not run before it",
                            name, dependency
                        ),
                    });
                }
            }
            seen.insert(def.pass.name());
            seen.insert(name);
        }
        Ok(Self { session, defs })
    }

    /// Runs every pass in definition order. Returns whether any pass changed
    /// the graph. Stops between passes when the session requests it.
    pub fn run_all<W: Write>(
        &mut self,
        graph: &mut HGraph<'_>,
        mut visualizer: Option<&mut HGraphVisualizer<'_, W>>,
    ) -> CompileResult<bool> {
        let mut changed = false;
        for def in &mut self.defs {
            if self.session.should_stop() {
                debug!("pipeline stopped before {}", def.log_name());
                break;
            }
            changed |= Self::run_one(def, graph, visualizer.as_deref_mut())?;
        }
        Ok(changed)
    }

    /// Runs the single pass registered under `name` (alias first, then the
    /// pass's own name).
    pub fn run_pass<W: Write>(
        &mut self,
        name: &str,
        graph: &mut HGraph<'_>,
        visualizer: Option<&mut HGraphVisualizer<'_, W>>,
    ) -> CompileResult<bool> {
        let def = self
            .defs
            .iter_mut()
            .find(|d| d.log_name() == name || d.pass.name() == name)
            .ok_or_else(|| CompileError::Pipeline {
                reason: format!("no pass named {:?}", name),
            })?;
        Self::run_one(def, graph, visualizer)
    }

    fn run_one<W: Write>(
        def: &mut PassDef,
        graph: &mut HGraph<'_>,
        visualizer: Option<&mut HGraphVisualizer<'_, W>>,
    ) -> CompileResult<bool> {
        let name = def.log_name();
        if let Some(v) = visualizer {
            v.dump_graph(graph, name, false).map_err(io_error)?;
            trace!("running {}", name);
            let changed = def.pass.run(graph);
            debug!("{}: {}", name, if changed { "changed" } else { "no change" });
            v.dump_graph(graph, name, true).map_err(io_error)?;
            Ok(changed)
        } else {
            trace!("running {}", name);
            let changed = def.pass.run(graph);
            debug!("{}: {}", name, if changed { "changed" } else { "no change" });
            Ok(changed)
        }
    }
}

fn io_error(error: std::io::Error) -> CompileError {
    CompileError::Pipeline { reason: format!("visualizer output failed: {}", error) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompilationSession;
    use bumpalo::Bump;

    struct CountingPass {
        name: &'static str,
        runs: std::rc::Rc<std::cell::Cell<u32>>,
        reports_change: bool,
    }

    impl OptimizationPass for CountingPass {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run(&mut self, _graph: &mut HGraph<'_>) -> bool {
            self.runs.set(self.runs.get() + 1);
            self.reports_change
        }
    }

    fn counting(
        name: &'static str,
        runs: &std::rc::Rc<std::cell::Cell<u32>>,
        reports_change: bool,
    ) -> Box<dyn OptimizationPass> {
        Box::new(CountingPass { name, runs: runs.clone(), reports_change })
    }

    #[test]
    fn test_runs_in_order_and_reports_change() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let runs = std::rc::Rc::new(std::cell::Cell::new(0));

        let defs = vec![
            PassDef::new(counting("dead_code_elimination", &runs, false)),
            PassDef::new(counting("instruction_simplifier", &runs, true)),
        ];
        let mut pipeline = PassPipeline::new(&session, defs).unwrap();
        let changed = pipeline.run_all::<Vec<u8>>(&mut graph, None).unwrap();
        assert!(changed);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_duplicate_pass_distinguished_by_alias() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let runs = std::rc::Rc::new(std::cell::Cell::new(0));

        let defs = vec![
            PassDef::new(counting("instruction_simplifier", &runs, false)),
            PassDef::with_alias(
                counting("instruction_simplifier", &runs, false),
                "instruction_simplifier$after_inlining",
            ),
        ];
        let pipeline = PassPipeline::new(&session, defs).unwrap();
        assert_eq!(pipeline.defs[1].log_name(), "instruction_simplifier$after_inlining");
    }

    #[test]
    fn test_dependency_must_run_earlier() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let runs = std::rc::Rc::new(std::cell::Cell::new(0));

        let defs = vec![PassDef::with_dependency(
            counting("gvn", &runs, false),
            "side_effects_analysis",
        )];
        assert!(PassPipeline::new(&session, defs).is_err());

        let defs = vec![
            PassDef::new(counting("side_effects_analysis", &runs, false)),
            PassDef::with_dependency(counting("gvn", &runs, false), "side_effects_analysis"),
        ];
        assert!(PassPipeline::new(&session, defs).is_ok());
    }

    #[test]
    fn test_reserved_names_rejected() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let runs = std::rc::Rc::new(std::cell::Cell::new(0));

        let defs = vec![PassDef::new(counting("debug", &runs, false))];
        assert!(PassPipeline::new(&session, defs).is_err());
    }

    #[test]
    fn test_stop_between_passes() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let runs = std::rc::Rc::new(std::cell::Cell::new(0));

        let defs = vec![
            PassDef::new(counting("dead_code_elimination", &runs, false)),
            PassDef::new(counting("instruction_simplifier", &runs, false)),
        ];
        let mut pipeline = PassPipeline::new(&session, defs).unwrap();
        session.request_stop();
        pipeline.run_all::<Vec<u8>>(&mut graph, None).unwrap();
        assert_eq!(runs.get(), 0);
    }
}
