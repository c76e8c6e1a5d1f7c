//! Coloring, global pull-through, three-tier expansion, and filter lowering.
//!
//! Grounded on `ami/graphkit_wrapper.py::Graph::compile` (`_color_nodes`,
//! `_collect_global_inputs`, `_expand_global_operations`,
//! `_generate_filter_node`), adapted from networkx's `DiGraph` to the
//! operation-table representation in [`crate::Graph`], and from dynamic
//! `nx.algorithms.dag.ancestors`/`all_simple_paths` calls to the equivalent
//! walks in [`crate::Graph::ancestors`]/[`crate::Graph::simple_paths`].

use std::collections::{HashMap, HashSet, VecDeque};

use ami_types::{Color, Operation, OperationName};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::plan::CompiledGraph;

impl Graph {
    /// Compiles this logical graph into a three-tier [`CompiledGraph`].
    ///
    /// `num_workers` and `num_local_collectors` size the window split at
    /// each tier (spec.md §4.1 step 3); `version` is stamped onto the
    /// result for the version-fence policy downstream. Compilation never
    /// mutates `self` — on error, the caller simply discards the attempt
    /// and keeps running the previous [`CompiledGraph`].
    pub fn compile(
        &self,
        num_workers: usize,
        num_local_collectors: usize,
        version: u64,
    ) -> Result<CompiledGraph, GraphError> {
        assert!(num_workers >= 1 && num_local_collectors >= 1, "tier sizes must be positive");

        if let Some(bad) = self.find_cycle() {
            return Err(GraphError::Cycle(bad));
        }

        let mut work = self.clone();
        let guarded_by_logical = work.lower_filters();

        let (colors, mut root_global) = work.color_operations();
        work.collect_global_inputs(&colors, &mut root_global)?;

        let mut worker_ops = Vec::new();
        let mut local_collector_ops = Vec::new();
        let mut global_collector_ops = Vec::new();
        let mut worker_outputs_total = Vec::new();
        let mut local_outputs_total = Vec::new();
        let mut expanded_children: HashMap<OperationName, [OperationName; 3]> = HashMap::new();

        for (name, op) in work.operations.iter() {
            if root_global.contains(name) {
                continue;
            }
            match colors.get(name).copied().unwrap_or(Color::Worker) {
                Color::Worker => worker_ops.push(op.clone()),
                Color::GlobalCollector => global_collector_ops.push(op.clone()),
                Color::LocalCollector => unreachable!("pre-expansion coloring never assigns localCollector"),
            }
        }

        for name in &root_global {
            let op = &work.operations[name];
            let n = op.window();

            let worker_name = name.at(Color::Worker);
            let worker_outputs: Vec<_> = op.outputs().iter().map(|v| v.colored(Color::Worker)).collect();
            let worker_n = n.map(|n| (n / num_workers).max(1));
            let g_worker = op.retargeted(worker_name.clone(), op.inputs().to_vec(), worker_outputs.clone(), worker_n);

            let local_name = name.at(Color::LocalCollector);
            let local_outputs: Vec<_> =
                op.outputs().iter().map(|v| v.colored(Color::LocalCollector)).collect();
            let local_n = n.map(|n| (n / num_local_collectors).max(1));
            let g_local =
                op.retargeted(local_name.clone(), worker_outputs.clone(), local_outputs.clone(), local_n);

            let global_name = name.at(Color::GlobalCollector);
            let global_n = n.map(|n| ((n / num_workers) * num_workers).max(1));
            let g_global =
                op.retargeted(global_name.clone(), local_outputs.clone(), op.outputs().to_vec(), global_n);

            worker_outputs_total.extend(worker_outputs);
            local_outputs_total.extend(local_outputs);

            worker_ops.push(g_worker);
            local_collector_ops.push(g_local);
            global_collector_ops.push(g_global);

            expanded_children.insert(name.clone(), [worker_name, local_name, global_name]);
        }

        let mut guarded_by = HashMap::new();
        for (orig_name, filter_name) in guarded_by_logical {
            match expanded_children.get(&orig_name) {
                Some([w, l, g]) => {
                    guarded_by.insert(w.clone(), filter_name.clone());
                    guarded_by.insert(l.clone(), filter_name.clone());
                    guarded_by.insert(g.clone(), filter_name.clone());
                }
                None => {
                    guarded_by.insert(orig_name, filter_name);
                }
            }
        }

        let mut inputs = HashMap::new();
        let mut outputs = HashMap::new();
        inputs.insert(Color::Worker, work.leaf_input_variables());
        outputs.insert(Color::Worker, worker_outputs_total);
        inputs.insert(Color::LocalCollector, outputs[&Color::Worker].clone());
        outputs.insert(Color::LocalCollector, local_outputs_total);
        inputs.insert(Color::GlobalCollector, outputs[&Color::LocalCollector].clone());
        outputs.insert(Color::GlobalCollector, work.leaf_output_variables());

        Ok(CompiledGraph {
            version,
            worker: worker_ops,
            local_collector: local_collector_ops,
            global_collector: global_collector_ops,
            inputs,
            outputs,
            guarded_by,
        })
    }

    /// Assigns each operation a tentative `Worker`/`GlobalCollector` color
    /// by walking every simple path from a leaf input to a leaf output, and
    /// identifies the "root" global operations: those with `is_global() ==
    /// true` and no global ancestor of their own, which are the ones that
    /// actually get expanded into three tiers (a global operation nested
    /// downstream of another just inherits `GlobalCollector` coloring).
    ///
    /// Ties are resolved by the more-downstream color winning: once any
    /// path colors a vertex `GlobalCollector`, it stays that color even if
    /// another, shorter path would have colored it `Worker`.
    fn color_operations(&self) -> (HashMap<OperationName, Color>, HashSet<OperationName>) {
        let root_global: HashSet<OperationName> = self
            .operations
            .values()
            .filter(|op| op.is_global())
            .filter(|op| !self.ancestors(op.name()).iter().any(|a| self.operations[a].is_global()))
            .map(|op| op.name().clone())
            .collect();

        let mut colors: HashMap<OperationName, Color> = HashMap::new();
        for input in self.leaf_input_variables() {
            for output in self.leaf_output_variables() {
                for path in self.simple_paths(&input.name, &output.name) {
                    let mut color = Color::Worker;
                    for op_name in &path {
                        // A root global operation is itself the last worker-side
                        // vertex on the path (it is about to be replaced by its
                        // own worker/localCollector/globalCollector expansion);
                        // only operations strictly downstream of it pick up
                        // `GlobalCollector` coloring.
                        match colors.get(op_name) {
                            Some(Color::GlobalCollector) => {}
                            _ => {
                                colors.insert(op_name.clone(), color);
                            }
                        }
                        if root_global.contains(op_name) {
                            color = Color::GlobalCollector;
                        }
                    }
                }
            }
        }
        // Operations reachable by no leaf-to-leaf path at all (a graph
        // consisting of a single operation, for instance) default to worker.
        for name in self.operations.keys() {
            colors.entry(name.clone()).or_insert(Color::Worker);
        }
        (colors, root_global)
    }

    /// For every operation colored `GlobalCollector`, synthesizes a
    /// `PickN(1)` on any of its boundary inputs that is a genuine graph
    /// source (not itself produced by another operation), and rewires the
    /// consumer onto the pick's output. The synthesized pick is itself
    /// marked as a root global operation, so it gets the same three-tier
    /// expansion treatment — this is what actually ships one representative
    /// sample of a worker-only input up to the globalCollector tier.
    fn collect_global_inputs(
        &mut self,
        colors: &HashMap<OperationName, Color>,
        root_global: &mut HashSet<OperationName>,
    ) -> Result<(), GraphError> {
        let leaf_inputs: HashSet<String> =
            self.leaf_input_variables().into_iter().map(|v| v.name).collect();

        let candidates: Vec<OperationName> = colors
            .iter()
            .filter(|(_, c)| **c == Color::GlobalCollector)
            .map(|(n, _)| n.clone())
            .collect();

        for name in candidates {
            let op = self.operations[&name].clone();
            let mut new_inputs = op.inputs().to_vec();
            for input in op.inputs().to_vec() {
                if !leaf_inputs.contains(&input.name) {
                    continue;
                }
                let pick_name: OperationName = format!("{}_pick1", input.name).into();
                if self.operations.contains_key(&pick_name) {
                    continue;
                }
                let picked = input.colored(Color::GlobalCollector);
                let pick = Operation::PickN {
                    name: pick_name.clone(),
                    inputs: vec![input.clone()],
                    outputs: vec![picked.clone()],
                    condition_needs: Vec::new(),
                    n: 1,
                    is_global: true,
                };
                self.insert_synthetic(pick)?;
                root_global.insert(pick_name);
                for slot in new_inputs.iter_mut() {
                    if slot.name == input.name {
                        *slot = picked.clone();
                    }
                }
            }
            let rewired = self.operations[&name].with_inputs(new_inputs);
            self.operations.insert(name, rewired);
        }
        Ok(())
    }

    /// Determines, for every operation downstream of a filter, which filter
    /// gates it. The gated region starts at a filter's immediate consumers
    /// and extends until either a variable with two or more consumers (a
    /// fan-in, where independently-filtered branches reconverge) or a final
    /// graph output is reached. An operation already gated by one filter is
    /// never re-wrapped by another reached through a different path.
    fn lower_filters(&self) -> HashMap<OperationName, OperationName> {
        let mut guarded: HashMap<OperationName, OperationName> = HashMap::new();
        let filter_names: Vec<OperationName> = self
            .operations
            .values()
            .filter(|op| matches!(op, Operation::Filter { .. }))
            .map(|op| op.name().clone())
            .collect();

        for filter_name in filter_names {
            let filter = &self.operations[&filter_name];
            let mut queue: VecDeque<OperationName> = VecDeque::new();
            for out in filter.outputs() {
                queue.extend(self.consumers_of(&out.name).into_iter().cloned());
            }
            let mut visited = HashSet::new();
            while let Some(op_name) = queue.pop_front() {
                if !visited.insert(op_name.clone()) {
                    continue;
                }
                if guarded.contains_key(&op_name) {
                    continue;
                }
                guarded.insert(op_name.clone(), filter_name.clone());
                let op = &self.operations[&op_name];
                for out in op.outputs() {
                    let consumers = self.consumers_of(&out.name);
                    if consumers.len() >= 2 {
                        continue;
                    }
                    queue.extend(consumers.into_iter().cloned());
                }
            }
        }
        guarded
    }
}
