//! Operator graph operations: wiring with arity and single-writer checks,
//! generator queries, and dependency-ordered update propagation.

use std::any::type_name;
use std::collections::BTreeSet;

use indexmap::IndexMap;

use veldt_core::{
    item_as, EnvError, Event, Item, ItemId, Layer, LinkChange, OperatorContext, OperatorError,
};

use crate::environment::Environment;

impl Environment {
    // ── Wiring ──────────────────────────────────────────────────

    /// Wire a layer as an input of an operator.
    ///
    /// Inputs form a multiset: the same layer may be wired twice. A
    /// nonzero declared input arity bounds the count.
    pub fn add_input(&mut self, operator: &ItemId, layer: &ItemId) -> Result<(), EnvError> {
        self.expect_operator(operator)?;
        self.expect_layer(layer)?;
        let arity = self.operator_arity(operator).0;
        let current = self.op_inputs.get(operator).map_or(0, Vec::len);
        if arity != 0 && current + 1 > arity {
            return Err(EnvError::ArityExceeded {
                operator: operator.clone(),
                arity,
            });
        }
        self.op_inputs
            .entry(operator.clone())
            .or_default()
            .push(layer.clone());
        self.dispatch(Event::OperatorInputChanged {
            operator: operator.clone(),
            layer: layer.clone(),
            link: LinkChange::Added,
        });
        Ok(())
    }

    /// Wire a layer as an output of an operator.
    ///
    /// Checks the declared output arity and the single-writer invariant:
    /// a layer can be the output of at most one operator. Immutable
    /// layers cannot be regenerated and are refused.
    pub fn add_output(&mut self, operator: &ItemId, layer: &ItemId) -> Result<(), EnvError> {
        self.expect_operator(operator)?;
        self.expect_layer(layer)?;
        if let Some(generator) = self.generator_of(layer) {
            if generator != *operator {
                return Err(EnvError::AlreadyGenerated {
                    layer: layer.clone(),
                    operator: generator,
                });
            }
        }
        if self.is_immutable(layer)? {
            return Err(EnvError::ImmutableLayer {
                layer: layer.clone(),
            });
        }
        let arity = self.operator_arity(operator).1;
        let current = self.op_outputs.get(operator).map_or(0, Vec::len);
        if arity != 0 && current + 1 > arity {
            return Err(EnvError::ArityExceeded {
                operator: operator.clone(),
                arity,
            });
        }
        self.op_outputs
            .entry(operator.clone())
            .or_default()
            .push(layer.clone());
        self.dispatch(Event::OperatorOutputChanged {
            operator: operator.clone(),
            layer: layer.clone(),
            link: LinkChange::Added,
        });
        Ok(())
    }

    /// Replace all inputs of an operator with a single layer.
    pub fn set_input(&mut self, operator: &ItemId, layer: &ItemId) -> Result<(), EnvError> {
        self.expect_operator(operator)?;
        self.expect_layer(layer)?;
        self.remove_inputs(operator)?;
        self.add_input(operator, layer)
    }

    /// Replace all outputs of an operator with a single layer.
    pub fn set_output(&mut self, operator: &ItemId, layer: &ItemId) -> Result<(), EnvError> {
        self.expect_operator(operator)?;
        self.expect_layer(layer)?;
        self.remove_outputs(operator)?;
        self.add_output(operator, layer)
    }

    /// Unwire a layer from an operator's inputs (all occurrences).
    pub fn remove_input(&mut self, operator: &ItemId, layer: &ItemId) -> Result<(), EnvError> {
        self.expect_operator(operator)?;
        let mut removed = false;
        if let Some(inputs) = self.op_inputs.get_mut(operator) {
            let before = inputs.len();
            inputs.retain(|l| l != layer);
            removed = inputs.len() != before;
        }
        if !removed {
            return Err(EnvError::NotFound {
                what: format!("input '{layer}' of operator '{operator}'"),
            });
        }
        self.dispatch(Event::OperatorInputChanged {
            operator: operator.clone(),
            layer: layer.clone(),
            link: LinkChange::Removed,
        });
        Ok(())
    }

    /// Unwire every input of an operator.
    pub fn remove_inputs(&mut self, operator: &ItemId) -> Result<(), EnvError> {
        self.expect_operator(operator)?;
        let inputs = self.op_inputs.shift_remove(operator).unwrap_or_default();
        let mut seen = BTreeSet::new();
        for layer in inputs {
            if seen.insert(layer.clone()) {
                self.dispatch(Event::OperatorInputChanged {
                    operator: operator.clone(),
                    layer,
                    link: LinkChange::Removed,
                });
            }
        }
        Ok(())
    }

    /// Unwire a layer from an operator's outputs (all occurrences).
    pub fn remove_output(&mut self, operator: &ItemId, layer: &ItemId) -> Result<(), EnvError> {
        self.expect_operator(operator)?;
        let mut removed = false;
        if let Some(outputs) = self.op_outputs.get_mut(operator) {
            let before = outputs.len();
            outputs.retain(|l| l != layer);
            removed = outputs.len() != before;
        }
        if !removed {
            return Err(EnvError::NotFound {
                what: format!("output '{layer}' of operator '{operator}'"),
            });
        }
        self.dispatch(Event::OperatorOutputChanged {
            operator: operator.clone(),
            layer: layer.clone(),
            link: LinkChange::Removed,
        });
        Ok(())
    }

    /// Unwire every output of an operator.
    pub fn remove_outputs(&mut self, operator: &ItemId) -> Result<(), EnvError> {
        self.expect_operator(operator)?;
        let outputs = self.op_outputs.shift_remove(operator).unwrap_or_default();
        let mut seen = BTreeSet::new();
        for layer in outputs {
            if seen.insert(layer.clone()) {
                self.dispatch(Event::OperatorOutputChanged {
                    operator: operator.clone(),
                    layer,
                    link: LinkChange::Removed,
                });
            }
        }
        Ok(())
    }

    /// The wired inputs of an operator, in wiring order.
    pub fn inputs(&self, operator: &ItemId) -> Result<&[ItemId], EnvError> {
        self.expect_operator(operator)?;
        Ok(self.op_inputs.get(operator).map_or(&[], Vec::as_slice))
    }

    /// The wired outputs of an operator, in wiring order.
    pub fn outputs(&self, operator: &ItemId) -> Result<&[ItemId], EnvError> {
        self.expect_operator(operator)?;
        Ok(self.op_outputs.get(operator).map_or(&[], Vec::as_slice))
    }

    /// The unique input of an operator with concrete type `T`.
    pub fn get_input_as<T: Item + Layer>(&self, operator: &ItemId) -> Result<&T, EnvError> {
        self.unique_edge_as::<T>(self.inputs(operator)?)
    }

    /// The unique output of an operator with concrete type `T`.
    pub fn get_output_as<T: Item + Layer>(&self, operator: &ItemId) -> Result<&T, EnvError> {
        self.unique_edge_as::<T>(self.outputs(operator)?)
    }

    fn unique_edge_as<T: Item>(&self, edges: &[ItemId]) -> Result<&T, EnvError> {
        let mut found: Option<&T> = None;
        for id in edges {
            if let Some(typed) = self.items.get(id).and_then(|item| item_as::<T>(item.as_ref())) {
                if found.is_some() {
                    return Err(EnvError::AmbiguousLookup {
                        type_name: type_name::<T>(),
                    });
                }
                found = Some(typed);
            }
        }
        found.ok_or_else(|| EnvError::NotFound {
            what: format!("edge of type {}", type_name::<T>()),
        })
    }

    // ── Generator queries ───────────────────────────────────────

    /// The operator that generates a layer, if any.
    ///
    /// Single-writer: there can be at most one.
    pub fn generator_of(&self, layer: &ItemId) -> Option<ItemId> {
        self.op_outputs
            .iter()
            .find(|(_, outputs)| outputs.iter().any(|l| l == layer))
            .map(|(op, _)| op.clone())
    }

    /// The operators that read a layer as input, in id order.
    pub fn operators_reading(&self, layer: &ItemId) -> Vec<ItemId> {
        let mut ops: Vec<ItemId> = self
            .op_inputs
            .iter()
            .filter(|(_, inputs)| inputs.iter().any(|l| l == layer))
            .map(|(op, _)| op.clone())
            .collect();
        ops.sort();
        ops
    }

    /// The layers generated from a layer: the outputs of every operator
    /// that reads it, in id order.
    pub fn layers_generated_from(&self, layer: &ItemId) -> Vec<ItemId> {
        let mut generated = BTreeSet::new();
        for op in self.operators_reading(layer) {
            if let Some(outputs) = self.op_outputs.get(&op) {
                generated.extend(outputs.iter().cloned());
            }
        }
        generated.into_iter().collect()
    }

    /// Cut a generated layer loose from its generator, destroying neither.
    ///
    /// Returns the former generator's id, or `None` when the layer was
    /// not generated.
    pub fn detach_from_generator(&mut self, layer: &ItemId) -> Result<Option<ItemId>, EnvError> {
        self.expect_layer(layer)?;
        let Some(generator) = self.generator_of(layer) else {
            return Ok(None);
        };
        self.remove_output(&generator, layer)?;
        Ok(Some(generator))
    }

    fn operator_arity(&self, operator: &ItemId) -> (usize, usize) {
        self.items
            .get(operator)
            .and_then(|item| item.as_operator())
            .map_or((0, 0), |op| (op.input_arity(), op.output_arity()))
    }

    // ── Update propagation ──────────────────────────────────────

    /// Run every operator whose outputs are stale, in dependency order.
    ///
    /// Dirtiness is first propagated to a fixpoint (an operator with a
    /// dirty input has dirty outputs), then operators run exactly once
    /// each along a topological order of the producer-to-consumer graph.
    /// Each success clears the operator's output dirty flags, so the set
    /// of dirty outputs strictly shrinks and the pass terminates.
    ///
    /// Operators on a dependency cycle never run; after the acyclic part
    /// has been processed they are reported in an operator-cycle error.
    /// A failing hook aborts the pass with its outputs still dirty.
    pub fn update_all(&mut self) -> Result<(), EnvError> {
        self.propagate_dirty();
        let (order, cyclic) = self.operator_topo_order();
        for op in order {
            if self.needs_update(&op) {
                self.run_operator(&op)?;
            }
        }
        let affected: Vec<ItemId> = cyclic
            .into_iter()
            .filter(|op| self.needs_update(op))
            .collect();
        if !affected.is_empty() {
            return Err(EnvError::OperatorCycle {
                operators: affected,
            });
        }
        Ok(())
    }

    /// Recompute one generated layer, updating its dirty ancestry first.
    ///
    /// Does nothing when the layer is clean or has no generator.
    pub fn update_from_operator(&mut self, layer: &ItemId) -> Result<(), EnvError> {
        self.expect_layer(layer)?;
        self.propagate_dirty();
        let mut stack = Vec::new();
        self.update_layer_rec(layer, &mut stack)
    }

    fn update_layer_rec(
        &mut self,
        layer: &ItemId,
        stack: &mut Vec<ItemId>,
    ) -> Result<(), EnvError> {
        if !self.layer_is_dirty(layer) {
            return Ok(());
        }
        let Some(op) = self.generator_of(layer) else {
            // Dirty but not generated: nothing can resolve it here.
            return Ok(());
        };
        if stack.contains(&op) {
            let mut operators = stack.clone();
            operators.sort();
            operators.dedup();
            return Err(EnvError::OperatorCycle { operators });
        }
        stack.push(op.clone());
        for input in self.op_inputs.get(&op).cloned().unwrap_or_default() {
            self.update_layer_rec(&input, stack)?;
        }
        stack.pop();
        if self.needs_update(&op) {
            self.run_operator(&op)?;
        }
        Ok(())
    }

    /// Mark the outputs of every operator with a dirty input as dirty,
    /// repeated to a fixpoint.
    fn propagate_dirty(&mut self) {
        loop {
            let mut to_mark: Vec<ItemId> = Vec::new();
            for (op, inputs) in &self.op_inputs {
                if !inputs.iter().any(|l| self.layer_is_dirty(l)) {
                    continue;
                }
                if let Some(outputs) = self.op_outputs.get(op) {
                    to_mark.extend(
                        outputs
                            .iter()
                            .filter(|layer| !self.layer_is_dirty(layer))
                            .cloned(),
                    );
                }
            }
            if to_mark.is_empty() {
                break;
            }
            for layer in to_mark {
                self.mark_layer_dirty(&layer);
            }
        }
    }

    /// Whether an operator has at least one dirty, regenerable output.
    fn needs_update(&self, operator: &ItemId) -> bool {
        self.op_outputs.get(operator).is_some_and(|outputs| {
            outputs.iter().any(|layer| {
                self.layer_is_dirty(layer)
                    && !self
                        .items
                        .get(layer)
                        .and_then(|item| item.as_layer())
                        .is_some_and(|l| l.layer_state().is_immutable())
            })
        })
    }

    /// Topological order of all operators along producer-to-consumer
    /// edges, plus the operators stuck on cycles, both in id order.
    fn operator_topo_order(&self) -> (Vec<ItemId>, Vec<ItemId>) {
        let mut ops: Vec<ItemId> = self
            .items
            .iter()
            .filter(|(_, item)| item.as_operator().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ops.sort();

        // Edge producer -> consumer wherever an output feeds an input.
        let mut successors: IndexMap<ItemId, Vec<ItemId>> = IndexMap::new();
        let mut indegree: IndexMap<ItemId, usize> = ops.iter().map(|op| (op.clone(), 0)).collect();
        for producer in &ops {
            let outputs = self.op_outputs.get(producer).cloned().unwrap_or_default();
            for consumer in &ops {
                if producer == consumer {
                    continue;
                }
                let consumes = self.op_inputs.get(consumer).is_some_and(|inputs| {
                    inputs.iter().any(|l| outputs.iter().any(|o| o == l))
                });
                if consumes {
                    successors
                        .entry(producer.clone())
                        .or_default()
                        .push(consumer.clone());
                    *indegree.entry(consumer.clone()).or_default() += 1;
                }
            }
        }

        let mut ready: BTreeSet<ItemId> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(op, _)| op.clone())
            .collect();
        let mut order = Vec::with_capacity(ops.len());
        while let Some(op) = ready.iter().next().cloned() {
            ready.remove(&op);
            order.push(op.clone());
            for next in successors.get(&op).cloned().unwrap_or_default() {
                if let Some(degree) = indegree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(next);
                    }
                }
            }
        }
        let mut cyclic: Vec<ItemId> = ops
            .into_iter()
            .filter(|op| !order.contains(op))
            .collect();
        cyclic.sort();
        (order, cyclic)
    }

    /// Take the operator out of the item table, run its hook against a
    /// context scoped to its wired edges, reinsert it, and on success
    /// clear the outputs' dirty flags.
    fn run_operator(&mut self, operator: &ItemId) -> Result<(), EnvError> {
        let inputs = self.op_inputs.get(operator).cloned().unwrap_or_default();
        let outputs = self.op_outputs.get(operator).cloned().unwrap_or_default();
        let Some(mut boxed) = self.items.swap_remove(operator) else {
            return Err(EnvError::NotFound {
                what: format!("operator '{operator}'"),
            });
        };
        let result = match boxed.as_operator_mut() {
            Some(op) => {
                let mut ctx = KernelOperatorContext {
                    env: self,
                    inputs: &inputs,
                    outputs: &outputs,
                };
                op.update(&mut ctx)
            }
            None => Err(OperatorError::ExecutionFailed {
                reason: "item lost its operator role".to_owned(),
            }),
        };
        self.items.insert(operator.clone(), boxed);
        match result {
            Ok(()) => {
                for output in &outputs {
                    let immutable = self
                        .items
                        .get(output)
                        .and_then(|item| item.as_layer())
                        .is_some_and(|l| l.layer_state().is_immutable());
                    if !immutable {
                        self.clear_layer_dirty(output);
                    }
                }
                Ok(())
            }
            Err(reason) => Err(EnvError::OperatorFailed {
                operator: operator.clone(),
                reason,
            }),
        }
    }
}

/// The edge-scoped view an update hook runs against: inputs are readable,
/// outputs are writable, everything else is out of reach.
struct KernelOperatorContext<'a> {
    env: &'a mut Environment,
    inputs: &'a [ItemId],
    outputs: &'a [ItemId],
}

impl KernelOperatorContext<'_> {
    fn layer_ref(&self, id: &ItemId) -> Option<&dyn Layer> {
        self.env.items.get(id).and_then(|item| item.as_layer())
    }
}

impl OperatorContext for KernelOperatorContext<'_> {
    fn input_ids(&self) -> &[ItemId] {
        self.inputs
    }

    fn output_ids(&self) -> &[ItemId] {
        self.outputs
    }

    fn input(&self, id: &ItemId) -> Result<&dyn Layer, OperatorError> {
        if !self.inputs.contains(id) {
            return Err(OperatorError::MissingInput {
                detail: format!("'{id}' is not wired as an input"),
            });
        }
        self.layer_ref(id).ok_or_else(|| OperatorError::MissingInput {
            detail: format!("input '{id}' is not an attached layer"),
        })
    }

    fn output(&self, id: &ItemId) -> Result<&dyn Layer, OperatorError> {
        if !self.outputs.contains(id) {
            return Err(OperatorError::MissingOutput {
                detail: format!("'{id}' is not wired as an output"),
            });
        }
        self.layer_ref(id).ok_or_else(|| OperatorError::MissingOutput {
            detail: format!("output '{id}' is not an attached layer"),
        })
    }

    fn output_mut(&mut self, id: &ItemId) -> Result<&mut dyn Layer, OperatorError> {
        if !self.outputs.contains(id) {
            return Err(OperatorError::MissingOutput {
                detail: format!("'{id}' is not wired as an output"),
            });
        }
        self.env
            .items
            .get_mut(id)
            .and_then(|item| item.as_layer_mut())
            .ok_or_else(|| OperatorError::MissingOutput {
                detail: format!("output '{id}' is not an attached layer"),
            })
    }
}
