// Recording tape: reverse-mode AD by replaying operations backwards.
//
// Nodes are appended in evaluation order, so the recording order is already a
// topological order and the backward pass is a single reverse scan.
//
// Leaves snapshot their values when recorded; later mutation of a Variable
// does not reach a graph that was built before it.
//
// When built with `with_tangents`, every node also carries a forward-mode
// tangent (R-operator). Same graph, same algorithm, one extra channel.
// `backward_r` differentiates the backward pass along that channel
// (forward-over-reverse), which yields Hessian-vector products.

use std::collections::HashMap;
use std::ops::Range;

use crate::error::{AutodiffError, Result};
use crate::gradient::{Gradient, RGradient, RVector};
use crate::ops;
use crate::variable::{ParamId, Variable};

/// Index of a node on its tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
enum Op {
    /// Snapshot of a learnable tensor
    Param(ParamId),
    /// Non-parameter leaf whose gradient is handed back to the caller
    Input,
    /// out = x - ln Σ e^x
    LogSoftmax { input: NodeId },
    /// out = e^x / Σ e^x
    Softmax { input: NodeId },
    /// out = ln(e^a + e^b), element-wise
    LogAdd { a: NodeId, b: NodeId },
    /// out = input[start..end]
    Slice { input: NodeId, start: usize, end: usize },
    /// out = vector + scalar[0]
    AddFirst { vector: NodeId, scalar: NodeId },
    /// out = inputs[0] ++ inputs[1] ++ ...
    Concat { inputs: Vec<NodeId> },
    /// out = a + b
    Add { a: NodeId, b: NodeId },
    /// out = factor * input
    Scale { input: NodeId, factor: f64 },
}

#[derive(Debug, Clone)]
struct Node {
    value: Vec<f64>,
    tangent: Option<Vec<f64>>,
    op: Op,
}

/// Gradients that reached `input` leaves during a backward pass.
#[derive(Debug, Clone, Default)]
pub struct LeafGradients {
    grads: HashMap<NodeId, Vec<f64>>,
}

impl LeafGradients {
    pub fn get(&self, leaf: NodeId) -> Option<&[f64]> {
        self.grads.get(&leaf).map(Vec::as_slice)
    }

    /// Take the gradient of `leaf`, zeros of length `len` if none reached it
    pub fn take_or_zeros(&mut self, leaf: NodeId, len: usize) -> Vec<f64> {
        self.grads.remove(&leaf).unwrap_or_else(|| vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

/// A computation graph under construction.
#[derive(Debug, Clone, Default)]
pub struct Tape {
    nodes: Vec<Node>,
    directions: Option<RVector>,
}

impl Tape {
    /// Value-only tape
    pub fn new() -> Self {
        Self::default()
    }

    /// Tape that propagates tangents along `directions`
    pub fn with_tangents(directions: RVector) -> Self {
        Self {
            nodes: Vec::new(),
            directions: Some(directions),
        }
    }

    pub fn has_tangents(&self) -> bool {
        self.directions.is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn value(&self, node: NodeId) -> &[f64] {
        &self.nodes[node.0].value
    }

    /// Tangent of `node`, `None` on a value-only tape
    pub fn tangent(&self, node: NodeId) -> Option<&[f64]> {
        self.nodes[node.0].tangent.as_deref()
    }

    fn push(&mut self, value: Vec<f64>, tangent: Option<Vec<f64>>, op: Op) -> NodeId {
        debug_assert!(tangent.as_ref().is_none_or(|t| t.len() == value.len()));
        self.nodes.push(Node { value, tangent, op });
        NodeId(self.nodes.len() - 1)
    }

    /// Tangents of `inputs` when the tape carries them.
    fn tangents_of<const N: usize>(&self, inputs: [NodeId; N]) -> Option<[&[f64]; N]> {
        if self.directions.is_none() {
            return None;
        }
        let mut out: [&[f64]; N] = [&[]; N];
        for (slot, id) in out.iter_mut().zip(inputs) {
            *slot = self.nodes[id.0].tangent.as_deref()?;
        }
        Some(out)
    }

    // ── Leaves ──────────────────────────────────────────────────────

    /// Record a snapshot of `var`
    pub fn variable(&mut self, var: &Variable) -> NodeId {
        let tangent = self.directions.as_ref().map(|d| d.direction(var));
        self.push(var.vector.clone(), tangent, Op::Param(var.id))
    }

    /// Record a non-parameter leaf.
    ///
    /// On a tangent tape a missing `tangent` means the leaf is held fixed.
    pub fn input(&mut self, values: Vec<f64>, tangent: Option<Vec<f64>>) -> NodeId {
        let tangent = if self.has_tangents() {
            let t = tangent.unwrap_or_else(|| vec![0.0; values.len()]);
            assert_eq!(t.len(), values.len(), "input tangent length mismatch");
            Some(t)
        } else {
            None
        };
        self.push(values, tangent, Op::Input)
    }

    // ── Operations ──────────────────────────────────────────────────

    pub fn log_softmax(&mut self, input: NodeId) -> NodeId {
        let value = ops::log_softmax(self.value(input));
        let tangent = self.tangents_of([input]).map(|[t]| {
            // d(x - lse) = dx - Σ softmax_j dx_j
            let mean: f64 = value.iter().zip(t).map(|(y, dx)| y.exp() * dx).sum();
            t.iter().map(|dx| dx - mean).collect()
        });
        self.push(value, tangent, Op::LogSoftmax { input })
    }

    pub fn softmax(&mut self, input: NodeId) -> NodeId {
        let value = ops::softmax(self.value(input));
        let tangent = self.tangents_of([input]).map(|[t]| {
            let mean: f64 = value.iter().zip(t).map(|(y, dx)| y * dx).sum();
            value.iter().zip(t).map(|(y, dx)| y * (dx - mean)).collect()
        });
        self.push(value, tangent, Op::Softmax { input })
    }

    /// Element-wise `ln(e^a + e^b)`
    pub fn log_add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let (va, vb) = (self.value(a), self.value(b));
        assert_eq!(va.len(), vb.len(), "log_add operand length mismatch");
        let value: Vec<f64> = va.iter().zip(vb).map(|(&x, &y)| ops::log_add(x, y)).collect();
        let tangent = self.tangents_of([a, b]).map(|[ta, tb]| {
            (0..value.len())
                .map(|i| {
                    ops::log_share(va[i], value[i]) * ta[i] + ops::log_share(vb[i], value[i]) * tb[i]
                })
                .collect()
        });
        self.push(value, tangent, Op::LogAdd { a, b })
    }

    pub fn slice(&mut self, input: NodeId, range: Range<usize>) -> NodeId {
        let src = self.value(input);
        assert!(
            range.start <= range.end && range.end <= src.len(),
            "slice {:?} out of bounds for length {}",
            range,
            src.len()
        );
        let value = src[range.clone()].to_vec();
        let tangent = self.tangents_of([input]).map(|[t]| t[range.clone()].to_vec());
        self.push(
            value,
            tangent,
            Op::Slice {
                input,
                start: range.start,
                end: range.end,
            },
        )
    }

    /// `vector + scalar[0]`, broadcasting the single value of `scalar`
    pub fn add_first(&mut self, vector: NodeId, scalar: NodeId) -> NodeId {
        let s = self.value(scalar);
        assert_eq!(s.len(), 1, "add_first expects a length-1 scalar, got {}", s.len());
        let s = s[0];
        let value = self.value(vector).iter().map(|v| v + s).collect();
        let tangent = self
            .tangents_of([vector, scalar])
            .map(|[tv, ts]| tv.iter().map(|t| t + ts[0]).collect());
        self.push(value, tangent, Op::AddFirst { vector, scalar })
    }

    pub fn concat(&mut self, inputs: &[NodeId]) -> NodeId {
        let value = inputs.iter().flat_map(|&id| self.value(id).iter().copied()).collect();
        let tangent = if self.has_tangents() {
            inputs
                .iter()
                .map(|&id| self.tangent(id).map(<[f64]>::to_vec))
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.concat())
        } else {
            None
        };
        self.push(
            value,
            tangent,
            Op::Concat {
                inputs: inputs.to_vec(),
            },
        )
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let (va, vb) = (self.value(a), self.value(b));
        assert_eq!(va.len(), vb.len(), "add operand length mismatch");
        let value = va.iter().zip(vb).map(|(x, y)| x + y).collect();
        let tangent = self
            .tangents_of([a, b])
            .map(|[ta, tb]| ta.iter().zip(tb).map(|(x, y)| x + y).collect());
        self.push(value, tangent, Op::Add { a, b })
    }

    pub fn scale(&mut self, input: NodeId, factor: f64) -> NodeId {
        let value = self.value(input).iter().map(|v| v * factor).collect();
        let tangent = self
            .tangents_of([input])
            .map(|[t]| t.iter().map(|v| v * factor).collect());
        self.push(value, tangent, Op::Scale { input, factor })
    }

    // ── Backward ────────────────────────────────────────────────────

    /// Propagate upstream gradients through the whole tape.
    ///
    /// Each seed pairs a node with dLoss/dNode. Parameter gradients are added
    /// into `grad`; gradients for `input` leaves are returned. The tape is
    /// consumed, so a graph can be propagated at most once.
    pub fn backward(self, seeds: &[(NodeId, Vec<f64>)], grad: &mut Gradient) -> Result<LeafGradients> {
        let mut adjoints: Vec<Option<Vec<f64>>> = vec![None; self.nodes.len()];
        for (id, upstream) in seeds {
            let node = self
                .nodes
                .get(id.0)
                .ok_or(AutodiffError::UnknownNode(id.0))?;
            if node.value.len() != upstream.len() {
                return Err(AutodiffError::ShapeMismatch {
                    expected: node.value.len(),
                    actual: upstream.len(),
                });
            }
            add_into(&mut adjoints[id.0], upstream);
        }

        let mut leaves = LeafGradients::default();
        for (idx, node) in self.nodes.iter().enumerate().rev() {
            let Some(g) = adjoints[idx].take() else {
                continue;
            };
            match &node.op {
                Op::Param(param) => grad.accumulate(*param, &g),
                Op::Input => {
                    leaves.grads.insert(NodeId(idx), g);
                }
                Op::LogSoftmax { input } => {
                    let total: f64 = g.iter().sum();
                    let dx: Vec<f64> = node
                        .value
                        .iter()
                        .zip(&g)
                        .map(|(y, gi)| gi - y.exp() * total)
                        .collect();
                    add_into(&mut adjoints[input.0], &dx);
                }
                Op::Softmax { input } => {
                    let dot: f64 = node.value.iter().zip(&g).map(|(y, gi)| y * gi).sum();
                    let dx: Vec<f64> = node
                        .value
                        .iter()
                        .zip(&g)
                        .map(|(y, gi)| y * (gi - dot))
                        .collect();
                    add_into(&mut adjoints[input.0], &dx);
                }
                Op::LogAdd { a, b } => {
                    let va = &self.nodes[a.0].value;
                    let vb = &self.nodes[b.0].value;
                    let da: Vec<f64> = (0..g.len())
                        .map(|i| g[i] * ops::log_share(va[i], node.value[i]))
                        .collect();
                    let db: Vec<f64> = (0..g.len())
                        .map(|i| g[i] * ops::log_share(vb[i], node.value[i]))
                        .collect();
                    add_into(&mut adjoints[a.0], &da);
                    add_into(&mut adjoints[b.0], &db);
                }
                Op::Slice { input, start, end } => {
                    let mut dx = vec![0.0; self.nodes[input.0].value.len()];
                    dx[*start..*end].copy_from_slice(&g);
                    add_into(&mut adjoints[input.0], &dx);
                }
                Op::AddFirst { vector, scalar } => {
                    let total: f64 = g.iter().sum();
                    add_into(&mut adjoints[vector.0], &g);
                    add_into(&mut adjoints[scalar.0], &[total]);
                }
                Op::Concat { inputs } => {
                    let mut offset = 0;
                    for input in inputs {
                        let len = self.nodes[input.0].value.len();
                        add_into(&mut adjoints[input.0], &g[offset..offset + len]);
                        offset += len;
                    }
                }
                Op::Add { a, b } => {
                    add_into(&mut adjoints[a.0], &g);
                    add_into(&mut adjoints[b.0], &g);
                }
                Op::Scale { input, factor } => {
                    let dx: Vec<f64> = g.iter().map(|v| v * factor).collect();
                    add_into(&mut adjoints[input.0], &dx);
                }
            }
        }
        Ok(leaves)
    }

    /// Forward-over-reverse pass on a tangent tape.
    ///
    /// Each seed is `(node, dLoss/dNode, R{dLoss/dNode})`. The R-part of every
    /// parameter gradient is added into `rgrad`, the plain gradient into
    /// `grad` when one is given. Returns the plain and R gradients of the
    /// `input` leaves, in that order.
    pub fn backward_r(
        self,
        seeds: &[(NodeId, Vec<f64>, Vec<f64>)],
        rgrad: &mut RGradient,
        mut grad: Option<&mut Gradient>,
    ) -> Result<(LeafGradients, LeafGradients)> {
        if !self.has_tangents() {
            return Err(AutodiffError::MissingTangents);
        }

        let mut adjoints: Vec<Option<Vec<f64>>> = vec![None; self.nodes.len()];
        let mut r_adjoints: Vec<Option<Vec<f64>>> = vec![None; self.nodes.len()];
        for (id, upstream, r_upstream) in seeds {
            let node = self
                .nodes
                .get(id.0)
                .ok_or(AutodiffError::UnknownNode(id.0))?;
            for len in [upstream.len(), r_upstream.len()] {
                if node.value.len() != len {
                    return Err(AutodiffError::ShapeMismatch {
                        expected: node.value.len(),
                        actual: len,
                    });
                }
            }
            add_into(&mut adjoints[id.0], upstream);
            add_into(&mut r_adjoints[id.0], r_upstream);
        }

        let mut leaves = LeafGradients::default();
        let mut r_leaves = LeafGradients::default();
        for (idx, node) in self.nodes.iter().enumerate().rev() {
            let Some(g) = adjoints[idx].take() else {
                continue;
            };
            let rg = r_adjoints[idx].take().unwrap_or_else(|| vec![0.0; g.len()]);
            let dy = node
                .tangent
                .as_deref()
                .ok_or(AutodiffError::MissingTangents)?;

            match &node.op {
                Op::Param(param) => {
                    if let Some(grad) = grad.as_deref_mut() {
                        grad.accumulate(*param, &g);
                    }
                    rgrad.accumulate(*param, &rg);
                }
                Op::Input => {
                    leaves.grads.insert(NodeId(idx), g);
                    r_leaves.grads.insert(NodeId(idx), rg);
                }
                Op::LogSoftmax { input } => {
                    // dx = g - p Σg, with dp = p ⊙ dy
                    let total: f64 = g.iter().sum();
                    let r_total: f64 = rg.iter().sum();
                    let mut dx = Vec::with_capacity(g.len());
                    let mut rdx = Vec::with_capacity(g.len());
                    for i in 0..g.len() {
                        let p = node.value[i].exp();
                        dx.push(g[i] - p * total);
                        rdx.push(rg[i] - p * dy[i] * total - p * r_total);
                    }
                    add_into(&mut adjoints[input.0], &dx);
                    add_into(&mut r_adjoints[input.0], &rdx);
                }
                Op::Softmax { input } => {
                    let y = &node.value;
                    let dot: f64 = y.iter().zip(&g).map(|(y, gi)| y * gi).sum();
                    let r_dot: f64 = (0..g.len()).map(|i| dy[i] * g[i] + y[i] * rg[i]).sum();
                    let dx: Vec<f64> = (0..g.len()).map(|i| y[i] * (g[i] - dot)).collect();
                    let rdx: Vec<f64> = (0..g.len())
                        .map(|i| dy[i] * (g[i] - dot) + y[i] * (rg[i] - r_dot))
                        .collect();
                    add_into(&mut adjoints[input.0], &dx);
                    add_into(&mut r_adjoints[input.0], &rdx);
                }
                Op::LogAdd { a, b } => {
                    for operand in [a, b] {
                        let src = &self.nodes[operand.0];
                        let dsrc = src
                            .tangent
                            .as_deref()
                            .ok_or(AutodiffError::MissingTangents)?;
                        let mut dx = Vec::with_capacity(g.len());
                        let mut rdx = Vec::with_capacity(g.len());
                        for i in 0..g.len() {
                            // share = e^(x - y), d share = share (dx - dy)
                            let share = ops::log_share(src.value[i], node.value[i]);
                            dx.push(g[i] * share);
                            rdx.push(if share == 0.0 {
                                0.0
                            } else {
                                rg[i] * share + g[i] * share * (dsrc[i] - dy[i])
                            });
                        }
                        add_into(&mut adjoints[operand.0], &dx);
                        add_into(&mut r_adjoints[operand.0], &rdx);
                    }
                }
                Op::Slice { input, start, end } => {
                    let len = self.nodes[input.0].value.len();
                    let mut dx = vec![0.0; len];
                    let mut rdx = vec![0.0; len];
                    dx[*start..*end].copy_from_slice(&g);
                    rdx[*start..*end].copy_from_slice(&rg);
                    add_into(&mut adjoints[input.0], &dx);
                    add_into(&mut r_adjoints[input.0], &rdx);
                }
                Op::AddFirst { vector, scalar } => {
                    add_into(&mut adjoints[vector.0], &g);
                    add_into(&mut r_adjoints[vector.0], &rg);
                    add_into(&mut adjoints[scalar.0], &[g.iter().sum()]);
                    add_into(&mut r_adjoints[scalar.0], &[rg.iter().sum()]);
                }
                Op::Concat { inputs } => {
                    let mut offset = 0;
                    for input in inputs {
                        let len = self.nodes[input.0].value.len();
                        add_into(&mut adjoints[input.0], &g[offset..offset + len]);
                        add_into(&mut r_adjoints[input.0], &rg[offset..offset + len]);
                        offset += len;
                    }
                }
                Op::Add { a, b } => {
                    for operand in [a, b] {
                        add_into(&mut adjoints[operand.0], &g);
                        add_into(&mut r_adjoints[operand.0], &rg);
                    }
                }
                Op::Scale { input, factor } => {
                    let dx: Vec<f64> = g.iter().map(|v| v * factor).collect();
                    let rdx: Vec<f64> = rg.iter().map(|v| v * factor).collect();
                    add_into(&mut adjoints[input.0], &dx);
                    add_into(&mut r_adjoints[input.0], &rdx);
                }
            }
        }
        Ok((leaves, r_leaves))
    }
}

fn add_into(slot: &mut Option<Vec<f64>>, values: &[f64]) {
    match slot {
        Some(acc) => {
            for (a, v) in acc.iter_mut().zip(values) {
                *a += v;
            }
        }
        None => *slot = Some(values.to_vec()),
    }
}
