use fixedbitset::FixedBitSet;

use crate::instructions::InstructionGraph;

/// Loop membership of every instruction. Loops are the strongly connected
/// components with a cycle; loop ids start at 1, id 0 means "not in a loop".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopInfo {
    loop_ids: Vec<usize>,
    loop_count: usize,
}

impl LoopInfo {
    pub fn new(graph: &InstructionGraph) -> Self {
        let len = graph.len();
        let successors: Vec<Vec<usize>> = (0..len).map(|i| graph.successors(i)).collect();
        let components = strongly_connected_components(&successors);

        let mut loop_ids = vec![0; len];
        let mut loop_count = 0;
        for component in components {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&node| successors[node].contains(&node));
            if !cyclic {
                continue;
            }
            loop_count += 1;
            for node in component {
                loop_ids[node] = loop_count;
            }
        }
        Self {
            loop_ids,
            loop_count,
        }
    }

    pub fn loop_id(&self, index: usize) -> usize {
        self.loop_ids.get(index).copied().unwrap_or(0)
    }

    pub fn in_loop(&self, index: usize) -> bool {
        self.loop_id(index) != 0
    }

    pub fn loop_count(&self) -> usize {
        self.loop_count
    }

    pub fn members(&self, loop_id: usize) -> Vec<usize> {
        if loop_id == 0 {
            return Vec::new();
        }
        self.loop_ids
            .iter()
            .enumerate()
            .filter(|&(_, &id)| id == loop_id)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Tarjan's algorithm without recursion, so deep graphs cannot overflow the
/// call stack. Components come out in reverse topological order.
fn strongly_connected_components(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let len = successors.len();
    let mut index = vec![UNVISITED; len];
    let mut low_link = vec![0; len];
    let mut on_stack = FixedBitSet::with_capacity(len);
    let mut stack = Vec::new();
    let mut components = Vec::new();
    let mut next_index = 0;

    for root in 0..len {
        if index[root] != UNVISITED {
            continue;
        }
        // Frames are (node, position of the next successor to look at).
        let mut frames = vec![(root, 0)];
        index[root] = next_index;
        low_link[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack.insert(root);

        while let Some(&(node, next)) = frames.last() {
            if let Some(&succ) = successors[node].get(next) {
                if let Some(frame) = frames.last_mut() {
                    frame.1 += 1;
                }
                if index[succ] == UNVISITED {
                    index[succ] = next_index;
                    low_link[succ] = next_index;
                    next_index += 1;
                    stack.push(succ);
                    on_stack.insert(succ);
                    frames.push((succ, 0));
                } else if on_stack.contains(succ) {
                    low_link[node] = low_link[node].min(index[succ]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                low_link[parent] = low_link[parent].min(low_link[node]);
            }
            if low_link[node] == index[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack.set(member, false);
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }
    components
}
