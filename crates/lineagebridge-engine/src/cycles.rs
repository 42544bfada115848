//! Dependency cycle detection
//!
//! Iterative Tarjan search with unvisited / in-progress / done marking. Jobs
//! that can reach each other form one strongly connected group, and each
//! group is reported once however many distinct loops run through it.

use lineagebridge_core::{DependencyEdge, JobId};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// A group of jobs that depend on each other
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Every member, in id order
    pub jobs: Vec<JobId>,
    /// One shortest loop from the first member back to itself
    pub path: Vec<JobId>,
}

fn adjacency(job_count: usize, edges: &[DependencyEdge]) -> Vec<Vec<usize>> {
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); job_count];
    for edge in edges {
        let Some(to) = edge.target_id() else {
            continue;
        };
        let (from, to) = (edge.from.index(), to.index());
        if from == to || from >= job_count || to >= job_count {
            continue;
        }
        if !adjacency[from].contains(&to) {
            adjacency[from].push(to);
        }
    }
    adjacency
}

fn components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut marks = vec![Mark::Unvisited; n];
    let mut index = vec![0usize; n];
    let mut low = vec![0usize; n];
    let mut next_index = 0;
    let mut open: Vec<usize> = Vec::new();
    let mut found = Vec::new();

    for root in 0..n {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // (job, next neighbour to try)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::InProgress;
        index[root] = next_index;
        low[root] = next_index;
        next_index += 1;
        open.push(root);

        while let Some(&(node, cursor)) = stack.last() {
            if let Some(&next) = adjacency[node].get(cursor) {
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }
                match marks[next] {
                    Mark::Unvisited => {
                        marks[next] = Mark::InProgress;
                        index[next] = next_index;
                        low[next] = next_index;
                        next_index += 1;
                        open.push(next);
                        stack.push((next, 0));
                    }
                    Mark::InProgress => low[node] = low[node].min(index[next]),
                    Mark::Done => {}
                }
                continue;
            }

            stack.pop();
            if let Some(&(parent, _)) = stack.last() {
                low[parent] = low[parent].min(low[node]);
            }
            if low[node] == index[node] {
                let mut component = Vec::new();
                while let Some(member) = open.pop() {
                    marks[member] = Mark::Done;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                if component.len() > 1 {
                    component.sort_unstable();
                    found.push(component);
                }
            }
        }
    }

    found.sort_unstable_by_key(|c| c[0]);
    found
}

/// Breadth-first walk inside `members` from `start` back to `start`
fn shortest_loop(adjacency: &[Vec<usize>], members: &[usize], start: usize) -> Vec<usize> {
    let mut parent: Vec<Option<usize>> = vec![None; adjacency.len()];
    let mut queue = VecDeque::from([start]);
    parent[start] = Some(start);

    while let Some(node) = queue.pop_front() {
        for &next in &adjacency[node] {
            if members.binary_search(&next).is_err() {
                continue;
            }
            if next == start {
                let mut path = vec![node];
                let mut at = node;
                while at != start {
                    let Some(prev) = parent[at] else { break };
                    path.push(prev);
                    at = prev;
                }
                path.reverse();
                return path;
            }
            if parent[next].is_none() {
                parent[next] = Some(node);
                queue.push_back(next);
            }
        }
    }
    vec![start]
}

/// Cyclic job groups among the resolved edges, ordered by their first member
///
/// Self-dependencies are not cycles here; the builder reports them on their
/// own.
pub fn find_cycles(job_count: usize, edges: &[DependencyEdge]) -> Vec<Cycle> {
    let adjacency = adjacency(job_count, edges);
    components(&adjacency)
        .into_iter()
        .map(|members| {
            let path = shortest_loop(&adjacency, &members, members[0]);
            Cycle {
                jobs: members.iter().map(|&n| JobId(n as u32)).collect(),
                path: path.into_iter().map(|n| JobId(n as u32)).collect(),
            }
        })
        .collect()
}
