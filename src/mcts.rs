/*!
# Monte Carlo Tree Search

UCB1 tree search over any domain implementing [`Domain`]. Each simulation

1. **selects** a path from the root, descending into the child with the
   highest [`ucb1`] score while the current node is fully expanded and not
   terminal,
2. **expands** one untried action chosen uniformly at random,
3. **rolls out** from the new node with a [`RolloutPolicy`] until a terminal
   state or `max_rollout_depth` moves (then [`Domain::evaluate`] estimates
   the value),
4. **backpropagates** the outcome to every node on the path.

Outcomes are always expressed from the perspective of the player to move at
the root. Under [`Perspective::Alternating`] a node stores values from the
perspective of the player who made its incoming move, so the outcome is
negated on nodes whose incoming move was the opponent's. Under
[`Perspective::Single`] every node stores the outcome unchanged.

The tree lives in an arena ([`SearchTree`]) addressed by [`NodeId`]; children
are kept in an insertion-ordered map so iteration, tie-breaking and therefore
whole searches are reproducible under a fixed seed.

```rust
use mini_montecarlo::mcts::{Domain, Mcts, MctsConfig, Perspective, RandomRollout};

/// Pick a number in 0..5; the payoff is the number itself.
struct Pick;

impl Domain for Pick {
    type State = Option<u8>;
    type Action = u8;

    fn legal_actions(&self, state: &Option<u8>) -> Vec<u8> {
        if state.is_none() { (0..5).collect() } else { vec![] }
    }
    fn apply(&self, _state: &Option<u8>, action: &u8) -> Option<u8> {
        Some(*action)
    }
    fn is_terminal(&self, state: &Option<u8>) -> bool {
        state.is_some()
    }
    fn outcome(&self, state: &Option<u8>) -> f64 {
        state.map_or(0.0, |v| v as f64 / 4.0)
    }
}

let config = MctsConfig { perspective: Perspective::Single, ..Default::default() };
let mut mcts = Mcts::new(Pick, RandomRollout, config).unwrap().set_seed(0);
let tree = mcts.search(None, 500).unwrap();
assert_eq!(tree.best_action().unwrap(), 4);
```
*/

use indexmap::IndexMap;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::hash::Hash;

use crate::error::{McError, Result};

/// The game or planning problem being searched.
pub trait Domain {
    type State: Clone;
    type Action: Clone + Eq + Hash;

    fn legal_actions(&self, state: &Self::State) -> Vec<Self::Action>;

    fn apply(&self, state: &Self::State, action: &Self::Action) -> Self::State;

    fn is_terminal(&self, state: &Self::State) -> bool;

    /// Value of a terminal state for the player to move at the root.
    fn outcome(&self, state: &Self::State) -> f64;

    /// Heuristic value of a non-terminal state for the player to move at the
    /// root, used when a rollout is cut off.
    fn evaluate(&self, state: &Self::State) -> f64 {
        self.outcome(state)
    }
}

/// Whose point of view node values are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    /// One agent; every node maximizes the root player's outcome.
    Single,
    /// Two players alternate moves, starting with the root player.
    #[default]
    Alternating,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MctsConfig {
    /// UCB1 exploration constant `c`.
    pub exploration: f64,
    /// Rollouts stop after this many moves and fall back to [`Domain::evaluate`].
    pub max_rollout_depth: usize,
    pub perspective: Perspective,
}

impl Default for MctsConfig {
    fn default() -> Self {
        Self {
            exploration: std::f64::consts::SQRT_2,
            max_rollout_depth: 100,
            perspective: Perspective::default(),
        }
    }
}

impl MctsConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.exploration.is_finite() && self.exploration >= 0.0) {
            return Err(McError::InvalidConfig(format!(
                "exploration constant must be finite and non-negative, got {}",
                self.exploration
            )));
        }
        Ok(())
    }

    /// Whether the root player moves at `depth` plies below the root.
    fn root_to_move(&self, depth: usize) -> bool {
        match self.perspective {
            Perspective::Single => true,
            Perspective::Alternating => depth % 2 == 0,
        }
    }

    /// Sign applied to a root-perspective outcome when stored on a node at `depth`.
    fn value_sign(&self, depth: usize) -> f64 {
        if depth > 0 && !self.root_to_move(depth - 1) {
            -1.0
        } else {
            1.0
        }
    }
}

/// UCB1 score of a child: `mean + c·sqrt(ln N_parent / n_child)`.
///
/// An unvisited child scores `+∞`, so it is always preferred over visited siblings.
///
/// ```rust
/// use mini_montecarlo::mcts::ucb1;
///
/// assert_eq!(ucb1(10, 0, 0.0, 1.4), f64::INFINITY);
/// assert!(ucb1(10, 5, 2.5, 0.0) == 0.5);
/// ```
pub fn ucb1(parent_visits: u64, child_visits: u64, child_value: f64, exploration: f64) -> f64 {
    if child_visits == 0 {
        return f64::INFINITY;
    }
    let n = child_visits as f64;
    let mean = child_value / n;
    let log_parent = (parent_visits.max(1) as f64).ln();
    mean + exploration * (log_parent / n).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct Node<S, A> {
    state: S,
    parent: Option<NodeId>,
    children: IndexMap<A, NodeId>,
    untried: Vec<A>,
    visits: u64,
    value: f64,
    depth: usize,
}

impl<S, A: Eq + Hash> Node<S, A> {
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = (&A, NodeId)> {
        self.children.iter().map(|(a, id)| (a, *id))
    }

    pub fn child(&self, action: &A) -> Option<NodeId> {
        self.children.get(action).copied()
    }

    pub fn visits(&self) -> u64 {
        self.visits
    }

    /// Cumulative backpropagated value.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn mean_value(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            self.value / self.visits as f64
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_fully_expanded(&self) -> bool {
        self.untried.is_empty()
    }
}

/// An arena of search nodes rooted at [`SearchTree::root`].
#[derive(Debug, Clone)]
pub struct SearchTree<S, A> {
    nodes: Vec<Node<S, A>>,
}

impl<S, A: Clone + Eq + Hash> SearchTree<S, A> {
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node<S, A> {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visit count and cumulative value of every root child.
    pub fn root_statistics(&self) -> RootStatistics<A> {
        let root = self.node(self.root());
        RootStatistics {
            simulations: root.visits,
            actions: root
                .children()
                .map(|(a, id)| {
                    let child = self.node(id);
                    (
                        a.clone(),
                        ActionStats {
                            visits: child.visits,
                            value: child.value,
                        },
                    )
                })
                .collect(),
        }
    }

    /// The most visited root action, ties broken by higher mean value.
    ///
    /// # Errors
    ///
    /// * [`McError::NoSimulations`] before any simulation has run.
    /// * [`McError::NoLegalActions`] if the root has no children.
    pub fn best_action(&self) -> Result<A> {
        self.root_statistics().best_action()
    }

    fn push(&mut self, node: Node<S, A>) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionStats {
    pub visits: u64,
    pub value: f64,
}

impl ActionStats {
    pub fn mean_value(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            self.value / self.visits as f64
        }
    }
}

/// Per-action statistics at the root, mergeable across independent trees.
#[derive(Debug, Clone, PartialEq)]
pub struct RootStatistics<A: Eq + Hash> {
    pub simulations: u64,
    pub actions: IndexMap<A, ActionStats>,
}

impl<A: Clone + Eq + Hash> RootStatistics<A> {
    /// Adds the counts of `other` into `self`.
    pub fn merge(&mut self, other: RootStatistics<A>) {
        self.simulations += other.simulations;
        for (action, stats) in other.actions {
            let entry = self.actions.entry(action).or_default();
            entry.visits += stats.visits;
            entry.value += stats.value;
        }
    }

    pub fn best_action(&self) -> Result<A> {
        if self.simulations == 0 {
            return Err(McError::NoSimulations);
        }
        let mut best: Option<(&A, &ActionStats)> = None;
        for (action, stats) in &self.actions {
            let better = match best {
                None => true,
                Some((_, b)) => {
                    stats.visits > b.visits
                        || (stats.visits == b.visits && stats.mean_value() > b.mean_value())
                }
            };
            if better {
                best = Some((action, stats));
            }
        }
        best.map(|(a, _)| a.clone()).ok_or(McError::NoLegalActions)
    }
}

/// Chooses moves during rollouts.
pub trait RolloutPolicy<D: Domain> {
    /// Returns an index into `actions`, which is never empty. `root_to_move`
    /// tells whether the root player makes this move.
    fn choose(
        &self,
        domain: &D,
        state: &D::State,
        actions: &[D::Action],
        root_to_move: bool,
        rng: &mut dyn RngCore,
    ) -> usize;
}

/// Uniformly random moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomRollout;

impl<D: Domain> RolloutPolicy<D> for RandomRollout {
    fn choose(
        &self,
        _domain: &D,
        _state: &D::State,
        actions: &[D::Action],
        _root_to_move: bool,
        rng: &mut dyn RngCore,
    ) -> usize {
        rng.gen_range(0..actions.len())
    }
}

fn argmax(scores: impl Iterator<Item = f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, s) in scores.enumerate() {
        if s > best.1 {
            best = (i, s);
        }
    }
    best.0
}

/// Moves to the successor with the best [`Domain::evaluate`] for the player
/// making the move.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyRollout;

impl<D: Domain> RolloutPolicy<D> for GreedyRollout {
    fn choose(
        &self,
        domain: &D,
        state: &D::State,
        actions: &[D::Action],
        root_to_move: bool,
        _rng: &mut dyn RngCore,
    ) -> usize {
        let sign = if root_to_move { 1.0 } else { -1.0 };
        argmax(
            actions
                .iter()
                .map(|a| sign * domain.evaluate(&domain.apply(state, a))),
        )
    }
}

/// Moves to the action scoring highest under `f(state, action)`, a heuristic
/// from the mover's point of view.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicRollout<F> {
    f: F,
}

impl<F> HeuristicRollout<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<D, F> RolloutPolicy<D> for HeuristicRollout<F>
where
    D: Domain,
    F: Fn(&D::State, &D::Action) -> f64,
{
    fn choose(
        &self,
        _domain: &D,
        state: &D::State,
        actions: &[D::Action],
        _root_to_move: bool,
        _rng: &mut dyn RngCore,
    ) -> usize {
        argmax(actions.iter().map(|a| (self.f)(state, a)))
    }
}

/// A random move with probability `epsilon`, otherwise the `exploit` policy's move.
#[derive(Debug, Clone, Copy)]
pub struct EpsilonGreedy<P = GreedyRollout> {
    pub epsilon: f64,
    pub exploit: P,
}

impl EpsilonGreedy<GreedyRollout> {
    pub fn new(epsilon: f64) -> Result<Self> {
        Self::with_policy(epsilon, GreedyRollout)
    }
}

impl<P> EpsilonGreedy<P> {
    pub fn with_policy(epsilon: f64, exploit: P) -> Result<Self> {
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(McError::InvalidConfig(format!(
                "epsilon must lie in [0, 1], got {epsilon}"
            )));
        }
        Ok(Self { epsilon, exploit })
    }
}

impl<D: Domain, P: RolloutPolicy<D>> RolloutPolicy<D> for EpsilonGreedy<P> {
    fn choose(
        &self,
        domain: &D,
        state: &D::State,
        actions: &[D::Action],
        root_to_move: bool,
        rng: &mut dyn RngCore,
    ) -> usize {
        if rng.gen::<f64>() < self.epsilon {
            rng.gen_range(0..actions.len())
        } else {
            self.exploit.choose(domain, state, actions, root_to_move, rng)
        }
    }
}

/// A UCB1 tree searcher.
#[derive(Debug, Clone)]
pub struct Mcts<D, P> {
    pub domain: D,
    pub policy: P,
    pub config: MctsConfig,
    pub seed: u64,
    rng: SmallRng,
}

impl<D, P> Mcts<D, P>
where
    D: Domain,
    P: RolloutPolicy<D>,
{
    pub fn new(domain: D, policy: P, config: MctsConfig) -> Result<Self> {
        config.validate()?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            domain,
            policy,
            config,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Reseeds the searcher. Root-parallel worker `i` uses `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Builds a fresh tree at `root_state` and runs `n_simulations` simulations.
    ///
    /// # Errors
    ///
    /// [`McError::NoLegalActions`] if the root is not terminal but has no legal actions.
    pub fn search(
        &mut self,
        root_state: D::State,
        n_simulations: usize,
    ) -> Result<SearchTree<D::State, D::Action>> {
        let mut searcher = Searcher {
            domain: &self.domain,
            policy: &self.policy,
            config: &self.config,
            rng: &mut self.rng,
        };
        searcher.search(root_state, n_simulations)
    }

    /// Root parallelization: `n_workers` independent trees, worker `i` seeded
    /// with `seed + i`, share the simulation budget and their root statistics
    /// are merged per action.
    pub fn search_root_parallel(
        &self,
        root_state: D::State,
        n_simulations: usize,
        n_workers: usize,
    ) -> Result<RootStatistics<D::Action>>
    where
        D: Sync,
        P: Sync,
        D::State: Send + Sync,
        D::Action: Send + Sync,
    {
        if n_workers == 0 {
            return Err(McError::InvalidConfig(
                "root parallel search needs at least one worker".to_string(),
            ));
        }
        let per_worker = n_simulations / n_workers;
        let extra = n_simulations % n_workers;
        let stats = (0..n_workers)
            .into_par_iter()
            .map(|i| {
                let mut rng = SmallRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let mut searcher = Searcher {
                    domain: &self.domain,
                    policy: &self.policy,
                    config: &self.config,
                    rng: &mut rng,
                };
                let budget = per_worker + usize::from(i < extra);
                searcher
                    .search(root_state.clone(), budget)
                    .map(|tree| tree.root_statistics())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut merged = RootStatistics {
            simulations: 0,
            actions: IndexMap::new(),
        };
        for s in stats {
            merged.merge(s);
        }
        tracing::debug!(
            workers = n_workers,
            simulations = merged.simulations,
            "root parallel search finished"
        );
        Ok(merged)
    }
}

/// Borrowed view of a searcher's parts so sequential and parallel search
/// share one implementation.
struct Searcher<'a, D, P> {
    domain: &'a D,
    policy: &'a P,
    config: &'a MctsConfig,
    rng: &'a mut SmallRng,
}

impl<D, P> Searcher<'_, D, P>
where
    D: Domain,
    P: RolloutPolicy<D>,
{
    fn search(
        &mut self,
        root_state: D::State,
        n_simulations: usize,
    ) -> Result<SearchTree<D::State, D::Action>> {
        let terminal = self.domain.is_terminal(&root_state);
        let untried = if terminal {
            Vec::new()
        } else {
            self.domain.legal_actions(&root_state)
        };
        if !terminal && untried.is_empty() {
            return Err(McError::NoLegalActions);
        }
        let mut tree = SearchTree {
            nodes: vec![Node {
                state: root_state,
                parent: None,
                children: IndexMap::new(),
                untried,
                visits: 0,
                value: 0.0,
                depth: 0,
            }],
        };
        for sim in 0..n_simulations {
            let value = self.simulate(&mut tree);
            tracing::trace!(simulation = sim, value, nodes = tree.len(), "mcts simulation");
        }
        Ok(tree)
    }

    /// One select / expand / rollout / backpropagate cycle. Returns the
    /// root-perspective value that was backpropagated.
    fn simulate(&mut self, tree: &mut SearchTree<D::State, D::Action>) -> f64 {
        let mut id = tree.root();
        loop {
            let node = tree.node(id);
            if !node.untried.is_empty()
                || node.children.is_empty()
                || self.domain.is_terminal(&node.state)
            {
                break;
            }
            id = self.select_child(tree, id);
        }

        if !tree.node(id).untried.is_empty() {
            id = self.expand(tree, id);
        }

        let value = {
            let node = tree.node(id);
            self.rollout(&node.state, node.depth)
        };

        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = &mut tree.nodes[current.0];
            node.visits += 1;
            node.value += self.config.value_sign(node.depth) * value;
            cursor = node.parent;
        }
        value
    }

    fn select_child(&self, tree: &SearchTree<D::State, D::Action>, id: NodeId) -> NodeId {
        let parent = tree.node(id);
        let mut best = (None, f64::NEG_INFINITY);
        for (_, child_id) in parent.children() {
            let child = tree.node(child_id);
            let score = ucb1(parent.visits, child.visits, child.value, self.config.exploration);
            if best.0.is_none() || score > best.1 {
                best = (Some(child_id), score);
            }
        }
        // A node with children always yields one.
        best.0.unwrap_or(id)
    }

    fn expand(&mut self, tree: &mut SearchTree<D::State, D::Action>, id: NodeId) -> NodeId {
        let (action, state, depth) = {
            let node = &mut tree.nodes[id.0];
            let k = self.rng.gen_range(0..node.untried.len());
            let action = node.untried.swap_remove(k);
            let state = self.domain.apply(&node.state, &action);
            (action, state, node.depth + 1)
        };
        let untried = if self.domain.is_terminal(&state) {
            Vec::new()
        } else {
            self.domain.legal_actions(&state)
        };
        let child = tree.push(Node {
            state,
            parent: Some(id),
            children: IndexMap::new(),
            untried,
            visits: 0,
            value: 0.0,
            depth,
        });
        tree.nodes[id.0].children.insert(action, child);
        child
    }

    fn rollout(&mut self, state: &D::State, depth: usize) -> f64 {
        let mut state = state.clone();
        let mut steps = 0;
        while !self.domain.is_terminal(&state) {
            if steps >= self.config.max_rollout_depth {
                return self.domain.evaluate(&state);
            }
            let actions = self.domain.legal_actions(&state);
            if actions.is_empty() {
                return self.domain.evaluate(&state);
            }
            let root_to_move = self.config.root_to_move(depth + steps);
            let k = self
                .policy
                .choose(self.domain, &state, &actions, root_to_move, &mut *self.rng);
            state = self.domain.apply(&state, &actions[k.min(actions.len() - 1)]);
            steps += 1;
        }
        self.domain.outcome(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    /// Count down from `start`; a move subtracts 1 or 2 and whoever takes the
    /// last token wins. State: (tokens left, root player to move).
    struct Nim {
        start: u32,
    }

    impl Domain for Nim {
        type State = (u32, bool);
        type Action = u32;

        fn legal_actions(&self, state: &(u32, bool)) -> Vec<u32> {
            (1..=2).filter(|k| *k <= state.0).collect()
        }

        fn apply(&self, state: &(u32, bool), action: &u32) -> (u32, bool) {
            (state.0 - action, !state.1)
        }

        fn is_terminal(&self, state: &(u32, bool)) -> bool {
            state.0 == 0
        }

        fn outcome(&self, state: &(u32, bool)) -> f64 {
            // The player who just moved took the last token.
            if state.1 {
                -1.0
            } else {
                1.0
            }
        }

        fn evaluate(&self, _state: &(u32, bool)) -> f64 {
            0.0
        }
    }

    impl Nim {
        fn root(&self) -> (u32, bool) {
            (self.start, true)
        }
    }

    /// A non-terminal state with no moves.
    struct Stuck;

    impl Domain for Stuck {
        type State = ();
        type Action = u8;

        fn legal_actions(&self, _state: &()) -> Vec<u8> {
            Vec::new()
        }
        fn apply(&self, _state: &(), _action: &u8) {}
        fn is_terminal(&self, _state: &()) -> bool {
            false
        }
        fn outcome(&self, _state: &()) -> f64 {
            0.0
        }
    }

    /// Endless walk on the integers; `evaluate` is the position.
    struct Walk;

    impl Domain for Walk {
        type State = i32;
        type Action = i32;

        fn legal_actions(&self, _state: &i32) -> Vec<i32> {
            vec![-1, 1]
        }
        fn apply(&self, state: &i32, action: &i32) -> i32 {
            state + action
        }
        fn is_terminal(&self, _state: &i32) -> bool {
            false
        }
        fn outcome(&self, state: &i32) -> f64 {
            *state as f64
        }
    }

    #[test]
    fn config_defaults_and_json() {
        let cfg = MctsConfig::default();
        assert_abs_diff_eq!(cfg.exploration, 2f64.sqrt());
        assert_eq!(cfg.perspective, Perspective::Alternating);
        let cfg: MctsConfig =
            serde_json::from_str(r#"{"exploration": 0.5, "perspective": "single"}"#).unwrap();
        assert_eq!(cfg.perspective, Perspective::Single);
        assert_eq!(cfg.max_rollout_depth, 100);
        let bad = MctsConfig {
            exploration: -1.0,
            ..Default::default()
        };
        assert!(Mcts::new(Walk, RandomRollout, bad).is_err());
    }

    #[test]
    fn unsearched_tree_has_no_decision() {
        let mut mcts = Mcts::new(Nim { start: 4 }, RandomRollout, MctsConfig::default())
            .unwrap()
            .set_seed(0);
        let tree = mcts.search(Nim { start: 4 }.root(), 0).unwrap();
        assert_eq!(tree.best_action(), Err(McError::NoSimulations));
    }

    #[test]
    fn stuck_root_is_an_error() {
        let mut mcts = Mcts::new(Stuck, RandomRollout, MctsConfig::default()).unwrap();
        assert!(matches!(mcts.search((), 10), Err(McError::NoLegalActions)));
    }

    #[test]
    fn terminal_root_has_no_actions() {
        let mut mcts = Mcts::new(Nim { start: 0 }, RandomRollout, MctsConfig::default()).unwrap();
        let tree = mcts.search((0, true), 5).unwrap();
        assert_eq!(tree.node(tree.root()).visits(), 5);
        assert_eq!(tree.best_action(), Err(McError::NoLegalActions));
    }

    #[test]
    fn finds_winning_nim_move() {
        // From 4 tokens, taking 1 leaves the opponent a losing 3.
        let nim = Nim { start: 4 };
        let root = nim.root();
        let mut mcts = Mcts::new(nim, RandomRollout, MctsConfig::default())
            .unwrap()
            .set_seed(7);
        let tree = mcts.search(root, 2_000).unwrap();
        assert_eq!(tree.best_action().unwrap(), 1);
        let visits: u64 = tree
            .node(tree.root())
            .children()
            .map(|(_, id)| tree.node(id).visits())
            .sum();
        assert_eq!(visits, 2_000);
    }

    #[test]
    fn alternating_backprop_negates_opponent_nodes() {
        let nim = Nim { start: 2 };
        let root = nim.root();
        let mut mcts = Mcts::new(nim, RandomRollout, MctsConfig::default())
            .unwrap()
            .set_seed(1);
        let tree = mcts.search(root, 50).unwrap();
        let r = tree.node(tree.root());
        // Taking both tokens wins outright: stored positive for the root player.
        let take_two = tree.node(r.child(&2).unwrap());
        assert_abs_diff_eq!(take_two.mean_value(), 1.0);
        // Taking one lets the opponent win; at depth 2 the value is stored
        // for the opponent, so it is positive there.
        let take_one = tree.node(r.child(&1).unwrap());
        assert_abs_diff_eq!(take_one.mean_value(), -1.0);
        if let Some((_, grandchild)) = take_one.children().next() {
            assert_abs_diff_eq!(tree.node(grandchild).mean_value(), 1.0);
        }
        assert_eq!(tree.best_action().unwrap(), 2);
    }

    #[test]
    fn rollout_depth_cutoff_uses_evaluate() {
        let config = MctsConfig {
            max_rollout_depth: 3,
            perspective: Perspective::Single,
            ..Default::default()
        };
        let mut mcts = Mcts::new(Walk, GreedyRollout, config).unwrap().set_seed(2);
        let tree = mcts.search(0, 200).unwrap();
        assert_eq!(tree.best_action().unwrap(), 1);
        // Greedy rollouts always step up: the +1 child at depth 1 ends at 4.
        let up = tree.node(tree.node(tree.root()).child(&1).unwrap());
        assert!(up.mean_value() > 3.0);
    }

    #[test]
    fn policies_choose_expected_moves() {
        let mut rng = SmallRng::seed_from_u64(3);
        let actions: &[i32] = &[-1, 1];
        assert_eq!(GreedyRollout.choose(&Walk, &0, actions, true, &mut rng), 1);
        assert_eq!(GreedyRollout.choose(&Walk, &0, actions, false, &mut rng), 0);
        let h = HeuristicRollout::new(|_: &i32, a: &i32| -(*a as f64));
        assert_eq!(RolloutPolicy::<Walk>::choose(&h, &Walk, &0, actions, true, &mut rng), 0);

        let always_random = EpsilonGreedy::new(1.0).unwrap();
        let picks: Vec<usize> = (0..200)
            .map(|_| always_random.choose(&Walk, &0, actions, true, &mut rng))
            .collect();
        assert!(picks.contains(&0) && picks.contains(&1));
        let never_random = EpsilonGreedy::new(0.0).unwrap();
        assert!((0..50).all(|_| never_random.choose(&Walk, &0, actions, true, &mut rng) == 1));
        assert!(EpsilonGreedy::new(1.5).is_err());
    }

    #[test]
    fn root_parallel_merges_statistics() {
        let nim = Nim { start: 4 };
        let root = nim.root();
        let mcts = Mcts::new(nim, RandomRollout, MctsConfig::default())
            .unwrap()
            .set_seed(11);
        let stats = mcts.search_root_parallel(root, 1_001, 4).unwrap();
        assert_eq!(stats.simulations, 1_001);
        let visits: u64 = stats.actions.values().map(|s| s.visits).sum();
        assert_eq!(visits, 1_001);
        assert_eq!(stats.best_action().unwrap(), 1);
        assert_eq!(stats, mcts.search_root_parallel(root, 1_001, 4).unwrap());
        assert!(mcts.search_root_parallel(root, 10, 0).is_err());
    }

    #[test]
    fn ties_prefer_higher_mean() {
        let mut stats = RootStatistics {
            simulations: 4,
            actions: IndexMap::new(),
        };
        stats.actions.insert("a", ActionStats { visits: 2, value: 0.0 });
        stats.actions.insert("b", ActionStats { visits: 2, value: 1.0 });
        assert_eq!(stats.best_action().unwrap(), "b");
    }

    #[test]
    fn same_seed_same_tree() {
        let run = || {
            let nim = Nim { start: 6 };
            let root = nim.root();
            let mut mcts = Mcts::new(nim, RandomRollout, MctsConfig::default())
                .unwrap()
                .set_seed(5);
            mcts.search(root, 300).unwrap().root_statistics()
        };
        assert_eq!(run(), run());
    }

    proptest! {
        #[test]
        fn unvisited_child_beats_any_visited_sibling(
            parent in 1u64..1_000_000,
            visits in 1u64..1_000_000,
            value in -1e6f64..1e6,
            c in 0.0f64..10.0,
        ) {
            let visited = ucb1(parent.max(visits), visits, value, c);
            prop_assert!(ucb1(parent, 0, 0.0, c) > visited);
        }
    }
}
