//! The search driver.
//!
//! Owns the tree and the per-worker states, schedules the workers and runs
//! the selection / expansion / simulation / backup loop until a budget is
//! exhausted or an abort is signalled.
//!
//! Workers share the tree without per-node locks. In lock-free mode every
//! tree access relies on the atomic node fields; otherwise a single global
//! mutex serialises the in-tree and update phases and is released around
//! the playout phase, which dominates the per-visit cost.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use goban_core::Move;
use tracing::{debug, trace, warn};

use crate::config::{ConfigError, EarlyAbortParam, LiveGfxMode, MoveSelect, SearchConfig};
use crate::node::{NodeRef, UctNode};
use crate::progress;
use crate::record::GameRecorder;
use crate::state::{GameInfo, MoveInfo, PositionSync, SearchState, StateFactory};
use crate::stats::{AtomicF32, RunningMean, Timer};
use crate::tree::UctTree;

/// Aggregate statistics of one search.
#[derive(Debug, Default, Clone)]
pub struct SearchStats {
    pub time: f64,
    pub games: u64,
    pub games_per_second: f64,
    pub game_length: RunningMean,
    pub moves_in_tree: RunningMean,
    /// Fraction of playouts aborted (illegal collaborator move).
    pub aborted_playouts: RunningMean,
}

impl SearchStats {
    fn merge(&mut self, other: &SearchStats) {
        self.game_length.merge(&other.game_length);
        self.moves_in_tree.merge(&other.moves_in_tree);
        self.aborted_playouts.merge(&other.aborted_playouts);
    }

    pub fn log(&self) {
        debug!(
            time = format!("{:.2}", self.time).as_str(),
            games = self.games,
            games_per_second = format!("{:.1}", self.games_per_second).as_str(),
            game_length = %self.game_length,
            moves_in_tree = %self.moves_in_tree,
            aborted = format!("{:.0}%", 100.0 * self.aborted_playouts.mean()).as_str(),
            "search finished"
        );
    }
}

/// Shared, read-mostly state of one running search.
struct SearchControl<'a> {
    config: &'a SearchConfig,
    tree: &'a UctTree,
    root_filter: &'a [Move],
    recorder: Option<&'a Mutex<GameRecorder>>,
    timer: Timer,
    max_games: u64,
    max_time: f64,
    early_abort: Option<EarlyAbortParam>,
    rave_param1: f32,
    rave_param2: f32,
    num_games: AtomicU64,
    stop: AtomicBool,
    was_early_abort: AtomicBool,
    user_abort: &'a AtomicBool,
    check_interval: AtomicU64,
    games_per_second: AtomicF32,
    lock: Mutex<()>,
}

/// Per-worker scratch living outside the game state.
struct WorkerCtx {
    info: GameInfo,
    moves: Vec<MoveInfo>,
    exclude: Vec<Move>,
    first_play: Box<[usize]>,
    first_play_opp: Box<[usize]>,
    execute_failed: bool,
    out_of_mem_logged: bool,
    stats: SearchStats,
}

impl WorkerCtx {
    fn new() -> Self {
        WorkerCtx {
            info: GameInfo::default(),
            moves: Vec::new(),
            exclude: Vec::new(),
            first_play: vec![usize::MAX; Move::RANGE].into_boxed_slice(),
            first_play_opp: vec![usize::MAX; Move::RANGE].into_boxed_slice(),
            execute_failed: false,
            out_of_mem_logged: false,
            stats: SearchStats::default(),
        }
    }
}

/// The search driver, generic over the game-side state factory.
pub struct UctSearch<F: StateFactory> {
    factory: F,
    config: SearchConfig,
    tree: UctTree,
    states: Vec<F::State>,
    abort: Arc<AtomicBool>,
    root_filter: Vec<Move>,
    recorder: Option<Mutex<GameRecorder>>,
    stats: SearchStats,
    was_early_abort: bool,
}

impl<F: StateFactory> UctSearch<F> {
    pub fn new(factory: F, config: SearchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(UctSearch {
            factory,
            config,
            tree: UctTree::new(),
            states: Vec::new(),
            abort: Arc::new(AtomicBool::new(false)),
            root_filter: Vec::new(),
            recorder: None,
            stats: SearchStats::default(),
            was_early_abort: false,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SearchConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// The most recent tree. Valid until the next search or reconfiguration.
    pub fn tree(&self) -> &UctTree {
        &self.tree
    }

    /// Shared abort flag; raising it stops a running search at the next
    /// visit boundary.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// The last search stopped early because the root was decided.
    pub fn was_early_abort(&self) -> bool {
        self.was_early_abort
    }

    /// Record every finished simulation to disk. Disabled by default.
    pub fn set_game_recorder(&mut self, recorder: Option<GameRecorder>) {
        self.recorder = recorder.map(Mutex::new);
    }

    /// Push an external position into every worker state.
    pub fn synchronize_states<B>(&mut self, board: &B)
    where
        F::State: PositionSync<B>,
    {
        self.ensure_workers();
        for state in &mut self.states {
            state.synchronize(board);
        }
    }

    fn ensure_workers(&mut self) {
        let threads = self.config.num_threads;
        if self.states.len() != threads {
            self.states = (0..threads).map(|id| self.factory.create(id)).collect();
        }
        if self.tree.num_allocators() != threads {
            self.tree.create_allocators(threads);
            self.tree.set_max_nodes(self.config.max_nodes);
        } else if self.tree.max_nodes() != self.config.max_nodes {
            self.tree.set_max_nodes(self.config.max_nodes);
        }
    }

    /// A sibling tree with matching allocators and budget, for subtree
    /// extraction and reuse.
    pub fn create_sibling_tree(&self) -> UctTree {
        let mut tree = UctTree::new();
        tree.create_allocators(self.config.num_threads);
        tree.set_max_nodes(self.config.max_nodes);
        tree
    }

    /// Run a search bounded by game count and wall time.
    ///
    /// Writes the principal variation into `sequence` and returns the root
    /// mean value in [0,1] from the root side-to-move perspective, 0.5 when
    /// nothing was searched. `init_tree`, when given, is consumed as the
    /// starting tree (subtree reuse); `root_filter` lists moves the search
    /// must not consider at the root.
    pub fn search(
        &mut self,
        max_games: u64,
        max_time: f64,
        sequence: &mut Vec<Move>,
        root_filter: &[Move],
        init_tree: Option<&mut UctTree>,
        early_abort: Option<EarlyAbortParam>,
    ) -> f32 {
        self.ensure_workers();
        let timer = Timer::start();
        self.root_filter = root_filter.to_vec();
        self.abort.store(false, Ordering::Relaxed);
        self.was_early_abort = false;

        match init_tree {
            Some(init) => {
                debug_assert_eq!(init.max_nodes(), self.tree.max_nodes());
                debug_assert_eq!(init.num_allocators(), self.tree.num_allocators());
                std::mem::swap(&mut self.tree, init);
                let root = self.tree.root();
                if root.has_children() {
                    if self.tree.has_capacity(0, root.num_children()) {
                        self.tree.apply_filter(0, root, root_filter);
                    } else {
                        warn!("root filter not applied (tree reached maximum size)");
                    }
                }
            }
            None => self.tree.clear(),
        }

        self.stats = SearchStats::default();
        for state in &mut self.states {
            state.start_search();
        }

        let control = SearchControl {
            config: &self.config,
            tree: &self.tree,
            root_filter: &self.root_filter,
            recorder: self.recorder.as_ref(),
            timer,
            max_games,
            max_time,
            early_abort,
            rave_param1: 1.0 / self.config.rave_weight_initial,
            rave_param2: 1.0 / self.config.rave_weight_final,
            num_games: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            was_early_abort: AtomicBool::new(false),
            user_abort: &self.abort,
            check_interval: AtomicU64::new(1),
            games_per_second: AtomicF32::new(0.0),
            lock: Mutex::new(()),
        };

        let mut worker_stats: Vec<SearchStats> = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .states
                .iter_mut()
                .enumerate()
                .map(|(thread_id, state)| {
                    let control = &control;
                    scope.spawn(move || run_worker(control, state, thread_id))
                })
                .collect();
            for handle in handles {
                worker_stats.push(handle.join().expect("search worker panicked"));
            }
        });

        self.stats.games = control.num_games.load(Ordering::Relaxed);
        self.stats.time = timer.elapsed();
        if self.stats.time > f64::EPSILON {
            self.stats.games_per_second = self.stats.games as f64 / self.stats.time;
        }
        for stats in &worker_stats {
            self.stats.merge(stats);
        }
        self.was_early_abort = control.was_early_abort.load(Ordering::Relaxed);
        self.stats.log();

        sequence.clear();
        find_best_sequence(
            &self.tree,
            &self.config,
            control.rave_param1,
            control.rave_param2,
            sequence,
        );

        let root = self.tree.root();
        if root.has_mean() {
            root.mean()
        } else {
            0.5
        }
    }

    /// The moves the search would consider at the current root, after the
    /// root filter of the most recent search.
    pub fn generate_all_moves(&mut self, out: &mut Vec<MoveInfo>) {
        self.ensure_workers();
        out.clear();
        let state = &mut self.states[0];
        state.start_search();
        state.game_start();
        state.generate_moves(out);
        let filter = &self.root_filter;
        out.retain(|info| !filter.contains(&info.mv));
    }

    /// Ask the playout policy directly for a move at the current position,
    /// without building a tree.
    pub fn generate_policy_move(&mut self) -> Option<Move> {
        self.ensure_workers();
        let state = &mut self.states[0];
        state.start_search();
        state.game_start();
        state.start_playouts();
        state.start_playout();
        let decision = state.generate_playout_move();
        state.end_playout();
        decision.mv
    }

    /// Territory statistics of the first worker state, when collected.
    pub fn territory_statistics(&self) -> Option<&crate::stats::TerritoryStats> {
        self.states.first().and_then(|s| s.territory_statistics())
    }

    /// One-ply Monte-Carlo search: sample every root move round-robin and
    /// pick the best mean. Single-threaded; uses the first worker state.
    pub fn search_one_ply(&mut self, max_games: u64, max_time: f64) -> (Option<Move>, f32) {
        self.ensure_workers();
        let timer = Timer::start();
        let state = &mut self.states[0];
        state.start_search();
        state.game_start();
        let mut moves = Vec::new();
        state.generate_moves(&mut moves);

        let max_length = self.config.max_game_length;
        let mut statistics = vec![RunningMean::new(); moves.len()];
        let mut games: u64 = 0;
        'outer: while games < max_games && timer.elapsed() < max_time {
            for (i, info) in moves.iter().enumerate() {
                if self.abort.load(Ordering::Relaxed) {
                    break 'outer;
                }
                state.game_start();
                if state.execute(info.mv).is_err() {
                    continue;
                }
                let mut length = 1usize;
                let mut skips = 0usize;
                let mut aborted = false;
                state.start_playouts();
                state.start_playout();
                while length < max_length {
                    let decision = state.generate_playout_move();
                    let Some(mv) = decision.mv else { break };
                    if state.execute_playout(mv).is_err() {
                        aborted = true;
                        break;
                    }
                    length += 1;
                    skips += 1;
                }
                if !aborted {
                    let eval = state.evaluate();
                    let eval = if length % 2 == 0 { eval } else { 1.0 - eval };
                    statistics[i].add(eval);
                }
                state.end_playout();
                state.take_back_playout(skips);
                state.take_back_in_tree(1);
                games += 1;
            }
        }

        let mut best: Option<(Move, f32)> = None;
        for (info, stat) in moves.iter().zip(&statistics) {
            if !stat.is_defined() {
                continue;
            }
            trace!(mv = ?info.mv, mean = stat.mean(), "one-ply move value");
            if best.map_or(true, |(_, value)| stat.mean() > value) {
                best = Some((info.mv, stat.mean()));
            }
        }
        match best {
            Some((mv, value)) => (Some(mv), value),
            None => (None, 0.5),
        }
    }
}

/// Worker loop: one visit at a time until the search stops.
fn run_worker<S: SearchState>(
    control: &SearchControl<'_>,
    state: &mut S,
    thread_id: usize,
) -> SearchStats {
    let mut ctx = WorkerCtx::new();
    let use_lock = control.config.num_threads > 1 && !control.config.lock_free;
    loop {
        if control.stop.load(Ordering::Relaxed) {
            break;
        }
        if check_abort(control, &mut ctx) {
            control.stop.store(true, Ordering::Relaxed);
            break;
        }
        play_game(control, state, &mut ctx, thread_id, use_lock);
        let games = control.num_games.fetch_add(1, Ordering::Relaxed) + 1;
        on_search_iteration(control, state, thread_id, games);
    }
    ctx.stats
}

fn on_search_iteration<S: SearchState>(
    control: &SearchControl<'_>,
    state: &S,
    thread_id: usize,
    games: u64,
) {
    let mode = control.config.live_gfx;
    if mode == LiveGfxMode::None
        || thread_id != 0
        || games % control.config.live_gfx_interval != 0
    {
        return;
    }
    let mut sequence = Vec::new();
    find_best_sequence(
        control.tree,
        control.config,
        control.rave_param1,
        control.rave_param2,
        &mut sequence,
    );
    progress::emit(
        mode,
        games,
        control.tree,
        &sequence,
        state.territory_statistics(),
    );
}

/// One visit: descend, play out, back up.
fn play_game<S: SearchState>(
    control: &SearchControl<'_>,
    state: &mut S,
    ctx: &mut WorkerCtx,
    thread_id: usize,
    use_lock: bool,
) {
    let config = control.config;
    let tree = control.tree;
    state.game_start();
    ctx.info.clear(config.num_playouts);
    ctx.execute_failed = false;

    let mut guard = if use_lock {
        Some(control.lock.lock().expect("search lock poisoned"))
    } else {
        None
    };

    let is_terminal = play_in_tree(control, state, ctx, thread_id);

    if config.virtual_loss {
        tree.add_virtual_loss(&ctx.info.nodes);
    }

    // The playout phase always runs unlocked.
    drop(guard.take());

    let in_tree_moves = ctx.info.in_tree_sequence.len();
    state.start_playouts();
    for playout in 0..config.num_playouts {
        state.start_playout();
        let info = &mut ctx.info;
        info.sequences[playout].clear();
        info.sequences[playout].extend_from_slice(&info.in_tree_sequence);
        info.skip_rave[playout].clear();
        info.skip_rave[playout].resize(in_tree_moves, false);

        let mut aborted = ctx.execute_failed;
        if !aborted && !is_terminal {
            aborted = !playout_game(control, state, ctx, playout);
        }
        let info = &mut ctx.info;
        let eval = if aborted {
            None
        } else {
            let eval = state.evaluate();
            // Root side-to-move perspective: invert when the side to move
            // changed an odd number of times.
            Some(if info.sequences[playout].len() % 2 == 1 {
                1.0 - eval
            } else {
                eval
            })
        };
        info.evals[playout] = eval;
        ctx.stats.game_length.add(info.sequences[playout].len() as f32);
        ctx.stats.aborted_playouts.add(if aborted { 1.0 } else { 0.0 });
        state.end_playout();
        state.take_back_playout(info.sequences[playout].len() - in_tree_moves);

        if let (Some(recorder), Some(eval)) = (control.recorder, eval) {
            let mut recorder = recorder.lock().expect("game recorder poisoned");
            if let Err(err) = recorder.record(&ctx.info.sequences[playout], eval) {
                warn!("game record failed: {err}");
            }
        }
    }
    state.take_back_in_tree(in_tree_moves);
    ctx.stats.moves_in_tree.add(in_tree_moves as f32);

    if use_lock {
        guard = Some(control.lock.lock().expect("search lock poisoned"));
    }
    update_tree(control, &ctx.info);
    if config.rave {
        update_rave_values(control, ctx);
    }
    drop(guard);
}

/// Descend from the root, expanding at the threshold. Returns whether the
/// final position is terminal (no legal moves generated).
fn play_in_tree<S: SearchState>(
    control: &SearchControl<'_>,
    state: &mut S,
    ctx: &mut WorkerCtx,
    thread_id: usize,
) -> bool {
    let config = control.config;
    let tree = control.tree;
    let mut current_ref = NodeRef::ROOT;
    ctx.info.nodes.push(current_ref);
    let mut break_after_select = false;
    loop {
        if ctx.info.in_tree_sequence.len() >= config.max_game_length {
            return false;
        }
        let current = tree.node(current_ref);
        if !current.has_children() {
            ctx.moves.clear();
            state.generate_moves(&mut ctx.moves);
            if current_ref.is_root() && !control.root_filter.is_empty() {
                let filter = control.root_filter;
                ctx.moves.retain(|info| !filter.contains(&info.mv));
            }
            if ctx.moves.is_empty() {
                return true;
            }
            if current.move_count() < config.expand_threshold as f32 {
                return false;
            }
            if !tree.has_capacity(thread_id, ctx.moves.len()) {
                // Expansion skipped; the node keeps behaving as a leaf.
                if !ctx.out_of_mem_logged {
                    ctx.out_of_mem_logged = true;
                    debug!(max_nodes = tree.max_nodes(), "node budget reached");
                }
                return false;
            }
            state.apply_priors(&mut ctx.moves);
            tree.create_children(thread_id, current, &ctx.moves);
            break_after_select = true;
        }

        let current = tree.node(current_ref);
        let Some((child, child_ref)) = select_child(
            tree,
            config,
            control.rave_param1,
            control.rave_param2,
            current,
        ) else {
            return false;
        };
        let mv = child.mv();
        if state.execute(mv).is_err() {
            // The board refused a tree move; discard this visit's playouts.
            ctx.execute_failed = true;
            return false;
        }
        ctx.info.nodes.push(child_ref);
        ctx.info.in_tree_sequence.push(mv);
        if break_after_select {
            return false;
        }
        current_ref = child_ref;
    }
}

/// Play one simulation to its terminal condition. Returns false when the
/// playout was aborted by an illegal collaborator move.
fn playout_game<S: SearchState>(
    control: &SearchControl<'_>,
    state: &mut S,
    ctx: &mut WorkerCtx,
    playout: usize,
) -> bool {
    let info = &mut ctx.info;
    let sequence = &mut info.sequences[playout];
    let skip_rave = &mut info.skip_rave[playout];
    while sequence.len() < control.config.max_game_length {
        let decision = state.generate_playout_move();
        let Some(mv) = decision.mv else {
            return true;
        };
        if state.execute_playout(mv).is_err() {
            return false;
        }
        sequence.push(mv);
        skip_rave.push(decision.skip_rave);
    }
    true
}

/// Back the averaged playout result up the recorded path.
///
/// Values are stored from the perspective of the player who makes the move
/// into each node, so the root and odd depths take the root-perspective
/// result directly and even depths take its inverse.
fn update_tree(control: &SearchControl<'_>, info: &GameInfo) {
    let tree = control.tree;
    if control.config.virtual_loss {
        tree.remove_virtual_loss(&info.nodes);
    }
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for eval in info.evals.iter().flatten() {
        sum += eval;
        count += 1;
    }
    if count == 0 {
        return;
    }
    let eval = sum / count as f32;
    let inverse = 1.0 - eval;
    for (i, node_ref) in info.nodes.iter().enumerate() {
        let node = tree.node(*node_ref);
        let father = if i > 0 {
            Some(tree.node(info.nodes[i - 1]))
        } else {
            None
        };
        let value = if i == 0 || i % 2 == 1 { eval } else { inverse };
        tree.add_game_result(node, father, value);
    }
}

fn update_rave_values(control: &SearchControl<'_>, ctx: &mut WorkerCtx) {
    for playout in 0..control.config.num_playouts {
        update_rave_values_playout(control, ctx, playout);
    }
}

/// RAVE update for one playout: every child of every node on the path whose
/// move was later played by the side to move at that node accumulates the
/// result.
fn update_rave_values_playout(control: &SearchControl<'_>, ctx: &mut WorkerCtx, playout: usize) {
    let WorkerCtx {
        info,
        first_play,
        first_play_opp,
        ..
    } = ctx;
    let sequence = &info.sequences[playout];
    if sequence.is_empty() {
        return;
    }
    let Some(eval) = info.evals[playout] else {
        return;
    };
    let inverse = 1.0 - eval;
    let skip_rave = &info.skip_rave[playout];
    let nu_nodes = info.nodes.len();

    first_play.fill(usize::MAX);
    first_play_opp.fill(usize::MAX);

    let mut i = sequence.len() - 1;
    let mut opp = i % 2 != 0;

    // Seed the first-play tables from the playout moves below the tree.
    while i >= nu_nodes {
        if !skip_rave[i] {
            let mv = sequence[i].index();
            let table = if opp { &mut *first_play_opp } else { &mut *first_play };
            if i < table[mv] {
                table[mv] = i;
            }
        }
        opp = !opp;
        i -= 1;
    }

    loop {
        debug_assert!(i >= info.in_tree_sequence.len() || !skip_rave[i]);
        if !skip_rave[i] {
            let mv = sequence[i].index();
            {
                let table = if opp { &mut *first_play_opp } else { &mut *first_play };
                if i < table[mv] {
                    table[mv] = i;
                }
            }
            let (value, same, other) = if opp {
                (inverse, &**first_play_opp, &**first_play)
            } else {
                (eval, &**first_play, &**first_play_opp)
            };
            update_rave_at(control, info, playout, value, i, same, other);
        }
        if i == 0 {
            break;
        }
        i -= 1;
        opp = !opp;
    }
}

fn update_rave_at(
    control: &SearchControl<'_>,
    info: &GameInfo,
    playout: usize,
    eval: f32,
    i: usize,
    first_play: &[usize],
    first_play_opp: &[usize],
) {
    let tree = control.tree;
    let node = tree.node(info.nodes[i]);
    if !node.has_children() {
        return;
    }
    let len = info.sequences[playout].len();
    for child in tree.children(node) {
        let mv = child.mv();
        if mv.is_null() {
            continue;
        }
        let first = first_play[mv.index()];
        if first == usize::MAX {
            continue;
        }
        debug_assert!(first >= i);
        if control.config.rave_check_same {
            let opp_first = first_play_opp[mv.index()];
            if i <= opp_first && opp_first <= first {
                continue;
            }
        }
        let weight = if control.config.rave_weight_updates {
            2.0 - (first - i) as f32 / (len - i) as f32
        } else {
            1.0
        };
        child.add_rave_value(eval, weight);
    }
}

/// Composite termination predicate, evaluated at visit boundaries.
fn check_abort(control: &SearchControl<'_>, ctx: &mut WorkerCtx) -> bool {
    if control.user_abort.load(Ordering::Relaxed) {
        debug!("search aborted: abort flag");
        return true;
    }
    let games = control.num_games.load(Ordering::Relaxed);
    let early = check_early_abort(control);
    if games >= control.max_games {
        debug!("search aborted: max games reached");
        return true;
    }
    if let (true, Some(param)) = (early, control.early_abort) {
        if param.reduction_factor.saturating_mul(games) >= control.max_games {
            debug!("search aborted: max games reached (early abort)");
            control.was_early_abort.store(true, Ordering::Relaxed);
            return true;
        }
    }
    if games > 0 && games % control.check_interval.load(Ordering::Relaxed) == 0 {
        let time = control.timer.elapsed();
        if time > control.max_time {
            debug!("search aborted: max time reached");
            return true;
        }
        if let (true, Some(param)) = (early, control.early_abort) {
            if param.reduction_factor as f64 * time > control.max_time {
                debug!("search aborted: max time reached (early abort)");
                control.was_early_abort.store(true, Ordering::Relaxed);
                return true;
            }
        }
        update_check_interval(control, games, time);
        if control.config.move_select == MoveSelect::Count {
            let mut remaining = (control.max_games - games).saturating_sub(1) as f64;
            // Below one second of data the games/sec estimate is unreliable.
            if time > 1.0 {
                let remaining_time = control.max_time - time;
                let by_time = remaining_time * control.games_per_second.load() as f64;
                remaining = remaining.min(by_time.max(0.0));
            }
            if check_count_abort(control, ctx, remaining as f32) {
                debug!("search aborted: move cannot change anymore");
                return true;
            }
        }
    }
    false
}

/// The root is decided: its mean sits above the early-abort threshold with
/// enough games behind it.
fn check_early_abort(control: &SearchControl<'_>) -> bool {
    let Some(param) = control.early_abort else {
        return false;
    };
    let root = control.tree.root();
    root.has_mean() && root.move_count() > param.min_games && root.mean() > param.threshold
}

/// The second-best root move can no longer catch up within the remaining
/// game budget.
fn check_count_abort(control: &SearchControl<'_>, ctx: &mut WorkerCtx, remaining: f32) -> bool {
    let config = control.config;
    let tree = control.tree;
    let root = tree.root();
    let Some(best) = find_best_child(
        tree,
        config,
        control.rave_param1,
        control.rave_param2,
        root,
        &[],
    ) else {
        return false;
    };
    ctx.exclude.clear();
    ctx.exclude.push(best.mv());
    let Some(second) = find_best_child(
        tree,
        config,
        control.rave_param1,
        control.rave_param2,
        root,
        &ctx.exclude,
    ) else {
        return false;
    };
    second.move_count() + remaining <= best.move_count()
}

/// Retune the clock-poll interval to roughly one check per 0.1s.
fn update_check_interval(control: &SearchControl<'_>, games: u64, time: f64) {
    if time < f64::EPSILON {
        return;
    }
    let wanted_time_diff = if control.max_time > 1.0 {
        0.1
    } else {
        0.1 * control.max_time
    };
    if time < wanted_time_diff / 10.0 {
        let interval = control.check_interval.load(Ordering::Relaxed);
        control
            .check_interval
            .store(interval.saturating_mul(2), Ordering::Relaxed);
        return;
    }
    let games_per_second = games as f64 / time;
    control.games_per_second.store(games_per_second as f32);
    let per_thread = games_per_second / control.config.num_threads as f64;
    let interval = (wanted_time_diff * per_thread) as u64;
    control
        .check_interval
        .store(interval.max(1), Ordering::Relaxed);
}

/// Weighted mixture of the move value and the RAVE value. Falls back to the
/// first-play urgency when neither is defined.
pub(crate) fn value_estimate(
    config: &SearchConfig,
    rave_param1: f32,
    rave_param2: f32,
    child: &UctNode,
) -> f32 {
    let mut value = 0.0f32;
    let mut weight_sum = 0.0f32;
    if child.has_mean() {
        let weight = child.move_count();
        value += weight * child.mean();
        weight_sum += weight;
    }
    if config.rave && child.has_rave_value() {
        let rave_count = child.rave_count();
        let weight = rave_count / (rave_param1 + rave_param2 * rave_count);
        value += weight * child.rave_value();
        weight_sum += weight;
    }
    if weight_sum > 0.0 {
        value / weight_sum
    } else {
        config.first_play_urgency
    }
}

/// RAVE-blended value: `beta * rave + (1 - beta) * mean`, with `beta`
/// sliding to 0 as the move count grows.
pub(crate) fn value_estimate_rave(
    config: &SearchConfig,
    rave_param1: f32,
    rave_param2: f32,
    child: &UctNode,
) -> f32 {
    debug_assert!(config.rave);
    let has_rave = child.has_rave_value();
    if child.has_mean() {
        let move_value = child.mean();
        if has_rave {
            let move_count = child.move_count();
            let rave_count = child.rave_count();
            let beta =
                rave_count / (move_count * (rave_param1 + rave_param2 * rave_count) + rave_count);
            beta * child.rave_value() + (1.0 - beta) * move_value
        } else {
            // Only possible under lock-free multi-threading: the move value
            // landed before the matching RAVE value.
            move_value
        }
    } else if has_rave {
        child.rave_value()
    } else {
        config.first_play_urgency
    }
}

/// Selection score: the value estimate plus the exploration bias term.
pub(crate) fn get_bound(
    config: &SearchConfig,
    rave_param1: f32,
    rave_param2: f32,
    log_pos_count: f32,
    child: &UctNode,
) -> f32 {
    let value = if config.rave {
        value_estimate_rave(config, rave_param1, rave_param2, child)
    } else {
        value_estimate(config, rave_param1, rave_param2, child)
    };
    if config.no_bias_term || config.bias_constant == 0.0 {
        value
    } else {
        value + config.bias_constant * (log_pos_count / (child.move_count() + 1.0)).sqrt()
    }
}

/// Highest-bound child; ties go to the lower child index.
fn select_child<'a>(
    tree: &'a UctTree,
    config: &SearchConfig,
    rave_param1: f32,
    rave_param2: f32,
    node: &UctNode,
) -> Option<(&'a UctNode, NodeRef)> {
    let (first, count) = node.children_info();
    let children = tree.child_slice(first, count);
    if children.is_empty() {
        return None;
    }
    let pos_count = node.pos_count();
    if pos_count == 0.0 {
        return Some((&children[0], UctTree::child_ref(first, 0)));
    }
    let log_pos_count = pos_count.ln();
    let mut best = 0usize;
    let mut best_bound = f32::NEG_INFINITY;
    for (i, child) in children.iter().enumerate() {
        let bound = get_bound(config, rave_param1, rave_param2, log_pos_count, child);
        if bound > best_bound {
            best = i;
            best_bound = bound;
        }
    }
    Some((&children[best], UctTree::child_ref(first, best)))
}

/// Best root-answer child under the configured move-select rule.
pub(crate) fn find_best_child<'a>(
    tree: &'a UctTree,
    config: &SearchConfig,
    rave_param1: f32,
    rave_param2: f32,
    node: &UctNode,
    exclude: &[Move],
) -> Option<&'a UctNode> {
    let mut best: Option<(&UctNode, f32)> = None;
    for child in tree.children(node) {
        if exclude.contains(&child.mv()) {
            continue;
        }
        let rave_fallback = matches!(config.move_select, MoveSelect::Bound | MoveSelect::Estimate)
            && config.rave
            && child.has_rave_value();
        if !child.has_mean() && !rave_fallback {
            continue;
        }
        let value = match config.move_select {
            MoveSelect::Value => child.mean(),
            MoveSelect::Count => child.move_count(),
            MoveSelect::Bound => {
                let log_pos = node.pos_count().max(1.0).ln();
                get_bound(config, rave_param1, rave_param2, log_pos, child)
            }
            MoveSelect::Estimate => value_estimate(config, rave_param1, rave_param2, child),
        };
        let better = match best {
            None => true,
            Some((best_child, best_value)) => {
                value > best_value
                    // Equal counts are broken by the better mean; further
                    // ties stay with the lower child index.
                    || (config.move_select == MoveSelect::Count
                        && value == best_value
                        && child.mean() > best_child.mean())
            }
        };
        if better {
            best = Some((child, value));
        }
    }
    best.map(|(child, _)| child)
}

/// Principal variation under the move-select rule.
pub(crate) fn find_best_sequence(
    tree: &UctTree,
    config: &SearchConfig,
    rave_param1: f32,
    rave_param2: f32,
    sequence: &mut Vec<Move>,
) {
    sequence.clear();
    let mut current = tree.root();
    loop {
        let Some(child) = find_best_child(tree, config, rave_param1, rave_param2, current, &[])
        else {
            break;
        };
        sequence.push(child.mv());
        if !child.has_children() {
            break;
        }
        current = child;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PlayoutMove;
    use goban_core::{Color, IllegalMove};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    /// Synthetic game for driving the search: five moves are always legal,
    /// the game ends after six plies, and the first move of the game decides
    /// it. `WINNER` wins for the root player, everything else loses.
    const WINNER: usize = 2;
    const NUM_MOVES: usize = 5;
    const GAME_LENGTH: usize = 6;

    struct SyntheticState {
        moves_played: Vec<Move>,
        rng: ChaCha20Rng,
    }

    impl SyntheticState {
        fn new(seed: u64) -> Self {
            SyntheticState {
                moves_played: Vec::new(),
                rng: ChaCha20Rng::seed_from_u64(seed),
            }
        }

        fn root_wins(&self) -> bool {
            self.moves_played
                .first()
                .is_some_and(|mv| mv.index() == WINNER)
        }
    }

    impl SearchState for SyntheticState {
        fn start_search(&mut self) {
            self.moves_played.clear();
        }

        fn game_start(&mut self) {
            self.moves_played.clear();
        }

        fn generate_moves(&mut self, out: &mut Vec<MoveInfo>) {
            if self.moves_played.len() >= GAME_LENGTH {
                return;
            }
            for i in 0..NUM_MOVES {
                out.push(MoveInfo::new(Move::from_index(i)));
            }
        }

        fn apply_priors(&mut self, _moves: &mut [MoveInfo]) {}

        fn execute(&mut self, mv: Move) -> Result<(), IllegalMove> {
            self.moves_played.push(mv);
            Ok(())
        }

        fn take_back_in_tree(&mut self, n: usize) {
            let len = self.moves_played.len() - n;
            self.moves_played.truncate(len);
        }

        fn generate_playout_move(&mut self) -> PlayoutMove {
            if self.moves_played.len() >= GAME_LENGTH {
                return PlayoutMove::finish();
            }
            let i = self.rng.gen_range(0..NUM_MOVES);
            PlayoutMove::play(Move::from_index(i))
        }

        fn execute_playout(&mut self, mv: Move) -> Result<(), IllegalMove> {
            self.moves_played.push(mv);
            Ok(())
        }

        fn take_back_playout(&mut self, n: usize) {
            let len = self.moves_played.len() - n;
            self.moves_played.truncate(len);
        }

        fn evaluate(&mut self) -> f32 {
            // From the side to move at the current position.
            let root_to_move = self.moves_played.len() % 2 == 0;
            let root_value = if self.root_wins() { 1.0 } else { 0.0 };
            if root_to_move {
                root_value
            } else {
                1.0 - root_value
            }
        }

        fn to_play(&self) -> Color {
            if self.moves_played.len() % 2 == 0 {
                Color::Black
            } else {
                Color::White
            }
        }
    }

    struct SyntheticFactory {
        seed: u64,
    }

    impl StateFactory for SyntheticFactory {
        type State = SyntheticState;

        fn create(&self, thread_id: usize) -> SyntheticState {
            SyntheticState::new(self.seed ^ (thread_id as u64).wrapping_mul(0x9e3779b97f4a7c15))
        }
    }

    fn test_search(config: SearchConfig) -> UctSearch<SyntheticFactory> {
        UctSearch::new(SyntheticFactory { seed: 7 }, config).unwrap()
    }

    #[test]
    fn test_finds_winning_move() {
        let config = SearchConfig::for_testing().with_max_games(500);
        let mut search = test_search(config);
        let mut sequence = Vec::new();
        let value = search.search(500, f64::MAX, &mut sequence, &[], None, None);

        assert_eq!(sequence.first(), Some(&Move::from_index(WINNER)));
        assert!(value > 0.5, "root value {value} should favor the winner");

        let tree = search.tree();
        let winner = tree
            .find_child(tree.root(), Move::from_index(WINNER))
            .unwrap();
        assert!(winner.mean() > 0.9, "winning child mean {}", winner.mean());
        for child in tree.children(tree.root()) {
            assert!(winner.move_count() >= child.move_count());
        }
    }

    #[test]
    fn test_zero_games_returns_neutral_value() {
        let mut search = test_search(SearchConfig::for_testing());
        let mut sequence = Vec::new();
        let value = search.search(0, f64::MAX, &mut sequence, &[], None, None);
        assert_eq!(value, 0.5);
        assert!(sequence.is_empty());
        assert_eq!(search.tree().num_nodes(), 1);
    }

    #[test]
    fn test_game_budget_respected() {
        // Value-based answer selection so the count-based early abort
        // cannot stop the search before the budget is spent.
        let config = SearchConfig::for_testing().with_move_select(MoveSelect::Value);
        let mut search = test_search(config);
        let mut sequence = Vec::new();
        search.search(100, f64::MAX, &mut sequence, &[], None, None);
        assert_eq!(search.stats().games, 100);
        let root = search.tree().root();
        assert_eq!(root.move_count(), 100.0);
        let children_sum: f32 = search
            .tree()
            .children(root)
            .iter()
            .map(|c| c.move_count())
            .sum();
        assert!(children_sum <= 100.0);
        assert!(root.pos_count() >= children_sum);
    }

    #[test]
    fn test_single_thread_determinism() {
        // Value-based answer selection: the count-based abort samples the
        // wall clock and would make the visit total run-dependent.
        let run = || {
            let config = SearchConfig::for_testing().with_move_select(MoveSelect::Value);
            let mut search = test_search(config);
            let mut sequence = Vec::new();
            let value = search.search(300, f64::MAX, &mut sequence, &[], None, None);
            let counts: Vec<f32> = search
                .tree()
                .children(search.tree().root())
                .iter()
                .map(|c| c.move_count())
                .collect();
            (value, sequence, counts)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_huge_expand_threshold_degenerates_to_rollouts() {
        let config = SearchConfig::for_testing().with_expand_threshold(1_000_000);
        let mut search = test_search(config);
        let mut sequence = Vec::new();
        let value = search.search(200, f64::MAX, &mut sequence, &[], None, None);
        // No expansion: only the root exists and its mean is defined.
        assert_eq!(search.tree().num_nodes(), 1);
        assert!((0.0..=1.0).contains(&value));
        assert_eq!(search.tree().root().move_count(), 200.0);
    }

    #[test]
    fn test_tiny_node_budget_never_fatal() {
        let config = SearchConfig::for_testing().with_max_nodes(8);
        let mut search = test_search(config);
        let mut sequence = Vec::new();
        let value = search.search(300, f64::MAX, &mut sequence, &[], None, None);
        assert!((0.0..=1.0).contains(&value));
        assert!(search.tree().num_nodes() <= 9);
        search.tree().check_consistency().unwrap();
    }

    #[test]
    fn test_node_budget_respected_across_searches() {
        let config = SearchConfig::for_testing().with_max_nodes(100);
        let mut search = test_search(config);
        let mut sequence = Vec::new();
        for _ in 0..3 {
            search.search(200, f64::MAX, &mut sequence, &[], None, None);
            assert!(search.tree().num_nodes() <= 101);
        }
    }

    #[test]
    fn test_root_filter_applied() {
        let mut search = test_search(SearchConfig::for_testing());
        let mut sequence = Vec::new();
        let filter = [Move::from_index(WINNER)];
        search.search(300, f64::MAX, &mut sequence, &filter, None, None);

        let tree = search.tree();
        let moves: Vec<Move> = tree.children(tree.root()).iter().map(|c| c.mv()).collect();
        assert_eq!(moves.len(), NUM_MOVES - 1);
        assert!(!moves.contains(&Move::from_index(WINNER)));
        assert_ne!(sequence.first(), Some(&Move::from_index(WINNER)));
    }

    #[test]
    fn test_multithreaded_lock_free_invariants() {
        let config = SearchConfig::for_testing()
            .with_threads(4)
            .with_lock_free(true)
            .with_max_games(2000);
        let mut search = test_search(config);
        let mut sequence = Vec::new();
        let value = search.search(2000, f64::MAX, &mut sequence, &[], None, None);
        assert!((0.0..=1.0).contains(&value));
        search.tree().check_consistency().unwrap();
        assert_eq!(sequence.first(), Some(&Move::from_index(WINNER)));
    }

    #[test]
    fn test_multithreaded_locked_search() {
        let config = SearchConfig::for_testing()
            .with_threads(2)
            .with_max_games(1000);
        let mut search = test_search(config);
        let mut sequence = Vec::new();
        search.search(1000, f64::MAX, &mut sequence, &[], None, None);
        search.tree().check_consistency().unwrap();
        assert_eq!(sequence.first(), Some(&Move::from_index(WINNER)));
    }

    #[test]
    fn test_virtual_loss_search() {
        let mut config = SearchConfig::for_testing()
            .with_threads(4)
            .with_lock_free(true);
        config.virtual_loss = true;
        let mut search = test_search(config);
        let mut sequence = Vec::new();
        search.search(2000, f64::MAX, &mut sequence, &[], None, None);
        search.tree().check_consistency().unwrap();
        assert_eq!(sequence.first(), Some(&Move::from_index(WINNER)));
    }

    #[test]
    fn test_abort_flag_stops_search() {
        let mut search = test_search(SearchConfig::for_testing());
        let abort = search.abort_flag();
        let setter = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            abort.store(true, Ordering::Relaxed);
        });
        let mut sequence = Vec::new();
        // Unbounded budgets: only the abort flag can stop this search.
        let value = search.search(u64::MAX, f64::MAX, &mut sequence, &[], None, None);
        setter.join().unwrap();
        assert!((0.0..=1.0).contains(&value));
        assert!(search.stats().games > 0);
    }

    #[test]
    fn test_early_abort_band() {
        // The synthetic root value converges to ~0.2 from random play, so
        // an absurdly low threshold triggers the early abort immediately.
        let param = EarlyAbortParam {
            threshold: 0.0,
            min_games: 10.0,
            reduction_factor: 1_000_000,
        };
        let mut search = test_search(SearchConfig::for_testing());
        let mut sequence = Vec::new();
        search.search(10_000, f64::MAX, &mut sequence, &[], None, Some(param));
        assert!(search.was_early_abort());
        assert!(search.stats().games < 10_000);
    }

    #[test]
    fn test_reuse_via_init_tree() {
        let config = SearchConfig::for_testing().with_move_select(MoveSelect::Value);
        let mut search = test_search(config);
        let mut sequence = Vec::new();
        search.search(400, f64::MAX, &mut sequence, &[], None, None);
        let played = sequence[0];
        let child = search
            .tree()
            .find_child(search.tree().root(), played)
            .unwrap();
        let child_count = child.move_count();
        let child_pos = child.pos_count();

        let mut init = search.create_sibling_tree();
        assert!(search
            .tree()
            .extract_for_moves(&mut init, &[played], f64::MAX, None));
        assert_eq!(init.root().move_count(), child_count);
        assert_eq!(init.root().pos_count(), child_pos);

        search.search(100, f64::MAX, &mut sequence, &[], Some(&mut init), None);
        let root = search.tree().root();
        assert!(root.move_count() >= child_count + 100.0 - 1.0);
    }

    #[test]
    fn test_generate_all_moves_applies_filter() {
        let mut search = test_search(SearchConfig::for_testing());
        let mut sequence = Vec::new();
        let filter = [Move::from_index(0)];
        search.search(50, f64::MAX, &mut sequence, &filter, None, None);
        let mut moves = Vec::new();
        search.generate_all_moves(&mut moves);
        assert_eq!(moves.len(), NUM_MOVES - 1);
        assert!(moves.iter().all(|info| info.mv != Move::from_index(0)));
    }

    #[test]
    fn test_one_ply_search_prefers_winner() {
        let mut search = test_search(SearchConfig::for_testing());
        let (best, value) = search.search_one_ply(500, f64::MAX);
        assert_eq!(best, Some(Move::from_index(WINNER)));
        assert!(value > 0.9);
    }

    #[test]
    fn test_selection_prefers_unvisited_child() {
        let config = SearchConfig::default();
        let mut tree = UctTree::new();
        tree.create_allocators(1);
        tree.set_max_nodes(10);
        let moves = [
            MoveInfo::new(Move::from_index(0)),
            MoveInfo::new(Move::from_index(1)),
        ];
        tree.create_children(0, tree.root(), &moves);
        tree.root().set_pos_count(10.0);
        let children = tree.children(tree.root());
        // First child visited with a mediocre value, second cold.
        for _ in 0..10 {
            children[0].add_game_result(0.4);
        }
        let (child, _) = select_child(&tree, &config, 1.0, 1.0 / 5000.0, tree.root()).unwrap();
        assert_eq!(child.mv(), Move::from_index(1));
    }

    #[test]
    fn test_find_best_child_by_count_vs_value() {
        let mut config = SearchConfig::default();
        let mut tree = UctTree::new();
        tree.create_allocators(1);
        tree.set_max_nodes(10);
        let moves = [
            MoveInfo::new(Move::from_index(0)),
            MoveInfo::new(Move::from_index(1)),
        ];
        tree.create_children(0, tree.root(), &moves);
        let children = tree.children(tree.root());
        // Child 0: many visits, low value. Child 1: few visits, high value.
        for _ in 0..20 {
            children[0].add_game_result(0.3);
        }
        for _ in 0..5 {
            children[1].add_game_result(0.9);
        }

        config.move_select = MoveSelect::Count;
        let by_count = find_best_child(&tree, &config, 1.0, 1.0, tree.root(), &[]).unwrap();
        assert_eq!(by_count.mv(), Move::from_index(0));

        config.move_select = MoveSelect::Value;
        let by_value = find_best_child(&tree, &config, 1.0, 1.0, tree.root(), &[]).unwrap();
        assert_eq!(by_value.mv(), Move::from_index(1));
    }
}
