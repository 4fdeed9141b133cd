// director.rs — Interpreted execution of scheduled models
//
// Drives a model through its execution lifecycle without generating code:
// behaviors registered per kind are fired in static schedule order, tokens
// move through per-receiver queues along resolved links, and the director
// tracks iteration count and model time.
//
// Preconditions: every leaf kind in the graph has a registered behavior
//                factory.
// Postconditions: after `run`, the director is in the `Wrapped` phase and
//                 each behavior's wrapup ran exactly once.
// Failure modes: schedule or resolution failures surface as `SdfError`
//                during construction; a failing fire surfaces as
//                `ExecError` after a best-effort wrapup.
// Side effects: none beyond behavior callbacks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use crate::diag::{codes, DiagLevel, Diagnostic, SdfError};
use crate::model::{ActorId, Direction, Graph, TokenType};
use crate::resolve::{resolve_links, LinkTable};
use crate::schedule::{build_schedule, ProgramSchedule, Schedule};

// ── Tokens ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    Int(i64),
    Double(f64),
    Boolean(bool),
}

impl Token {
    /// The zero value of a port type, used for dangling inputs.
    pub fn zero(ty: TokenType) -> Token {
        match ty {
            TokenType::Int => Token::Int(0),
            TokenType::Boolean => Token::Boolean(false),
            TokenType::Double | TokenType::Opaque => Token::Double(0.0),
        }
    }
}

// ── Execution errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExecError {
    pub actor: String,
    pub message: String,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution failed at actor '{}': {}", self.actor, self.message)
    }
}

impl std::error::Error for ExecError {}

// ── Behavior trait and registry ──────────────────────────────────────────

/// Scope handed to a behavior for one firing: the consumed input tokens
/// and an outbox for produced tokens. Outputs are dispatched along the
/// resolved links after the fire callback returns.
pub struct FireScope<'a> {
    actor: ActorId,
    graph: &'a Graph,
    consumed: HashMap<(usize, usize), Vec<Token>>,
    outbox: Vec<(usize, usize, Token)>,
}

impl FireScope<'_> {
    /// All tokens consumed from one input channel this firing.
    pub fn tokens(&self, port: &str, channel: usize) -> &[Token] {
        self.graph
            .find_port(self.actor, port)
            .and_then(|idx| self.consumed.get(&(idx, channel)))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// First token consumed from one input channel.
    pub fn get(&self, port: &str, channel: usize) -> Option<Token> {
        self.tokens(port, channel).first().copied()
    }

    /// Queue one token for an output channel.
    pub fn put(&mut self, port: &str, channel: usize, token: Token) {
        if let Some(idx) = self.graph.find_port(self.actor, port) {
            self.outbox.push((idx, channel, token));
        }
    }
}

/// Per-kind execution callbacks. All phases except `fire` default to
/// no-ops.
pub trait Behavior {
    fn initialize(&mut self) {}
    /// Returning false skips the firing phase of the current iteration.
    fn prefire(&mut self) -> bool {
        true
    }
    fn fire(&mut self, scope: &mut FireScope<'_>) -> Result<(), String>;
    /// Returning false requests that execution stop after this iteration.
    fn postfire(&mut self) -> bool {
        true
    }
    fn wrapup(&mut self) -> Result<(), String> {
        Ok(())
    }
}

type BehaviorFactory = Box<dyn Fn() -> Box<dyn Behavior>>;

/// Maps kind names to behavior factories.
#[derive(Default)]
pub struct BehaviorRegistry {
    factories: HashMap<String, BehaviorFactory>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: impl Fn() -> Box<dyn Behavior> + 'static,
    ) {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    fn instantiate(&self, kind: &str) -> Option<Box<dyn Behavior>> {
        self.factories.get(kind).map(|f| f())
    }
}

// ── Director ─────────────────────────────────────────────────────────────

/// Execution lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preinitialized,
    Initialized,
    Prefiring,
    Firing,
    Postfiring,
    Wrapped,
}

pub struct Director {
    graph: Graph,
    behaviors: BTreeMap<ActorId, Box<dyn Behavior>>,
    receivers: HashMap<(ActorId, usize, usize), VecDeque<Token>>,
    links: LinkTable,
    schedule: ProgramSchedule,
    phase: Phase,
    iteration: u64,
    model_time: f64,
    period: f64,
    /// 0 runs until a behavior's postfire requests a stop.
    max_iterations: u64,
    diagnostics: Vec<Diagnostic>,
}

impl Director {
    /// Build a director over a finished graph. Scheduling and link
    /// resolution run here; behavior instances are created per leaf actor.
    pub fn new(
        graph: Graph,
        behaviors: &BehaviorRegistry,
        max_iterations: u64,
        period: f64,
    ) -> Result<Director, SdfError> {
        let schedule = build_schedule(&graph)?;
        let resolution = resolve_links(&graph)?;

        let mut instances = BTreeMap::new();
        for actor in graph.leaves_preorder() {
            let kind = graph.actor(actor).kind.clone().unwrap_or_default();
            let behavior =
                behaviors
                    .instantiate(&kind)
                    .ok_or_else(|| SdfError::UnknownActorKind {
                        actor: graph.actor_path(actor),
                        kind: kind.clone(),
                    })?;
            instances.insert(actor, behavior);
        }

        let mut receivers = HashMap::new();
        for link in &resolution.table.links {
            receivers
                .entry((link.dest_actor, link.dest_port, link.dest_channel))
                .or_insert_with(VecDeque::new);
        }

        Ok(Director {
            graph,
            behaviors: instances,
            receivers,
            links: resolution.table,
            schedule,
            phase: Phase::Preinitialized,
            iteration: 0,
            model_time: 0.0,
            period,
            max_iterations,
            diagnostics: resolution.diagnostics,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn model_time(&self) -> f64 {
        self.model_time
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of tokens currently queued at one input channel.
    pub fn pending_tokens(&self, actor: ActorId, port: usize, channel: usize) -> usize {
        self.receivers
            .get(&(actor, port, channel))
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Run each behavior's initialize callback once.
    pub fn initialize(&mut self) {
        for behavior in self.behaviors.values_mut() {
            behavior.initialize();
        }
        self.phase = Phase::Initialized;
    }

    /// Execute one complete iteration: prefire all behaviors, fire the
    /// static schedule unless some prefire declined, then postfire.
    /// Returns false when execution should stop.
    pub fn iterate(&mut self) -> Result<bool, ExecError> {
        self.phase = Phase::Prefiring;
        let mut ready = true;
        for behavior in self.behaviors.values_mut() {
            ready &= behavior.prefire();
        }

        if ready {
            self.phase = Phase::Firing;
            let root = self.schedule.root.clone();
            if let Err(e) = self.fire_level(&root) {
                self.abort_with_wrapup();
                return Err(e);
            }
        }

        self.phase = Phase::Postfiring;
        let mut proceed = true;
        for behavior in self.behaviors.values_mut() {
            proceed &= behavior.postfire();
        }

        self.iteration += 1;
        self.model_time += self.period;
        if self.max_iterations > 0 && self.iteration >= self.max_iterations {
            proceed = false;
        }
        Ok(proceed)
    }

    /// Initialize, iterate to the limit, and wrap up.
    pub fn run(&mut self) -> Result<(), ExecError> {
        if self.phase == Phase::Preinitialized {
            self.initialize();
        }
        loop {
            if !self.iterate()? {
                break;
            }
        }
        self.wrapup();
        Ok(())
    }

    /// Run each behavior's wrapup exactly once. Wrapup failures are
    /// demoted to warnings so every behavior still gets its turn.
    pub fn wrapup(&mut self) {
        if self.phase == Phase::Wrapped {
            return;
        }
        let mut warnings = Vec::new();
        for (&actor, behavior) in self.behaviors.iter_mut() {
            if let Err(message) = behavior.wrapup() {
                warnings.push((actor, message));
            }
        }
        for (actor, message) in warnings {
            let path = self.graph.actor_path(actor);
            self.diagnostics.push(
                Diagnostic::new(DiagLevel::Warning, format!("wrapup failed: {}", message))
                    .with_code(codes::W0500)
                    .with_subject(path),
            );
        }
        self.phase = Phase::Wrapped;
    }

    fn abort_with_wrapup(&mut self) {
        self.wrapup();
    }

    fn fire_level(&mut self, schedule: &Schedule) -> Result<(), ExecError> {
        for firing in &schedule.firings {
            let inner = self.schedule.composites.get(&firing.actor).cloned();
            for _ in 0..firing.count {
                match &inner {
                    Some(inner) => self.fire_level(inner)?,
                    None => self.fire_leaf(firing.actor)?,
                }
            }
        }
        Ok(())
    }

    fn fire_leaf(&mut self, actor: ActorId) -> Result<(), ExecError> {
        let mut scope = FireScope {
            actor,
            graph: &self.graph,
            consumed: HashMap::new(),
            outbox: Vec::new(),
        };

        // Consume `rate` tokens per input channel. Dangling channels yield
        // zeros; a short queue on a linked channel is a scheduling fault.
        for (port_idx, port) in self.graph.actor(actor).ports.iter().enumerate() {
            if port.direction != Direction::Input {
                continue;
            }
            let channels = port.linked.len().max(1);
            for ch in 0..channels {
                let key = (actor, port_idx, ch);
                let tokens = match self.receivers.get_mut(&key) {
                    Some(queue) => {
                        if queue.len() < port.rate as usize {
                            return Err(ExecError {
                                actor: self.graph.actor_path(actor),
                                message: format!(
                                    "channel {} of port '{}' holds {} token(s), needs {}",
                                    ch,
                                    port.name,
                                    queue.len(),
                                    port.rate
                                ),
                            });
                        }
                        queue.drain(..port.rate as usize).collect()
                    }
                    None => vec![Token::zero(port.ty); port.rate as usize],
                };
                scope.consumed.insert((port_idx, ch), tokens);
            }
        }

        let path = self.graph.actor_path(actor);
        let behavior = self.behaviors.get_mut(&actor).ok_or_else(|| ExecError {
            actor: path.clone(),
            message: "no behavior instance".to_string(),
        })?;
        behavior.fire(&mut scope).map_err(|message| ExecError {
            actor: path,
            message,
        })?;

        // Dispatch the outbox: one copy per resolved destination.
        for (port_idx, channel, token) in scope.outbox {
            let dests: Vec<(ActorId, usize, usize)> = self
                .links
                .from_source(actor, port_idx, channel)
                .into_iter()
                .map(|l| (l.dest_actor, l.dest_port, l.dest_channel))
                .collect();
            for dest in dests {
                if let Some(queue) = self.receivers.get_mut(&dest) {
                    queue.push_back(token);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortSpec;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Counter {
        next: i64,
        out_rate: u32,
    }

    impl Behavior for Counter {
        fn fire(&mut self, scope: &mut FireScope<'_>) -> Result<(), String> {
            for _ in 0..self.out_rate {
                scope.put("out", 0, Token::Int(self.next));
                self.next += 1;
            }
            Ok(())
        }
    }

    struct Collector {
        seen: Rc<RefCell<Vec<Token>>>,
        in_rate: u32,
        wrapups: Rc<RefCell<u32>>,
    }

    impl Behavior for Collector {
        fn fire(&mut self, scope: &mut FireScope<'_>) -> Result<(), String> {
            let tokens = scope.tokens("in", 0);
            if tokens.len() != self.in_rate as usize {
                return Err(format!("expected {} tokens, got {}", self.in_rate, tokens.len()));
            }
            self.seen.borrow_mut().extend_from_slice(tokens);
            Ok(())
        }

        fn wrapup(&mut self) -> Result<(), String> {
            *self.wrapups.borrow_mut() += 1;
            Ok(())
        }
    }

    fn chain_graph(p_rate: i64, c_rate: i64) -> Graph {
        let mut g = Graph::new("chain");
        let p = g.add_actor("src", Some("counter".into()));
        let po = g.add_port(p, PortSpec::output("out", p_rate).typed(TokenType::Int)).unwrap();
        let c = g.add_actor("snk", Some("collector".into()));
        let ci = g.add_port(c, PortSpec::input("in", c_rate).typed(TokenType::Int)).unwrap();
        let r = g.add_relation("r0");
        g.link(p, po, r).unwrap();
        g.link(c, ci, r).unwrap();
        g
    }

    fn registry(
        p_rate: u32,
        c_rate: u32,
        seen: Rc<RefCell<Vec<Token>>>,
        wrapups: Rc<RefCell<u32>>,
    ) -> BehaviorRegistry {
        let mut reg = BehaviorRegistry::new();
        reg.register("counter", move || {
            Box::new(Counter {
                next: 0,
                out_rate: p_rate,
            })
        });
        reg.register("collector", move || {
            Box::new(Collector {
                seen: seen.clone(),
                in_rate: c_rate,
                wrapups: wrapups.clone(),
            })
        });
        reg
    }

    #[test]
    fn three_iterations_deliver_tokens_in_order_and_wrap_once() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let wrapups = Rc::new(RefCell::new(0));
        let reg = registry(2, 3, seen.clone(), wrapups.clone());
        let mut director = Director::new(chain_graph(2, 3), &reg, 3, 1.0).unwrap();
        director.run().unwrap();

        assert_eq!(director.phase(), Phase::Wrapped);
        assert_eq!(director.iteration(), 3);
        assert_eq!(*wrapups.borrow(), 1);
        // 3 iterations x 3 producer firings x 2 tokens = 18 in order.
        let tokens: Vec<i64> = seen
            .borrow()
            .iter()
            .map(|t| match t {
                Token::Int(v) => *v,
                other => panic!("unexpected token {other:?}"),
            })
            .collect();
        assert_eq!(tokens, (0..18).collect::<Vec<i64>>());
    }

    #[test]
    fn model_time_advances_by_period() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let wrapups = Rc::new(RefCell::new(0));
        let reg = registry(1, 1, seen, wrapups);
        let mut director = Director::new(chain_graph(1, 1), &reg, 4, 0.5).unwrap();
        director.run().unwrap();
        assert!((director.model_time() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_kind_fails_construction() {
        let reg = BehaviorRegistry::new();
        let err = Director::new(chain_graph(1, 1), &reg, 1, 1.0).err();
        assert!(matches!(err, Some(SdfError::UnknownActorKind { .. })));
    }

    #[test]
    fn declined_prefire_skips_firing_phase() {
        struct Reluctant;
        impl Behavior for Reluctant {
            fn prefire(&mut self) -> bool {
                false
            }
            fn fire(&mut self, _scope: &mut FireScope<'_>) -> Result<(), String> {
                Err("must not fire".to_string())
            }
        }
        let mut g = Graph::new("solo");
        let a = g.add_actor("a", Some("reluctant".into()));
        g.add_port(a, PortSpec::output("out", 1)).unwrap();
        let mut reg = BehaviorRegistry::new();
        reg.register("reluctant", || Box::new(Reluctant));
        let mut director = Director::new(g, &reg, 2, 1.0).unwrap();
        director.run().unwrap();
        assert_eq!(director.iteration(), 2);
        assert_eq!(director.phase(), Phase::Wrapped);
    }

    #[test]
    fn failing_fire_still_wraps_up() {
        struct Faulty {
            wrapped: Rc<RefCell<bool>>,
        }
        impl Behavior for Faulty {
            fn fire(&mut self, _scope: &mut FireScope<'_>) -> Result<(), String> {
                Err("boom".to_string())
            }
            fn wrapup(&mut self) -> Result<(), String> {
                *self.wrapped.borrow_mut() = true;
                Ok(())
            }
        }
        let wrapped = Rc::new(RefCell::new(false));
        let mut g = Graph::new("solo");
        let a = g.add_actor("a", Some("faulty".into()));
        g.add_port(a, PortSpec::output("out", 1)).unwrap();
        let mut reg = BehaviorRegistry::new();
        let w = wrapped.clone();
        reg.register("faulty", move || {
            Box::new(Faulty { wrapped: w.clone() })
        });
        let mut director = Director::new(g, &reg, 1, 1.0).unwrap();
        let err = director.run().unwrap_err();
        assert!(err.message.contains("boom"));
        assert!(*wrapped.borrow());
        assert_eq!(director.phase(), Phase::Wrapped);
    }

    #[test]
    fn postfire_false_stops_before_limit() {
        struct OneShot;
        impl Behavior for OneShot {
            fn fire(&mut self, _scope: &mut FireScope<'_>) -> Result<(), String> {
                Ok(())
            }
            fn postfire(&mut self) -> bool {
                false
            }
        }
        let mut g = Graph::new("solo");
        let a = g.add_actor("a", Some("oneshot".into()));
        g.add_port(a, PortSpec::output("out", 1)).unwrap();
        let mut reg = BehaviorRegistry::new();
        reg.register("oneshot", || Box::new(OneShot));
        let mut director = Director::new(g, &reg, 10, 1.0).unwrap();
        director.run().unwrap();
        assert_eq!(director.iteration(), 1);
    }
}
