//! Agent traits and execution contexts for both single-threaded and multi-threaded simulations.
//! Provides `Agent` trait for single-threaded worlds and `ThreadedAgent` for multi-threaded planets,
//! along with their respective context structures that manage state and inter-agent communication.
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use bytemuck::{Pod, Zeroable};
use mesocarp::{
    comms::mailbox::{Message, ThreadedMessengerUser},
    logging::journal::Journal,
};

use crate::{
    objects::{AntiMsg, CloneOrder, Decision, Event, Mail, Msg, StatePacket, Transfer},
    AikaError,
};

pub struct AgentSupport<const SLOTS: usize, T: Message> {
    pub mailbox: Option<ThreadedMessengerUser<SLOTS, T>>,
    pub state: Option<Journal>,
}

impl<const SLOTS: usize, T: Message> AgentSupport<SLOTS, T> {
    pub fn new(mail: Option<ThreadedMessengerUser<SLOTS, T>>, arena_size: Option<usize>) -> Self {
        let state = if arena_size.is_some() {
            let size = arena_size.unwrap();
            Some(Journal::init(size))
        } else {
            None
        };
        Self {
            mailbox: mail,
            state,
        }
    }
}

pub struct WorldContext<const SLOTS: usize, T: Message> {
    pub agent_states: Vec<AgentSupport<SLOTS, T>>,
    pub world_state: Journal,
    pub time: u64,
}

impl<const SLOTS: usize, T: Message> WorldContext<SLOTS, T> {
    pub fn new(world_arena_size: usize) -> Self {
        Self {
            agent_states: Vec::new(),
            world_state: Journal::init(world_arena_size),
            time: 0,
        }
    }
}

/// Shared context local `ThreadedAgents` mutate within a `Planet` thread
pub struct PlanetContext<const INTER_SLOTS: usize, MessageType: Pod + Zeroable + Clone> {
    /// state of each `ThreadedAgent` on the `Planet`
    pub agent_states: Vec<Journal>,
    /// `Planet` global state
    pub world_state: Journal,
    /// current time
    pub time: u64,
    /// world ID in the interplanetary messaging system
    pub world_id: usize,
    /// Counter for unprocessed messages in the system
    pub counter: Arc<AtomicUsize>,
    /// interplanetary messaging system user interface
    pub user: ThreadedMessengerUser<INTER_SLOTS, Mail<MessageType>>,
    /// all anti messages generated by this `Planet`
    pub anti_msgs: Journal,
    /// scratch bitfield cleared before every `step`/`read_message` call, mutated by the
    /// model's forward handler to record which branch of its own logic ran (spec.md §4.4).
    pub bitfield: u32,
    /// decision recorded by `store_decision`, consumed by the clone director at the next
    /// GVT hook. Shared with the `Galaxy` so the director can read it without a round trip.
    decision: Arc<Mutex<Option<Decision>>>,
    /// set by `trigger_hook_now`, cleared by `trigger_hook_now_rev`; tells the `Galaxy` to
    /// invoke the registered GVT hook on every `Planet` at the next GVT advance.
    hook_trigger: Arc<AtomicBool>,
    /// set by the clone director once it has arbitrated a pending `Decision`; consumed
    /// by this `Planet`'s own run loop, never by the model directly.
    clone_order: Arc<Mutex<Option<CloneOrder>>>,
}

impl<const INTER_SLOTS: usize, MessageType: Pod + Zeroable + Clone>
    PlanetContext<INTER_SLOTS, MessageType>
{
    /// Spawn a new context environment for a `Planet`.
    pub fn new(
        world_arena_size: usize,
        anti_msg_arena_size: usize,
        user: ThreadedMessengerUser<INTER_SLOTS, Mail<MessageType>>,
        world_id: usize,
        counter: Arc<AtomicUsize>,
    ) -> Self {
        Self::with_director_slots(
            world_arena_size,
            anti_msg_arena_size,
            user,
            world_id,
            counter,
            Arc::new(Mutex::new(None)),
            Arc::new(AtomicBool::new(false)),
            Arc::new(Mutex::new(None)),
        )
    }

    /// Spawn a context wired to the director's shared decision slot, hook-trigger flag,
    /// and clone-order slot.
    #[allow(clippy::too_many_arguments)]
    pub fn with_director_slots(
        world_arena_size: usize,
        anti_msg_arena_size: usize,
        user: ThreadedMessengerUser<INTER_SLOTS, Mail<MessageType>>,
        world_id: usize,
        counter: Arc<AtomicUsize>,
        decision: Arc<Mutex<Option<Decision>>>,
        hook_trigger: Arc<AtomicBool>,
        clone_order: Arc<Mutex<Option<CloneOrder>>>,
    ) -> Self {
        Self {
            agent_states: Vec::new(),
            world_state: Journal::init(world_arena_size),
            time: 0,
            user,
            world_id,
            counter,
            anti_msgs: Journal::init(anti_msg_arena_size),
            bitfield: 0,
            decision,
            hook_trigger,
            clone_order,
        }
    }

    /// Initialize a `ThreadedAgent`'s state `Journal`.
    pub fn init_agent_contexts(&mut self, state_arena_size: usize) {
        self.agent_states.push(Journal::init(state_arena_size));
    }
    /// Send a `Msg` to another `Planet`
    pub fn send_mail(&mut self, msg: Msg<MessageType>, to_world: usize) -> Result<(), AikaError> {
        let anti = AntiMsg::new(msg.sent, msg.recv, msg.from, msg.to);
        let outgoing = Mail::write_letter(Transfer::Msg(msg), self.world_id, Some(to_world));
        self.user.send(outgoing)?;
        self.counter.fetch_add(1, Ordering::SeqCst);
        let stays: Mail<MessageType> =
            Mail::write_letter(Transfer::AntiMsg(anti), self.world_id, Some(to_world));
        self.anti_msgs.write(stays, self.time, None);
        Ok(())
    }

    /// Clear the control-flow bitfield. Called by the scheduler before every forward
    /// handler invocation (spec.md §4.4 FORWARD: "clear the caller bitfield").
    pub fn clear_bitfield(&mut self) {
        self.bitfield = 0;
    }

    /// Record a branch-point decision for possible clone/branch at the next GVT hook
    /// (spec.md §4.6 "Decision recording"). Does not itself request the hook fire —
    /// callers must also call `trigger_hook_now`.
    pub fn store_decision(&mut self, agent: usize, first_choice: u8, second_choice: u8) {
        let mut slot = self.decision.lock().unwrap();
        *slot = Some(Decision::new(agent, first_choice, second_choice, self.time));
    }

    /// Clear a previously stored decision. Called when a rollback undoes the forward
    /// handler that recorded it.
    pub fn store_decision_rev(&mut self) {
        let mut slot = self.decision.lock().unwrap();
        *slot = None;
    }

    /// Ask the `Galaxy` to invoke the registered GVT hook on every `Planet` at the next
    /// GVT advance (spec.md §4.5).
    pub fn trigger_hook_now(&mut self) {
        self.hook_trigger.store(true, Ordering::Release);
    }

    /// Clear a previously set hook trigger. Idempotent against an already-clear flag,
    /// as spec.md §4.5 requires.
    pub fn trigger_hook_now_rev(&mut self) {
        self.hook_trigger.store(false, Ordering::Release);
    }

    /// Ship one agent's exported state to `to_world` as part of a clone (spec.md §4.6
    /// step 3). Reuses the same interplanetary `Mail` transport as `send_mail` rather
    /// than a dedicated channel, so the receiving `Planet` picks it up through its
    /// regular `poll_interplanetary_messenger` loop.
    pub fn send_state(&mut self, agent: usize, data: &[u8], to_world: usize) -> Result<(), AikaError> {
        let packet = StatePacket::new(self.world_id, to_world, self.time, agent, data);
        let outgoing = Mail::write_letter(Transfer::State(packet), self.world_id, Some(to_world));
        self.user.send(outgoing)?;
        self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn decision_slot(&self) -> Arc<Mutex<Option<Decision>>> {
        Arc::clone(&self.decision)
    }

    pub(crate) fn hook_trigger_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.hook_trigger)
    }

    pub(crate) fn clone_order_slot(&self) -> Arc<Mutex<Option<CloneOrder>>> {
        Arc::clone(&self.clone_order)
    }
}

/// An `Agent` is an independent logical process that can interact with a single threaded `st::World`
pub trait Agent<const SLOTS: usize, T: Message> {
    fn step(&mut self, context: &mut WorldContext<SLOTS, T>, agent_id: usize) -> Event;
}

/// A `ThreadedAgent` is an independent logical process that belongs to a `Planet` and can schedule events,
/// send messages, and interact with that `Planet`'s `PlanetContext`.
pub trait ThreadedAgent<const SLOTS: usize, MessageType: Pod + Zeroable + Clone> {
    fn step(&mut self, context: &mut PlanetContext<SLOTS, MessageType>, agent_id: usize) -> Event;
    fn read_message(
        &mut self,
        context: &mut PlanetContext<SLOTS, MessageType>,
        msg: Msg<MessageType>,
        agent_id: usize,
    );

    /// Called once per agent when the `Planet` reaches terminal time (spec.md §4.4
    /// FINALIZE). Default no-op; models with teardown reporting (e.g. HighLife's
    /// final grid dump) override it.
    fn finalize(&mut self, _context: &mut PlanetContext<SLOTS, MessageType>, _agent_id: usize) {}

    /// Called by the clone director on both the source and destination world after a
    /// successful clone, with the branch tag each world should resume along (spec.md
    /// §4.6 "Divergence"). Default no-op; only agents that call `store_decision` need
    /// to implement this.
    fn resume_branch(
        &mut self,
        _context: &mut PlanetContext<SLOTS, MessageType>,
        _agent_id: usize,
        _branch: u8,
    ) {
    }

    /// Serialize this agent's state for the clone director to ship to a destination
    /// world (spec.md §4.6 step 3). Default returns an empty buffer, for agents with
    /// no state worth forking (or whose state lives entirely in `PlanetContext`'s
    /// journals rather than the agent struct itself).
    fn export_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Apply state shipped by the clone director. Called on the destination world
    /// before `resume_branch` observes the forked state.
    fn import_state(&mut self, _bytes: &[u8]) {}

    /// Undo the effects of a previously processed `step` or `read_message` call
    /// (spec.md §4.4 ROLLBACK: "invoke reverse(lp_state, bitfield_saved, msg, lp_handle)").
    /// Called by the `Planet` in strict LIFO order against its own per-agent processed
    /// log whenever a straggler forces a rollback past this event's commit time. Models
    /// that keep their own undo stack (rather than relying on `PlanetContext`'s journals)
    /// pop it here, and must also call `RngStream::reverse_unif` for every draw the
    /// forward handler made (spec.md §4.2). Default no-op, for agents with no reversible
    /// side effects of their own.
    fn reverse(&mut self, _context: &mut PlanetContext<SLOTS, MessageType>, _agent_id: usize) {}

    /// Fossil-collect a previously processed event once GVT has passed its commit time
    /// (spec.md §4.4 COMMIT). Called at most once per processed event, in the order
    /// events were originally processed. Default no-op; only agents whose undo stack
    /// would otherwise grow unboundedly need to implement it.
    fn commit(&mut self, _context: &mut PlanetContext<SLOTS, MessageType>, _agent_id: usize) {}
}
